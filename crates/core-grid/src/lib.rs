//! The authoritative voxel matrix: occupancy flags, groundedness tracking,
//! and cached aggregates.
//!
//! Each cell carries four independent flags. FULL is matter, MODEL marks the
//! target shape (immutable after load), BOT marks a cell a bot currently
//! occupies, and GROUNDED is maintained incrementally for FULL cells that
//! are path-connected through FULL 6-neighbors to the floor. A sparse
//! `ungrounded` index holds FULL cells placed under high harmonics that the
//! grounded frontier has not yet reached; it must drain before harmonics may
//! return to low.
//!
//! Aggregate counts and the model bounding box are cached and recomputed
//! lazily; every write path invalidates the caches it can affect. The
//! matrix is single-threaded by design (the step engine serializes all
//! access), which is why plain `Cell`s are enough for the caches.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;

use bitflags::bitflags;
use core_geom::Coord;
use thiserror::Error;
use tracing::trace;

mod model;
pub use model::MODEL_SIDE_RANGE;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("coordinate {coord} outside matrix of side {side}")]
    OutOfBounds { coord: Coord, side: i32 },
    #[error("malformed model file: {0}")]
    BadModel(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

bitflags! {
    /// Per-cell flag set. A cell with no flags is void.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Voxel: u8 {
        const FULL     = 1 << 0;
        const GROUNDED = 1 << 1;
        const MODEL    = 1 << 2;
        const BOT      = 1 << 3;
    }
}

impl Voxel {
    pub fn is_full(self) -> bool {
        self.contains(Voxel::FULL)
    }

    pub fn is_grounded(self) -> bool {
        self.contains(Voxel::GROUNDED)
    }

    pub fn is_model(self) -> bool {
        self.contains(Voxel::MODEL)
    }

    pub fn is_bot(self) -> bool {
        self.contains(Voxel::BOT)
    }

    /// Void means traversable: neither matter nor a bot.
    pub fn is_void(self) -> bool {
        !self.intersects(Voxel::FULL | Voxel::BOT)
    }
}

/// Tight axis-aligned bounding box of the MODEL cells; `max` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: Coord,
    pub max: Coord,
}

/// Dense cubic voxel matrix of side R, row-major with y slowest, x middle,
/// z fastest (the model-file enumeration order).
pub struct Matrix {
    side: i32,
    cells: Vec<Voxel>,
    ungrounded: HashSet<Coord>,
    nfull: Cell<Option<usize>>,
    nmodel: Cell<Option<usize>>,
    ngrounded: Cell<Option<usize>>,
    bounds: Cell<Option<Bounds>>,
}

impl Matrix {
    /// An all-void matrix of side `r`.
    pub fn empty(r: i32) -> Self {
        Self {
            side: r,
            cells: vec![Voxel::empty(); (r as usize).pow(3)],
            ungrounded: HashSet::new(),
            nfull: Cell::new(None),
            nmodel: Cell::new(None),
            ngrounded: Cell::new(None),
            bounds: Cell::new(None),
        }
    }

    pub fn side(&self) -> i32 {
        self.side
    }

    pub fn in_range(&self, c: Coord) -> bool {
        c.in_matrix(self.side)
    }

    fn index(&self, c: Coord) -> Result<usize, GridError> {
        if !self.in_range(c) {
            return Err(GridError::OutOfBounds {
                coord: c,
                side: self.side,
            });
        }
        Ok(self.offset(c))
    }

    // In-range callers only (coords produced by `adjacent` or `cells_iter`).
    fn offset(&self, c: Coord) -> usize {
        debug_assert!(self.in_range(c));
        let r = self.side as usize;
        ((c.y as usize * r) + c.x as usize) * r + c.z as usize
    }

    pub fn voxel(&self, c: Coord) -> Result<Voxel, GridError> {
        Ok(self.cells[self.index(c)?])
    }

    /// Mark a cell as part of the target shape. Load-time only: MODEL never
    /// changes once a simulation starts.
    pub fn set_model(&mut self, c: Coord) -> Result<(), GridError> {
        let i = self.index(c)?;
        self.cells[i] |= Voxel::MODEL;
        self.nmodel.set(None);
        self.bounds.set(None);
        Ok(())
    }

    pub fn set_full(&mut self, c: Coord) -> Result<(), GridError> {
        let i = self.index(c)?;
        debug_assert!(!self.cells[i].is_full(), "double fill at {c}");
        self.cells[i] |= Voxel::FULL;
        self.nfull.set(None);
        Ok(())
    }

    pub fn set_void(&mut self, c: Coord) -> Result<(), GridError> {
        let i = self.index(c)?;
        debug_assert!(self.cells[i].is_full(), "void of empty cell at {c}");
        self.cells[i] &= !(Voxel::FULL | Voxel::GROUNDED);
        self.ungrounded.remove(&c);
        self.nfull.set(None);
        self.ngrounded.set(None);
        Ok(())
    }

    /// Idempotent; also retires the cell from the ungrounded index.
    pub fn set_grounded(&mut self, c: Coord) -> Result<(), GridError> {
        let i = self.index(c)?;
        self.cells[i] |= Voxel::GROUNDED;
        self.ungrounded.remove(&c);
        self.ngrounded.set(None);
        Ok(())
    }

    pub fn toggle_bot(&mut self, c: Coord) -> Result<(), GridError> {
        let i = self.index(c)?;
        self.cells[i] ^= Voxel::BOT;
        Ok(())
    }

    /// Would a fill at `c` produce a grounded cell right now?
    pub fn would_be_grounded(&self, c: Coord) -> bool {
        let Ok(v) = self.voxel(c) else { return false };
        if v.is_bot() {
            return false;
        }
        c.y == 0
            || c.adjacent(self.side)
                .any(|n| self.cells[self.offset(n)].is_grounded())
    }

    /// Propagate groundedness outward from `c` over FULL, not-yet-grounded
    /// 6-neighbors, draining the ungrounded index as cells are reached.
    pub fn ground_adjacent(&mut self, c: Coord) {
        let mut stack = vec![c];
        let mut reached = 0usize;
        while let Some(g) = stack.pop() {
            let neighbors: Vec<Coord> = g.adjacent(self.side).collect();
            for n in neighbors {
                let i = self.offset(n);
                let v = self.cells[i];
                if v.is_full() && !v.is_grounded() {
                    self.cells[i] |= Voxel::GROUNDED;
                    self.ungrounded.remove(&n);
                    self.ngrounded.set(None);
                    reached += 1;
                    stack.push(n);
                }
            }
        }
        if reached > 0 {
            trace!(target: "grid.ground", from = %c, reached, "groundedness propagated");
        }
    }

    /// Record a FULL cell placed without ground contact (high harmonics).
    pub fn note_ungrounded(&mut self, c: Coord) {
        self.ungrounded.insert(c);
    }

    pub fn ungrounded_is_empty(&self) -> bool {
        self.ungrounded.is_empty()
    }

    pub fn ungrounded_len(&self) -> usize {
        self.ungrounded.len()
    }

    fn count_where(&self, flag: Voxel) -> usize {
        self.cells.iter().filter(|v| v.contains(flag)).count()
    }

    pub fn nfull(&self) -> usize {
        if let Some(n) = self.nfull.get() {
            return n;
        }
        let n = self.count_where(Voxel::FULL);
        self.nfull.set(Some(n));
        n
    }

    pub fn nmodel(&self) -> usize {
        if let Some(n) = self.nmodel.get() {
            return n;
        }
        let n = self.count_where(Voxel::MODEL);
        self.nmodel.set(Some(n));
        n
    }

    pub fn ngrounded(&self) -> usize {
        if let Some(n) = self.ngrounded.get() {
            return n;
        }
        let n = self.count_where(Voxel::GROUNDED);
        self.ngrounded.set(Some(n));
        n
    }

    /// Tight bounding box of the MODEL cells, `None` for an empty model.
    /// Computed on first use; MODEL is immutable after load so the cache
    /// never needs invalidating afterwards.
    pub fn bounds(&self) -> Option<Bounds> {
        if let Some(b) = self.bounds.get() {
            return Some(b);
        }
        let mut found = false;
        let (mut min, mut max) = (
            Coord::new(i32::MAX, i32::MAX, i32::MAX),
            Coord::new(i32::MIN, i32::MIN, i32::MIN),
        );
        for c in self.cells_iter() {
            if self.cells[self.offset(c)].is_model() {
                found = true;
                min.x = min.x.min(c.x);
                min.y = min.y.min(c.y);
                min.z = min.z.min(c.z);
                max.x = max.x.max(c.x + 1);
                max.y = max.y.max(c.y + 1);
                max.z = max.z.max(c.z + 1);
            }
        }
        if !found {
            return None;
        }
        let b = Bounds { min, max };
        self.bounds.set(Some(b));
        Some(b)
    }

    /// All coordinates in enumeration order (y slowest, then x, then z), so
    /// ascending iteration visits lower layers first.
    pub fn cells_iter(&self) -> impl Iterator<Item = Coord> + use<> {
        let r = self.side;
        (0..r).flat_map(move |y| {
            (0..r).flat_map(move |x| (0..r).map(move |z| Coord::new(x, y, z)))
        })
    }

    /// MODEL cells that still need matter, lower layers first.
    pub fn unfilled_model_cells(&self) -> impl Iterator<Item = Coord> + '_ {
        self.cells_iter().filter(|c| {
            let v = self.cells[self.offset(*c)];
            v.is_model() && !v.is_full()
        })
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Matrix(side: {}, model/full/grounded: {}/{}/{})",
            self.side,
            self.nmodel(),
            self.nfull(),
            self.ngrounded()
        )
    }
}
