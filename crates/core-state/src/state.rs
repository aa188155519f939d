//! The step engine: grouped per-timestep execution over the whole fleet.

use std::collections::HashSet;

use core_geom::{Axis, Coord, Diff, ORIGIN};
use core_grid::{GridError, Matrix};
use core_trace::Command;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::{Bot, BotId, MAX_BOTS, StateError};

const SMOVE_COST_PER_CELL: i64 = 2;
const FISSION_COST: i64 = 24;
const FUSION_REBATE: i64 = 24;
const FILL_COST: i64 = 12;
const FILL_REDUNDANT_COST: i64 = 6;
const VOID_REBATE: i64 = 12;
const TICK_CELL_COST_LOW: i64 = 3;
const TICK_CELL_COST_HIGH: i64 = 30;
const TICK_BOT_COST: i64 = 20;

/// Global grid mode. High permits ungrounded matter at ten times the
/// per-cell tick cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Harmonics {
    #[default]
    Low,
    High,
}

/// The authoritative simulation: grid, fleet, clock, energy, and the trace
/// accumulated so far.
#[derive(Debug)]
pub struct State {
    pub matrix: Matrix,
    bots: Vec<Bot>,
    pub trace: Vec<Command>,
    pub energy: i64,
    pub harmonics: Harmonics,
    pub step_id: u64,
    spawned: Vec<Bot>,
    fusion_primaries: Vec<(BotId, Coord)>,
    fusion_secondaries: Vec<(BotId, Coord)>,
    current_moves: HashSet<Coord>,
    record_trace: bool,
    halted: bool,
}

impl State {
    /// A fresh simulation over `matrix`: bot 1 at the origin holding the
    /// whole seed pool. A grid that already carries the origin bot marker
    /// (a halted assembly about to be disassembled) is adopted as-is.
    pub fn new(matrix: Matrix) -> Result<Self, StateError> {
        let mut state = Self {
            matrix,
            bots: vec![Bot::new(1, ORIGIN, (2..=MAX_BOTS).collect())],
            trace: Vec::new(),
            energy: 0,
            harmonics: Harmonics::Low,
            step_id: 0,
            spawned: Vec::new(),
            fusion_primaries: Vec::new(),
            fusion_secondaries: Vec::new(),
            current_moves: HashSet::new(),
            record_trace: true,
            halted: false,
        };
        if !state.matrix.voxel(ORIGIN)?.is_bot() {
            state.matrix.toggle_bot(ORIGIN)?;
        }
        Ok(state)
    }

    pub fn bots(&self) -> &[Bot] {
        &self.bots
    }

    pub fn bot(&self, id: BotId) -> Option<&Bot> {
        self.index_of(id).map(|i| &self.bots[i])
    }

    pub fn bot_mut(&mut self, id: BotId) -> Option<&mut Bot> {
        self.index_of(id).map(|i| &mut self.bots[i])
    }

    fn index_of(&self, id: BotId) -> Option<usize> {
        self.bots.iter().position(|b| b.id() == id)
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn is_model_finished(&self) -> bool {
        self.matrix.nfull() == self.matrix.nmodel()
    }

    /// Advance one timestep. Returns `Ok(false)` when every queue is empty
    /// (simulation idle).
    pub fn step(&mut self) -> Result<bool, StateError> {
        if !self.bots.iter().any(Bot::has_plan) {
            return Ok(false);
        }
        self.current_moves.clear();

        for i in 0..self.bots.len() {
            let cmd = self.bots[i].next_action().unwrap_or(Command::Wait);
            let performed = self.execute(i, cmd)?;
            if self.record_trace {
                self.trace.push(performed);
            }
        }

        let r = self.matrix.side() as i64;
        let per_cell = match self.harmonics {
            Harmonics::Low => TICK_CELL_COST_LOW,
            Harmonics::High => TICK_CELL_COST_HIGH,
        };
        self.energy += per_cell * r * r * r + TICK_BOT_COST * self.bots.len() as i64;

        self.reconcile_fusions()?;
        self.bots.append(&mut self.spawned);
        self.bots.sort_unstable_by_key(|b| b.id());
        self.step_id += 1;
        trace!(
            target: "state.step",
            step = self.step_id,
            bots = self.bots.len(),
            energy = self.energy,
            "step complete"
        );
        Ok(true)
    }

    /// Run until every queue drains.
    pub fn step_all(&mut self) -> Result<(), StateError> {
        while self.step()? {}
        Ok(())
    }

    /// Drive a decoded trace through the simulator: one command per living
    /// bot per timestep, ascending id order. Recording is suspended so the
    /// replay does not duplicate the trace into itself.
    pub fn run_trace(&mut self, cmds: &[Command]) -> Result<(), StateError> {
        let was_recording = self.record_trace;
        self.record_trace = false;
        let mut cursor = 0usize;
        let result = loop {
            if self.halted || cursor >= cmds.len() {
                break Ok(());
            }
            let n = self.bots.len();
            if cursor + n > cmds.len() {
                break Err(StateError::TraceTruncated(cursor));
            }
            for i in 0..n {
                let cmd = cmds[cursor + i];
                self.bots[i].enqueue(cmd);
            }
            cursor += n;
            if let Err(e) = self.step() {
                break Err(e);
            }
        };
        self.record_trace = was_recording;
        if result.is_ok() && cursor < cmds.len() {
            warn!(
                target: "state.step",
                consumed = cursor,
                total = cmds.len(),
                "trailing commands after halt ignored"
            );
        }
        result
    }

    fn degrade(&mut self, i: usize, reason: &'static str) -> Command {
        debug!(
            target: "state.step",
            bot = self.bots[i].id(),
            step = self.step_id,
            reason,
            "command degraded to wait"
        );
        self.bots[i].clear_plan();
        Command::Wait
    }

    /// Execute one command for the bot at fleet index `i`. Returns the
    /// command actually performed (Wait when degraded) for the trace log.
    fn execute(&mut self, i: usize, cmd: Command) -> Result<Command, StateError> {
        match cmd {
            Command::Wait => Ok(cmd),
            Command::Halt => {
                if self.bots.len() > 1 {
                    return Err(StateError::HaltRefused("fleet still has company"));
                }
                // Only a model that claims the origin cell may strand the
                // final bot beside it.
                if self.bots[i].pos != ORIGIN {
                    if self.matrix.voxel(ORIGIN)?.is_void() {
                        return Err(StateError::HaltRefused("bot is not at the origin"));
                    }
                    warn!(
                        target: "state.step",
                        pos = %self.bots[i].pos,
                        "halting beside the occupied origin"
                    );
                }
                self.halted = true;
                Ok(cmd)
            }
            Command::Flip => {
                self.harmonics = match self.harmonics {
                    Harmonics::Low => Harmonics::High,
                    Harmonics::High => {
                        if !self.matrix.ungrounded_is_empty() {
                            return Err(StateError::UngroundedLow(self.matrix.ungrounded_len()));
                        }
                        Harmonics::Low
                    }
                };
                Ok(cmd)
            }
            Command::SMove(lld) => {
                let src = self.bots[i].pos;
                let Some(cells) = self.swept_cells(src, &[lld.get()])? else {
                    return Ok(self.degrade(i, "move path blocked"));
                };
                self.commit_move(i, src, &cells)?;
                self.energy += SMOVE_COST_PER_CELL * lld.get().mlen() as i64;
                Ok(cmd)
            }
            Command::LMove(sld1, sld2) => {
                let src = self.bots[i].pos;
                let Some(cells) = self.swept_cells(src, &[sld1.get(), sld2.get()])? else {
                    return Ok(self.degrade(i, "move path blocked"));
                };
                self.commit_move(i, src, &cells)?;
                self.energy += SMOVE_COST_PER_CELL
                    * (sld1.get().mlen() as i64 + 2 + sld2.get().mlen() as i64);
                Ok(cmd)
            }
            Command::Fission(nd, m) => {
                let dest = self.bots[i].pos + nd.get();
                let voxel = self.matrix.voxel(dest)?;
                let needed = m as usize + 1;
                if self.bots[i].seeds().len() < needed {
                    return Ok(self.degrade(i, "fission without enough seeds"));
                }
                if !voxel.is_void() || self.current_moves.contains(&dest) {
                    return Ok(self.degrade(i, "fission target occupied"));
                }
                let bot = &mut self.bots[i];
                let child_id = bot.seeds[0];
                let child_seeds: SmallVec<[BotId; 64]> =
                    bot.seeds[1..needed].iter().copied().collect();
                bot.seeds.drain(..needed);
                self.matrix.toggle_bot(dest)?;
                self.current_moves.insert(dest);
                self.spawned.push(Bot::new(child_id, dest, child_seeds));
                self.energy += FISSION_COST;
                Ok(cmd)
            }
            Command::FusionP(nd) => {
                let target = self.fusion_target(i, nd.get())?;
                self.fusion_primaries.push((self.bots[i].id(), target));
                Ok(cmd)
            }
            Command::FusionS(nd) => {
                let target = self.fusion_target(i, nd.get())?;
                self.fusion_secondaries.push((self.bots[i].id(), target));
                Ok(cmd)
            }
            Command::Fill(nd) => {
                let p = self.bots[i].pos + nd.get();
                let voxel = self.matrix.voxel(p)?;
                if self.current_moves.contains(&p) {
                    return Ok(self.degrade(i, "fill target reserved"));
                }
                if voxel.is_void() {
                    if self.matrix.would_be_grounded(p) {
                        self.matrix.set_full(p)?;
                        self.matrix.set_grounded(p)?;
                        self.matrix.ground_adjacent(p);
                    } else if self.harmonics == Harmonics::High {
                        self.matrix.set_full(p)?;
                        self.matrix.note_ungrounded(p);
                    } else {
                        return Ok(self.degrade(i, "fill not groundable under low harmonics"));
                    }
                    self.current_moves.insert(p);
                    self.energy += FILL_COST;
                } else if voxel.is_full() {
                    // Filling matter is legal and cheap; nothing changes.
                    self.energy += FILL_REDUNDANT_COST;
                } else {
                    return Ok(self.degrade(i, "fill target occupied by a bot"));
                }
                Ok(cmd)
            }
            Command::Void(nd) => {
                let p = self.bots[i].pos + nd.get();
                let voxel = self.matrix.voxel(p)?;
                if self.current_moves.contains(&p) {
                    return Ok(self.degrade(i, "void target reserved"));
                }
                if !voxel.is_full() {
                    return Ok(self.degrade(i, "void of empty cell"));
                }
                self.matrix.set_void(p)?;
                self.current_moves.insert(p);
                self.energy -= VOID_REBATE;
                Ok(cmd)
            }
            Command::GFill(..) | Command::GVoid(..) => {
                // Group commands are carried through traces and the
                // inverter; executing them needs multi-bot region
                // coordination the solver never emits.
                warn!(
                    target: "state.step",
                    bot = self.bots[i].id(),
                    %cmd,
                    "group command recorded without grid effect"
                );
                Ok(cmd)
            }
        }
    }

    /// Cells swept by a move of one or two straight legs from `src`, in
    /// traversal order. `Ok(None)` means a soft conflict (occupied or
    /// reserved); out-of-range is fatal.
    fn swept_cells(&self, src: Coord, legs: &[Diff]) -> Result<Option<Vec<Coord>>, StateError> {
        let mut cells = Vec::new();
        let mut cur = src;
        for leg in legs {
            let axis = leg.axis().unwrap_or(Axis::X);
            let unit = axis.unit(leg.along(axis));
            for _ in 0..leg.mlen() {
                cur = cur + unit;
                cells.push(cur);
            }
        }
        for &c in &cells {
            let v = self.matrix.voxel(c)?;
            if !v.is_void() || self.current_moves.contains(&c) {
                return Ok(None);
            }
        }
        Ok(Some(cells))
    }

    fn commit_move(&mut self, i: usize, src: Coord, cells: &[Coord]) -> Result<(), StateError> {
        self.current_moves.insert(src);
        self.current_moves.extend(cells.iter().copied());
        let dest = cells[cells.len() - 1];
        self.matrix.toggle_bot(src)?;
        self.matrix.toggle_bot(dest)?;
        self.bots[i].pos = dest;
        Ok(())
    }

    fn fusion_target(&self, i: usize, nd: Diff) -> Result<Coord, StateError> {
        let target = self.bots[i].pos + nd;
        if !self.matrix.in_range(target) {
            return Err(GridError::OutOfBounds {
                coord: target,
                side: self.matrix.side(),
            }
            .into());
        }
        Ok(target)
    }

    /// Match this step's fusion registrations pairwise by mutual position,
    /// merging each secondary into its primary. Every registration must
    /// pair up or the step is invalid.
    fn reconcile_fusions(&mut self) -> Result<(), StateError> {
        let prims: Vec<(BotId, Coord)> = self.fusion_primaries.drain(..).collect();
        for (pid, sec_pos) in prims {
            let pi = self.index_of(pid).ok_or(StateError::InvalidFusion(pid))?;
            let ppos = self.bots[pi].pos;
            let matched = self.fusion_secondaries.iter().position(|&(sid, prim_pos)| {
                prim_pos == ppos
                    && self
                        .index_of(sid)
                        .map(|si| self.bots[si].pos == sec_pos)
                        .unwrap_or(false)
            });
            let Some(k) = matched else {
                return Err(StateError::InvalidFusion(pid));
            };
            let (sid, _) = self.fusion_secondaries.remove(k);
            let si = self.index_of(sid).ok_or(StateError::InvalidFusion(sid))?;
            let mut gained = std::mem::take(&mut self.bots[si].seeds);
            gained.push(sid);
            self.matrix.toggle_bot(self.bots[si].pos)?;
            self.bots.remove(si);
            let pi = self.index_of(pid).ok_or(StateError::InvalidFusion(pid))?;
            self.bots[pi].seeds.extend(gained);
            self.bots[pi].seeds.sort_unstable();
            self.energy -= FUSION_REBATE;
            debug!(target: "state.step", primary = pid, secondary = sid, "fusion merged");
        }
        if let Some(&(sid, _)) = self.fusion_secondaries.first() {
            return Err(StateError::InvalidFusion(sid));
        }
        Ok(())
    }

    /// Check the fleet-wide invariants. Cheap enough for tests after every
    /// step; not called on the hot path.
    pub fn validate(&self) -> Result<(), StateError> {
        let fail = |msg: String| Err(StateError::InvariantViolated(msg));

        for (a, b) in self
            .bots
            .iter()
            .enumerate()
            .flat_map(|(i, a)| self.bots[i + 1..].iter().map(move |b| (a, b)))
        {
            if a.pos == b.pos {
                return fail(format!("bots {} and {} share {}", a.id(), b.id(), a.pos));
            }
        }

        for c in self.matrix.cells_iter() {
            let v = self.matrix.voxel(c)?;
            if v.is_full() && v.is_bot() {
                return fail(format!("cell {c} is both full and a bot"));
            }
        }

        if self.harmonics == Harmonics::Low
            && !self.bots.iter().any(Bot::has_plan)
            && !self.matrix.ungrounded_is_empty()
        {
            return fail(format!(
                "{} ungrounded cells under low harmonics",
                self.matrix.ungrounded_len()
            ));
        }

        if self.halted
            && let Some(bot) = self.bots.first()
            && bot.pos != ORIGIN
            && self.matrix.voxel(ORIGIN)?.is_void()
        {
            return fail(format!("halted at {} with the origin free", bot.pos));
        }

        let mut pool: Vec<BotId> = self
            .bots
            .iter()
            .flat_map(|b| b.seeds().iter().copied().chain([b.id()]))
            .collect();
        pool.sort_unstable();
        let expected: Vec<BotId> = (1..=MAX_BOTS).collect();
        if pool != expected {
            return fail(format!("id/seed pool is not a partition of 1..=40: {pool:?}"));
        }
        Ok(())
    }
}
