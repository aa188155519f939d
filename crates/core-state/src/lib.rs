//! Simulation state: the bot fleet, per-bot command queues, and the step
//! engine that executes one grouped timestep at a time.
//!
//! A bot's queue holds deferred commands, not effects: enqueuing records an
//! intent and the step engine pops one command per bot per timestep. When a
//! command's precondition fails for a recoverable reason (another bot
//! reserved the cell this tick, the target is occupied, a fill cannot be
//! grounded under low harmonics) the command degrades to Wait and the rest
//! of that bot's queue is dropped so the planner replans from fresh state.
//! Fleet-wide violations (unmatched fusions, out-of-range coordinates,
//! halting with company or away from a free origin) are fatal.
//!
//! The fleet vector stays sorted by bot id; together with the
//! one-command-per-bot rule this fixes the observable trace order.

use std::collections::VecDeque;

use core_geom::{Coord, Region};
use core_grid::GridError;
use core_trace::Command;
use smallvec::SmallVec;
use thiserror::Error;

mod state;
pub use state::{Harmonics, State};

/// Bot ids and seeds come from the fixed pool 1..=40.
pub type BotId = u8;

/// Highest id in the seed pool.
pub const MAX_BOTS: u8 = 40;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("halt refused: {0}")]
    HaltRefused(&'static str),
    #[error("cannot return to low harmonics with {0} ungrounded cells")]
    UngroundedLow(usize),
    #[error("unmatched fusion registration for bot {0}")]
    InvalidFusion(BotId),
    #[error("trace ends mid-timestep at command {0}")]
    TraceTruncated(usize),
    #[error("fleet invariant violated: {0}")]
    InvariantViolated(String),
}

/// Fill-planner scratch cached on the bot: a candidate list sorted for the
/// position it was computed at. Owned here so it survives across planning
/// calls; interpreted only by the planner.
#[derive(Debug, Clone)]
pub struct FillCache {
    pub anchor: Coord,
    pub candidates: Vec<Coord>,
}

/// One nanobot: identity, position, the seed ids it may still spawn, and
/// its pending command queue.
#[derive(Debug)]
pub struct Bot {
    id: BotId,
    pub pos: Coord,
    seeds: SmallVec<[BotId; 64]>,
    plan: VecDeque<Command>,
    pub region: Option<Region>,
    pub fill_cache: Option<FillCache>,
}

impl Bot {
    fn new(id: BotId, pos: Coord, seeds: SmallVec<[BotId; 64]>) -> Self {
        debug_assert!(seeds.is_sorted());
        Self {
            id,
            pos,
            seeds,
            plan: VecDeque::new(),
            region: None,
            fill_cache: None,
        }
    }

    pub fn id(&self) -> BotId {
        self.id
    }

    pub fn seeds(&self) -> &[BotId] {
        &self.seeds
    }

    /// Append a deferred command to this bot's queue.
    pub fn enqueue(&mut self, cmd: Command) {
        self.plan.push_back(cmd);
    }

    pub fn has_plan(&self) -> bool {
        !self.plan.is_empty()
    }

    pub fn plan_len(&self) -> usize {
        self.plan.len()
    }

    /// Drop the remaining queue (degrade recovery or a planner reset).
    pub fn clear_plan(&mut self) {
        self.plan.clear();
    }

    fn next_action(&mut self) -> Option<Command> {
        self.plan.pop_front()
    }
}
