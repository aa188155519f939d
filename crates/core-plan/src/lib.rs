//! Planning: shortest-path routing, path compression, fill scheduling, and
//! the driver that turns a loaded model into a complete trace.
//!
//! The planners never mutate the grid directly; they enqueue commands onto
//! bot queues and let the step engine execute them, one per bot per
//! timestep. A plan is therefore always allowed to be wrong about the
//! future: if another bot claims a cell first, the engine degrades the
//! conflicting command to Wait and the next planning round starts from the
//! real state.

use core_geom::GeomError;
use core_grid::GridError;
use core_state::StateError;
use thiserror::Error;

mod fill;
mod path;
mod solve;

pub use fill::{assign_regions, fill_next};
pub use path::{compress, enqueue_path, shortest_path};
pub use solve::{SolveOptions, solve};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Geom(#[from] GeomError),
    #[error("no fill progress for {0} rounds")]
    Stuck(u32),
}
