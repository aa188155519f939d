//! Fill scheduling: which model cell should a bot place next.
//!
//! Candidates are ordered by manhattan distance plus a strong low-layer
//! bias (`R * y`), which keeps the grounded frontier monotone: a cell is
//! almost always offered only after the layer below it. The sorted list is
//! cached on the bot and reused while the bot stays near the position it
//! was computed for, so a bot working a cluster does not re-sort the world
//! every tick.

use core_geom::{Coord, LongLinear, Region, UP};
use core_state::{BotId, FillCache, Harmonics, State};
use core_trace::Command;
use tracing::trace;

/// How far (manhattan) a bot may wander from the cache anchor before the
/// candidate list is recomputed.
const CACHE_ANCHOR_SLACK: i32 = 4;

/// Pick the next model cell `bot` should fill, or `None` when nothing in
/// its region is currently placeable. In the `None` case the bot is nudged
/// one cell up when some other bot is working a higher layer, which keeps
/// the fleet loosely synchronized layer by layer.
pub fn fill_next(state: &mut State, bot_id: BotId) -> Option<Coord> {
    let r = state.matrix.side();
    let (pos, region, cache_valid) = {
        let bot = state.bot(bot_id)?;
        let region = bot.region.unwrap_or_else(|| Region::whole(r));
        let valid = bot
            .fill_cache
            .as_ref()
            .is_some_and(|c| (c.anchor - bot.pos).mlen() <= CACHE_ANCHOR_SLACK);
        (bot.pos, region, valid)
    };

    if !cache_valid {
        let mut candidates: Vec<Coord> = state
            .matrix
            .unfilled_model_cells()
            .filter(|c| region.contains(*c))
            .collect();
        candidates.sort_by_key(|c| (*c - pos).mlen() + r * c.y);
        trace!(
            target: "plan.fill",
            bot = bot_id,
            candidates = candidates.len(),
            anchor = %pos,
            "fill cache rebuilt"
        );
        state.bot_mut(bot_id)?.fill_cache = Some(FillCache {
            anchor: pos,
            candidates,
        });
    }

    let accept_ungrounded = state.harmonics == Harmonics::High;
    let found = state.bot(bot_id)?.fill_cache.as_ref().and_then(|cache| {
        cache.candidates.iter().copied().find(|&c| {
            let live = state
                .matrix
                .voxel(c)
                .map(|v| v.is_model() && !v.is_full() && !v.is_bot())
                .unwrap_or(false);
            live && (accept_ungrounded || state.matrix.would_be_grounded(c))
        })
    });
    if found.is_some() {
        return found;
    }

    // Nothing placeable here right now. Climb toward the working layer if
    // the rest of the fleet is above us, and force a fresh look next round.
    let max_y = state.bots().iter().map(|b| b.pos.y).max().unwrap_or(0);
    let bot = state.bot_mut(bot_id)?;
    if pos.y < max_y
        && pos.y + 1 < r
        && let Ok(up) = LongLinear::try_from(UP)
    {
        bot.enqueue(Command::SMove(up));
    }
    bot.fill_cache = None;
    None
}

/// Split the model's (x, z) footprint into a near-square grid, one cell
/// per bot, assigned in ascending id order. Computed once when the fleet
/// reaches working size; bots without a cell keep the whole plane.
pub fn assign_regions(state: &mut State) {
    let Some(bounds) = state.matrix.bounds() else {
        return;
    };
    let n = state.bots().len() as i32;
    let width = (bounds.max.x - bounds.min.x).max(1);
    let depth = (bounds.max.z - bounds.min.z).max(1);

    // Columns: near sqrt(n), but at least n/depth so rows fit, and at most
    // the footprint width.
    let mut nx = 1;
    while nx * nx < n {
        nx += 1;
    }
    nx = nx.max((n + depth - 1) / depth).min(width).max(1);
    let nz = (n + nx - 1) / nx;

    let ids: Vec<BotId> = state.bots().iter().map(|b| b.id()).collect();
    for (i, id) in ids.into_iter().enumerate() {
        let gx = i as i32 % nx;
        let gz = i as i32 / nx;
        let region = Region::new(
            bounds.min.x + width * gx / nx,
            bounds.min.x + width * (gx + 1) / nx,
            bounds.min.z + depth * gz / nz,
            bounds.min.z + depth * (gz + 1) / nz,
        );
        if let Some(bot) = state.bot_mut(id) {
            trace!(target: "plan.fill", bot = id, ?region, "region assigned");
            bot.region = Some(region);
            bot.fill_cache = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_grid::Matrix;
    use pretty_assertions::assert_eq;

    fn column_state() -> State {
        let mut m = Matrix::empty(4);
        for y in 0..3 {
            m.set_model(Coord::new(1, y, 1)).unwrap();
        }
        State::new(m).unwrap()
    }

    #[test]
    fn offers_the_bottom_of_a_column_first() {
        let mut st = column_state();
        assert_eq!(fill_next(&mut st, 1), Some(Coord::new(1, 0, 1)));
    }

    #[test]
    fn skips_cells_that_cannot_ground_yet() {
        let mut st = column_state();
        // The base is done; the next offer must be the y=1 cell, not y=2.
        st.matrix.set_full(Coord::new(1, 0, 1)).unwrap();
        st.matrix.set_grounded(Coord::new(1, 0, 1)).unwrap();
        assert_eq!(fill_next(&mut st, 1), Some(Coord::new(1, 1, 1)));
    }

    #[test]
    fn nothing_placeable_returns_none_without_moving_a_lone_bot() {
        let mut m = Matrix::empty(4);
        m.set_model(Coord::new(2, 2, 2)).unwrap();
        let mut st = State::new(m).unwrap();
        assert_eq!(fill_next(&mut st, 1), None);
        assert!(!st.bot(1).unwrap().has_plan(), "no higher bot, no climb");
    }

    #[test]
    fn high_harmonics_accepts_floating_candidates() {
        let mut m = Matrix::empty(4);
        m.set_model(Coord::new(2, 2, 2)).unwrap();
        let mut st = State::new(m).unwrap();
        st.harmonics = Harmonics::High;
        assert_eq!(fill_next(&mut st, 1), Some(Coord::new(2, 2, 2)));
    }

    #[test]
    fn cache_reused_near_anchor_and_rebuilt_far_away() {
        let mut st = column_state();
        fill_next(&mut st, 1);
        let cached = st.bot(1).unwrap().fill_cache.as_ref().unwrap().anchor;
        assert_eq!(cached, Coord::new(0, 0, 0));
        // Teleport the bot far away (test-only shortcut) and replan.
        st.bot_mut(1).unwrap().pos = Coord::new(3, 3, 3);
        fill_next(&mut st, 1);
        let rebuilt = st.bot(1).unwrap().fill_cache.as_ref().unwrap().anchor;
        assert_eq!(rebuilt, Coord::new(3, 3, 3));
    }

    #[test]
    fn candidates_respect_the_region() {
        let mut m = Matrix::empty(6);
        m.set_model(Coord::new(1, 0, 1)).unwrap();
        m.set_model(Coord::new(4, 0, 4)).unwrap();
        let mut st = State::new(m).unwrap();
        st.bot_mut(1).unwrap().region = Some(Region::new(3, 6, 3, 6));
        assert_eq!(fill_next(&mut st, 1), Some(Coord::new(4, 0, 4)));
    }

    #[test]
    fn regions_tile_the_footprint() {
        let mut m = Matrix::empty(8);
        for x in 1..7 {
            for z in 1..7 {
                m.set_model(Coord::new(x, 0, z)).unwrap();
            }
        }
        let mut st = State::new(m).unwrap();
        // Grow the fleet to four by hand-driving fissions from the seed bot.
        use core_geom::NearDiff;
        for nd in [(1, 0, 0), (0, 1, 0), (0, 0, 1)] {
            st.bot_mut(1)
                .unwrap()
                .enqueue(Command::Fission(NearDiff::new(nd.0, nd.1, nd.2).unwrap(), 0));
            st.step_all().unwrap();
        }
        assert_eq!(st.bots().len(), 4);
        assign_regions(&mut st);
        let regions: Vec<Region> = st.bots().iter().map(|b| b.region.unwrap()).collect();
        // Every model cell belongs to exactly one region.
        for x in 1..7 {
            for z in 1..7 {
                let c = Coord::new(x, 0, z);
                let owners = regions.iter().filter(|r| r.contains(c)).count();
                assert_eq!(owners, 1, "cell {c} owned once");
            }
        }
    }
}
