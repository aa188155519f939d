//! The solve driver: fleet ramp-up, the fill loop, harmonics policy,
//! corridor digging, and the teardown that merges the fleet and halts.

use core_geom::{BACK, Coord, FORWARD, LEFT, LongLinear, NearDiff, ORIGIN, RIGHT, UP};
use core_state::{BotId, Harmonics, MAX_BOTS, State};
use core_trace::Command;
use tracing::{debug, info, warn};

use crate::fill::{assign_regions, fill_next};
use crate::path::{compress, enqueue_path, shortest_path};
use crate::PlanError;

/// Tunables surfaced to the configuration layer.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// Working fleet size target; clamped to what the model admits.
    pub bots: u8,
    /// Rounds without a completed fill before the solver gives up.
    pub stuck_ticks: u32,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            bots: 8,
            stuck_ticks: 100,
        }
    }
}

/// Assemble the loaded model: on success the state is halted with one bot
/// and `state.trace` holds the full command sequence.
pub fn solve(state: &mut State, opts: &SolveOptions) -> Result<(), PlanError> {
    ramp_up(state, opts)?;
    assign_regions(state);
    fill_loop(state, opts)?;
    state.step_all()?;
    settle_harmonics(state)?;
    teardown(state, opts)?;
    info!(
        target: "plan.solve",
        steps = state.step_id,
        energy = state.energy,
        filled = state.matrix.nfull(),
        commands = state.trace.len(),
        "solve complete"
    );
    Ok(())
}

fn is_void(state: &State, c: Coord) -> bool {
    state.matrix.voxel(c).map(|v| v.is_void()).unwrap_or(false)
}

/// Fission a working fleet along the x axis from the origin. Each new bot
/// is handed exactly the seeds its own descendants will need, so the chain
/// ends with the rightmost bots seedless.
fn ramp_up(state: &mut State, opts: &SolveOptions) -> Result<(), PlanError> {
    let nmodel = state.matrix.nmodel();
    if nmodel == 0 {
        return Ok(());
    }
    let r = state.matrix.side();
    let footprint = state
        .matrix
        .bounds()
        .map(|b| ((b.max.x - b.min.x).max(1) * (b.max.z - b.min.z).max(1)) as usize)
        .unwrap_or(1);
    let target = (opts.bots.min(MAX_BOTS) as usize)
        .min(nmodel)
        .min(footprint)
        .min(r as usize)
        .max(1);

    while state.bots().len() < target {
        let k = state.bots().len();
        let dest = Coord::new(k as i32, 0, 0);
        if !is_void(state, dest) {
            break;
        }
        let parent = state.bots()[k - 1].id();
        let m = (target - k - 1) as u8;
        let nd = NearDiff::new(1, 0, 0)?;
        if let Some(bot) = state.bot_mut(parent) {
            bot.enqueue(Command::Fission(nd, m));
        }
        state.step_all()?;
        if state.bots().len() == k {
            // The fission degraded; run with the fleet we have.
            break;
        }
    }
    info!(target: "plan.solve", fleet = state.bots().len(), want = target, "fleet ramped");
    Ok(())
}

fn fill_loop(state: &mut State, opts: &SolveOptions) -> Result<(), PlanError> {
    let r = state.matrix.side();
    // A single route can take a few hundred ticks on a large grid; the
    // no-progress window has to be at least that wide.
    let stuck_window = opts.stuck_ticks.max(6 * r as u32);
    let mut last_nfull = state.matrix.nfull();
    let mut idle_rounds = 0u32;

    while !state.is_model_finished() {
        let mut planned = false;
        let ids: Vec<BotId> = state.bots().iter().map(|b| b.id()).collect();
        for id in ids {
            if state.bot(id).map(|b| b.has_plan()).unwrap_or(false) {
                planned = true;
                continue;
            }
            let Some(target) = fill_next(state, id) else {
                if state.bot(id).map(|b| b.has_plan()).unwrap_or(false) {
                    // Climbing toward the fleet's working layer.
                    planned = true;
                } else if step_off_work(state, id) {
                    // The bot is parked on an unfilled model cell and
                    // nobody can fill under it; vacate.
                    planned = true;
                } else if let Some(bot) = state.bot_mut(id)
                    && let Some(region) = bot.region
                {
                    // Our patch is exhausted; look further afield next round.
                    bot.region = Some(region.relaxed());
                    bot.fill_cache = None;
                }
                continue;
            };

            let pos = match state.bot(id) {
                Some(bot) => bot.pos,
                None => continue,
            };
            // A fill may never cost the bot its last exit, or it walls
            // itself in; skip the fast path and restand instead.
            let traps = !pos.adjacent(r).any(|a| a != target && is_void(state, a));
            if (target - pos).mlen() == 1
                && target.y <= pos.y
                && !traps
                && let Some(bot) = state.bot_mut(id)
            {
                bot.enqueue(Command::Fill(NearDiff::try_from(target - pos)?));
                planned = true;
                continue;
            }
            if route_to_target(state, id, target)? {
                planned = true;
                continue;
            }
            // No lateral stand is reachable; a target directly overhead
            // can still be closed from below (the top of a shell has no
            // outside to stand in).
            if target == pos + UP
                && let Some(bot) = state.bot_mut(id)
            {
                bot.enqueue(Command::Fill(NearDiff::try_from(UP)?));
                planned = true;
                continue;
            }
            let walled_in = !target.adjacent(r).any(|a| is_void(state, a));
            if walled_in && dig(state, id, target)? {
                planned = true;
                continue;
            }
            if pos.y + 1 < r
                && let Ok(up) = LongLinear::try_from(UP)
                && let Some(bot) = state.bot_mut(id)
            {
                bot.enqueue(Command::SMove(up));
                planned = true;
            }
        }

        if !planned && state.harmonics == Harmonics::Low {
            // Every remaining candidate is ungroundable from here: permit
            // floating matter and let later fills ground it.
            info!(target: "plan.solve", "no groundable work; escalating to high harmonics");
            if let Some(id) = state.bots().first().map(|b| b.id())
                && let Some(bot) = state.bot_mut(id)
            {
                bot.enqueue(Command::Flip);
            }
        }

        if state.bots().iter().any(|b| b.has_plan()) {
            state.step()?;
        }

        let nfull = state.matrix.nfull();
        if nfull > last_nfull {
            last_nfull = nfull;
            idle_rounds = 0;
        } else {
            idle_rounds += 1;
            if idle_rounds > stuck_window {
                return Err(PlanError::Stuck(idle_rounds));
            }
        }
    }
    Ok(())
}

/// If `bot` is standing on a model cell that still needs matter, move it
/// one cell onto any void neighbor (upward preferred) so the cell can be
/// filled. Returns true when a move was enqueued.
fn step_off_work(state: &mut State, id: BotId) -> bool {
    let r = state.matrix.side();
    let Some(bot) = state.bot(id) else {
        return false;
    };
    let pos = bot.pos;
    let parked = state
        .matrix
        .voxel(pos)
        .map(|v| v.is_model() && !v.is_full())
        .unwrap_or(false);
    if !parked {
        return false;
    }
    let mut exits: Vec<Coord> = pos.adjacent(r).filter(|a| is_void(state, *a)).collect();
    exits.sort_by_key(|a| -a.y);
    if let Some(exit) = exits.first()
        && let Ok(step) = LongLinear::try_from(*exit - pos)
        && let Some(bot) = state.bot_mut(id)
    {
        bot.enqueue(Command::SMove(step));
        return true;
    }
    false
}

/// Route `bot` onto a void cell beside `target` from which the fill is
/// immediately legal (same layer or above preferred).
fn route_to_target(state: &mut State, id: BotId, target: Coord) -> Result<bool, PlanError> {
    let r = state.matrix.side();
    let Some(bot) = state.bot(id) else {
        return Ok(false);
    };
    let pos = bot.pos;
    let mut stands: Vec<Coord> = target
        .adjacent(r)
        .filter(|a| *a != pos && is_void(state, *a))
        .collect();
    stands.sort_by_key(|a| ((a.y < target.y) as i32, (*a - pos).mlen()));
    for stand in stands {
        if let Some(path) = shortest_path(state, id, stand) {
            enqueue_path(state, id, &path)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Last-resort recovery for a target with no void neighbor: approach from
/// a grid boundary in line with it, void a corridor inward, fill the
/// target, then retreat re-filling every corridor cell the model claims.
fn dig(state: &mut State, id: BotId, target: Coord) -> Result<bool, PlanError> {
    let r = state.matrix.side();
    let approaches = [
        (Coord::new(r - 1, target.y, target.z), LEFT),
        (Coord::new(0, target.y, target.z), RIGHT),
        (Coord::new(target.x, target.y, r - 1), BACK),
        (Coord::new(target.x, target.y, 0), FORWARD),
    ];
    for (start, dir) in approaches {
        let n = (start - target).mlen() - 1;
        if n < 0 || !is_void(state, start) {
            continue;
        }
        let Some(path) = shortest_path(state, id, start) else {
            continue;
        };
        let approach = compress(&path)?;
        let step_nd = NearDiff::try_from(dir)?;
        let step_fwd = LongLinear::try_from(dir)?;
        let step_back = -step_fwd;

        let mut corridor = Vec::new();
        let mut cur = start;
        for _ in 0..n {
            let ahead = cur + dir;
            if state.matrix.voxel(ahead)?.is_full() {
                corridor.push(Command::Void(step_nd));
            }
            corridor.push(Command::SMove(step_fwd));
            cur = ahead;
        }
        corridor.push(Command::Fill(step_nd));
        for _ in 0..n {
            corridor.push(Command::SMove(step_back));
            cur = cur - dir;
            if state.matrix.voxel(cur + dir)?.is_model() {
                corridor.push(Command::Fill(step_nd));
            }
        }

        if let Some(bot) = state.bot_mut(id) {
            for cmd in approach.into_iter().chain(corridor) {
                bot.enqueue(cmd);
            }
        }
        debug!(
            target: "plan.solve",
            bot = id,
            target = %target,
            from = %start,
            "digging a corridor"
        );
        return Ok(true);
    }
    Ok(false)
}

/// Return to low harmonics before the teardown. A model with matter that
/// never connects to the floor has to stay in high harmonics through the
/// halt; that is the best any builder can do for it.
fn settle_harmonics(state: &mut State) -> Result<(), PlanError> {
    if state.harmonics != Harmonics::High {
        return Ok(());
    }
    if !state.matrix.ungrounded_is_empty() {
        warn!(
            target: "plan.solve",
            ungrounded = state.matrix.ungrounded_len(),
            "model is detached from the floor; halting under high harmonics"
        );
        return Ok(());
    }
    if let Some(id) = state.bots().first().map(|b| b.id())
        && let Some(bot) = state.bot_mut(id)
    {
        bot.enqueue(Command::Flip);
    }
    state.step_all()?;
    Ok(())
}

/// Merge the fleet pairwise into the lowest-id bot, send it home, halt.
fn teardown(state: &mut State, opts: &SolveOptions) -> Result<(), PlanError> {
    let r = state.matrix.side();
    let mut attempts = 0u32;
    while state.bots().len() > 1 {
        let ppos = state.bots()[0].pos;
        let pid = state.bots()[0].id();
        // Absorb the nearest companion first; it has the least to travel.
        let (sid, spos) = match state.bots()[1..]
            .iter()
            .map(|b| (b.id(), b.pos))
            .min_by_key(|(_, p)| (*p - ppos).mlen())
        {
            Some(pair) => pair,
            None => break,
        };

        if (spos - ppos).mlen() == 1 {
            let nd = NearDiff::try_from(spos - ppos)?;
            if let Some(bot) = state.bot_mut(pid) {
                bot.enqueue(Command::FusionP(nd));
            }
            if let Some(bot) = state.bot_mut(sid) {
                bot.enqueue(Command::FusionS(-nd));
            }
            state.step_all()?;
            attempts = 0;
            continue;
        }

        let mut stands: Vec<Coord> = ppos
            .adjacent(r)
            .filter(|a| is_void(state, *a))
            .collect();
        stands.sort_by_key(|a| (*a - spos).mlen());
        let mut routed = false;
        for stand in stands {
            if let Some(path) = shortest_path(state, sid, stand) {
                enqueue_path(state, sid, &path)?;
                routed = true;
                break;
            }
        }
        if !routed
            && spos.y + 1 < r
            && let Ok(up) = LongLinear::try_from(UP)
            && let Some(bot) = state.bot_mut(sid)
        {
            bot.enqueue(Command::SMove(up));
        }
        state.step_all()?;
        attempts += 1;
        if attempts > opts.stuck_ticks {
            return Err(PlanError::Stuck(attempts));
        }
    }

    let pid = state.bots()[0].id();
    let pos = state.bots()[0].pos;
    if pos != ORIGIN {
        let mut goals: Vec<Coord> = if is_void(state, ORIGIN) {
            vec![ORIGIN]
        } else {
            // The model owns the origin cell; stop beside it.
            ORIGIN.adjacent(r).filter(|a| is_void(state, *a)).collect()
        };
        goals.sort_by_key(|g| (*g - pos).mlen());
        for goal in goals {
            if let Some(path) = shortest_path(state, pid, goal) {
                enqueue_path(state, pid, &path)?;
                state.step_all()?;
                break;
            }
        }
    }
    if let Some(bot) = state.bot_mut(pid) {
        bot.enqueue(Command::Halt);
    }
    state.step_all()?;
    Ok(())
}
