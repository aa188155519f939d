//! Shortest-path routing through void voxels and compression of the result
//! into the fewest legal move commands.

use std::collections::{HashMap, VecDeque};

use core_geom::{Axis, Coord, LongLinear, ShortLinear};
use core_state::{BotId, State};
use core_trace::Command;
use tracing::trace;

use crate::PlanError;

/// 6-connected breadth-first search from `bot`'s position to `goal`.
/// Obstacles are matter and every other bot; this is a single-bot plan and
/// same-tick interference is the step engine's problem. Returns the
/// shortest coordinate path including both endpoints, or `None`.
///
/// Neighbor expansion uses the fixed [`core_geom::NEIGHBORS`] order, so the
/// chosen path is deterministic for a given grid.
pub fn shortest_path(state: &State, bot_id: BotId, goal: Coord) -> Option<Vec<Coord>> {
    let bot = state.bot(bot_id)?;
    let start = bot.pos;
    if start == goal {
        return Some(vec![start]);
    }
    let r = state.matrix.side();
    if !goal.in_matrix(r) || !passable(state, goal) {
        return None;
    }

    let mut prev: HashMap<Coord, Coord> = HashMap::from([(start, start)]);
    let mut queue = VecDeque::from([start]);
    while let Some(cur) = queue.pop_front() {
        for n in cur.adjacent(r) {
            if prev.contains_key(&n) || !passable(state, n) {
                continue;
            }
            prev.insert(n, cur);
            if n == goal {
                let mut path = vec![n];
                let mut walk = cur;
                while walk != start {
                    path.push(walk);
                    walk = prev[&walk];
                }
                path.push(start);
                path.reverse();
                trace!(
                    target: "plan.path",
                    bot = bot_id,
                    goal = %goal,
                    len = path.len(),
                    visited = prev.len(),
                    "route found"
                );
                return Some(path);
            }
            queue.push_back(n);
        }
    }
    None
}

fn passable(state: &State, c: Coord) -> bool {
    state.matrix.voxel(c).map(|v| v.is_void()).unwrap_or(false)
}

// A maximal collinear stretch of the path: axis plus signed length.
#[derive(Debug, Clone, Copy)]
struct Run {
    axis: Axis,
    len: i32,
}

fn runs(path: &[Coord]) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for pair in path.windows(2) {
        let d = pair[1] - pair[0];
        let Some(axis) = d.axis() else { continue };
        let step = d.along(axis);
        match out.last_mut() {
            Some(run) if run.axis == axis && run.len.signum() == step => run.len += step,
            _ => out.push(Run { axis, len: step }),
        }
    }
    out
}

fn short(run: Run) -> Result<ShortLinear, PlanError> {
    Ok(ShortLinear::try_from(run.axis.unit(1) * run.len)?)
}

fn long(run: Run) -> Result<LongLinear, PlanError> {
    Ok(LongLinear::try_from(run.axis.unit(1) * run.len)?)
}

/// Compress a unit-step coordinate path into move commands: the longest
/// legal straight moves, with adjacent short legs folded into L-moves.
/// Legs are never reordered across turns, so the swept cells are exactly
/// the path cells.
pub fn compress(path: &[Coord]) -> Result<Vec<Command>, PlanError> {
    let mut cmds = Vec::new();
    let runs = runs(path);
    let mut i = 0usize;
    let mut pending: Option<Run> = None;

    while pending.is_some() || i < runs.len() {
        let current = match pending.take() {
            Some(run) => run,
            None => {
                let run = runs[i];
                i += 1;
                run
            }
        };
        let alen = current.len.abs();
        if alen <= 5 && i < runs.len() && runs[i].len.abs() <= 5 {
            cmds.push(Command::LMove(short(current)?, short(runs[i])?));
            i += 1;
        } else if alen <= 15 {
            cmds.push(Command::SMove(long(current)?));
        } else {
            let chunk = 15 * current.len.signum();
            cmds.push(Command::SMove(long(Run {
                axis: current.axis,
                len: chunk,
            })?));
            pending = Some(Run {
                axis: current.axis,
                len: current.len - chunk,
            });
        }
    }
    Ok(cmds)
}

/// Compress `path` and enqueue the moves on `bot`.
pub fn enqueue_path(state: &mut State, bot_id: BotId, path: &[Coord]) -> Result<(), PlanError> {
    let cmds = compress(path)?;
    let Some(bot) = state.bot_mut(bot_id) else {
        return Ok(());
    };
    for cmd in cmds {
        bot.enqueue(cmd);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geom::{Diff, ORIGIN};
    use core_grid::Matrix;
    use pretty_assertions::assert_eq;

    fn line(from: Coord, d: Diff, n: i32) -> Vec<Coord> {
        (0..=n).map(|k| from + d * k).collect()
    }

    #[test]
    fn trivial_path_is_the_start_cell() {
        let st = State::new(Matrix::empty(3)).unwrap();
        assert_eq!(shortest_path(&st, 1, ORIGIN), Some(vec![ORIGIN]));
    }

    #[test]
    fn straight_route_on_an_empty_grid() {
        let st = State::new(Matrix::empty(5)).unwrap();
        let path = shortest_path(&st, 1, Coord::new(4, 0, 0)).unwrap();
        assert_eq!(path.len(), 5, "shortest path has manhattan length");
        assert_eq!(path[0], ORIGIN);
        assert_eq!(path[4], Coord::new(4, 0, 0));
    }

    #[test]
    fn routes_around_a_wall_through_its_doorway() {
        let mut m = Matrix::empty(4);
        // A full x=1 wall except a doorway at (1, 0, 3).
        for y in 0..4 {
            for z in 0..4 {
                if (y, z) != (0, 3) {
                    m.set_full(Coord::new(1, y, z)).unwrap();
                }
            }
        }
        let st = State::new(m).unwrap();
        let goal = Coord::new(2, 0, 0);
        let path = shortest_path(&st, 1, goal).unwrap();
        assert!(path.contains(&Coord::new(1, 0, 3)), "must use the doorway");
        assert_eq!(*path.last().unwrap(), goal);
        // Full wall: no route at all.
        let mut m = Matrix::empty(4);
        for y in 0..4 {
            for z in 0..4 {
                m.set_full(Coord::new(1, y, z)).unwrap();
            }
        }
        let st = State::new(m).unwrap();
        assert_eq!(shortest_path(&st, 1, goal), None);
    }

    #[test]
    fn other_bots_are_obstacles() {
        let mut m = Matrix::empty(3);
        m.toggle_bot(Coord::new(1, 0, 0)).unwrap();
        m.toggle_bot(Coord::new(0, 1, 0)).unwrap();
        m.toggle_bot(Coord::new(0, 0, 1)).unwrap();
        let st = State::new(m).unwrap();
        assert_eq!(shortest_path(&st, 1, Coord::new(2, 2, 2)), None);
    }

    #[test]
    fn long_straight_run_chunks_at_fifteen() {
        let path = line(ORIGIN, Diff::new(0, 0, 1), 20);
        let cmds = compress(&path).unwrap();
        assert_eq!(
            cmds,
            vec![
                Command::SMove(LongLinear::new(0, 0, 15).unwrap()),
                Command::SMove(LongLinear::new(0, 0, 5).unwrap()),
            ]
        );
    }

    #[test]
    fn short_corner_becomes_one_lmove() {
        let mut path = line(ORIGIN, Diff::new(1, 0, 0), 3);
        let corner = *path.last().unwrap();
        path.extend(line(corner, Diff::new(0, 1, 0), 2)[1..].iter().copied());
        let cmds = compress(&path).unwrap();
        assert_eq!(
            cmds,
            vec![Command::LMove(
                ShortLinear::new(3, 0, 0).unwrap(),
                ShortLinear::new(0, 2, 0).unwrap(),
            )]
        );
    }

    #[test]
    fn long_leg_then_short_corner_keeps_order() {
        // 7 along x (too long for an L leg), then 3 along y, then 2 along z.
        let mut path = line(ORIGIN, Diff::new(1, 0, 0), 7);
        let mut corner = *path.last().unwrap();
        path.extend(line(corner, Diff::new(0, 1, 0), 3)[1..].iter().copied());
        corner = *path.last().unwrap();
        path.extend(line(corner, Diff::new(0, 0, 1), 2)[1..].iter().copied());
        let cmds = compress(&path).unwrap();
        assert_eq!(
            cmds,
            vec![
                Command::SMove(LongLinear::new(7, 0, 0).unwrap()),
                Command::LMove(
                    ShortLinear::new(0, 3, 0).unwrap(),
                    ShortLinear::new(0, 0, 2).unwrap(),
                ),
            ]
        );
    }

    #[test]
    fn sixteen_step_residual_can_join_an_lmove() {
        // 16 along x leaves a residual of 1, which pairs with the 2-step
        // z turn into an L-move.
        let mut path = line(ORIGIN, Diff::new(1, 0, 0), 16);
        let corner = *path.last().unwrap();
        path.extend(line(corner, Diff::new(0, 0, 1), 2)[1..].iter().copied());
        let cmds = compress(&path).unwrap();
        assert_eq!(
            cmds,
            vec![
                Command::SMove(LongLinear::new(15, 0, 0).unwrap()),
                Command::LMove(
                    ShortLinear::new(1, 0, 0).unwrap(),
                    ShortLinear::new(0, 0, 2).unwrap(),
                ),
            ]
        );
    }

    #[test]
    fn compressed_moves_replay_to_the_goal() {
        let mut st = State::new(Matrix::empty(20)).unwrap();
        let goal = Coord::new(17, 2, 6);
        let path = shortest_path(&st, 1, goal).unwrap();
        enqueue_path(&mut st, 1, &path).unwrap();
        st.step_all().unwrap();
        assert_eq!(st.bot(1).unwrap().pos, goal);
    }
}
