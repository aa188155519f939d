//! Assembly-to-disassembly trace inversion.
//!
//! Running a trace backwards is not just reversing the list: fissions must
//! become fusions and vice versa, which changes how many commands a
//! timestep carries and which bot each one belongs to. The transform runs
//! in two passes.
//!
//! Pass 1 replays the trace at fleet level only (ids, positions, seed
//! sets), recording every timestep's commands in trace order together with
//! its fission and fusion events. Fusion events also capture the
//! secondary's seed count at the moment it dies: that count is the `m`
//! parameter of the inverse fission, since the inverse child must be handed
//! exactly the ids the secondary carried.
//!
//! Pass 2 maps each command to its inverse and re-addresses bots through a
//! canonical renaming. Bots that fused late in the original must exist
//! early in the inverse, so fresh ids are assigned walking the fusion
//! events in reverse time order. Each timestep's inverse commands are
//! ordered by descending canonical id and the whole emission is reversed at
//! the end, leaving a file that starts with the inverse of the final
//! timestep and ends in Halt.

use std::collections::HashMap;

use core_geom::{Coord, NearDiff, ORIGIN};
use thiserror::Error;
use tracing::debug;

use crate::Command;

#[derive(Debug, Error)]
pub enum InvertError {
    #[error("trace ended mid-timestep at command {0}")]
    Truncated(usize),
    #[error("trace has no terminating Halt")]
    MissingHalt,
    #[error("fission by bot {bot} with only {available} seeds (needs {needed})")]
    SeedsExhausted {
        bot: u8,
        available: usize,
        needed: usize,
    },
    #[error("unmatched fusion registration for bot {0}")]
    UnmatchedFusion(u8),
}

struct FleetBot {
    id: u8,
    pos: Coord,
    seeds: Vec<u8>,
}

struct Split {
    parent: u8,
    child: u8,
    nd: NearDiff,
}

struct Merge {
    prim: u8,
    sec: u8,
    nd: NearDiff,
    /// Seed count of the secondary when it fused: the inverse fission's m.
    m: u8,
}

#[derive(Default)]
struct Tick {
    entries: Vec<(u8, Command)>,
    splits: Vec<Split>,
    merges: Vec<Merge>,
}

/// Invert an assembly trace. The result ends in Halt.
pub fn invert(trace: &[Command]) -> Result<Vec<Command>, InvertError> {
    invert_with(trace, false)
}

/// Invert an assembly trace, optionally omitting the final Halt so the
/// result can be chained with a following assembly.
pub fn invert_with(trace: &[Command], skip_halt: bool) -> Result<Vec<Command>, InvertError> {
    let ticks = discover(trace)?;
    let renaming = rename(&ticks);
    let out = emit(&ticks, &renaming, skip_halt);
    debug!(
        target: "trace.invert",
        commands = trace.len(),
        ticks = ticks.len(),
        bots = renaming.len(),
        "trace inverted"
    );
    Ok(out)
}

/// Pass 1: fleet-level replay recording per-timestep choreography.
fn discover(trace: &[Command]) -> Result<Vec<Tick>, InvertError> {
    let mut bots = vec![FleetBot {
        id: 1,
        pos: ORIGIN,
        seeds: (2..=40).collect(),
    }];
    let mut ticks = Vec::new();
    let mut cursor = 0usize;

    loop {
        let mut tick = Tick::default();
        let mut spawned: Vec<FleetBot> = Vec::new();
        // (index into bots, fusion target) registrations for this tick.
        let mut prims: Vec<(usize, Coord, NearDiff)> = Vec::new();
        let mut secs: Vec<(usize, Coord)> = Vec::new();
        let mut halted = false;

        for i in 0..bots.len() {
            let cmd = *trace.get(cursor).ok_or(InvertError::Truncated(cursor))?;
            cursor += 1;
            tick.entries.push((bots[i].id, cmd));
            match cmd {
                Command::Halt => halted = true,
                Command::SMove(lld) => bots[i].pos = bots[i].pos + lld.get(),
                Command::LMove(sld1, sld2) => {
                    bots[i].pos = bots[i].pos + sld1.get() + sld2.get();
                }
                Command::Fission(nd, m) => {
                    let needed = m as usize + 1;
                    if bots[i].seeds.len() < needed {
                        return Err(InvertError::SeedsExhausted {
                            bot: bots[i].id,
                            available: bots[i].seeds.len(),
                            needed,
                        });
                    }
                    let child_id = bots[i].seeds[0];
                    let child_seeds = bots[i].seeds[1..needed].to_vec();
                    bots[i].seeds.drain(..needed);
                    tick.splits.push(Split {
                        parent: bots[i].id,
                        child: child_id,
                        nd,
                    });
                    spawned.push(FleetBot {
                        id: child_id,
                        pos: bots[i].pos + nd.get(),
                        seeds: child_seeds,
                    });
                }
                Command::FusionP(nd) => prims.push((i, bots[i].pos + nd.get(), nd)),
                Command::FusionS(nd) => secs.push((i, bots[i].pos + nd.get())),
                _ => {}
            }
        }

        // Reconcile this tick's fusions by the mutual-position rule.
        let mut dead: Vec<usize> = Vec::new();
        for &(pi, sec_pos, nd) in &prims {
            let found = secs
                .iter()
                .find(|&&(si, prim_pos)| bots[si].pos == sec_pos && prim_pos == bots[pi].pos)
                .copied();
            let Some((si, _)) = found else {
                return Err(InvertError::UnmatchedFusion(bots[pi].id));
            };
            tick.merges.push(Merge {
                prim: bots[pi].id,
                sec: bots[si].id,
                nd,
                m: bots[si].seeds.len() as u8,
            });
            let absorbed = bots[si].id;
            let mut gained = std::mem::take(&mut bots[si].seeds);
            gained.push(absorbed);
            bots[pi].seeds.extend(gained);
            bots[pi].seeds.sort_unstable();
            dead.push(si);
        }
        if tick.merges.len() != secs.len() {
            let unmatched = secs
                .iter()
                .find(|&&(si, _)| !dead.contains(&si))
                .map(|&(si, _)| bots[si].id)
                .unwrap_or(0);
            return Err(InvertError::UnmatchedFusion(unmatched));
        }

        dead.sort_unstable();
        for si in dead.into_iter().rev() {
            bots.remove(si);
        }
        bots.extend(spawned);
        // Trace order is ascending bot id within a timestep.
        bots.sort_unstable_by_key(|b| b.id);

        ticks.push(tick);
        if halted {
            return Ok(ticks);
        }
        if cursor >= trace.len() {
            return Err(InvertError::MissingHalt);
        }
    }
}

/// Canonical renaming: bot 1 keeps its id; every bot that dies in a fusion
/// is renamed in reverse event order, so late-fused bots get early ids in
/// the inverse trace.
fn rename(ticks: &[Tick]) -> HashMap<u8, u8> {
    let mut mapping = HashMap::from([(1u8, 1u8)]);
    let mut next = 2u8;
    let mut assign = |mapping: &mut HashMap<u8, u8>, id: u8| {
        mapping.entry(id).or_insert_with(|| {
            let fresh = next;
            next += 1;
            fresh
        });
    };
    for tick in ticks.iter().rev() {
        for merge in &tick.merges {
            assign(&mut mapping, merge.prim);
            assign(&mut mapping, merge.sec);
        }
    }
    // Bots that never fuse (possible only in unterminated fleets) still get
    // stable names so emission is total.
    for tick in ticks.iter().rev() {
        for split in &tick.splits {
            assign(&mut mapping, split.parent);
            assign(&mut mapping, split.child);
        }
    }
    mapping
}

/// Pass 2: per-command inversion, canonical re-addressing, final reversal.
fn emit(ticks: &[Tick], renaming: &HashMap<u8, u8>, skip_halt: bool) -> Vec<Command> {
    let canon = |id: u8| renaming.get(&id).copied().unwrap_or(id);
    let mut result: Vec<Command> = if skip_halt { vec![] } else { vec![Command::Halt] };

    for tick in ticks {
        let mut buffer: Vec<(u8, Command)> = Vec::with_capacity(tick.entries.len());
        for &(id, cmd) in &tick.entries {
            match cmd {
                Command::Halt => {}
                Command::Wait | Command::Flip => buffer.push((canon(id), cmd)),
                Command::SMove(lld) => buffer.push((canon(id), Command::SMove(-lld))),
                Command::LMove(sld1, sld2) => {
                    buffer.push((canon(id), Command::LMove(-sld2, -sld1)));
                }
                Command::Fill(nd) => buffer.push((canon(id), Command::Void(nd))),
                Command::Void(nd) => buffer.push((canon(id), Command::Fill(nd))),
                Command::GFill(nd, fd) => buffer.push((canon(id), Command::GVoid(nd, fd))),
                Command::GVoid(nd, fd) => buffer.push((canon(id), Command::GFill(nd, fd))),
                Command::Fission(nd, _) => {
                    // The inverse timestep fuses parent and child back.
                    let child = tick
                        .splits
                        .iter()
                        .find(|s| s.parent == id)
                        .map(|s| s.child)
                        .unwrap_or(id);
                    buffer.push((canon(id), Command::FusionP(nd)));
                    buffer.push((canon(child), Command::FusionS(-nd)));
                }
                Command::FusionP(nd) => {
                    // The pair collapses into one fission on the primary.
                    let m = tick
                        .merges
                        .iter()
                        .find(|m| m.prim == id)
                        .map(|m| m.m)
                        .unwrap_or(0);
                    buffer.push((canon(id), Command::Fission(nd, m)));
                }
                Command::FusionS(_) => {}
            }
        }
        // Descending here; the final reversal restores ascending id order
        // within each inverse timestep.
        buffer.sort_by(|a, b| b.0.cmp(&a.0));
        result.extend(buffer.into_iter().map(|(_, cmd)| cmd));
    }

    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geom::{LongLinear, ShortLinear};
    use pretty_assertions::assert_eq;

    fn nd(dx: i32, dy: i32, dz: i32) -> NearDiff {
        NearDiff::new(dx, dy, dz).unwrap()
    }

    fn smove(dx: i32, dy: i32, dz: i32) -> Command {
        Command::SMove(LongLinear::new(dx, dy, dz).unwrap())
    }

    #[test]
    fn single_bot_move_and_fill() {
        let trace = vec![
            smove(3, 0, 0),
            Command::Fill(nd(0, 1, 0)),
            smove(-3, 0, 0),
            Command::Halt,
        ];
        let inverse = invert(&trace).unwrap();
        assert_eq!(
            inverse,
            vec![
                smove(3, 0, 0),
                Command::Void(nd(0, 1, 0)),
                smove(-3, 0, 0),
                Command::Halt,
            ]
        );
    }

    #[test]
    fn lmove_swaps_and_negates_legs() {
        let s1 = ShortLinear::new(2, 0, 0).unwrap();
        let s2 = ShortLinear::new(0, 3, 0).unwrap();
        let trace = vec![
            Command::LMove(s1, s2),
            Command::LMove(-s2, -s1),
            Command::Halt,
        ];
        let inverse = invert(&trace).unwrap();
        assert_eq!(
            inverse,
            vec![
                Command::LMove(s1, s2),
                Command::LMove(-s2, -s1),
                Command::Halt,
            ]
        );
    }

    #[test]
    fn fission_fusion_pair_swaps_roles() {
        let trace = vec![
            Command::Fission(nd(1, 0, 0), 0),
            Command::Wait,
            Command::Wait,
            Command::FusionP(nd(1, 0, 0)),
            Command::FusionS(nd(-1, 0, 0)),
            Command::Halt,
        ];
        let inverse = invert(&trace).unwrap();
        assert_eq!(
            inverse,
            vec![
                Command::Fission(nd(1, 0, 0), 0),
                Command::Wait,
                Command::Wait,
                Command::FusionP(nd(1, 0, 0)),
                Command::FusionS(nd(-1, 0, 0)),
                Command::Halt,
            ]
        );
    }

    #[test]
    fn flip_passes_through_in_place() {
        let trace = vec![
            Command::Flip,
            Command::Fill(nd(0, 1, 0)),
            Command::Flip,
            Command::Halt,
        ];
        let inverse = invert(&trace).unwrap();
        assert_eq!(
            inverse,
            vec![
                Command::Flip,
                Command::Void(nd(0, 1, 0)),
                Command::Flip,
                Command::Halt,
            ]
        );
    }

    #[test]
    fn skip_halt_omits_the_terminator() {
        let trace = vec![smove(0, 2, 0), Command::Halt];
        let inverse = invert_with(&trace, true).unwrap();
        assert_eq!(inverse, vec![smove(0, -2, 0)]);
    }

    #[test]
    fn double_inversion_is_identity_on_canonical_traces() {
        let trace = vec![
            Command::Fission(nd(1, 0, 0), 0),
            smove(0, 0, 5),
            smove(0, 0, 3),
            Command::Fill(nd(0, -1, 1)),
            Command::Wait,
            smove(0, 0, -5),
            smove(0, 0, -3),
            Command::FusionP(nd(1, 0, 0)),
            Command::FusionS(nd(-1, 0, 0)),
            Command::Halt,
        ];
        let once = invert(&trace).unwrap();
        let twice = invert(&once).unwrap();
        assert_eq!(twice, trace);
    }

    #[test]
    fn missing_halt_is_rejected() {
        let trace = vec![smove(1, 0, 0)];
        assert!(matches!(invert(&trace), Err(InvertError::MissingHalt)));
    }

    #[test]
    fn mid_timestep_truncation_is_rejected() {
        // Two bots alive after the fission, but only one command follows.
        let trace = vec![Command::Fission(nd(1, 0, 0), 0), Command::Wait];
        assert!(matches!(invert(&trace), Err(InvertError::Truncated(_))));
    }

    #[test]
    fn unmatched_fusion_primary_is_rejected() {
        let trace = vec![
            Command::Fission(nd(1, 0, 0), 0),
            Command::FusionP(nd(1, 0, 0)),
            Command::Wait,
            Command::Halt,
        ];
        assert!(matches!(
            invert(&trace),
            Err(InvertError::UnmatchedFusion(1))
        ));
    }
}
