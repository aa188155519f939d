//! Packed byte codec for trace files (.nbt).
//!
//! Opcode layout, per command:
//! - `Halt` = 0xFF, `Wait` = 0xFE, `Flip` = 0xFD;
//! - `SMove` = `00aa0100` + a biased 5-bit length byte (+15);
//! - `LMove` = `bbaa1100` + two biased 4-bit lengths (+5), second leg in the
//!   high nibble;
//! - everything else packs a 5-bit near-displacement code
//!   `9*(dx+1) + 3*(dy+1) + (dz+1)` above a 3-bit opcode, with `Fission`
//!   carrying an extra seed-count byte and the group commands three biased
//!   far-displacement bytes (+30).
//!
//! Decoding re-validates every displacement through its class constructor,
//! so a malformed stream can never produce an unencodable command.

use core_geom::{Axis, Diff, FarDiff, GeomError, LongLinear, NearDiff, ShortLinear};
use smallvec::SmallVec;
use thiserror::Error;

use crate::Command;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated command stream at byte {0}")]
    Truncated(usize),
    #[error("unknown opcode byte {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("offset {offset}: {source}")]
    BadDisplacement {
        offset: usize,
        source: GeomError,
    },
}

fn axis_code(axis: Axis) -> u8 {
    match axis {
        Axis::X => 1,
        Axis::Y => 2,
        Axis::Z => 3,
    }
}

fn axis_from_code(code: u8) -> Option<Axis> {
    match code {
        1 => Some(Axis::X),
        2 => Some(Axis::Y),
        3 => Some(Axis::Z),
        _ => None,
    }
}

fn nd_code(nd: NearDiff) -> u8 {
    let d = nd.get();
    (9 * (d.dx + 1) + 3 * (d.dy + 1) + (d.dz + 1)) as u8
}

fn nd_from_code(code: u8, offset: usize) -> Result<NearDiff, CodecError> {
    let code = code as i32;
    NearDiff::new(code / 9 - 1, code % 9 / 3 - 1, code % 3 - 1)
        .map_err(|source| CodecError::BadDisplacement { offset, source })
}

/// Encode one command into its 1-4 byte wire form.
pub fn encode_command(cmd: &Command) -> SmallVec<[u8; 4]> {
    let mut out = SmallVec::new();
    match *cmd {
        Command::Halt => out.push(0xFF),
        Command::Wait => out.push(0xFE),
        Command::Flip => out.push(0xFD),
        Command::SMove(lld) => {
            let axis = lld.axis();
            let len = lld.get().along(axis);
            out.push(axis_code(axis) << 4 | 0b0100);
            out.push((len + 15) as u8);
        }
        Command::LMove(sld1, sld2) => {
            let (a1, a2) = (sld1.axis(), sld2.axis());
            let (l1, l2) = (sld1.get().along(a1), sld2.get().along(a2));
            out.push(axis_code(a2) << 6 | axis_code(a1) << 4 | 0b1100);
            out.push(((l2 + 5) as u8) << 4 | (l1 + 5) as u8);
        }
        Command::FusionP(nd) => out.push(nd_code(nd) << 3 | 0b111),
        Command::FusionS(nd) => out.push(nd_code(nd) << 3 | 0b110),
        Command::Fission(nd, m) => {
            out.push(nd_code(nd) << 3 | 0b101);
            out.push(m);
        }
        Command::Fill(nd) => out.push(nd_code(nd) << 3 | 0b011),
        Command::Void(nd) => out.push(nd_code(nd) << 3 | 0b010),
        Command::GFill(nd, fd) => {
            out.push(nd_code(nd) << 3 | 0b001);
            push_far(&mut out, fd);
        }
        Command::GVoid(nd, fd) => {
            out.push(nd_code(nd) << 3 | 0b000);
            push_far(&mut out, fd);
        }
    }
    out
}

fn push_far(out: &mut SmallVec<[u8; 4]>, fd: FarDiff) {
    let d = fd.get();
    out.push((d.dx + 30) as u8);
    out.push((d.dy + 30) as u8);
    out.push((d.dz + 30) as u8);
}

/// Encode a whole trace.
pub fn encode_trace(trace: &[Command]) -> Vec<u8> {
    let mut out = Vec::with_capacity(trace.len() * 2);
    for cmd in trace {
        out.extend_from_slice(&encode_command(cmd));
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn next(&mut self) -> Result<u8, CodecError> {
        let b = *self
            .bytes
            .get(self.offset)
            .ok_or(CodecError::Truncated(self.offset))?;
        self.offset += 1;
        Ok(b)
    }

    fn far(&mut self) -> Result<FarDiff, CodecError> {
        let offset = self.offset;
        let (bx, by, bz) = (self.next()?, self.next()?, self.next()?);
        FarDiff::new(bx as i32 - 30, by as i32 - 30, bz as i32 - 30)
            .map_err(|source| CodecError::BadDisplacement { offset, source })
    }
}

/// Decode a whole trace byte stream.
pub fn decode_trace(bytes: &[u8]) -> Result<Vec<Command>, CodecError> {
    let mut r = Reader { bytes, offset: 0 };
    let mut out = Vec::new();
    while r.offset < bytes.len() {
        out.push(decode_one(&mut r)?);
    }
    Ok(out)
}

fn decode_one(r: &mut Reader<'_>) -> Result<Command, CodecError> {
    let offset = r.offset;
    let b0 = r.next()?;
    let bad = |source| CodecError::BadDisplacement { offset, source };
    let unknown = || CodecError::UnknownOpcode { byte: b0, offset };

    match b0 {
        0xFF => return Ok(Command::Halt),
        0xFE => return Ok(Command::Wait),
        0xFD => return Ok(Command::Flip),
        _ => {}
    }

    if b0 & 0b1100_1111 == 0b0000_0100 {
        let axis = axis_from_code(b0 >> 4 & 0b11).ok_or_else(unknown)?;
        let len = (r.next()? & 0b1_1111) as i32 - 15;
        let lld = LongLinear::try_from(axis.unit(1) * len).map_err(bad)?;
        return Ok(Command::SMove(lld));
    }

    if b0 & 0b1111 == 0b1100 {
        let a1 = axis_from_code(b0 >> 4 & 0b11).ok_or_else(unknown)?;
        let a2 = axis_from_code(b0 >> 6 & 0b11).ok_or_else(unknown)?;
        let b1 = r.next()?;
        let l1 = (b1 & 0b1111) as i32 - 5;
        let l2 = (b1 >> 4) as i32 - 5;
        let sld1 = ShortLinear::try_from(a1.unit(1) * l1).map_err(bad)?;
        let sld2 = ShortLinear::try_from(a2.unit(1) * l2).map_err(bad)?;
        return Ok(Command::LMove(sld1, sld2));
    }

    let nd = nd_from_code(b0 >> 3, offset)?;
    match b0 & 0b111 {
        0b111 => Ok(Command::FusionP(nd)),
        0b110 => Ok(Command::FusionS(nd)),
        0b101 => Ok(Command::Fission(nd, r.next()?)),
        0b011 => Ok(Command::Fill(nd)),
        0b010 => Ok(Command::Void(nd)),
        0b001 => Ok(Command::GFill(nd, r.far()?)),
        0b000 => Ok(Command::GVoid(nd, r.far()?)),
        _ => Err(unknown()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn every_opcode() -> Vec<Command> {
        vec![
            Command::Flip,
            Command::SMove(LongLinear::new(0, 0, -12).unwrap()),
            Command::LMove(
                ShortLinear::new(3, 0, 0).unwrap(),
                ShortLinear::new(0, -5, 0).unwrap(),
            ),
            Command::Fission(NearDiff::new(0, 0, 1).unwrap(), 5),
            Command::Fill(NearDiff::new(0, -1, 0).unwrap()),
            Command::Void(NearDiff::new(1, 1, 0).unwrap()),
            Command::GFill(
                NearDiff::new(0, 1, 0).unwrap(),
                FarDiff::new(10, -10, 0).unwrap(),
            ),
            Command::GVoid(
                NearDiff::new(-1, 0, 0).unwrap(),
                FarDiff::new(30, 30, 30).unwrap(),
            ),
            Command::FusionP(NearDiff::new(-1, 1, 0).unwrap()),
            Command::FusionS(NearDiff::new(1, -1, 0).unwrap()),
            Command::Wait,
            Command::Halt,
        ]
    }

    #[test]
    fn golden_bytes_for_known_commands() {
        // Contest-documented examples.
        assert_eq!(
            encode_command(&Command::SMove(LongLinear::new(12, 0, 0).unwrap())).as_slice(),
            &[0b0001_0100, 0b0001_1011]
        );
        assert_eq!(
            encode_command(&Command::SMove(LongLinear::new(0, 0, -4).unwrap())).as_slice(),
            &[0b0011_0100, 0b0000_1011]
        );
        assert_eq!(
            encode_command(&Command::LMove(
                ShortLinear::new(3, 0, 0).unwrap(),
                ShortLinear::new(0, -5, 0).unwrap(),
            ))
            .as_slice(),
            &[0b1001_1100, 0b0000_1000]
        );
        assert_eq!(
            encode_command(&Command::FusionP(NearDiff::new(-1, 1, 0).unwrap())).as_slice(),
            &[0b0011_1111]
        );
        assert_eq!(
            encode_command(&Command::FusionS(NearDiff::new(1, -1, 0).unwrap())).as_slice(),
            &[0b1001_1110]
        );
        assert_eq!(
            encode_command(&Command::Fission(NearDiff::new(0, 0, 1).unwrap(), 5)).as_slice(),
            &[0b0111_0101, 0b0000_0101]
        );
        assert_eq!(
            encode_command(&Command::Fill(NearDiff::new(0, -1, 0).unwrap())).as_slice(),
            &[0b0101_0011]
        );
    }

    #[test]
    fn round_trip_identity_over_every_opcode() {
        let trace = every_opcode();
        let bytes = encode_trace(&trace);
        assert_eq!(decode_trace(&bytes).unwrap(), trace);
    }

    #[test]
    fn truncated_streams_are_rejected() {
        // SMove missing its length byte.
        assert!(matches!(
            decode_trace(&[0b0001_0100]),
            Err(CodecError::Truncated(1))
        ));
        // GVoid missing one far byte.
        let mut bytes = encode_trace(&[Command::GVoid(
            NearDiff::new(0, 1, 0).unwrap(),
            FarDiff::new(1, 1, 1).unwrap(),
        )]);
        bytes.pop();
        assert!(matches!(decode_trace(&bytes), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn zero_length_smove_is_a_bad_displacement() {
        // Biased length 15 decodes to 0, out of class for a long linear.
        assert!(matches!(
            decode_trace(&[0b0001_0100, 15]),
            Err(CodecError::BadDisplacement { .. })
        ));
    }

    #[test]
    fn unknown_axis_code_is_rejected() {
        // Axis code 0 in an SMove prefix.
        assert!(matches!(
            decode_trace(&[0b0000_0100, 16]),
            Err(CodecError::UnknownOpcode { .. })
        ));
    }
}
