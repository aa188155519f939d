//! Trace commands, the packed wire codec, and the assembly-to-disassembly
//! inverter.
//!
//! A trace is a flat command list: one command per bot per timestep, bots in
//! ascending id order within a timestep. Commands are a tagged sum with one
//! variant per opcode; the codec is a single encode match and a single
//! decode match over that sum.

use std::fmt;

use core_geom::{FarDiff, LongLinear, NearDiff, ShortLinear};

mod codec;
mod invert;

pub use codec::{CodecError, decode_trace, encode_command, encode_trace};
pub use invert::{InvertError, invert, invert_with};

/// One wire command. Displacement arguments are constrained classes, so a
/// constructed command is always encodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Halt,
    Wait,
    Flip,
    SMove(LongLinear),
    LMove(ShortLinear, ShortLinear),
    FusionP(NearDiff),
    FusionS(NearDiff),
    Fission(NearDiff, u8),
    Fill(NearDiff),
    Void(NearDiff),
    GFill(NearDiff, FarDiff),
    GVoid(NearDiff, FarDiff),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Halt => write!(f, "Halt"),
            Command::Wait => write!(f, "Wait"),
            Command::Flip => write!(f, "Flip"),
            Command::SMove(lld) => write!(f, "SMove {lld}"),
            Command::LMove(sld1, sld2) => write!(f, "LMove {sld1} {sld2}"),
            Command::FusionP(nd) => write!(f, "FusionP {nd}"),
            Command::FusionS(nd) => write!(f, "FusionS {nd}"),
            Command::Fission(nd, m) => write!(f, "Fission {nd} {m}"),
            Command::Fill(nd) => write!(f, "Fill {nd}"),
            Command::Void(nd) => write!(f, "Void {nd}"),
            Command::GFill(nd, fd) => write!(f, "GFill {nd} {fd}"),
            Command::GVoid(nd, fd) => write!(f, "GVoid {nd} {fd}"),
        }
    }
}
