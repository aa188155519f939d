//! The inversion laws, exercised through the real simulator: assembling a
//! model and then replaying the inverted trace must return the grid to
//! empty with one bot back at the origin.

use core_geom::Coord;
use core_grid::Matrix;
use core_plan::{SolveOptions, solve};
use core_state::State;
use core_trace::{decode_trace, encode_trace, invert};

fn roundtrip(model_cells: &[Coord], r: i32) {
    let mut m = Matrix::empty(r);
    for c in model_cells {
        m.set_model(*c).unwrap();
    }
    let mut assembled = State::new(m).unwrap();
    solve(&mut assembled, &SolveOptions::default()).unwrap();
    assert_eq!(assembled.matrix.nfull(), model_cells.len());
    let trace = assembled.trace.clone();

    let disassembly = invert(&trace).unwrap();

    // Continue on the assembled grid: the halted bot's marker is adopted
    // by the fresh state.
    let mut back = State::new(assembled.matrix).unwrap();
    back.run_trace(&disassembly).unwrap();
    assert!(back.halted());
    assert_eq!(back.matrix.nfull(), 0, "disassembly must empty the grid");
    assert_eq!(back.bots().len(), 1);
    assert!(back.matrix.ungrounded_is_empty());
}

#[test]
fn single_cell_assembly_inverts_cleanly() {
    roundtrip(&[Coord::new(1, 0, 1)], 3);
}

#[test]
fn small_block_assembly_inverts_cleanly() {
    let mut cells = Vec::new();
    for y in 0..2 {
        for x in 1..3 {
            cells.push(Coord::new(x, y, 1));
        }
    }
    roundtrip(&cells, 4);
}

#[test]
fn multi_bot_assembly_inverts_cleanly() {
    let mut cells = Vec::new();
    for x in 1..6 {
        for z in 1..6 {
            cells.push(Coord::new(x, 0, z));
        }
    }
    roundtrip(&cells, 7);
}

#[test]
fn trace_bytes_round_trip_through_the_codec() {
    let mut m = Matrix::empty(4);
    for y in 0..2 {
        m.set_model(Coord::new(1, y, 1)).unwrap();
    }
    let mut state = State::new(m).unwrap();
    solve(&mut state, &SolveOptions::default()).unwrap();
    let bytes = encode_trace(&state.trace);
    assert_eq!(decode_trace(&bytes).unwrap(), state.trace);
}
