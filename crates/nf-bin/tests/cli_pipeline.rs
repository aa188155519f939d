//! Drive the real binary end to end against temp-dir model files.

use std::path::Path;
use std::process::Command;

use core_trace::{Command as TraceCommand, decode_trace};

// Model byte image for side r with the given cells set (y slowest, x
// middle, z fastest, LSB-first bits).
fn model_bytes(r: i32, cells: &[(i32, i32, i32)]) -> Vec<u8> {
    let ncells = (r as usize).pow(3);
    let mut bytes = vec![0u8; 1 + ncells.div_ceil(8)];
    bytes[0] = r as u8;
    for (x, y, z) in cells {
        let i = ((y * r + x) * r + z) as usize;
        bytes[1 + i / 8] |= 1 << (i % 8);
    }
    bytes
}

fn run_in(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_nanoforge"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("binary runs")
}

#[test]
fn solve_writes_a_submission_trace() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("problemsF")).unwrap();
    std::fs::write(
        dir.path().join("problemsF/FA001_tgt.mdl"),
        model_bytes(3, &[(1, 0, 1)]),
    )
    .unwrap();

    let out = run_in(dir.path(), &["solve", "1"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let bytes = std::fs::read(dir.path().join("submission/FD001.nbt")).unwrap();
    let trace = decode_trace(&bytes).unwrap();
    assert_eq!(trace.last(), Some(&TraceCommand::Halt));
    assert!(trace.iter().any(|c| matches!(c, TraceCommand::Fill(_))));
}

#[test]
fn launch_chains_disassembly_and_assembly() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("m.mdl"), model_bytes(3, &[(1, 0, 1)])).unwrap();

    let out = run_in(
        dir.path(),
        &[
            "launch",
            "--source",
            "m.mdl",
            "--target",
            "m.mdl",
            "out.nbt",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let trace = decode_trace(&std::fs::read(dir.path().join("out.nbt")).unwrap()).unwrap();
    let halts = trace
        .iter()
        .filter(|c| matches!(c, TraceCommand::Halt))
        .count();
    assert_eq!(halts, 1, "the intermediate halt is skipped");
    assert_eq!(trace.last(), Some(&TraceCommand::Halt));
}

#[test]
fn launch_without_models_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(dir.path(), &["launch", "out.nbt"]);
    assert!(!out.status.success());
}

#[test]
fn solve_of_a_missing_problem_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(dir.path(), &["solve", "7"]);
    assert!(!out.status.success());
}
