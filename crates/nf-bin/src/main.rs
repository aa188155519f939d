//! Nanoforge entrypoint.
//!
//! `solve N` assembles contest problem N and drops the packed trace under
//! the submission directory; `launch` chains an optional disassembly of a
//! source model with an optional assembly of a target model into one
//! reconfiguration trace.

use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use core_config::{Config, ConfigContext, load_from};
use core_grid::Matrix;
use core_plan::{SolveOptions, solve};
use core_state::{MAX_BOTS, State};
use core_trace::{encode_trace, invert_with, Command as TraceCommand};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "nanoforge", version, about = "Nanobot trace generator")]
struct Args {
    /// Optional configuration file path (overrides discovery of `nanoforge.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: CommandLine,
}

#[derive(Subcommand, Debug)]
enum CommandLine {
    /// Assemble problem N (`FA{NNN}_tgt.mdl`) into `FD{NNN}.nbt`.
    Solve {
        /// Problem number.
        problem: u32,
    },
    /// Emit the disassembly of SOURCE followed by the assembly of TARGET.
    Launch {
        /// Source model to take apart.
        #[arg(long, value_name = "FILE")]
        source: Option<PathBuf>,
        /// Target model to build.
        #[arg(long, value_name = "FILE")]
        target: Option<PathBuf>,
        /// Output trace file.
        output: PathBuf,
    },
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("nanoforge.log");
        if log_path.exists() {
            let _ = fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "nanoforge.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global tracing subscriber already installed; drop guard so writer shuts down.
            }
        }

        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let args = Args::parse();
    let config = load_from(args.config.clone())?;
    match args.command {
        CommandLine::Solve { problem } => solve_problem(&config, problem),
        CommandLine::Launch {
            source,
            target,
            output,
        } => launch(&config, source, target, &output),
    }
}

/// Load a model, clamp the fleet size against it, and assemble.
fn assemble(config: &Config, path: &Path) -> Result<State> {
    let matrix = Matrix::load_model(path)
        .with_context(|| format!("loading model {}", path.display()))?;
    let footprint = matrix
        .bounds()
        .map(|b| ((b.max.x - b.min.x) * (b.max.z - b.min.z)) as u32)
        .unwrap_or(1);
    let mut config = config.clone();
    let bots = config.apply_context(ConfigContext::new(MAX_BOTS, footprint));
    let opts = SolveOptions {
        bots,
        stuck_ticks: config.file.solver.stuck_ticks,
    };

    let mut state = State::new(matrix)?;
    solve(&mut state, &opts)?;
    info!(
        target: "runtime",
        model = %path.display(),
        steps = state.step_id,
        energy = state.energy,
        commands = state.trace.len(),
        "assembly complete"
    );
    Ok(state)
}

fn solve_problem(config: &Config, problem: u32) -> Result<()> {
    let model = config
        .file
        .paths
        .problems
        .join(format!("FA{problem:03}_tgt.mdl"));
    let state = assemble(config, &model)?;
    fs::create_dir_all(&config.file.paths.submissions)?;
    let out = config
        .file
        .paths
        .submissions
        .join(format!("FD{problem:03}.nbt"));
    fs::write(&out, encode_trace(&state.trace))
        .with_context(|| format!("writing {}", out.display()))?;
    println!(
        "{} -> {} ({} commands, energy {})",
        model.display(),
        out.display(),
        state.trace.len(),
        state.energy
    );
    Ok(())
}

fn launch(
    config: &Config,
    source: Option<PathBuf>,
    target: Option<PathBuf>,
    output: &Path,
) -> Result<()> {
    ensure!(
        source.is_some() || target.is_some(),
        "at least one of --source and --target is required"
    );

    let mut trace: Vec<TraceCommand> = Vec::new();
    if let Some(src) = source {
        let assembled = assemble(config, &src)?;
        // The intermediate Halt is dropped when an assembly follows.
        let disassembly = invert_with(&assembled.trace, target.is_some())?;
        trace.extend(disassembly);
    }
    if let Some(tgt) = target {
        let assembled = assemble(config, &tgt)?;
        trace.extend(assembled.trace);
    }

    fs::write(output, encode_trace(&trace))
        .with_context(|| format!("writing {}", output.display()))?;
    println!("{} commands -> {}", trace.len(), output.display());
    Ok(())
}
