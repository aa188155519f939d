//! Configuration loading and parsing.
//!
//! Parses `nanoforge.toml` (or an override path provided by the binary),
//! extracting the solver tunables and the problem/submission directories.
//! The raw parsed fleet size is retained and clamped against the run's
//! context (seed pool, model footprint) in `Config::apply_context`, so a
//! later run against a different model re-clamps from the same file.
//!
//! A missing or unparsable file falls back to defaults; unknown fields are
//! ignored so the file can grow without breaking older binaries.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

/// Everything the clamp needs to know about the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigContext {
    /// Bots the seed pool admits (primary included).
    pub seed_pool: u8,
    /// Cells in the model's (x, z) footprint; one bot per cell is the most
    /// a region partition can use.
    pub footprint: u32,
}

impl ConfigContext {
    pub fn new(seed_pool: u8, footprint: u32) -> Self {
        Self {
            seed_pool,
            footprint,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SolverConfig {
    #[serde(default = "SolverConfig::default_bots")]
    pub bots: u8,
    #[serde(rename = "stuck-ticks", default = "SolverConfig::default_stuck_ticks")]
    pub stuck_ticks: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            bots: Self::default_bots(),
            stuck_ticks: Self::default_stuck_ticks(),
        }
    }
}

impl SolverConfig {
    const fn default_bots() -> u8 {
        8
    }
    const fn default_stuck_ticks() -> u32 {
        100
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "PathsConfig::default_problems")]
    pub problems: PathBuf,
    #[serde(default = "PathsConfig::default_submissions")]
    pub submissions: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            problems: Self::default_problems(),
            submissions: Self::default_submissions(),
        }
    }
}

impl PathsConfig {
    fn default_problems() -> PathBuf {
        PathBuf::from("problemsF")
    }
    fn default_submissions() -> PathBuf {
        PathBuf::from("submission")
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
    pub effective_bots: u8,  // clamped against the run context
}

/// Best-effort config path: working directory first, then the platform
/// config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("nanoforge.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("nanoforge").join("nanoforge.toml");
    }
    PathBuf::from("nanoforge.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Config {
                raw: Some(content),
                file,
                effective_bots: 0, // computed later
            }),
            Err(_e) => {
                // A broken file should not brick the solver; run defaults.
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

impl Config {
    /// Clamp the configured fleet size against the run context. Returns the
    /// effective value.
    pub fn apply_context(&mut self, ctx: ConfigContext) -> u8 {
        let raw = self.file.solver.bots;
        let max = ctx
            .seed_pool
            .min(ctx.footprint.min(u32::from(u8::MAX)) as u8)
            .max(1);
        let clamped = raw.clamp(1, max);
        if clamped != raw {
            info!(
                target: "config",
                raw,
                clamped,
                max,
                seed_pool = ctx.seed_pool,
                footprint = ctx.footprint,
                "solver_bots_clamped"
            );
        }
        self.effective_bots = clamped;
        clamped
    }

    /// Recompute the effective fleet size for a new model. Returns
    /// `Some(new_value)` when it changed.
    pub fn recompute_with_context(&mut self, ctx: ConfigContext) -> Option<u8> {
        let prev = self.effective_bots;
        let current = self.apply_context(ctx);
        if current != prev { Some(current) } else { None }
    }
}
