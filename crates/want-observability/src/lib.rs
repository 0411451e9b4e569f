//! Tracing/logging bootstrap for the engine and its subprocesses.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which process is logging — included so multiplexed logs (engine process
/// vs. an embedded scheduler test harness) stay distinguishable.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Scheduler,
    Test,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Scheduler => "scheduler",
            ProcessKind::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: Option<String>,
    pub initialized_at: DateTime<Utc>,
}

/// Install a stderr fmt layer plus, when `logs_dir` is given, a non-blocking
/// rolling file layer. Returns the `WorkerGuard`, which must be held for the
/// lifetime of the process (dropping it stops the background flush task).
pub fn init(process: ProcessKind, logs_dir: Option<&Path>) -> anyhow::Result<(LoggingInitInfo, Option<WorkerGuard>)> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr),
    );

    let guard = if let Some(dir) = logs_dir {
        std::fs::create_dir_all(dir)?;
        let file_appender = tracing_appender::rolling::daily(dir, format!("{}.log", process.as_str()));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init()
            .ok();
        Some(guard)
    } else {
        registry.try_init().ok();
        None
    };

    Ok((
        LoggingInitInfo {
            process: process.as_str().to_string(),
            logs_dir: logs_dir.map(|p| p.to_string_lossy().to_string()),
            initialized_at: Utc::now(),
        },
        guard,
    ))
}

pub fn default_logs_dir() -> Option<PathBuf> {
    dirs_next_home().map(|h| h.join(".want-engine").join("logs"))
}

fn dirs_next_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
