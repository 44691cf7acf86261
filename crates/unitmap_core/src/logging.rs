//! Rolling file logs and per-run log context.
//!
//! # Responsibility
//! - Start the rolling file logger once per process.
//! - Track which derivation run, and which stage of it, the current thread
//!   is executing, so panics and failures can be traced back to a run id.
//!
//! # Invariants
//! - Starting again with identical settings is a no-op; other settings are
//!   rejected.
//! - Nothing here panics.
//! - Events carry run ids, dataset names, counts and coordinates only.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{debug, error, info};
use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::fmt;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const LOG_FILE_BASENAME: &str = "unitmap";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEPT_LOG_FILES: usize = 5;
const PANIC_TEXT_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();

thread_local! {
    static CURRENT_RUN: RefCell<Option<RunContext>> = const { RefCell::new(None) };
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    UnsupportedLevel(String),

    #[error("log directory must be an absolute path, got `{}`", .0.display())]
    RelativeDirectory(PathBuf),

    #[error("failed to create log directory `{}`: {message}", path.display())]
    CreateDirectory { path: PathBuf, message: String },

    #[error("failed to start file logger: {0}")]
    Backend(String),

    #[error("logging already active with {active}; refusing {requested}")]
    Conflict {
        active: LogSettings,
        requested: LogSettings,
    },
}

/// Level and directory of the file logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    level: &'static str,
    dir: PathBuf,
}

impl LogSettings {
    /// Accepts the usual level names, case-insensitively, plus `warning`.
    pub fn new(level: &str, dir: &Path) -> Result<Self, LoggingError> {
        let level = match level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            "error" => "error",
            other => return Err(LoggingError::UnsupportedLevel(other.to_string())),
        };
        if !dir.is_absolute() {
            return Err(LoggingError::RelativeDirectory(dir.to_path_buf()));
        }
        Ok(Self {
            level,
            dir: dir.to_path_buf(),
        })
    }

    pub fn level(&self) -> &'static str {
        self.level
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl fmt::Display for LogSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level={} dir={}", self.level, self.dir.display())
    }
}

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Starts file logging with `settings`.
///
/// # Errors
/// - `CreateDirectory` or `Backend` when the logger cannot start.
/// - `Conflict` when logging is already active with other settings.
pub fn init_logging(settings: &LogSettings) -> Result<(), LoggingError> {
    let active = ACTIVE.get_or_try_init(|| start(settings))?;
    if active.settings != *settings {
        return Err(LoggingError::Conflict {
            active: active.settings.clone(),
            requested: settings.clone(),
        });
    }
    Ok(())
}

fn start(settings: &LogSettings) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&settings.dir).map_err(|err| LoggingError::CreateDirectory {
        path: settings.dir.clone(),
        message: err.to_string(),
    })?;

    let handle = Logger::try_with_str(settings.level)
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(&settings.dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEPT_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_init module=core status=ok version={} {}",
        env!("CARGO_PKG_VERSION"),
        settings
    );

    Ok(ActiveLogger {
        settings: settings.clone(),
        _handle: handle,
    })
}

/// Settings of the running logger, or `None` before `init_logging`.
pub fn logging_status() -> Option<&'static LogSettings> {
    ACTIVE.get().map(|active| &active.settings)
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunContext {
    run_id: Uuid,
    stage: &'static str,
}

/// Marks the current thread as executing run `run_id` until dropped.
#[must_use = "the run context ends when the scope is dropped"]
pub struct RunScope {
    run_id: Uuid,
}

impl RunScope {
    pub fn enter(run_id: Uuid) -> Self {
        CURRENT_RUN.with(|slot| {
            *slot.borrow_mut() = Some(RunContext {
                run_id,
                stage: "start",
            })
        });
        Self { run_id }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        CURRENT_RUN.with(|slot| slot.borrow_mut().take());
    }
}

/// Records that the current run moved on to `stage`.
///
/// No-op outside a `RunScope`.
pub fn mark_stage(stage: &'static str) {
    let entered = CURRENT_RUN.with(|slot| {
        slot.borrow_mut().as_mut().map(|context| {
            context.stage = stage;
            context.run_id
        })
    });
    if let Some(run_id) = entered {
        debug!("event=pipeline_stage module=service status=start run_id={run_id} stage={stage}");
    }
}

/// `(run_id, stage)` of the run executing on this thread.
pub fn current_run() -> Option<(Uuid, &'static str)> {
    CURRENT_RUN
        .try_with(|slot| slot.try_borrow().ok().and_then(|context| *context))
        .ok()
        .flatten()
        .map(|context| (context.run_id, context.stage))
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let (run_id, stage) = match current_run() {
            Some((run_id, stage)) => (run_id.to_string(), stage),
            None => ("-".to_string(), "-"),
        };
        error!(
            "event=panic_captured module=core status=error run_id={} stage={} location={} payload={}",
            run_id,
            stage,
            location,
            panic_text(panic_info)
        );
        previous(panic_info);
    }));
}

fn panic_text(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    let text = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    single_line(text, PANIC_TEXT_CHARS)
}

fn single_line(text: &str, max_chars: usize) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    let mut out: String = flat.chars().take(max_chars).collect();
    if flat.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
