use std::env;
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::{
    fs::{File, OpenOptions},
    sync::Mutex,
};

use anyhow::Result;
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

static BARGE_LOGGER: OnceCell<BargeLogger> = OnceCell::new();
static LOG_FILE: OnceCell<Option<Mutex<File>>> = OnceCell::new();

/// Installs the process-wide logger. The supervisor embedding this crate
/// calls it exactly once at startup; repeated calls are ignored. The log
/// level is taken from `BARGE_LOG_LEVEL`, defaulting to `warn`.
pub fn init(log_file: Option<PathBuf>) -> Result<()> {
    let _log_file = LOG_FILE.get_or_init(|| -> Option<Mutex<File>> {
        let level_filter = if let Ok(log_level_str) = env::var("BARGE_LOG_LEVEL") {
            LevelFilter::from_str(&log_level_str).unwrap_or(LevelFilter::Warn)
        } else {
            LevelFilter::Warn
        };

        let logger = BARGE_LOGGER.get_or_init(|| BargeLogger::new(level_filter.to_level()));
        log::set_logger(logger)
            .map(|()| log::set_max_level(level_filter))
            .expect("set logger failed");
        log_file.as_ref().map(|log_file_path| {
            Mutex::new(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(false)
                    .open(log_file_path)
                    .expect("failed opening log file"),
            )
        })
    });
    Ok(())
}

pub struct BargeLogger {
    level: Option<log::Level>,
}

impl BargeLogger {
    fn new(level: Option<log::Level>) -> Self {
        Self { level }
    }
}

impl Log for BargeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if let Some(level) = self.level {
            metadata.level() <= level
        } else {
            false
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_msg = match (record.file(), record.line()) {
                (Some(file), Some(line)) => format!(
                    "[{} {}:{}] {} {}",
                    record.level(),
                    file,
                    line,
                    chrono::Local::now().to_rfc3339(),
                    record.args()
                ),
                (_, _) => format!(
                    "[{}] {} {}",
                    record.level(),
                    chrono::Local::now().to_rfc3339(),
                    record.args()
                ),
            };
            match LOG_FILE.get().and_then(Option::as_ref) {
                Some(log_file) => {
                    let mut log_file = log_file.lock().unwrap_or_else(|e| e.into_inner());
                    let _ = writeln!(log_file, "{}", log_msg);
                }
                None => {
                    let _ = writeln!(stderr(), "{}", log_msg);
                }
            }
        }
    }

    fn flush(&self) {
        if let Some(log_file) = LOG_FILE.get().and_then(Option::as_ref) {
            let mut log_file = log_file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = log_file.flush();
        } else {
            let _ = stderr().flush();
        }
    }
}
