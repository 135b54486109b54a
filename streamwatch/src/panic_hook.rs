//! Panic reporting.
//!
//! Panics are logged through `tracing`. Release builds abort on panic, and
//! the non-blocking file writer may not flush before that, so the record is
//! also appended to today's log file directly.

use std::backtrace::Backtrace;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::Local;

use crate::logging::LOG_FILE_PREFIX;

struct PanicRecord {
    timestamp: String,
    thread: String,
    location: String,
    payload: String,
    backtrace: Backtrace,
}

impl PanicRecord {
    fn capture(info: &PanicHookInfo<'_>) -> Self {
        let payload = info
            .payload()
            .downcast_ref::<&'static str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| info.to_string());

        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),
            thread: thread::current().name().unwrap_or("<unnamed>").to_string(),
            location: info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "<unknown>".to_string()),
            payload,
            backtrace: Backtrace::force_capture(),
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} PANIC thread={} location={} payload={}\nBacktrace:\n{}",
            self.timestamp, self.thread, self.location, self.payload, self.backtrace
        )
    }
}

/// Install the hook; the previous hook still runs afterwards.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = PanicRecord::capture(info).to_string();
            tracing::error!(target: "streamwatch::panic", "{record}");
            if cfg!(panic = "abort") {
                let _ = append_to_daily_log(&log_dir, &record);
            }
        }));

        previous_hook(info);
    }));
}

/// Path of today's file as named by the daily rolling appender.
fn daily_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!(
        "{}.{}",
        LOG_FILE_PREFIX,
        Local::now().format("%Y-%m-%d")
    ))
}

fn append_to_daily_log(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(daily_log_path(log_dir))?;
    writeln!(file, "{record}")?;
    file.flush()
}
