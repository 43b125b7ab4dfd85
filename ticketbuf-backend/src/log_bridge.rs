/// Process logger: env_logger formatting to stderr, plus a copy of every
/// record kept in memory for `/logs` and appended to
/// `<config_dir>/ticketbuf/logs/backend.log`.
use env_logger::{Logger, Target};
use log::{Log, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

const MAX_LOG_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    fn now(level: &str, target: &str, message: String) -> Self {
        Self {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            level: level.to_string(),
            target: target.to_string(),
            message,
        }
    }
}

struct LogRing {
    entries: Mutex<VecDeque<LogEntry>>,
    tx: broadcast::Sender<LogEntry>,
}

impl LogRing {
    fn push(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == MAX_LOG_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        let _ = self.tx.send(entry);
    }

    fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| {
                let skip = entries.len().saturating_sub(limit);
                entries.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }
}

static LOG_RING: LazyLock<LogRing> = LazyLock::new(|| {
    let (tx, _) = broadcast::channel(256);
    LogRing {
        entries: Mutex::new(VecDeque::with_capacity(MAX_LOG_ENTRIES)),
        tx,
    }
});

/// Append handle for `<config_dir>/ticketbuf/logs/backend.log`; `None` when it cannot be opened.
static LOG_FILE: LazyLock<Option<Mutex<File>>> = LazyLock::new(|| {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok()?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
    Some(Mutex::new(file))
});

fn log_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ticketbuf")
        .join("logs")
        .join("backend.log")
}

fn format_log_line(entry: &LogEntry) -> String {
    format!(
        "{} {:<5} {} {}",
        entry.timestamp_ms,
        entry.level.to_uppercase(),
        entry.target,
        entry.message.replace('\n', "\\n")
    )
}

struct TeeLogger {
    inner: Logger,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);

        let entry = LogEntry::now(
            &record.level().to_string().to_lowercase(),
            record.target(),
            record.args().to_string(),
        );
        if let Some(Ok(mut file)) = LOG_FILE.as_ref().map(|file| file.lock()) {
            let _ = writeln!(file, "{}", format_log_line(&entry));
        }
        LOG_RING.push(entry);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the logger. `RUST_LOG` overrides the default `info` filter.
pub fn init() -> Result<(), SetLoggerError> {
    let inner = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .build();
    let max_level = inner.filter();
    log::set_boxed_logger(Box::new(TeeLogger { inner }))?;
    log::set_max_level(max_level);
    Ok(())
}

pub fn recent_entries(limit: usize) -> Vec<LogEntry> {
    LOG_RING.recent(limit)
}

pub fn subscribe() -> broadcast::Receiver<LogEntry> {
    LOG_RING.tx.subscribe()
}
