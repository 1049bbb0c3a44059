//! Tracing setup plus an in-memory copy of each run's log for upload.

use std::io;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rcl_storage::DocumentStore;
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_JSON_ENV: &str = "RCL_LOG_JSON";

/// Shared byte buffer that every run writes its log lines into.
#[derive(Clone, Default)]
pub struct RunLog(Arc<Mutex<Vec<u8>>>);

pub struct RunLogWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter(Arc::clone(&self.0))
    }
}

impl io::Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "run log lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    /// Drains the buffer so the next run starts empty.
    pub fn take(&self) -> Vec<u8> {
        self.0
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Installs the global subscriber: stderr (JSON with `RCL_LOG_JSON=1`) plus `run_log`.
/// Returns false when a subscriber was already installed.
pub fn init_tracing(run_log: &RunLog) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = if env_flag(LOG_JSON_ENV) {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .boxed()
    };
    let buffered = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(run_log.clone());

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(buffered)
        .try_init()
        .is_ok()
}

pub fn log_file_name(run_date: NaiveDate) -> String {
    format!("rcl_pipeline_logs_{}.log", run_date.format("%Y-%m-%d"))
}

/// Uploads and drains the buffer. A failed upload is only logged.
pub async fn upload_run_log(
    store: &dyn DocumentStore,
    container: &str,
    run_log: &RunLog,
    run_date: NaiveDate,
) -> bool {
    let name = log_file_name(run_date);
    info!(container, name = %name, "uploading run log");
    let bytes = run_log.take();
    match store.write(container, &name, &bytes).await {
        Ok(_) => true,
        Err(e) => {
            error!(container, name = %name, error = %e, "run log upload failed");
            false
        }
    }
}
