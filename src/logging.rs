use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::core::llm::AUDIT_TARGET;

/// Fans `llm_audit`-target events into an append-only call log. That file
/// is the gateway's audit trail, so it gets its own writer instead of
/// riding the stderr subscriber's filter.
#[derive(Clone)]
struct AuditMakeWriter {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for AuditMakeWriter {
    type Writer = AuditWriter;

    fn make_writer(&'a self) -> Self::Writer {
        AuditWriter {
            file: self.file.clone(),
        }
    }
}

struct AuditWriter {
    file: Arc<Mutex<File>>,
}

impl Write for AuditWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.flush()
    }
}

/// Install the global subscriber: stderr honoring `RUST_LOG` (default
/// `info`), plus the LLM call log under `log_dir`.
pub fn init(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let log_path = log_dir.join("llm_calls.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let audit_layer = fmt::layer()
        .with_writer(AuditMakeWriter {
            file: Arc::new(Mutex::new(file)),
        })
        .with_ansi(false)
        .with_target(false)
        .with_filter(Targets::new().with_target(AUDIT_TARGET, tracing::Level::INFO));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(audit_layer)
        .init();

    Ok(())
}
