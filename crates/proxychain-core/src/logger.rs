/// JSON-lines logging for connection reports.

use crate::error::Error;
use crate::report::ConnectionReport;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use tracing::{error, info};

pub struct ChainLogger {
    log_path: String,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl ChainLogger {
    /// An empty `log_path` disables the file sink; events still go to
    /// `tracing`.
    pub fn new(log_path: &str) -> Result<Self, Error> {
        let writer = if !log_path.is_empty() {
            let file = OpenOptions::new().create(true).append(true).open(log_path)?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(ChainLogger {
            log_path: log_path.to_string(),
            writer: Mutex::new(writer),
        })
    }

    /// Write a connection report as one JSON line.
    pub fn log_report(&self, report: &ConnectionReport) {
        let line = match serde_json::to_string(report) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to serialize ConnectionReport: {}", e);
                return;
            }
        };
        self.write_line(&line);
        info!(
            chain = %report.chain_id,
            target = format!("{}:{}", report.target_host, report.target_port),
            steps = report.steps.len(),
            duration_ms = report.duration_ms,
            ok = report.succeeded(),
            "chain build finished"
        );
    }

    pub fn log_error(&self, msg: &str) {
        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": "ERROR",
            "message": msg,
        });
        self.write_line(&entry.to_string());
        error!("{}", msg);
    }

    pub fn log_info(&self, msg: &str) {
        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": "INFO",
            "message": msg,
        });
        self.write_line(&entry.to_string());
        info!("{}", msg);
    }

    fn write_line(&self, line: &str) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(ref mut w) = *guard {
                let _ = writeln!(w, "{}", line);
                let _ = w.flush();
            }
        }
    }

    pub fn log_path(&self) -> &str {
        &self.log_path
    }
}
