//! Writers for detection outcomes produced outside the HTTP API

use crate::models::{DetectionResult, LoginEvent};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// One processed login and what came of it
#[derive(Debug, Serialize)]
pub struct DetectionRecord<'a> {
    pub event: &'a LoginEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a DetectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output handler for detection records
pub struct OutputHandler {
    format: OutputFormat,
    writer: Box<dyn Write + Send>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "jsonl" => OutputFormat::Jsonl,
            "console" => OutputFormat::Console,
            _ => OutputFormat::Jsonl, // Default
        }
    }
}

impl OutputHandler {
    /// Write to `file_path` (appending), or stdout when none is given
    pub fn new(format: OutputFormat, file_path: Option<PathBuf>) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match file_path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(io::stdout()),
        };

        Ok(OutputHandler { format, writer })
    }

    pub fn with_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        OutputHandler { format, writer }
    }

    pub fn write_record(&mut self, record: &DetectionRecord<'_>) -> Result<(), Box<dyn std::error::Error>> {
        let line = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record)?,
            OutputFormat::Jsonl => serde_json::to_string(record)?,
            OutputFormat::Console => Self::console_line(record),
        };
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    fn console_line(record: &DetectionRecord<'_>) -> String {
        let event = record.event;
        let head = format!("user={} ip={} ts={}", event.user, event.ip, event.timestamp);
        match (record.result, &record.error) {
            (_, Some(error)) => format!("[ERROR] {} - {}", head, error),
            (Some(result), None) => {
                let describe = |label: &str, n: &crate::models::ClassifiedNeighbor| {
                    format!(
                        " {}={}@{} {:.1}mph{}",
                        label,
                        n.event.ip,
                        n.event.timestamp,
                        n.implied_speed,
                        if n.suspicious { "!" } else { "" }
                    )
                };
                let mut line = format!(
                    "[{}] {} at ({:.4}, {:.4})",
                    if result.is_suspicious() { "SUSPICIOUS" } else { "OK" },
                    head,
                    result.current_geo.latitude,
                    result.current_geo.longitude
                );
                if let Some(n) = &result.preceding {
                    line.push_str(&describe("prev", n));
                }
                if let Some(n) = &result.subsequent {
                    line.push_str(&describe("next", n));
                }
                line
            }
            (None, None) => format!("[OK] {}", head),
        }
    }

    /// Flush any buffered output
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
