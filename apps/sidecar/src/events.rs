//! Lifecycle event emission
//!
//! One line per event, flushed immediately, so a supervising process can
//! follow startup and shutdown. Logs go to stderr and never share this channel.

use anyhow::{Context, Result};
use clap::ValueEnum;
use mesh_sidecar_common::SidecarEvent;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Line encoding of emitted events
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventFormat {
    /// One JSON object per line
    Json,
    /// `@@SIDECAR:<EVENT>@@ <detail>` lines
    Sentinel,
}

/// Where events are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSink {
    Stdout,
    /// A file or FIFO, opened for appending
    Path(PathBuf),
}

impl EventSink {
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "-" | "stdout" => EventSink::Stdout,
            path => EventSink::Path(PathBuf::from(path)),
        }
    }
}

pub struct EventEmitter {
    format: EventFormat,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl EventEmitter {
    pub fn new(writer: Box<dyn Write + Send>, format: EventFormat) -> Self {
        Self {
            format,
            writer: Mutex::new(writer),
        }
    }

    pub fn open(sink: &EventSink, format: EventFormat) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match sink {
            EventSink::Stdout => Box::new(io::stdout()),
            EventSink::Path(path) => Box::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open event sink {}", path.display()))?,
            ),
        };
        Ok(Self::new(writer, format))
    }

    fn encode(&self, event: &SidecarEvent) -> mesh_sidecar_common::Result<String> {
        match self.format {
            EventFormat::Json => event.to_json_line(),
            EventFormat::Sentinel => Ok(event.to_sentinel_line()),
        }
    }

    /// Write one event line; a broken event channel is logged, never fatal
    pub fn emit(&self, event: &SidecarEvent) {
        let line = match self.encode(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode event {:?}: {}", event, e);
                return;
            }
        };

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let written = writeln!(writer, "{}", line).and_then(|_| writer.flush());

        match written {
            Ok(()) => debug!("Emitted event: {}", line),
            Err(e) => warn!("Failed to emit event: {}", e),
        }
    }
}
