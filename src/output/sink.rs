// src/output/sink.rs

//! Storage sinks receiving a copy of every routed output line.
//!
//! Sinks are synchronous; the router drives each one on its own blocking
//! worker so that a slow sink only delays itself.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::OutputLine;
use super::parser::Fields;

/// A destination for output lines.
pub trait StorageSink: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn write_line(&mut self, line: &OutputLine, fields: &Fields) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {:?}", parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening output file {:?}", path))?;
    Ok(BufWriter::new(file))
}

/// Plain-text file sink: one raw line per output line.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let writer = open_append(&path)?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write_line(&mut self, line: &OutputLine, _fields: &Fields) -> Result<()> {
        writeln!(self.writer, "{}", line.text)
            .with_context(|| format!("writing to {:?}", self.path))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("flushing {:?}", self.path))
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    seq: u64,
    stream: &'a str,
    line: &'a str,
    #[serde(skip_serializing_if = "no_fields")]
    fields: &'a Fields,
}

fn no_fields(fields: &&Fields) -> bool {
    fields.is_empty()
}

/// JSON-lines file sink: timestamp, stream, line and parsed fields.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let writer = open_append(&path)?;
        Ok(Self { path, writer })
    }
}

impl StorageSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn write_line(&mut self, line: &OutputLine, fields: &Fields) -> Result<()> {
        let record = JsonRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            seq: line.seq,
            stream: if line.is_error { "stderr" } else { "stdout" },
            line: &line.text,
            fields,
        };
        serde_json::to_writer(&mut self.writer, &record)
            .with_context(|| format!("serializing record to {:?}", self.path))?;
        self.writer
            .write_all(b"\n")
            .with_context(|| format!("writing to {:?}", self.path))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("flushing {:?}", self.path))
    }
}

/// Re-emits captured output on the supervisor's own stdout/stderr.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl StorageSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn write_line(&mut self, line: &OutputLine, _fields: &Fields) -> Result<()> {
        if line.is_error {
            writeln!(std::io::stderr().lock(), "{}", line.text)?;
        } else {
            writeln!(std::io::stdout().lock(), "{}", line.text)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        std::io::stdout().flush()?;
        Ok(())
    }
}
