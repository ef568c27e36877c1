// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/tracker.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TrackerConfig;

/// Identity of one tracked run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub project_name: String,
    pub task_name: String,
    pub started_at: DateTime<Utc>,
}

/// Something reported during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerEvent {
    Scalar {
        title: String,
        series: String,
        iteration: u64,
        value: f64,
    },
    Text {
        message: String,
    },
    Histogram {
        title: String,
        series: String,
        iteration: u64,
        values: Vec<f64>,
        xaxis: String,
        yaxis: String,
    },
    Matrix {
        title: String,
        series: String,
        iteration: u64,
        rows: Vec<Vec<f64>>,
    },
}

/// Destination for tracker events.
pub trait TrackerSink: Send {
    fn record(&mut self, run: &RunInfo, event: &TrackerEvent) -> Result<()>;
    fn finalize(&mut self, _run: &RunInfo) -> Result<()> {
        Ok(())
    }
}

/// Writes events to the `tracing` log.
#[derive(Debug, Default)]
pub struct LogSink;

impl TrackerSink for LogSink {
    fn record(&mut self, run: &RunInfo, event: &TrackerEvent) -> Result<()> {
        match event {
            TrackerEvent::Scalar { title, series, iteration, value } => {
                debug!(run_id = %run.run_id, "{}/{} @ {} = {:.6}", title, series, iteration, value)
            }
            TrackerEvent::Text { message } => info!(run_id = %run.run_id, "{}", message),
            TrackerEvent::Histogram { title, series, values, .. } => {
                debug!(run_id = %run.run_id, "{}/{}: histogram of {} values", title, series, values.len())
            }
            TrackerEvent::Matrix { title, series, rows, .. } => {
                debug!(run_id = %run.run_id, "{}/{}: {}x{} matrix", title, series, rows.len(),
                    rows.first().map_or(0, |r| r.len()))
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    run_id: &'a Uuid,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a TrackerEvent,
}

/// One JSON object per line: run id, timestamp and the flattened event.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink").field("path", &self.path).finish()
    }
}

impl JsonlSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create tracker directory {:?}", parent))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create tracker file {:?}", path))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

impl TrackerSink for JsonlSink {
    fn record(&mut self, run: &RunInfo, event: &TrackerEvent) -> Result<()> {
        let record = JsonlRecord {
            run_id: &run.run_id,
            timestamp: Utc::now(),
            event,
        };
        serde_json::to_writer(&mut self.writer, &record).context("Failed to serialize tracker event")?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finalize(&mut self, _run: &RunInfo) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush tracker file {:?}", self.path))
    }
}

/// Keeps events in a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TrackerEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Scalar values reported under `title`/`series`, in order.
    pub fn scalars(&self, title: &str, series: &str) -> Vec<(u64, f64)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TrackerEvent::Scalar { title: t, series: s, iteration, value }
                    if t == title && s == series =>
                {
                    Some((iteration, value))
                }
                _ => None,
            })
            .collect()
    }
}

impl TrackerSink for MemorySink {
    fn record(&mut self, _run: &RunInfo, event: &TrackerEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Fans reports out to every registered sink.
pub struct ExperimentTracker {
    run: RunInfo,
    run_dir: Option<PathBuf>,
    sinks: Vec<Box<dyn TrackerSink>>,
}

impl std::fmt::Debug for ExperimentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentTracker")
            .field("run", &self.run)
            .field("run_dir", &self.run_dir)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl ExperimentTracker {
    pub fn new(project_name: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            run: RunInfo {
                run_id: Uuid::new_v4(),
                project_name: project_name.into(),
                task_name: task_name.into(),
                started_at: Utc::now(),
            },
            run_dir: None,
            sinks: Vec::new(),
        }
    }

    /// Tracker for a configured experiment: always logs, and writes
    /// `<output_dir>/<project>/<task>/<run_id>/events.jsonl` when output is on.
    pub fn init(cfg: &TrackerConfig) -> Result<Self> {
        let mut tracker = Self::new(&cfg.project_name, &cfg.task_name).with_sink(LogSink);

        if cfg.output_enabled() {
            let run_dir = Path::new(cfg.output_dir())
                .join(&cfg.project_name)
                .join(&cfg.task_name)
                .join(tracker.run.run_id.to_string());
            let sink = JsonlSink::create(run_dir.join("events.jsonl"))?;
            tracker = tracker.with_sink(sink);
            tracker.run_dir = Some(run_dir);
        }

        info!(
            "Tracker initialized: project={}, task={}, run_id={}, queue={}",
            cfg.project_name,
            cfg.task_name,
            tracker.run.run_id,
            cfg.queue_name.as_deref().unwrap_or("local")
        );
        Ok(tracker)
    }

    pub fn with_sink(mut self, sink: impl TrackerSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn run(&self) -> &RunInfo {
        &self.run
    }

    /// Directory holding this run's output, when output is enabled.
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    pub fn record(&mut self, event: TrackerEvent) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.record(&self.run, &event)?;
        }
        Ok(())
    }

    pub fn report_scalar(&mut self, title: &str, series: &str, iteration: u64, value: f64) -> Result<()> {
        self.record(TrackerEvent::Scalar {
            title: title.to_string(),
            series: series.to_string(),
            iteration,
            value,
        })
    }

    pub fn report_text(&mut self, message: impl Into<String>) -> Result<()> {
        self.record(TrackerEvent::Text { message: message.into() })
    }

    pub fn report_histogram(
        &mut self,
        title: &str,
        series: &str,
        iteration: u64,
        values: &[f64],
        xaxis: &str,
        yaxis: &str,
    ) -> Result<()> {
        self.record(TrackerEvent::Histogram {
            title: title.to_string(),
            series: series.to_string(),
            iteration,
            values: values.to_vec(),
            xaxis: xaxis.to_string(),
            yaxis: yaxis.to_string(),
        })
    }

    pub fn report_matrix(&mut self, title: &str, series: &str, iteration: u64, rows: Vec<Vec<f64>>) -> Result<()> {
        if let Some(width) = rows.first().map(|r| r.len()) {
            if rows.iter().any(|r| r.len() != width) {
                anyhow::bail!("matrix {}/{} has rows of different lengths", title, series);
            }
        }
        self.record(TrackerEvent::Matrix {
            title: title.to_string(),
            series: series.to_string(),
            iteration,
            rows,
        })
    }

    pub fn finalize(&mut self) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.finalize(&self.run)?;
        }
        info!("Tracker finalized for run_id: {}", self.run.run_id);
        Ok(())
    }
}
