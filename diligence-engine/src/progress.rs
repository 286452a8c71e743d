//! Run progress events
//!
//! The executor reports each section start, completion and failure. Updates
//! are logged and broadcast to any subscriber; sending with no subscriber is
//! not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// One progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressUpdate {
    Started {
        run_id: String,
        section_id: String,
        display_name: String,
        /// 1-based position in the plan
        index: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },
    Completed {
        run_id: String,
        section_id: String,
        index: usize,
        total: usize,
        section_ms: u64,
        elapsed_ms: u64,
        /// Average section time multiplied by the sections left
        eta_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },
    Failed {
        run_id: String,
        section_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Finished {
        run_id: String,
        executed: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressUpdate {
    pub fn run_id(&self) -> &str {
        match self {
            ProgressUpdate::Started { run_id, .. }
            | ProgressUpdate::Completed { run_id, .. }
            | ProgressUpdate::Failed { run_id, .. }
            | ProgressUpdate::Finished { run_id, .. } => run_id,
        }
    }

    /// Fraction of the plan done, when known
    pub fn fraction(&self) -> Option<f64> {
        match self {
            ProgressUpdate::Completed { index, total, .. } if *total > 0 => {
                Some((*index as f64 / *total as f64).clamp(0.0, 1.0))
            }
            ProgressUpdate::Finished { .. } => Some(1.0),
            _ => None,
        }
    }
}

/// Broadcasts progress for runs
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressUpdate>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ProgressReporter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    /// Start tracking one invocation over `total` planned sections
    pub fn begin(&self, run_id: &str, total: usize) -> RunProgress {
        info!(run_id = run_id, total = total, "Starting run");
        RunProgress {
            sender: self.sender.clone(),
            run_id: run_id.to_string(),
            total,
            completed: 0,
            started: Instant::now(),
            section_started: None,
        }
    }
}

/// Progress of one invocation
#[derive(Debug)]
pub struct RunProgress {
    sender: broadcast::Sender<ProgressUpdate>,
    run_id: String,
    total: usize,
    completed: usize,
    started: Instant,
    section_started: Option<Instant>,
}

impl RunProgress {
    pub fn section_started(&mut self, section_id: &str, display_name: &str) {
        self.section_started = Some(Instant::now());
        info!(
            run_id = %self.run_id,
            section_id = section_id,
            "[{}/{}] Starting: {}",
            self.completed + 1,
            self.total,
            display_name
        );
        self.emit(ProgressUpdate::Started {
            run_id: self.run_id.clone(),
            section_id: section_id.to_string(),
            display_name: display_name.to_string(),
            index: self.completed + 1,
            total: self.total,
            timestamp: Utc::now(),
        });
    }

    pub fn section_completed(&mut self, section_id: &str) {
        self.completed += 1;
        let section_ms = self
            .section_started
            .take()
            .map(|t| millis(t.elapsed()))
            .unwrap_or_default();
        let elapsed = self.started.elapsed();
        let eta_ms = self.estimate_remaining(elapsed);

        info!(
            run_id = %self.run_id,
            section_id = section_id,
            section_ms = section_ms,
            elapsed_ms = millis(elapsed),
            eta_ms = ?eta_ms,
            "[{}/{}] Completed: {}",
            self.completed,
            self.total,
            section_id
        );
        self.emit(ProgressUpdate::Completed {
            run_id: self.run_id.clone(),
            section_id: section_id.to_string(),
            index: self.completed,
            total: self.total,
            section_ms,
            elapsed_ms: millis(elapsed),
            eta_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn section_failed(&mut self, section_id: &str, message: &str) {
        self.section_started = None;
        warn!(
            run_id = %self.run_id,
            section_id = section_id,
            completed = self.completed,
            error = message,
            "Section failed"
        );
        self.emit(ProgressUpdate::Failed {
            run_id: self.run_id.clone(),
            section_id: section_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Emit the final event and return total elapsed milliseconds
    pub fn finish(self) -> u64 {
        let elapsed_ms = millis(self.started.elapsed());
        info!(
            run_id = %self.run_id,
            executed = self.completed,
            elapsed_ms = elapsed_ms,
            "Run finished"
        );
        self.emit(ProgressUpdate::Finished {
            run_id: self.run_id.clone(),
            executed: self.completed,
            elapsed_ms,
            timestamp: Utc::now(),
        });
        elapsed_ms
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn elapsed_ms(&self) -> u64 {
        millis(self.started.elapsed())
    }

    fn estimate_remaining(&self, elapsed: Duration) -> Option<u64> {
        if self.completed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.completed) as u64;
        let average = millis(elapsed) / self.completed as u64;
        Some(average * remaining)
    }

    fn emit(&self, update: ProgressUpdate) {
        // No receivers is fine
        let _ = self.sender.send(update);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
