//! Run state persistence backends

use crate::error::EngineResult;
use crate::state::{RunState, RunSummary, SectionResult};
use async_trait::async_trait;
use diligence_core::{DiligenceError, ErrorContext};
use std::fmt::Write as _;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Durable storage for run states
///
/// A single writer per run id is assumed. Distinct run ids may be used
/// concurrently.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Persisted state, or a fresh empty state when the run is unknown
    async fn load(&self, run_id: &str) -> EngineResult<RunState>;

    /// Replace the persisted state as a whole
    async fn save(&self, state: &RunState) -> EngineResult<()>;

    /// Record one completed section and drop `invalidated` dependents
    ///
    /// Either the new state is persisted completely or the previous one stays
    /// in place. Returns the state as persisted.
    async fn record_completion(
        &self,
        run_id: &str,
        company_id: &str,
        section_id: &str,
        result: SectionResult,
        invalidated: &[String],
    ) -> EngineResult<RunState> {
        let mut state = self.load(run_id).await?;
        state.apply_completion(company_id, section_id, result, invalidated)?;
        self.save(&state).await?;
        Ok(state)
    }

    async fn is_complete(&self, run_id: &str, section_id: &str) -> EngineResult<bool> {
        Ok(self.load(run_id).await?.is_complete(section_id))
    }

    /// Summaries of all stored runs, most recently updated first
    async fn list_runs(&self) -> EngineResult<Vec<RunSummary>>;
}

#[async_trait]
impl<S: RunStateStore + ?Sized> RunStateStore for Arc<S> {
    async fn load(&self, run_id: &str) -> EngineResult<RunState> {
        (**self).load(run_id).await
    }

    async fn save(&self, state: &RunState) -> EngineResult<()> {
        (**self).save(state).await
    }

    async fn record_completion(
        &self,
        run_id: &str,
        company_id: &str,
        section_id: &str,
        result: SectionResult,
        invalidated: &[String],
    ) -> EngineResult<RunState> {
        (**self)
            .record_completion(run_id, company_id, section_id, result, invalidated)
            .await
    }

    async fn is_complete(&self, run_id: &str, section_id: &str) -> EngineResult<bool> {
        (**self).is_complete(run_id, section_id).await
    }

    async fn list_runs(&self) -> EngineResult<Vec<RunSummary>> {
        (**self).list_runs().await
    }
}

fn sort_summaries(runs: &mut [RunSummary]) {
    runs.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
}

/// One JSON file per run under a state directory
#[derive(Debug, Clone)]
pub struct FileRunStateStore {
    state_dir: PathBuf,
}

impl FileRunStateStore {
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path of the file backing `run_id`; distinct ids never share a file
    pub fn state_file(&self, run_id: &str) -> PathBuf {
        self.state_dir
            .join(format!("{}.json", encode_run_id(run_id)))
    }

    /// Write to a unique temp file next to the target, flush, then rename over it
    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> EngineResult<()> {
        fs::create_dir_all(&self.state_dir).await?;

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("run.json");
        let temp_path = self
            .state_dir
            .join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, target).await
        }
        .await;

        if let Err(e) = written {
            warn!(path = %temp_path.display(), error = %e, "Atomic write failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl RunStateStore for FileRunStateStore {
    async fn load(&self, run_id: &str) -> EngineResult<RunState> {
        let path = self.state_file(run_id);
        match fs::read_to_string(&path).await {
            Ok(json) => {
                let state: RunState = serde_json::from_str(&json)?;
                if state.run_id != run_id {
                    return Err(DiligenceError::Storage {
                        message: format!(
                            "{} holds run '{}', expected '{}'",
                            path.display(),
                            state.run_id,
                            run_id
                        ),
                        source: None,
                        context: ErrorContext::new("run_state_store")
                            .with_operation("load")
                            .with_metadata("run_id", run_id)
                            .with_suggestion("Remove or rename the misplaced state file"),
                    }
                    .into());
                }
                debug!(
                    run_id = run_id,
                    completed = state.completed_sections.len(),
                    "Loaded run state"
                );
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(run_id = run_id, "No stored state, starting fresh run");
                Ok(RunState::new(run_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &RunState) -> EngineResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let path = self.state_file(&state.run_id);
        self.write_atomic(&path, &json).await?;
        debug!(run_id = %state.run_id, path = %path.display(), "Saved run state");
        Ok(())
    }

    async fn list_runs(&self) -> EngineResult<Vec<RunSummary>> {
        let mut entries = match fs::read_dir(&self.state_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let json = match fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable run state");
                    continue;
                }
            };
            match serde_json::from_str::<RunState>(&json) {
                Ok(state) => runs.push(state.summary()),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run state"),
            }
        }

        sort_summaries(&mut runs);
        Ok(runs)
    }
}

/// In-process store for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStateStore {
    runs: Arc<RwLock<HashMap<String, RunState>>>,
}

impl MemoryRunStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with states loaded elsewhere
    pub async fn load_from<S: RunStateStore>(&self, source: &S) -> EngineResult<usize> {
        let summaries = source.list_runs().await?;
        let count = summaries.len();
        for summary in summaries {
            let state = source.load(&summary.run_id).await?;
            self.save(&state).await?;
        }
        info!("Loaded {} runs into memory store", count);
        Ok(count)
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStateStore {
    async fn load(&self, run_id: &str) -> EngineResult<RunState> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(run_id)
            .cloned()
            .unwrap_or_else(|| RunState::new(run_id)))
    }

    async fn save(&self, state: &RunState) -> EngineResult<()> {
        let mut runs = self.runs.write().await;
        runs.insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    async fn record_completion(
        &self,
        run_id: &str,
        company_id: &str,
        section_id: &str,
        result: SectionResult,
        invalidated: &[String],
    ) -> EngineResult<RunState> {
        let mut runs = self.runs.write().await;
        let mut state = runs
            .get(run_id)
            .cloned()
            .unwrap_or_else(|| RunState::new(run_id));
        state.apply_completion(company_id, section_id, result, invalidated)?;
        runs.insert(run_id.to_string(), state.clone());
        Ok(state)
    }

    async fn list_runs(&self) -> EngineResult<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut summaries: Vec<RunSummary> = runs.values().map(RunState::summary).collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; percent-encode every other byte
///
/// `%` itself is always encoded, so the mapping is injective. The empty id
/// becomes a lone `%`, which no other id produces.
fn encode_run_id(run_id: &str) -> String {
    if run_id.is_empty() {
        return "%".to_string();
    }
    let mut encoded = String::with_capacity(run_id.len());
    for byte in run_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{:02X}", byte);
        }
    }
    encoded
}
