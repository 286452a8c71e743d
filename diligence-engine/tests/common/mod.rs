//! Shared helpers for engine tests

#![allow(dead_code)]

use diligence_core::{async_trait, generation_error, DiligenceResult, Generation, GenerationProvider};
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("diligence_engine=debug,info")
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic provider that records every call
///
/// Content is `section(context)`, so any change in upstream content shows up
/// in every dependent.
#[derive(Default)]
pub struct ScriptedProvider {
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call for `section_id` until cleared
    pub fn failing_on(section_id: &str) -> Self {
        let provider = Self::default();
        provider.fail_on(Some(section_id));
        provider
    }

    pub fn fail_on(&self, section_id: Option<&str>) {
        *self.fail_on.lock().unwrap() = section_id.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        self.calls.lock().unwrap().push(section_id.to_string());

        if self.fail_on.lock().unwrap().as_deref() == Some(section_id) {
            return Err(generation_error!(
                format!("scripted failure in {section_id}"),
                "scripted"
            ));
        }

        Ok(Generation::new(format!("{section_id}({context})"))
            .with_source_refs([format!("ref:{section_id}")]))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
