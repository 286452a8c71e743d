//! Core trait definitions

use crate::error::DiligenceResult;
use crate::types::Generation;
use async_trait::async_trait;
use std::sync::Arc;

/// The single external capability the engine consumes
///
/// Turns a section id plus the concatenated output of its dependencies into
/// section content. Implementations may call one model, negotiate between
/// several agents, search the web, or anything else; every `Err` is treated
/// by the engine as a uniform failure of that section.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate the content of one section
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "provider"
    }
}

#[async_trait]
impl<P: GenerationProvider + ?Sized> GenerationProvider for Arc<P> {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        (**self).generate(section_id, context).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<P: GenerationProvider + ?Sized> GenerationProvider for Box<P> {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        (**self).generate(section_id, context).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
