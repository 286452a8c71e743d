//! Diligence Core - Core data structures and capability definitions
//!
//! This crate defines the error taxonomy, configuration, logging bootstrap,
//! company input-source model and the generation capability shared by the
//! rest of the diligence report pipeline

pub mod async_utils;
pub mod config;
pub mod error;
pub mod input;
pub mod logging;
pub mod traits;
pub mod types;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use input::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
