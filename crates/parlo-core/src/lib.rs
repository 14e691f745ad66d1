//! Core domain types and port definitions for the parlo speech service.
//!
//! This crate holds everything the orchestrator and the engine layer agree
//! on without either depending on the other's implementation details: model
//! descriptors, engine kinds and roles, resolved model configurations,
//! speech modes, and the trait seams (ports) behind which the external
//! collaborators live — the model catalog and the persistent settings store.
//!
//! No audio, threading, or engine code belongs here.

pub mod domain;
pub mod ports;

// Re-export commonly used types for convenience
pub use domain::{EngineKind, ModelConfig, ModelFiles, ModelInfo, ModelRole, SpeechMode};
pub use ports::{CatalogError, ModelCatalog, SettingsStore};
