//! Port definitions (trait abstractions) for external collaborators.
//!
//! Ports define the interfaces the orchestrator expects from infrastructure
//! it does not own: the model catalog/downloader and the persistent
//! settings store. Both are passed into the orchestrator explicitly at
//! construction — never reached through globals — so tests can substitute
//! fakes and ownership stays obvious.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::ModelInfo;

/// Errors surfaced by the model catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog backend could not be reached or reloaded.
    #[error("model catalog unavailable: {0}")]
    Unavailable(String),
}

/// The external model catalog.
///
/// The catalog owns model discovery, download state, and deletion; the
/// orchestrator only reads the available set and the busy flag. Catalog
/// mutations are reported back to the orchestrator by the embedder posting
/// a models-changed notification.
pub trait ModelCatalog: Send + Sync {
    /// All currently available (downloaded, usable) models.
    fn available_models(&self) -> Vec<ModelInfo>;

    /// Whether the catalog is busy (downloading, refreshing).
    ///
    /// While busy, the service reports the `busy` state and rejects
    /// requests.
    fn busy(&self) -> bool;

    /// Reload the catalog from its backing store.
    fn reload(&self) -> Result<(), CatalogError>;
}

/// The persistent settings store.
///
/// Settings persistence itself is external; the orchestrator reads the
/// defaults when resolving models and writes them back through the same
/// port when a client changes a default-model property.
pub trait SettingsStore: Send + Sync {
    /// Default STT model-or-language key (may be empty).
    fn default_stt_model(&self) -> String;

    /// Persist the default STT model id.
    fn set_default_stt_model(&self, id: &str);

    /// Default TTS model-or-language key (may be empty).
    fn default_tts_model(&self) -> String;

    /// Persist the default TTS model id.
    fn set_default_tts_model(&self, id: &str);

    /// Whether STT output should be post-processed for punctuation.
    fn restore_punctuation(&self) -> bool;

    /// Directory for synthesized speech WAV files.
    fn cache_dir(&self) -> PathBuf;
}
