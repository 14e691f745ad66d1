//! Model resolver — maps a model-or-language key to an engine configuration.
//!
//! Resolution scans the available-models list in three passes: exact model
//! id (case-insensitive), then language id (preferring the language's
//! default model, falling back to the highest score), then the first
//! role-matching model seen. As a side effect the per-role lookup tables
//! are rebuilt; the property projections (`available_models`,
//! `available_langs`, `test_default_model`) read those tables.
//!
//! Tables are ordered by model id, so "first seen" projections are
//! deterministic.

use std::collections::BTreeMap;

use parlo_core::{EngineKind, ModelConfig, ModelInfo, ModelRole};

/// Cached per-model data used by the property projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelData {
    /// Model id.
    pub model_id: String,

    /// Language id.
    pub lang_id: String,

    /// Engine kind.
    pub engine: EngineKind,

    /// Human-readable name.
    pub name: String,
}

impl ModelData {
    fn from_info(model: &ModelInfo) -> Self {
        // Catalog entries occasionally omit the language tag; model ids
        // follow the `<lang>_<rest>` convention, so recover it from there.
        let lang_id = if model.lang_id.is_empty() {
            lang_from_model_id(&model.id)
        } else {
            model.lang_id.clone()
        };
        Self {
            model_id: model.id.clone(),
            lang_id,
            engine: model.engine,
            name: model.name.clone(),
        }
    }
}

/// Maps `(role, key)` to a concrete engine configuration.
#[derive(Debug, Default)]
pub struct ModelResolver {
    stt: BTreeMap<String, ModelData>,
    tts: BTreeMap<String, ModelData>,
    ttt: BTreeMap<String, ModelData>,
}

impl ModelResolver {
    /// Create an empty resolver; tables fill on the first [`choose`](Self::choose).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a model configuration for `role`.
    ///
    /// An empty `key` is substituted with `default_key` (the configured
    /// default for the role). `restore_punctuation` controls the TTT
    /// attachment pass for STT configs.
    pub fn choose(
        &mut self,
        models: &[ModelInfo],
        role: ModelRole,
        key: &str,
        default_key: &str,
        restore_punctuation: bool,
    ) -> Option<ModelConfig> {
        let key = if key.is_empty() { default_key } else { key };

        self.stt.clear();
        self.tts.clear();
        self.ttt.clear();

        if models.is_empty() {
            return None;
        }

        let mut active_config: Option<ModelConfig> = None;
        let mut first_config: Option<ModelConfig> = None;

        // Pass 1: exact model id, while (re)filling the lookup tables.
        for model in models {
            let table = match model.engine.role() {
                ModelRole::Stt => &mut self.stt,
                ModelRole::Tts => &mut self.tts,
                ModelRole::Ttt => &mut self.ttt,
            };
            table.insert(model.id.clone(), ModelData::from_info(model));

            if model.engine.role() != role {
                continue;
            }

            let exact = key.eq_ignore_ascii_case(&model.id);
            if active_config.is_none() && (first_config.is_none() || exact) {
                let config = base_config(model);
                if exact {
                    active_config = Some(config);
                } else if first_config.is_none() {
                    first_config = Some(config);
                }
            }
        }

        // Pass 2: language id; a default-for-lang model wins immediately,
        // otherwise the best score does.
        if active_config.is_none() {
            let mut best_score = -1;
            let mut best_model: Option<&ModelInfo> = None;

            for model in models {
                if model.engine.role() != role {
                    continue;
                }
                if !key.eq_ignore_ascii_case(&model.lang_id) {
                    continue;
                }
                if model.default_for_lang {
                    tracing::debug!(lang = %model.lang_id, id = %model.id,
                        "best model is default model for lang");
                    best_model = Some(model);
                    break;
                }
                if model.score > best_score {
                    best_model = Some(model);
                    best_score = model.score;
                }
            }

            active_config = best_model.map(base_config);
        }

        // Pass 3: fall back to the first role-matching model.
        if active_config.is_none() {
            if let Some(first) = first_config {
                tracing::warn!(model = %first.model_id,
                    "cannot find requested model, choosing fallback");
                active_config = Some(first);
            }
        }

        // TTT attachment: only for STT, only with punctuation restore on.
        if role == ModelRole::Stt && restore_punctuation {
            if let Some(config) = active_config.as_mut() {
                let ttt = models.iter().find(|m| {
                    m.engine.role() == ModelRole::Ttt && m.lang_id == config.lang_id
                });
                if let Some(ttt) = ttt {
                    tracing::debug!(id = %ttt.id, "found ttt model for stt");
                    config.ttt_model_id = Some(ttt.id.clone());
                    config.ttt_model_file = Some(ttt.model_file.clone());
                    config.ttt_engine = Some(ttt.engine);
                }
            }
        }

        active_config
    }

    // ── Projections ────────────────────────────────────────────────

    /// The lookup table for a role.
    #[must_use]
    pub fn table(&self, role: ModelRole) -> &BTreeMap<String, ModelData> {
        match role {
            ModelRole::Stt => &self.stt,
            ModelRole::Tts => &self.tts,
            ModelRole::Ttt => &self.ttt,
        }
    }

    /// Resolve a usable default model id for a role from a candidate key.
    ///
    /// Returns the key itself when it names a model, else the first model
    /// of that language, else the first model of the role, else empty.
    #[must_use]
    pub fn test_default_model(&self, role: ModelRole, key: &str) -> String {
        let table = self.table(role);
        if table.is_empty() {
            return String::new();
        }
        if table.contains_key(key) {
            return key.to_string();
        }
        if let Some((id, _)) = table.iter().find(|(_, data)| data.lang_id == key) {
            return id.clone();
        }
        table
            .keys()
            .next()
            .cloned()
            .unwrap_or_default()
    }

    /// Project `id -> [model_id, "<name> / <lang_id>"]` for a role.
    #[must_use]
    pub fn available_models(&self, role: ModelRole) -> BTreeMap<String, [String; 2]> {
        self.table(role)
            .iter()
            .map(|(id, data)| {
                (
                    id.clone(),
                    [
                        data.model_id.clone(),
                        format!("{} / {}", data.name, data.lang_id),
                    ],
                )
            })
            .collect()
    }

    /// Project `lang_id -> [first-model-id, "<name> / <lang_id>"]` for a
    /// role; the first model (in id order) of each language wins.
    #[must_use]
    pub fn available_langs(&self, role: ModelRole) -> BTreeMap<String, [String; 2]> {
        let mut map = BTreeMap::new();
        for data in self.table(role).values() {
            map.entry(data.lang_id.clone()).or_insert_with(|| {
                [
                    data.model_id.clone(),
                    format!("{} / {}", data.name, data.lang_id),
                ]
            });
        }
        map
    }

    /// Whether any model of the role is available.
    #[must_use]
    pub fn has_model_of_role(&self, role: ModelRole) -> bool {
        !self.table(role).is_empty()
    }
}

fn base_config(model: &ModelInfo) -> ModelConfig {
    ModelConfig {
        model_id: model.id.clone(),
        lang_id: model.lang_id.clone(),
        engine: model.engine,
        model_file: model.model_file.clone(),
        scorer_file: model.scorer_file.clone(),
        speaker: model.speaker.clone(),
        ttt_model_id: None,
        ttt_model_file: None,
        ttt_engine: None,
    }
}

/// Language part of a `<lang>_<rest>` model id.
///
/// Used as the fallback when a catalog entry carries no language tag of
/// its own.
#[must_use]
pub fn lang_from_model_id(model_id: &str) -> String {
    model_id
        .split('_')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn model(id: &str, lang: &str, engine: EngineKind, score: i32, default: bool) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            lang_id: lang.to_string(),
            engine,
            name: format!("{id} name"),
            model_file: PathBuf::from(format!("/models/{id}.bin")),
            scorer_file: None,
            speaker: None,
            score,
            default_for_lang: default,
        }
    }

    fn catalog() -> Vec<ModelInfo> {
        vec![
            model("de_x", "de", EngineKind::SttVosk, 1, false),
            model("de_y", "de", EngineKind::SttVosk, 3, true),
            model("en_z", "en", EngineKind::SttWhisper, 5, false),
            model("en_piper", "en", EngineKind::TtsPiper, 2, false),
            model("en_punct", "en", EngineKind::TttHftc, 1, false),
        ]
    }

    #[test]
    fn exact_id_wins() {
        let mut resolver = ModelResolver::new();
        let config = resolver
            .choose(&catalog(), ModelRole::Stt, "DE_X", "", false)
            .unwrap();
        assert_eq!(config.model_id, "de_x");
    }

    #[test]
    fn every_model_resolves_to_itself() {
        let mut resolver = ModelResolver::new();
        for m in catalog() {
            let role = m.engine.role();
            if role == ModelRole::Ttt {
                continue;
            }
            let config = resolver
                .choose(&catalog(), role, &m.id, "", false)
                .unwrap();
            assert_eq!(config.model_id, m.id);
        }
    }

    #[test]
    fn lang_pass_prefers_default_for_lang_over_score() {
        let mut resolver = ModelResolver::new();
        let config = resolver
            .choose(&catalog(), ModelRole::Stt, "de", "", false)
            .unwrap();
        assert_eq!(config.model_id, "de_y");
    }

    #[test]
    fn lang_pass_falls_back_to_best_score() {
        let models = vec![
            model("de_x", "de", EngineKind::SttVosk, 1, false),
            model("de_z", "de", EngineKind::SttVosk, 4, false),
        ];
        let mut resolver = ModelResolver::new();
        let config = resolver
            .choose(&models, ModelRole::Stt, "de", "", false)
            .unwrap();
        assert_eq!(config.model_id, "de_z");
    }

    #[test]
    fn unknown_key_falls_back_to_first_role_model() {
        let mut resolver = ModelResolver::new();
        let config = resolver
            .choose(&catalog(), ModelRole::Stt, "fr", "", false)
            .unwrap();
        // First STT model in catalog iteration order.
        assert_eq!(config.model_id, "de_x");
    }

    #[test]
    fn empty_key_uses_default() {
        let mut resolver = ModelResolver::new();
        let config = resolver
            .choose(&catalog(), ModelRole::Stt, "", "en_z", false)
            .unwrap();
        assert_eq!(config.model_id, "en_z");
    }

    #[test]
    fn empty_catalog_resolves_nothing() {
        let mut resolver = ModelResolver::new();
        assert!(resolver
            .choose(&[], ModelRole::Stt, "en", "", false)
            .is_none());
    }

    #[test]
    fn ttt_attached_only_with_punctuation_restore() {
        let mut resolver = ModelResolver::new();

        let without = resolver
            .choose(&catalog(), ModelRole::Stt, "en_z", "", false)
            .unwrap();
        assert!(without.ttt_model_id.is_none());

        let with = resolver
            .choose(&catalog(), ModelRole::Stt, "en_z", "", true)
            .unwrap();
        assert_eq!(with.ttt_model_id.as_deref(), Some("en_punct"));
        assert_eq!(with.ttt_engine, Some(EngineKind::TttHftc));
    }

    #[test]
    fn ttt_requires_matching_lang() {
        let mut resolver = ModelResolver::new();
        let config = resolver
            .choose(&catalog(), ModelRole::Stt, "de_y", "", true)
            .unwrap();
        assert!(config.ttt_model_id.is_none(), "no german ttt model exists");
    }

    #[test]
    fn tts_request_never_returns_stt_model() {
        let mut resolver = ModelResolver::new();
        let config = resolver
            .choose(&catalog(), ModelRole::Tts, "nonsense", "", false)
            .unwrap();
        assert_eq!(config.model_id, "en_piper");
    }

    #[test]
    fn tables_are_rebuilt_per_choose() {
        let mut resolver = ModelResolver::new();
        resolver.choose(&catalog(), ModelRole::Stt, "", "", false);
        assert!(resolver.has_model_of_role(ModelRole::Stt));
        assert!(resolver.has_model_of_role(ModelRole::Tts));
        assert!(resolver.has_model_of_role(ModelRole::Ttt));

        resolver.choose(&[], ModelRole::Stt, "", "", false);
        assert!(!resolver.has_model_of_role(ModelRole::Stt));
    }

    #[test]
    fn test_default_model_resolution_order() {
        let mut resolver = ModelResolver::new();
        resolver.choose(&catalog(), ModelRole::Stt, "", "", false);

        // Key names a model: returned as-is.
        assert_eq!(resolver.test_default_model(ModelRole::Stt, "en_z"), "en_z");
        // Key names a language: first model of that language.
        assert_eq!(resolver.test_default_model(ModelRole::Stt, "de"), "de_x");
        // Unknown key: first model of the role.
        assert_eq!(resolver.test_default_model(ModelRole::Stt, "xx"), "de_x");
    }

    #[test]
    fn projections() {
        let mut resolver = ModelResolver::new();
        resolver.choose(&catalog(), ModelRole::Stt, "", "", false);

        let models = resolver.available_models(ModelRole::Stt);
        assert_eq!(models.len(), 3);
        assert_eq!(
            models.get("de_x"),
            Some(&["de_x".to_string(), "de_x name / de".to_string()])
        );

        let langs = resolver.available_langs(ModelRole::Stt);
        assert_eq!(langs.len(), 2);
        // First-by-id model of each language wins.
        assert_eq!(langs.get("de").map(|v| v[0].as_str()), Some("de_x"));
        assert_eq!(langs.get("en").map(|v| v[0].as_str()), Some("en_z"));
    }

    #[test]
    fn lang_from_model_id_splits_prefix() {
        assert_eq!(lang_from_model_id("en_vosk"), "en");
        assert_eq!(lang_from_model_id("plain"), "plain");
        assert_eq!(lang_from_model_id(""), "");
    }

    #[test]
    fn missing_lang_tag_is_derived_from_model_id() {
        let models = vec![model("fr_vosk", "", EngineKind::SttVosk, 1, false)];
        let mut resolver = ModelResolver::new();
        resolver.choose(&models, ModelRole::Stt, "", "", false);

        let data = resolver.table(ModelRole::Stt).get("fr_vosk").unwrap();
        assert_eq!(data.lang_id, "fr");

        let langs = resolver.available_langs(ModelRole::Stt);
        assert_eq!(langs.get("fr").map(|v| v[0].as_str()), Some("fr_vosk"));
    }
}
