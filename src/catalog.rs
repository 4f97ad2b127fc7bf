//! Static model catalog.
//!
//! Maps model identifiers to [`ModelProfile`]s. The catalog starts from the
//! built-in profiles and is extended (or overridden, by identifier) with the
//! `[[models]]` entries from the configuration file.

use std::collections::BTreeMap;

use crate::error::{PrepError, PrepResult};
use crate::models::ModelProfile;

/// Built-in profiles: `(model, max_input, max_output, input $/M, output $/M)`.
///
/// Input ceilings are deliberately below the providers' context windows to
/// leave room for the model's answer and keep latency predictable.
const BUILTIN_PROFILES: &[(&str, usize, usize, f64, f64)] = &[
    ("gpt-4o", 50_000, 4_096, 5.0, 15.0),
    ("gpt-4o-mini", 50_000, 16_384, 0.15, 0.6),
    ("claude-3-5-sonnet-20240620", 50_000, 8_192, 3.0, 15.0),
    ("claude-3-haiku-20240307", 50_000, 4_096, 0.25, 1.25),
    ("gemini-1.5-flash", 200_000, 4_096, 0.0, 0.0),
];

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    profiles: BTreeMap<String, ModelProfile>,
}

impl ModelCatalog {
    /// An empty catalog. Every lookup fails until profiles are added.
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    /// The built-in profiles.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for &(model, max_input, max_output, input_cost, output_cost) in BUILTIN_PROFILES {
            catalog.insert(ModelProfile {
                model: model.to_string(),
                max_input_tokens: max_input,
                max_output_tokens: max_output,
                input_cost,
                output_cost,
            });
        }
        catalog
    }

    /// Built-ins plus configured profiles; configured entries win on conflict.
    pub fn with_overrides(overrides: &[ModelProfile]) -> Self {
        let mut catalog = Self::builtin();
        for profile in overrides {
            catalog.insert(profile.clone());
        }
        catalog
    }

    pub fn insert(&mut self, profile: ModelProfile) {
        self.profiles.insert(profile.model.clone(), profile);
    }

    /// Resolve a model identifier. Absence is a configuration error.
    pub fn resolve(&self, model: &str) -> PrepResult<&ModelProfile> {
        self.profiles
            .get(model)
            .ok_or_else(|| PrepError::UnknownModel(model.to_string()))
    }

    /// Profiles in identifier order.
    pub fn profiles(&self) -> impl Iterator<Item = &ModelProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_resolves() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.len(), BUILTIN_PROFILES.len());
        let p = catalog.resolve("gemini-1.5-flash").unwrap();
        assert_eq!(p.max_input_tokens, 200_000);
    }

    #[test]
    fn test_unknown_model_is_config_error() {
        let catalog = ModelCatalog::builtin();
        match catalog.resolve("gpt-0") {
            Err(PrepError::UnknownModel(m)) => assert_eq!(m, "gpt-0"),
            other => panic!("expected UnknownModel, got {:?}", other),
        }
    }

    #[test]
    fn test_overrides_replace_builtin() {
        let catalog = ModelCatalog::with_overrides(&[ModelProfile {
            model: "gpt-4o".to_string(),
            max_input_tokens: 128_000,
            max_output_tokens: 4_096,
            input_cost: 2.5,
            output_cost: 10.0,
        }]);
        assert_eq!(catalog.len(), BUILTIN_PROFILES.len());
        assert_eq!(catalog.resolve("gpt-4o").unwrap().max_input_tokens, 128_000);
    }
}
