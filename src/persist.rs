//! Persisted artifact: the model document.
//!
//! A single JSON document bundling every fitted component — hyperparameters,
//! schemata, the propositional feature set, the boosted ensemble, and the
//! mapping tables — plus whatever scores the caller wants carried alongside.
//! Round-trip stable: `load(save(m))` serializes back to the same bytes,
//! since `serde_json`'s float formatter always produces the shortest
//! decimal that parses back to the same `f64`.

use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::ensemble::Ensemble;
use crate::error::{EngineError, Result};
use crate::mapping::MappingTable;
use crate::propositional::FastProp;
use crate::table::Schema;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ModelDocument {
    pub config: Config,
    pub population_schema: Schema,
    pub peripheral_schemas: Vec<Schema>,
    pub propositional: Option<FastProp>,
    pub ensemble: Option<Ensemble>,
    pub mappings: Vec<MappingTable>,
    pub scores: HashMap<String, f64>,
}

impl ModelDocument {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::SerializationError(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| EngineError::SerializationError(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_json()?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossFunction;

    fn sample_document() -> ModelDocument {
        let mut config = Config::default();
        config.allow_lagged_targets = Some(true);
        config.loss_function = LossFunction::SquareLoss;

        let mut scores = HashMap::new();
        scores.insert("r_squared".to_string(), 0.873456789012345);

        ModelDocument {
            config,
            population_schema: Schema::default(),
            peripheral_schemas: vec![Schema::default()],
            propositional: Some(FastProp::default()),
            ensemble: None,
            mappings: Vec::new(),
            scores,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let doc = sample_document();
        let first = doc.to_json().unwrap();
        let reloaded = ModelDocument::from_json(&first).unwrap();
        let second = reloaded.to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn save_then_load_round_trip() {
        let doc = sample_document();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        doc.save(&path).unwrap();
        let reloaded = ModelDocument::load(&path).unwrap();
        assert_eq!(doc.to_json().unwrap(), reloaded.to_json().unwrap());
    }

    #[test]
    fn rejects_malformed_document() {
        let err = ModelDocument::from_json("{ not json").unwrap_err();
        assert!(matches!(err, EngineError::SerializationError(_)));
    }
}
