use std::collections::HashMap;
use std::path::Path;

use super::ensemble::{self, EnsembleError, EnsembleOutcome};
use super::forest::{ForestModel, ModelError};

/// The single-disease screening models served by the `predict_*` endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClinicalModel {
    Cancer,
    Diabetes,
    Heart,
    Liver,
}

impl ClinicalModel {
    pub const ALL: [ClinicalModel; 4] = [
        ClinicalModel::Cancer,
        ClinicalModel::Diabetes,
        ClinicalModel::Heart,
        ClinicalModel::Liver,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClinicalModel::Cancer => "cancer",
            ClinicalModel::Diabetes => "diabetes",
            ClinicalModel::Heart => "heart",
            ClinicalModel::Liver => "liver",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.name())
    }

    pub fn feature_count(self) -> usize {
        match self {
            ClinicalModel::Cancer => 5,
            ClinicalModel::Diabetes => 6,
            ClinicalModel::Heart => 7,
            ClinicalModel::Liver => 7,
        }
    }
}

const SYMPTOM_MODEL_PREFIX: &str = "symptoms_";

#[derive(Debug)]
pub struct ModelRegistry {
    clinical: HashMap<ClinicalModel, ForestModel>,
    symptom_models: Vec<ForestModel>,
}

impl ModelRegistry {
    pub fn new(clinical: HashMap<ClinicalModel, ForestModel>, symptom_models: Vec<ForestModel>) -> Self {
        Self {
            clinical,
            symptom_models,
        }
    }

    /// Load what is present under `dir`. A missing or broken file only
    /// disables the endpoints that need it.
    pub fn load_dir(dir: &Path) -> Self {
        let mut clinical = HashMap::new();
        let mut symptom_models = Vec::new();

        for kind in ClinicalModel::ALL {
            let path = dir.join(kind.file_name());
            if !path.exists() {
                tracing::warn!(model = kind.name(), path = %path.display(), "model file missing");
                continue;
            }
            match ForestModel::load(&path).and_then(|m| check_width(kind, m)) {
                Ok(model) => {
                    tracing::info!(model = kind.name(), trees = model.trees.len(), "model loaded");
                    clinical.insert(kind, model);
                }
                Err(e) => tracing::error!(model = kind.name(), error = %e, "model rejected"),
            }
        }

        let mut symptom_paths: Vec<_> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(SYMPTOM_MODEL_PREFIX) && n.ends_with(".json"))
                })
                .collect(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "model directory unreadable");
                Vec::new()
            }
        };
        symptom_paths.sort();

        for path in symptom_paths {
            match ForestModel::load(&path).and_then(ensemble::prepare_model) {
                Ok(model) => {
                    tracing::info!(model = %model.name, features = model.features.len(), "symptom model loaded");
                    symptom_models.push(model);
                }
                Err(e) => tracing::error!(path = %path.display(), error = %e, "symptom model rejected"),
            }
        }

        ModelRegistry::new(clinical, symptom_models)
    }

    pub fn clinical(&self, kind: ClinicalModel) -> Option<&ForestModel> {
        self.clinical.get(&kind)
    }

    pub fn symptom_models(&self) -> &[ForestModel] {
        &self.symptom_models
    }

    pub fn predict_symptoms(&self, symptoms: &[String]) -> Result<EnsembleOutcome, EnsembleError> {
        ensemble::predict(&self.symptom_models, symptoms)
    }
}

fn check_width(kind: ClinicalModel, model: ForestModel) -> Result<ForestModel, ModelError> {
    if model.features.len() != kind.feature_count() {
        return Err(ModelError::FeatureCount {
            name: kind.name().to_string(),
            expected: kind.feature_count(),
            got: model.features.len(),
        });
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::forest::tests::stump;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("telehealth-models-{tag}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_model(dir: &Path, file: &str, name: &str, features: &[&str]) {
        let raw = serde_json::json!({
            "name": name,
            "features": features,
            "classes": ["0", "1"],
            "trees": [{ "nodes": [
                { "feature": 0, "threshold": 0.5, "left": 1, "right": 2 },
                { "value": [1.0, 0.0] },
                { "value": [0.0, 1.0] }
            ] }]
        });
        std::fs::write(dir.join(file), raw.to_string()).unwrap();
    }

    #[test]
    fn loads_present_models_and_skips_broken_ones() {
        let dir = scratch_dir("load");
        write_model(&dir, "diabetes.json", "diabetes", &["a", "b", "c", "d", "e", "f"]);
        // wrong width for heart
        write_model(&dir, "heart.json", "heart", &["a"]);
        std::fs::write(dir.join("liver.json"), "{ not json").unwrap();
        write_model(&dir, "symptoms_b.json", "b", &["fever"]);
        write_model(&dir, "symptoms_a.json", "a", &["fever"]);
        write_model(&dir, "notes.json", "ignored", &["fever"]);
        write_model(&dir, "symptoms_c.json", "c", &["Skin Rash", "skin_rash"]);

        let registry = ModelRegistry::load_dir(&dir);
        assert!(registry.clinical(ClinicalModel::Diabetes).is_some());
        assert!(registry.clinical(ClinicalModel::Heart).is_none());
        assert!(registry.clinical(ClinicalModel::Liver).is_none());
        assert!(registry.clinical(ClinicalModel::Cancer).is_none());

        let names: Vec<_> = registry.symptom_models().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(registry.predict_symptoms(&["FEVER".into()]).is_ok());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_directory_gives_empty_registry() {
        let registry = ModelRegistry::load_dir(Path::new("/definitely/not/here"));
        assert!(registry.symptom_models().is_empty());
        assert!(matches!(
            registry.predict_symptoms(&["fever".into()]),
            Err(EnsembleError::NoModels)
        ));
    }

    #[test]
    fn registry_delegates_to_ensemble() {
        let registry = ModelRegistry::new(
            HashMap::new(),
            vec![stump("only", &["fever"], 0, 0.5, "healthy", "flu")],
        );
        let outcome = registry.predict_symptoms(&["fever".into()]).unwrap();
        assert_eq!(outcome.disease, "flu");
    }
}
