use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;

use super::forest::{ForestModel, ModelError};
use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("no symptom models are loaded")]
    NoModels,
    #[error("at least one symptom is required")]
    NoSymptoms,
    #[error("unknown symptoms: {}", .0.join(", "))]
    UnknownSymptoms(Vec<String>),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<EnsembleError> for ApiError {
    fn from(e: EnsembleError) -> Self {
        match e {
            EnsembleError::NoModels => ApiError::Unavailable("MODEL_UNAVAILABLE", e.to_string()),
            EnsembleError::NoSymptoms => ApiError::validation(e.to_string()),
            EnsembleError::UnknownSymptoms(_) => ApiError::BadRequest("UNKNOWN_SYMPTOMS", e.to_string()),
            EnsembleError::Model(inner) => inner.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Vote {
    pub model: String,
    pub disease: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnsembleOutcome {
    pub disease: String,
    pub votes: Vec<Vote>,
    /// Share of models that voted for `disease`.
    pub agreement: f64,
}

/// `" Skin  Rash"` -> `"skin_rash"`.
pub fn normalize_symptom(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Symptom model columns go through the same normalisation as user input,
/// so dataset names such as `"dischromic _patches"` stay reachable. Two
/// columns collapsing onto one name make the model unusable.
pub fn prepare_model(mut model: ForestModel) -> Result<ForestModel, ModelError> {
    let mut seen = BTreeSet::new();
    for feature in model.features.iter_mut() {
        let normalized = normalize_symptom(feature);
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            return Err(ModelError::Malformed {
                name: model.name.clone(),
                reason: format!("symptom column {feature:?} is blank or duplicated"),
            });
        }
        *feature = normalized;
    }
    Ok(model)
}

/// Most frequent label. Ties go to the label whose first vote came
/// earliest, so the result follows registry order.
pub fn mode_vote(votes: &[Vote]) -> Option<(&str, usize)> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, v) in votes.iter().enumerate() {
        counts.entry(v.disease.as_str()).or_insert((0, pos)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (ca, pa)), (_, (cb, pb))| ca.cmp(cb).then(pb.cmp(pa)))
        .map(|(label, (count, _))| (label, count))
}

fn symptom_vector(model: &ForestModel, present: &BTreeSet<String>) -> Vec<f64> {
    model
        .features
        .iter()
        .map(|f| if present.contains(f) { 1.0 } else { 0.0 })
        .collect()
}

/// Run every symptom model over the same symptom set and take the mode.
pub fn predict(models: &[ForestModel], symptoms: &[String]) -> Result<EnsembleOutcome, EnsembleError> {
    if models.is_empty() {
        return Err(EnsembleError::NoModels);
    }

    let present: BTreeSet<String> = symptoms
        .iter()
        .map(|s| normalize_symptom(s))
        .filter(|s| !s.is_empty())
        .collect();
    if present.is_empty() {
        return Err(EnsembleError::NoSymptoms);
    }

    let known: BTreeSet<&str> = models
        .iter()
        .flat_map(|m| m.features.iter().map(String::as_str))
        .collect();
    let unknown: Vec<String> = present
        .iter()
        .filter(|s| !known.contains(s.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(EnsembleError::UnknownSymptoms(unknown));
    }

    let mut votes = Vec::with_capacity(models.len());
    for model in models {
        let x = symptom_vector(model, &present);
        votes.push(Vote {
            model: model.name.clone(),
            disease: model.predict(&x)?.to_string(),
        });
    }

    let (disease, count) = mode_vote(&votes).ok_or(EnsembleError::NoModels)?;
    let disease = disease.to_string();
    Ok(EnsembleOutcome {
        agreement: count as f64 / votes.len() as f64,
        disease,
        votes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::forest::tests::stump;

    fn vote(model: &str, disease: &str) -> Vote {
        Vote {
            model: model.into(),
            disease: disease.into(),
        }
    }

    #[test]
    fn normalizes_symptom_spelling() {
        assert_eq!(normalize_symptom("  Skin   Rash "), "skin_rash");
        assert_eq!(normalize_symptom("high-fever"), "high_fever");
        assert_eq!(normalize_symptom("joint__pain"), "joint_pain");
        assert_eq!(normalize_symptom("   "), "");
    }

    #[test]
    fn mode_picks_majority() {
        let votes = [vote("a", "flu"), vote("b", "malaria"), vote("c", "malaria")];
        assert_eq!(mode_vote(&votes), Some(("malaria", 2)));
    }

    #[test]
    fn mode_tie_follows_first_vote() {
        let votes = [vote("a", "dengue"), vote("b", "flu"), vote("c", "flu"), vote("d", "dengue")];
        assert_eq!(mode_vote(&votes), Some(("dengue", 2)));
        assert_eq!(mode_vote(&[]), None);
    }

    #[test]
    fn ensemble_votes_across_models() {
        let features = ["fever", "chills", "cough"];
        let models = vec![
            stump("rf", &features, 1, 0.5, "flu", "malaria"),
            stump("dt", &features, 2, 0.5, "malaria", "flu"),
            stump("nb", &features, 0, 0.5, "flu", "malaria"),
        ];

        let outcome = predict(&models, &["Fever".into(), "chills".into()]).unwrap();
        assert_eq!(outcome.disease, "malaria");
        assert_eq!(outcome.votes.len(), 3);
        assert!((outcome.agreement - 1.0).abs() < 1e-12);

        let outcome = predict(&models, &["cough".into(), "fever".into()]).unwrap();
        assert_eq!(outcome.disease, "flu");
        assert!((outcome.agreement - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_and_empty_symptoms_are_rejected() {
        let models = vec![stump("rf", &["fever"], 0, 0.5, "none", "flu")];
        match predict(&models, &["fever".into(), "green skin".into()]) {
            Err(EnsembleError::UnknownSymptoms(u)) => assert_eq!(u, vec!["green_skin".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(predict(&models, &[" ".into()]), Err(EnsembleError::NoSymptoms)));
        assert!(matches!(predict(&[], &["fever".into()]), Err(EnsembleError::NoModels)));
    }

    #[test]
    fn model_columns_are_normalised_like_input() {
        let model = prepare_model(stump("rf", &["dischromic _patches", "foul_smell_of urine"], 0, 0.5, "none", "acne"))
            .unwrap();
        assert_eq!(model.features, ["dischromic_patches", "foul_smell_of_urine"]);

        let outcome = predict(&[model], &["Dischromic Patches".into()]).unwrap();
        assert_eq!(outcome.disease, "acne");
    }

    #[test]
    fn colliding_model_columns_are_rejected() {
        let model = stump("rf", &["skin rash", "skin_rash"], 0, 0.5, "none", "acne");
        assert!(matches!(prepare_model(model), Err(ModelError::Malformed { .. })));
    }
}
