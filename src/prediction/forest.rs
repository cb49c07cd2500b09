//! Random-forest classifiers exported from the offline training scripts.
//!
//! A model file is JSON:
//!
//! ```json
//! {
//!   "name": "diabetes",
//!   "features": ["pregnancies", "glucose", "..."],
//!   "classes": ["0", "1"],
//!   "trees": [
//!     { "nodes": [
//!         { "feature": 1, "threshold": 127.5, "left": 1, "right": 2 },
//!         { "value": [40.0, 3.0] },
//!         { "value": [5.0, 22.0] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Node 0 is the root. A split sends a sample left when
//! `x[feature] <= threshold`. Leaves carry per-class weights, normalised
//! before averaging, and the forest answers with the arg-max class.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("model {name} is malformed: {reason}")]
    Malformed { name: String, reason: String },
    #[error("model {name} expects {expected} features, got {got}")]
    FeatureCount {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("feature {feature} is not a finite number")]
    NonFinite { feature: String },
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::FeatureCount { .. } | ModelError::NonFinite { .. } => {
                ApiError::validation(e.to_string())
            }
            _ => ApiError::Unavailable("MODEL_UNAVAILABLE", e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForestModel {
    pub name: String,
    pub features: Vec<String>,
    pub classes: Vec<String>,
    pub trees: Vec<Tree>,
}

impl ForestModel {
    pub fn from_json(name_hint: &str, raw: &str) -> Result<Self, ModelError> {
        let model: ForestModel = serde_json::from_str(raw).map_err(|source| ModelError::Parse {
            path: name_hint.to_string(),
            source,
        })?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&display, &raw)
    }

    fn malformed(&self, reason: impl Into<String>) -> ModelError {
        ModelError::Malformed {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Children must come after their parent, which rules out cycles and
    /// guarantees every walk terminates.
    fn validate(&self) -> Result<(), ModelError> {
        if self.features.is_empty() {
            return Err(self.malformed("no features"));
        }
        if self.classes.is_empty() {
            return Err(self.malformed("no classes"));
        }
        if self.trees.is_empty() {
            return Err(self.malformed("no trees"));
        }

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(self.malformed(format!("tree {t} has no nodes")));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= self.features.len() {
                            return Err(self.malformed(format!(
                                "tree {t} node {i} splits on unknown feature {feature}"
                            )));
                        }
                        if !threshold.is_finite() {
                            return Err(self.malformed(format!("tree {t} node {i} has a non-finite threshold")));
                        }
                        for child in [*left, *right] {
                            if child <= i || child >= tree.nodes.len() {
                                return Err(self.malformed(format!(
                                    "tree {t} node {i} points at invalid child {child}"
                                )));
                            }
                        }
                    }
                    Node::Leaf { value } => {
                        if value.len() != self.classes.len() {
                            return Err(self.malformed(format!(
                                "tree {t} leaf {i} has {} weights for {} classes",
                                value.len(),
                                self.classes.len()
                            )));
                        }
                        if value.iter().any(|w| !w.is_finite() || *w < 0.0) {
                            return Err(self.malformed(format!("tree {t} leaf {i} has a negative weight")));
                        }
                        if value.iter().sum::<f64>() <= 0.0 {
                            return Err(self.malformed(format!("tree {t} leaf {i} is empty")));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn leaf<'a>(&self, tree: &'a Tree, x: &[f64]) -> &'a [f64] {
        let mut idx = 0;
        loop {
            match &tree.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { value } => return value,
            }
        }
    }

    pub fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        if x.len() != self.features.len() {
            return Err(ModelError::FeatureCount {
                name: self.name.clone(),
                expected: self.features.len(),
                got: x.len(),
            });
        }
        if let Some(pos) = x.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite {
                feature: self.features[pos].clone(),
            });
        }

        let mut acc = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let value = self.leaf(tree, x);
            let total: f64 = value.iter().sum();
            for (a, w) in acc.iter_mut().zip(value) {
                *a += w / total;
            }
        }
        let n = self.trees.len() as f64;
        acc.iter_mut().for_each(|a| *a /= n);
        Ok(acc)
    }

    /// Arg-max class; the first class wins a tie.
    pub fn predict(&self, x: &[f64]) -> Result<&str, ModelError> {
        let proba = self.predict_proba(x)?;
        let mut best = 0;
        for (i, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = i;
            }
        }
        Ok(&self.classes[best])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn stump(name: &str, feature_names: &[&str], feature: usize, threshold: f64, low: &str, high: &str) -> ForestModel {
        let raw = serde_json::json!({
            "name": name,
            "features": feature_names,
            "classes": [low, high],
            "trees": [{
                "nodes": [
                    { "feature": feature, "threshold": threshold, "left": 1, "right": 2 },
                    { "value": [1.0, 0.0] },
                    { "value": [0.0, 1.0] }
                ]
            }]
        });
        ForestModel::from_json(name, &raw.to_string()).unwrap()
    }

    #[test]
    fn single_stump_splits_on_threshold() {
        let m = stump("glucose", &["glucose"], 0, 127.5, "0", "1");
        assert_eq!(m.predict(&[100.0]).unwrap(), "0");
        assert_eq!(m.predict(&[127.5]).unwrap(), "0");
        assert_eq!(m.predict(&[128.0]).unwrap(), "1");
    }

    #[test]
    fn forest_averages_normalised_leaves() {
        let raw = r#"{
            "name": "f",
            "features": ["a"],
            "classes": ["no", "yes"],
            "trees": [
                { "nodes": [ { "value": [30.0, 10.0] } ] },
                { "nodes": [ { "value": [1.0, 3.0] } ] },
                { "nodes": [ { "value": [0.0, 5.0] } ] }
            ]
        }"#;
        let m = ForestModel::from_json("f", raw).unwrap();
        let p = m.predict_proba(&[0.0]).unwrap();
        assert!((p[0] - (0.75 + 0.25 + 0.0) / 3.0).abs() < 1e-12);
        assert!((p[1] - (0.25 + 0.75 + 1.0) / 3.0).abs() < 1e-12);
        assert_eq!(m.predict(&[0.0]).unwrap(), "yes");
    }

    #[test]
    fn ties_go_to_the_first_class() {
        let raw = r#"{"name":"t","features":["a"],"classes":["x","y"],
            "trees":[{"nodes":[{"value":[2.0,2.0]}]}]}"#;
        let m = ForestModel::from_json("t", raw).unwrap();
        assert_eq!(m.predict(&[1.0]).unwrap(), "x");
    }

    #[test]
    fn rejects_wrong_feature_count_and_nan() {
        let m = stump("s", &["a", "b"], 1, 0.5, "0", "1");
        assert!(matches!(
            m.predict(&[1.0]),
            Err(ModelError::FeatureCount { expected: 2, got: 1, .. })
        ));
        assert!(matches!(m.predict(&[1.0, f64::NAN]), Err(ModelError::NonFinite { .. })));
    }

    #[test]
    fn rejects_backward_child_pointers() {
        let raw = r#"{"name":"loop","features":["a"],"classes":["x","y"],
            "trees":[{"nodes":[
                {"feature":0,"threshold":1.0,"left":1,"right":2},
                {"feature":0,"threshold":2.0,"left":0,"right":2},
                {"value":[1.0,0.0]}
            ]}]}"#;
        assert!(matches!(
            ForestModel::from_json("loop", raw),
            Err(ModelError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_leaf_with_wrong_class_count() {
        let raw = r#"{"name":"bad","features":["a"],"classes":["x","y"],
            "trees":[{"nodes":[{"value":[1.0]}]}]}"#;
        assert!(ForestModel::from_json("bad", raw).is_err());
    }
}
