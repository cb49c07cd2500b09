//! Outbreak detection over recorded symptom predictions: geodesic
//! clustering of prediction locations and threshold alerting with
//! duplicate suppression.

pub mod cluster;
pub mod detector;
pub mod geo;
