//! Classification metrics and charts

pub mod charts;
pub mod metrics;

pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix};
