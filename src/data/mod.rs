//! Labelled sentence data: loading, label encoding and batching

pub mod dataset;
pub mod label_encoder;
pub mod loader;

pub use dataset::{ClassificationDataset, ClassificationRecord, CsvColumns, DatasetStats};
pub use label_encoder::LabelEncoder;
pub use loader::{BatchIter, ClassificationBatch, DataLoader, DeviceBatch};
