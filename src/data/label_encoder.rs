//! Category name <-> index mapping

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Maps category names to contiguous indices.
///
/// Classes are kept in sorted order, so fitting the same label set always
/// yields the same indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl LabelEncoder {
    /// Learn the class set from an iterator of labels
    pub fn fit<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: BTreeSet<String> = labels
            .into_iter()
            .map(|l| l.as_ref().to_string())
            .collect();

        if classes.is_empty() {
            return Err(anyhow!("Cannot fit a label encoder on an empty label set"));
        }

        Ok(Self::from_classes(classes.into_iter().collect()))
    }

    fn from_classes(classes: Vec<String>) -> Self {
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self { classes, index }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn encode(&self, label: &str) -> Result<u32> {
        self.index
            .get(label)
            .map(|&i| i as u32)
            .ok_or_else(|| anyhow!("Unknown label '{}'; known labels: {:?}", label, self.classes))
    }

    pub fn decode(&self, index: u32) -> Result<&str> {
        self.classes
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Label index {} out of range ({} classes)", index, self.classes.len()))
    }

    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<u32>> {
        labels.iter().map(|l| self.encode(l.as_ref())).collect()
    }

    pub fn inverse_transform(&self, indices: &[u32]) -> Result<Vec<String>> {
        indices
            .iter()
            .map(|&i| self.decode(i).map(str::to_string))
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write label encoder: {:?}", path))?;
        tracing::debug!("Saved label encoder with {} classes to {:?}", self.classes.len(), path);
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read label encoder: {:?}", path))?;

        #[derive(Deserialize)]
        struct Stored {
            classes: Vec<String>,
        }

        let stored: Stored = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse label encoder: {:?}", path))?;
        Ok(Self::from_classes(stored.classes))
    }
}
