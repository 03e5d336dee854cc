//! Classification metrics: confusion matrix and per-class report

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Counts of (true class, predicted class) pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    /// Row-major: row = true class, column = predicted class
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(y_true: &[u32], y_pred: &[u32], num_classes: usize) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(anyhow!(
                "Got {} true labels but {} predictions",
                y_true.len(),
                y_pred.len()
            ));
        }

        let mut cm = Self::new(num_classes);
        for (&actual, &predicted) in y_true.iter().zip(y_pred) {
            cm.add(actual as usize, predicted as usize)?;
        }
        Ok(cm)
    }

    pub fn add(&mut self, actual: usize, predicted: usize) -> Result<()> {
        if actual >= self.num_classes || predicted >= self.num_classes {
            return Err(anyhow!(
                "Class pair ({}, {}) out of range for {} classes",
                actual,
                predicted,
                self.num_classes
            ));
        }
        self.matrix[actual * self.num_classes + predicted] += 1;
        Ok(())
    }

    /// Count at (true, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix[actual * self.num_classes + predicted]
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    pub fn max_count(&self) -> usize {
        self.matrix.iter().copied().max().unwrap_or(0)
    }

    /// Rows as nested vectors
    pub fn rows(&self) -> Vec<Vec<usize>> {
        self.matrix
            .chunks(self.num_classes.max(1))
            .map(<[usize]>::to_vec)
            .collect()
    }
}

/// Precision, recall and F1 for a single class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of records whose true class is this one
    pub support: usize,
}

impl ClassMetrics {
    fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize, name: &str) -> Self {
        let true_positives = cm.get(class_idx, class_idx);
        let predicted: usize = (0..cm.num_classes).map(|row| cm.get(row, class_idx)).sum();
        let support: usize = (0..cm.num_classes).map(|col| cm.get(class_idx, col)).sum();

        let precision = ratio(true_positives, predicted);
        let recall = ratio(true_positives, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            name: name.to_string(),
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// Averaged metrics across classes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-class and averaged metrics.
///
/// Undefined ratios (no predictions or no support for a class) count as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
    pub total_support: usize,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_names: &[String]) -> Result<Self> {
        if class_names.len() != cm.num_classes {
            return Err(anyhow!(
                "{} class names for a {}-class confusion matrix",
                class_names.len(),
                cm.num_classes
            ));
        }

        let per_class: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(i, name)| ClassMetrics::from_confusion_matrix(cm, i, name))
            .collect();

        let n = per_class.len().max(1) as f64;
        let macro_avg = AveragedMetrics {
            precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n,
            recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n,
            f1: per_class.iter().map(|m| m.f1).sum::<f64>() / n,
        };

        let total_support = cm.total();
        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if total_support == 0 {
                0.0
            } else {
                per_class
                    .iter()
                    .map(|m| f(m) * m.support as f64)
                    .sum::<f64>()
                    / total_support as f64
            }
        };
        let weighted_avg = AveragedMetrics {
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
        };

        Ok(Self {
            accuracy: cm.accuracy(),
            per_class,
            macro_avg,
            weighted_avg,
            total_support,
        })
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const LAST_LINE: &str = "weighted avg";
        let width = self
            .per_class
            .iter()
            .map(|m| m.name.chars().count())
            .chain(std::iter::once(LAST_LINE.len()))
            .max()
            .unwrap_or(LAST_LINE.len());

        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;

        for m in &self.per_class {
            writeln!(
                f,
                "{:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total_support
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), (LAST_LINE, &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.total_support
            )?;
        }
        Ok(())
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let y_true = [0, 0, 1, 2, 2, 2];
        let y_pred = [0, 1, 1, 2, 0, 2];
        let cm = ConfusionMatrix::from_predictions(&y_true, &y_pred, 3).unwrap();

        assert_eq!(cm.rows(), vec![vec![1, 1, 0], vec![0, 1, 0], vec![1, 0, 2]]);
        assert_eq!(cm.total(), 6);
        assert_eq!(cm.correct(), 4);
        assert_eq!(cm.max_count(), 2);
    }

    #[test]
    fn test_confusion_matrix_rejects_bad_input() {
        assert!(ConfusionMatrix::from_predictions(&[0, 1], &[0], 2).is_err());
        assert!(ConfusionMatrix::from_predictions(&[0, 3], &[0, 1], 2).is_err());
    }

    #[test]
    fn test_report_values() {
        let y_true = [0, 0, 1, 2, 2, 2];
        let y_pred = [0, 1, 1, 2, 0, 2];
        let cm = ConfusionMatrix::from_predictions(&y_true, &y_pred, 3).unwrap();
        let report =
            ClassificationReport::from_confusion_matrix(&cm, &names(&["problem", "test", "treatment"]))
                .unwrap();

        let problem = &report.per_class[0];
        assert!((problem.precision - 0.5).abs() < 1e-9);
        assert!((problem.recall - 0.5).abs() < 1e-9);
        assert_eq!(problem.support, 2);

        let treatment = &report.per_class[2];
        assert!((treatment.precision - 1.0).abs() < 1e-9);
        assert!((treatment.recall - 2.0 / 3.0).abs() < 1e-9);

        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-9);
        assert_eq!(report.total_support, 6);

        let expected_macro_recall = (0.5 + 1.0 + 2.0 / 3.0) / 3.0;
        assert!((report.macro_avg.recall - expected_macro_recall).abs() < 1e-9);
        // Weighted recall equals accuracy.
        assert!((report.weighted_avg.recall - report.accuracy).abs() < 1e-9);
    }

    #[test]
    fn test_absent_class_scores_zero() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0], &[0, 0], 2).unwrap();
        let report = ClassificationReport::from_confusion_matrix(&cm, &names(&["a", "b"])).unwrap();
        assert_eq!(report.per_class[1].precision, 0.0);
        assert_eq!(report.per_class[1].f1, 0.0);
        assert_eq!(report.per_class[1].support, 0);
    }

    #[test]
    fn test_report_display_layout() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[0, 1], 2).unwrap();
        let report = ClassificationReport::from_confusion_matrix(&cm, &names(&["neg", "pos"])).unwrap();
        let text = report.to_string();

        assert!(text.contains("precision"));
        assert!(text.contains("         neg       1.00      1.00      1.00         1"));
        assert!(text.contains(&format!("    accuracy{}1.00         2", " ".repeat(27))));
        assert!(text.contains("weighted avg       1.00      1.00      1.00         2"));
    }

    #[test]
    fn test_name_count_mismatch() {
        let cm = ConfusionMatrix::new(3);
        assert!(ClassificationReport::from_confusion_matrix(&cm, &names(&["a"])).is_err());
    }
}
