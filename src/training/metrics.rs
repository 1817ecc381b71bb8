//! Binary classification metrics

use crate::error::{Result, TabtuneError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Metric used to score candidates and importances; higher is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMetric {
    F1Macro,
    RocAuc,
    BalancedAccuracy,
    Accuracy,
}

impl ScoringMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMetric::F1Macro => "f1_macro",
            ScoringMetric::RocAuc => "roc_auc",
            ScoringMetric::BalancedAccuracy => "balanced_accuracy",
            ScoringMetric::Accuracy => "accuracy",
        }
    }

    /// Score positive-class probabilities against 0/1 labels
    pub fn score(&self, y_true: &Array1<f64>, y_prob: &Array1<f64>) -> Result<f64> {
        if y_true.len() != y_prob.len() {
            return Err(TabtuneError::ValidationError(format!(
                "length mismatch: {} labels, {} predictions",
                y_true.len(),
                y_prob.len()
            )));
        }
        if y_true.is_empty() {
            return Err(TabtuneError::ValidationError("cannot score an empty set".into()));
        }
        match self {
            ScoringMetric::RocAuc => roc_auc(y_true, y_prob),
            threshold_metric => {
                let y_pred = y_prob.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 });
                let cm = ConfusionMatrix::from_labels(y_true, &y_pred);
                Ok(match threshold_metric {
                    ScoringMetric::F1Macro => cm.f1_macro(),
                    ScoringMetric::BalancedAccuracy => cm.balanced_accuracy(),
                    _ => cm.accuracy(),
                })
            }
        }
    }
}

impl fmt::Display for ScoringMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoringMetric {
    type Err = TabtuneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "f1_macro" | "f1" => Ok(ScoringMetric::F1Macro),
            "roc_auc" | "auc" => Ok(ScoringMetric::RocAuc),
            "balanced_accuracy" => Ok(ScoringMetric::BalancedAccuracy),
            "accuracy" => Ok(ScoringMetric::Accuracy),
            other => Err(TabtuneError::ConfigError(format!("unknown scoring metric '{}'", other))),
        }
    }
}

/// Counts for a 0/1 problem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_labels(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let mut cm = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            match (t > 0.5, p > 0.5) {
                (true, true) => cm.tp += 1,
                (true, false) => cm.fn_ += 1,
                (false, true) => cm.fp += 1,
                (false, false) => cm.tn += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// Mean recall over the classes present in the labels
    pub fn balanced_accuracy(&self) -> f64 {
        let mut recalls = Vec::with_capacity(2);
        if self.tn + self.fp > 0 {
            recalls.push(ratio(self.tn, self.tn + self.fp));
        }
        if self.tp + self.fn_ > 0 {
            recalls.push(ratio(self.tp, self.tp + self.fn_));
        }
        if recalls.is_empty() {
            0.0
        } else {
            recalls.iter().sum::<f64>() / recalls.len() as f64
        }
    }

    /// Unweighted mean of per-class F1 over classes seen in labels or predictions
    pub fn f1_macro(&self) -> f64 {
        let mut scores = Vec::with_capacity(2);
        // class 0 seen
        if self.tn + self.fp + self.fn_ > 0 {
            scores.push(f1(self.tn, self.fn_, self.fp));
        }
        if self.tp + self.fp + self.fn_ > 0 {
            scores.push(f1(self.tp, self.fp, self.fn_));
        }
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(tp: usize, fp: usize, fn_: usize) -> f64 {
    ratio(2 * tp, 2 * tp + fp + fn_)
}

/// Area under the ROC curve from average ranks; tied scores share their rank
pub fn roc_auc(y_true: &Array1<f64>, y_score: &Array1<f64>) -> Result<f64> {
    let n_pos = y_true.iter().filter(|&&v| v > 0.5).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(TabtuneError::ValidationError(
            "ROC AUC is undefined when only one class is present".into(),
        ));
    }

    let mut order: Vec<usize> = (0..y_score.len()).collect();
    order.sort_by(|&a, &b| y_score[a].partial_cmp(&y_score[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; order.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && y_score[order[j + 1]] == y_score[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|(&t, _)| t > 0.5)
        .map(|(_, &r)| r)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Evaluation summary printed after training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub n_samples: usize,
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub f1_macro: f64,
    pub precision: f64,
    pub recall: f64,
    /// `None` when only one class is present
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn compute(y_true: &Array1<f64>, y_prob: &Array1<f64>) -> Self {
        let y_pred = y_prob.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 });
        let confusion = ConfusionMatrix::from_labels(y_true, &y_pred);
        Self {
            n_samples: y_true.len(),
            accuracy: confusion.accuracy(),
            balanced_accuracy: confusion.balanced_accuracy(),
            f1_macro: confusion.f1_macro(),
            precision: confusion.precision(),
            recall: confusion.recall(),
            roc_auc: roc_auc(y_true, y_prob).ok(),
            confusion,
        }
    }

    pub fn get(&self, metric: ScoringMetric) -> Option<f64> {
        match metric {
            ScoringMetric::F1Macro => Some(self.f1_macro),
            ScoringMetric::RocAuc => self.roc_auc,
            ScoringMetric::BalancedAccuracy => Some(self.balanced_accuracy),
            ScoringMetric::Accuracy => Some(self.accuracy),
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "samples            {}", self.n_samples)?;
        writeln!(f, "accuracy           {:.4}", self.accuracy)?;
        writeln!(f, "balanced_accuracy  {:.4}", self.balanced_accuracy)?;
        writeln!(f, "f1_macro           {:.4}", self.f1_macro)?;
        writeln!(f, "precision          {:.4}", self.precision)?;
        writeln!(f, "recall             {:.4}", self.recall)?;
        match self.roc_auc {
            Some(auc) => writeln!(f, "roc_auc            {:.4}", auc)?,
            None => writeln!(f, "roc_auc            n/a")?,
        }
        write!(
            f,
            "confusion          tn={} fp={} fn={} tp={}",
            self.confusion.tn, self.confusion.fp, self.confusion.fn_, self.confusion.tp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_confusion_counts() {
        let y_true = array![1.0, 1.0, 0.0, 0.0, 1.0];
        let y_pred = array![1.0, 0.0, 0.0, 1.0, 1.0];
        let cm = ConfusionMatrix::from_labels(&y_true, &y_pred);
        assert_eq!(cm, ConfusionMatrix { tn: 1, fp: 1, fn_: 1, tp: 2 });
        assert!((cm.accuracy() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_f1_macro_and_balanced_accuracy() {
        let y_true = array![0.0, 0.0, 0.0, 1.0];
        let y_prob = array![0.1, 0.2, 0.9, 0.8];
        // class 0: p=1, r=2/3, f1=0.8; class 1: p=0.5, r=1, f1=2/3
        let f1 = ScoringMetric::F1Macro.score(&y_true, &y_prob).unwrap();
        assert!((f1 - (0.8 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        let bal = ScoringMetric::BalancedAccuracy.score(&y_true, &y_prob).unwrap();
        assert!((bal - (2.0 / 3.0 + 1.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_with_ties() {
        let y_true = array![0.0, 0.0, 1.0, 1.0];
        let perfect = array![0.1, 0.2, 0.8, 0.9];
        assert_eq!(roc_auc(&y_true, &perfect).unwrap(), 1.0);
        let tied = array![0.5, 0.5, 0.5, 0.5];
        assert_eq!(roc_auc(&y_true, &tied).unwrap(), 0.5);
        let one_class = array![1.0, 1.0];
        assert!(roc_auc(&one_class, &array![0.2, 0.3]).is_err());
    }

    #[test]
    fn test_metric_names_round_trip() {
        for metric in [
            ScoringMetric::F1Macro,
            ScoringMetric::RocAuc,
            ScoringMetric::BalancedAccuracy,
            ScoringMetric::Accuracy,
        ] {
            assert_eq!(metric.as_str().parse::<ScoringMetric>().unwrap(), metric);
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{}\"", metric.as_str()));
        }
        assert!("gini".parse::<ScoringMetric>().is_err());
    }

    #[test]
    fn test_report_without_auc() {
        let report = ClassificationReport::compute(&array![1.0, 1.0], &array![0.7, 0.4]);
        assert_eq!(report.roc_auc, None);
        assert_eq!(report.get(ScoringMetric::Accuracy), Some(0.5));
        assert!(report.to_string().contains("roc_auc            n/a"));
    }
}
