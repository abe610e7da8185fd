//! Held-out evaluation: ROC AUC and a per-class classification report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Label;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("ROC AUC is undefined: held-out split contains only class {present}")]
    UndefinedAuc { present: Label },
    #[error("{scores} scores but {labels} labels")]
    LengthMismatch { scores: usize, labels: usize },
    #[error("no held-out rows to evaluate")]
    Empty,
}

/// Area under the ROC curve via the rank-sum statistic. Tied scores share
/// their average rank.
pub fn roc_auc(labels: &[Label], scores: &[f64]) -> Result<f64, EvaluationError> {
    if labels.len() != scores.len() {
        return Err(EvaluationError::LengthMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    if labels.is_empty() {
        return Err(EvaluationError::Empty);
    }

    let positives = labels.iter().filter(|l| **l == Label::NotOk).count();
    let negatives = labels.len() - positives;
    if positives == 0 {
        return Err(EvaluationError::UndefinedAuc { present: Label::Ok });
    }
    if negatives == 0 {
        return Err(EvaluationError::UndefinedAuc { present: Label::NotOk });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based: i+1 ..= j+1
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            if labels[idx] == Label::NotOk {
                positive_rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Precision / recall / F1 for one row of the report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub ok: ClassMetrics,
    pub not_ok: ClassMetrics,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn compute(truth: &[Label], predicted: &[Label]) -> Result<Self, EvaluationError> {
        if truth.len() != predicted.len() {
            return Err(EvaluationError::LengthMismatch {
                scores: predicted.len(),
                labels: truth.len(),
            });
        }
        if truth.is_empty() {
            return Err(EvaluationError::Empty);
        }

        let ok = class_metrics(truth, predicted, Label::Ok);
        let not_ok = class_metrics(truth, predicted, Label::NotOk);
        let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
        let total = truth.len();

        let macro_avg = ClassMetrics {
            precision: (ok.precision + not_ok.precision) / 2.0,
            recall: (ok.recall + not_ok.recall) / 2.0,
            f1: (ok.f1 + not_ok.f1) / 2.0,
            support: total,
        };
        let weight = |a: f64, b: f64| (a * ok.support as f64 + b * not_ok.support as f64) / total as f64;
        let weighted_avg = ClassMetrics {
            precision: weight(ok.precision, not_ok.precision),
            recall: weight(ok.recall, not_ok.recall),
            f1: weight(ok.f1, not_ok.f1),
            support: total,
        };

        Ok(Self {
            ok,
            not_ok,
            accuracy: correct as f64 / total as f64,
            macro_avg,
            weighted_avg,
        })
    }
}

fn class_metrics(truth: &[Label], predicted: &[Label], class: Label) -> ClassMetrics {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (t, p) in truth.iter().zip(predicted) {
        match (*t == class, *p == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassMetrics {
        precision,
        recall,
        f1,
        support: tp + fn_,
    }
}
