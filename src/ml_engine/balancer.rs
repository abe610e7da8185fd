//! Class Balancer (training only)
//!
//! Synthetic minority oversampling: each synthetic row lies on the segment
//! between a random minority row and one of its `k` nearest minority
//! neighbours. The minority class is grown until it matches the majority.
//! Callers must only pass the training split; held-out rows never enter
//! the neighbour graph.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::debug;

use crate::config::defaults::{DEFAULT_BALANCER_NEIGHBOURS, DEFAULT_SEED};
use crate::types::Label;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient minority samples: {found} of class {class} but {required} are needed to build a {neighbours}-neighbour graph")]
    InsufficientMinoritySamples {
        class: Label,
        found: usize,
        required: usize,
        neighbours: usize,
    },
    #[error("feature matrix has {rows} rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },
}

/// Per-class row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClassCounts {
    pub ok: usize,
    pub not_ok: usize,
}

impl ClassCounts {
    pub fn of(labels: &[Label]) -> Self {
        labels.iter().fold(Self::default(), |mut acc, l| {
            match l {
                Label::Ok => acc.ok += 1,
                Label::NotOk => acc.not_ok += 1,
            }
            acc
        })
    }

    pub const fn total(&self) -> usize {
        self.ok + self.not_ok
    }

    /// (minority class, minority count, majority count)
    pub const fn minority(&self) -> (Label, usize, usize) {
        if self.not_ok <= self.ok {
            (Label::NotOk, self.not_ok, self.ok)
        } else {
            (Label::Ok, self.ok, self.not_ok)
        }
    }
}

/// Synthetic minority oversampler.
#[derive(Debug, Clone)]
pub struct ClassBalancer {
    neighbours: usize,
    seed: u64,
}

impl Default for ClassBalancer {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCER_NEIGHBOURS, DEFAULT_SEED)
    }
}

impl ClassBalancer {
    pub fn new(neighbours: usize, seed: u64) -> Self {
        Self {
            neighbours: neighbours.max(1),
            seed,
        }
    }

    /// Return `(X', y')`: the input rows followed by synthetic minority rows.
    pub fn resample(
        &self,
        rows: &[Vec<f64>],
        labels: &[Label],
    ) -> Result<(Vec<Vec<f64>>, Vec<Label>), BalanceError> {
        if rows.len() != labels.len() {
            return Err(BalanceError::LengthMismatch {
                rows: rows.len(),
                labels: labels.len(),
            });
        }

        let counts = ClassCounts::of(labels);
        let (minority_class, minority, majority) = counts.minority();
        if minority <= self.neighbours {
            return Err(BalanceError::InsufficientMinoritySamples {
                class: minority_class,
                found: minority,
                required: self.neighbours + 1,
                neighbours: self.neighbours,
            });
        }

        let mut out_rows = rows.to_vec();
        let mut out_labels = labels.to_vec();
        let needed = majority - minority;
        if needed == 0 {
            return Ok((out_rows, out_labels));
        }

        let minority_rows: Vec<&[f64]> = rows
            .iter()
            .zip(labels)
            .filter(|(_, l)| **l == minority_class)
            .map(|(r, _)| r.as_slice())
            .collect();
        let graph = self.neighbour_graph(&minority_rows);

        let mut rng = StdRng::seed_from_u64(self.seed);
        out_rows.reserve(needed);
        out_labels.reserve(needed);
        for _ in 0..needed {
            let i = rng.gen_range(0..minority_rows.len());
            let nn = graph[i][rng.gen_range(0..graph[i].len())];
            let gap: f64 = rng.gen();
            let synthetic = minority_rows[i]
                .iter()
                .zip(minority_rows[nn])
                .map(|(a, b)| a + gap * (b - a))
                .collect();
            out_rows.push(synthetic);
            out_labels.push(minority_class);
        }

        debug!(
            class = %minority_class,
            before = minority,
            synthetic = needed,
            "Oversampled minority class"
        );

        Ok((out_rows, out_labels))
    }

    /// Indices of the `k` nearest other rows for every row (Euclidean).
    fn neighbour_graph(&self, rows: &[&[f64]]) -> Vec<Vec<usize>> {
        rows.iter()
            .enumerate()
            .map(|(i, a)| {
                let mut distances: Vec<(f64, usize)> = rows
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(j, b)| (squared_distance(a, b), j))
                    .collect();
                distances.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
                distances.truncate(self.neighbours);
                distances.into_iter().map(|(_, j)| j).collect()
            })
            .collect()
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imbalanced(ok: usize, not_ok: usize) -> (Vec<Vec<f64>>, Vec<Label>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..ok {
            rows.push(vec![i as f64, 0.0]);
            labels.push(Label::Ok);
        }
        for i in 0..not_ok {
            rows.push(vec![100.0 + i as f64, 50.0 + i as f64]);
            labels.push(Label::NotOk);
        }
        (rows, labels)
    }

    #[test]
    fn test_minority_grows_to_majority() {
        let (rows, labels) = imbalanced(40, 8);
        let (x, y) = ClassBalancer::default().resample(&rows, &labels).unwrap();
        let counts = ClassCounts::of(&y);
        assert_eq!(counts.ok, 40);
        assert_eq!(counts.not_ok, 40);
        assert_eq!(x.len(), 80);
        // Originals are kept in place
        assert_eq!(&x[..48], &rows[..]);
    }

    #[test]
    fn test_synthetic_rows_interpolate_minority() {
        let (rows, labels) = imbalanced(30, 6);
        let (x, _) = ClassBalancer::default().resample(&rows, &labels).unwrap();
        for synthetic in &x[36..] {
            assert!(synthetic[0] >= 100.0 && synthetic[0] <= 105.0);
            assert!(synthetic[1] >= 50.0 && synthetic[1] <= 55.0);
            // Minority points all lie on the line y = x - 50
            assert!((synthetic[1] - (synthetic[0] - 50.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_seeded_resampling_is_reproducible() {
        let (rows, labels) = imbalanced(25, 7);
        let a = ClassBalancer::new(5, 7).resample(&rows, &labels).unwrap();
        let b = ClassBalancer::new(5, 7).resample(&rows, &labels).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_minority_rows() {
        let (rows, labels) = imbalanced(20, 5);
        let err = ClassBalancer::new(5, 42).resample(&rows, &labels).unwrap_err();
        assert_eq!(
            err,
            BalanceError::InsufficientMinoritySamples {
                class: Label::NotOk,
                found: 5,
                required: 6,
                neighbours: 5,
            }
        );
    }

    #[test]
    fn test_single_class_is_insufficient() {
        let (rows, labels) = imbalanced(20, 0);
        assert!(matches!(
            ClassBalancer::default().resample(&rows, &labels),
            Err(BalanceError::InsufficientMinoritySamples { found: 0, .. })
        ));
    }

    #[test]
    fn test_balanced_input_unchanged() {
        let (rows, labels) = imbalanced(10, 10);
        let (x, y) = ClassBalancer::default().resample(&rows, &labels).unwrap();
        assert_eq!(x, rows);
        assert_eq!(y, labels);
    }

    #[test]
    fn test_ok_can_be_minority() {
        let (rows, labels) = imbalanced(7, 30);
        let (_, y) = ClassBalancer::default().resample(&rows, &labels).unwrap();
        assert_eq!(ClassCounts::of(&y), ClassCounts { ok: 30, not_ok: 30 });
    }
}
