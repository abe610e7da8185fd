//! Regression trees fit to logistic-loss gradients.
//!
//! Two growth strategies share the same histogram split search:
//! - depth-wise: every node of a level is split before the next level,
//!   bounded by `max_depth`;
//! - leaf-wise: the open leaf with the largest gain is split next, bounded
//!   by `num_leaves` (and a looser `max_depth`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::histogram::{BinMapper, BinStat, BinnedMatrix, Histogram};
use super::{BoosterParams, GrowthPolicy};

/// Gains at or below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Structural defects of a deserialized tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("tree has no nodes")]
    Empty,
    #[error("node {node} points to child {child}, outside ({node}, {len})")]
    BadChild { node: usize, child: usize, len: usize },
    #[error("node {node} splits on feature {feature} of {n_features}")]
    BadFeature {
        node: usize,
        feature: usize,
        n_features: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = features.get(*feature).copied().unwrap_or(f64::NAN);
                    idx = if x <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Check that `predict` terminates on this tree without indexing out
    /// of bounds. Children always follow their parent in `nodes`.
    pub fn validate(&self, n_features: usize) -> Result<(), TreeError> {
        if self.nodes.is_empty() {
            return Err(TreeError::Empty);
        }
        let len = self.nodes.len();
        for (node, n) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature, left, right, ..
            } = n
            {
                if let Some(&child) = [left, right].into_iter().find(|&&c| c <= node || c >= len) {
                    return Err(TreeError::BadChild { node, child, len });
                }
                if *feature >= n_features {
                    return Err(TreeError::BadFeature {
                        node,
                        feature: *feature,
                        n_features,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Largest feature index referenced by a split.
    pub fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }
}

/// Best split of one node.
#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// An open node during growth.
struct OpenNode {
    index: usize,
    rows: Vec<usize>,
    depth: usize,
    total: BinStat,
    split: Option<SplitCandidate>,
}

/// Shared inputs of one tree fit.
pub struct GrowContext<'a> {
    pub mapper: &'a BinMapper,
    pub matrix: &'a BinnedMatrix,
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    pub params: &'a BoosterParams,
}

impl GrowContext<'_> {
    fn node_total(&self, rows: &[usize]) -> BinStat {
        let mut total = BinStat::default();
        for &r in rows {
            total.grad += self.grad[r];
            total.hess += self.hess[r];
        }
        total.count = rows.len();
        total
    }

    fn score(&self, s: BinStat) -> f64 {
        let denom = s.hess + self.params.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            s.grad * s.grad / denom
        }
    }

    fn leaf_value(&self, s: BinStat) -> f64 {
        let denom = s.hess + self.params.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            -s.grad / denom * self.params.learning_rate
        }
    }

    fn admissible(&self, s: BinStat) -> bool {
        s.count >= self.params.min_samples_leaf.max(1) && s.hess >= self.params.min_child_weight
    }

    fn best_split(&self, rows: &[usize], total: BinStat) -> Option<SplitCandidate> {
        if rows.len() < 2 * self.params.min_samples_leaf.max(1) {
            return None;
        }
        let hist = Histogram::build(self.matrix, self.mapper, rows, self.grad, self.hess);
        let parent = self.score(total);
        let mut best: Option<SplitCandidate> = None;

        for feature in 0..self.mapper.n_features() {
            let bins = hist.feature(feature);
            let mut left = BinStat::default();
            // The last bin has no upper threshold to split on
            for (bin, stat) in bins.iter().enumerate().take(bins.len().saturating_sub(1)) {
                left.grad += stat.grad;
                left.hess += stat.hess;
                left.count += stat.count;
                let right = total.sub(left);
                if !self.admissible(left) || !self.admissible(right) {
                    continue;
                }
                let gain = 0.5 * (self.score(left) + self.score(right) - parent);
                if gain > MIN_GAIN && best.map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }
        best
    }

    fn partition(&self, rows: &[usize], split: SplitCandidate) -> (Vec<usize>, Vec<usize>) {
        let bin = u8::try_from(split.bin).unwrap_or(u8::MAX);
        rows.iter().partition(|&&r| self.matrix.bin(r, split.feature) <= bin)
    }

    fn open(&self, index: usize, rows: Vec<usize>, depth: usize, max_depth: usize) -> OpenNode {
        let total = self.node_total(&rows);
        let split = if depth < max_depth {
            self.best_split(&rows, total)
        } else {
            None
        };
        OpenNode {
            index,
            rows,
            depth,
            total,
            split,
        }
    }

    /// Replace the placeholder at `node.index` with a split and push two
    /// placeholder children. Returns the children's row sets.
    fn apply_split(&self, nodes: &mut Vec<Node>, node: OpenNode, split: SplitCandidate) -> [(usize, Vec<usize>); 2] {
        let (left_rows, right_rows) = self.partition(&node.rows, split);
        let left = nodes.len();
        let right = left + 1;
        nodes.push(Node::Leaf { value: 0.0 });
        nodes.push(Node::Leaf { value: 0.0 });
        nodes[node.index] = Node::Split {
            feature: split.feature,
            threshold: self.mapper.threshold(split.feature, split.bin),
            left,
            right,
        };
        [(left, left_rows), (right, right_rows)]
    }

    pub fn grow(&self, rows: Vec<usize>) -> RegressionTree {
        match self.params.growth {
            GrowthPolicy::DepthWise { max_depth } => self.grow_depth_wise(rows, max_depth),
            GrowthPolicy::LeafWise { num_leaves, max_depth } => {
                self.grow_leaf_wise(rows, num_leaves.max(2), max_depth)
            }
        }
    }

    fn grow_depth_wise(&self, rows: Vec<usize>, max_depth: usize) -> RegressionTree {
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut level = vec![self.open(0, rows, 0, max_depth)];

        while !level.is_empty() {
            let mut next = Vec::new();
            for node in level {
                match node.split {
                    Some(split) => {
                        let depth = node.depth + 1;
                        for (index, child_rows) in self.apply_split(&mut nodes, node, split) {
                            next.push(self.open(index, child_rows, depth, max_depth));
                        }
                    }
                    None => {
                        nodes[node.index] = Node::Leaf {
                            value: self.leaf_value(node.total),
                        };
                    }
                }
            }
            level = next;
        }

        RegressionTree { nodes }
    }

    fn grow_leaf_wise(&self, rows: Vec<usize>, num_leaves: usize, max_depth: usize) -> RegressionTree {
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut leaves = vec![self.open(0, rows, 0, max_depth)];

        while leaves.len() < num_leaves {
            let best = leaves
                .iter()
                .enumerate()
                .filter_map(|(i, leaf)| leaf.split.map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((i, _)) = best else { break };

            let node = leaves.swap_remove(i);
            let Some(split) = node.split else { break };
            let depth = node.depth + 1;
            for (index, child_rows) in self.apply_split(&mut nodes, node, split) {
                leaves.push(self.open(index, child_rows, depth, max_depth));
            }
        }

        for leaf in leaves {
            nodes[leaf.index] = Node::Leaf {
                value: self.leaf_value(leaf.total),
            };
        }
        RegressionTree { nodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_for<'a>(
        rows: &[Vec<f64>],
        mapper: &'a BinMapper,
        matrix: &'a BinnedMatrix,
        grad: &'a [f64],
        hess: &'a [f64],
        params: &'a BoosterParams,
    ) -> GrowContext<'a> {
        assert_eq!(rows.len(), grad.len());
        GrowContext {
            mapper,
            matrix,
            grad,
            hess,
            params,
        }
    }

    /// Gradients of a step target on feature 1; feature 0 is noise.
    fn step_problem() -> (Vec<Vec<f64>>, Vec<f64>, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![f64::from(i % 7), f64::from(i)]).collect();
        let grad = (0..40).map(|i| if i < 20 { 0.5 } else { -0.5 }).collect();
        let hess = vec![0.25; 40];
        (rows, grad, hess)
    }

    #[test]
    fn test_depth_wise_finds_step() {
        let (rows, grad, hess) = step_problem();
        let mapper = BinMapper::fit(&rows, 64);
        let matrix = BinnedMatrix::new(&rows, &mapper);
        let params = BoosterParams::depth_wise();
        let ctx = context_for(&rows, &mapper, &matrix, &grad, &hess, &params);
        let tree = ctx.grow((0..40).collect());

        assert!(tree.depth() <= 6);
        assert!(tree.predict(&[0.0, 3.0]) < 0.0);
        assert!(tree.predict(&[0.0, 35.0]) > 0.0);
        match &tree.nodes[0] {
            Node::Split { feature, threshold, .. } => {
                assert_eq!(*feature, 1);
                assert!((*threshold - 19.5).abs() < 1e-9);
            }
            Node::Leaf { .. } => panic!("root should split"),
        }
    }

    #[test]
    fn test_leaf_wise_respects_leaf_budget() {
        let rows: Vec<Vec<f64>> = (0..200).map(|i| vec![f64::from(i)]).collect();
        let grad: Vec<f64> = (0..200).map(|i| (f64::from(i) / 10.0).sin()).collect();
        let hess = vec![0.25; 200];
        let mapper = BinMapper::fit(&rows, 255);
        let matrix = BinnedMatrix::new(&rows, &mapper);
        let mut params = BoosterParams::leaf_wise();
        params.growth = GrowthPolicy::LeafWise {
            num_leaves: 6,
            max_depth: 20,
        };
        params.min_samples_leaf = 5;
        let ctx = context_for(&rows, &mapper, &matrix, &grad, &hess, &params);
        let tree = ctx.grow((0..200).collect());
        assert_eq!(tree.n_leaves(), 6);
    }

    #[test]
    fn test_min_samples_leaf_blocks_split() {
        let (rows, grad, hess) = step_problem();
        let mapper = BinMapper::fit(&rows, 64);
        let matrix = BinnedMatrix::new(&rows, &mapper);
        let mut params = BoosterParams::leaf_wise();
        params.min_samples_leaf = 30;
        let ctx = context_for(&rows, &mapper, &matrix, &grad, &hess, &params);
        let tree = ctx.grow((0..40).collect());
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.max_feature(), None);
    }

    #[test]
    fn test_tree_serde_shape() {
        let tree = RegressionTree {
            nodes: vec![
                Node::Split {
                    feature: 0,
                    threshold: 1.5,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: -0.1 },
                Node::Leaf { value: 0.2 },
            ],
        };
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["nodes"][0]["kind"], "split");
        let back: RegressionTree = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.predict(&[1.0]), -0.1);
        assert_eq!(back.predict(&[2.0]), 0.2);
    }

    #[test]
    fn test_validate_rejects_broken_structure() {
        let split = |left, right| Node::Split {
            feature: 0,
            threshold: 1.5,
            left,
            right,
        };
        let leaf = || Node::Leaf { value: 0.0 };

        let good = RegressionTree {
            nodes: vec![split(1, 2), leaf(), leaf()],
        };
        assert_eq!(good.validate(1), Ok(()));
        assert_eq!(
            good.validate(0),
            Err(TreeError::BadFeature {
                node: 0,
                feature: 0,
                n_features: 0
            })
        );

        assert_eq!(RegressionTree { nodes: vec![] }.validate(1), Err(TreeError::Empty));

        let out_of_range = RegressionTree {
            nodes: vec![split(1, 999), leaf(), leaf()],
        };
        assert_eq!(
            out_of_range.validate(1),
            Err(TreeError::BadChild {
                node: 0,
                child: 999,
                len: 3
            })
        );

        // A child pointing back at its parent would loop forever
        let cycle = RegressionTree {
            nodes: vec![split(1, 2), split(0, 2), leaf()],
        };
        assert_eq!(
            cycle.validate(1),
            Err(TreeError::BadChild {
                node: 1,
                child: 0,
                len: 3
            })
        );
    }
}
