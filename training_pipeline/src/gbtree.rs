//! Second-order gradient boosting of regression trees (squared error).
//!
//! Trees are grown depth-wise with exact greedy split search over the
//! training columns. Sparse entries that are absent read as `0.0`, the same
//! way [`ride_model::Tree`] routes them at prediction time.

use ride_model::{Booster, FeatureVector, Node, Tree};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::rmse;

/// Smallest loss reduction that counts as positive gain; smaller values are rounding noise.
const MIN_SPLIT_GAIN: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("{rows} rows but {labels} labels")]
    LabelMismatch { rows: usize, labels: usize },

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("unsupported objective {0:?}")]
    UnsupportedObjective(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    pub min_child_weight: f64,
    pub objective: String,
    pub seed: u64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            learning_rate: 0.3,
            reg_alpha: 0.0,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            objective: "reg:squarederror".to_string(),
            seed: 0,
        }
    }
}

impl BoosterParams {
    /// Flat key/value view, as logged to the tracking store.
    pub fn to_params(&self) -> Vec<(String, String)> {
        vec![
            ("max_depth".to_string(), self.max_depth.to_string()),
            ("learning_rate".to_string(), self.learning_rate.to_string()),
            ("reg_alpha".to_string(), self.reg_alpha.to_string()),
            ("reg_lambda".to_string(), self.reg_lambda.to_string()),
            ("min_child_weight".to_string(), self.min_child_weight.to_string()),
            ("objective".to_string(), self.objective.clone()),
            ("seed".to_string(), self.seed.to_string()),
        ]
    }

    fn check_objective(&self) -> Result<(), TrainError> {
        match self.objective.as_str() {
            // reg:linear is the legacy name of the same objective
            "reg:squarederror" | "reg:linear" => Ok(()),
            other => Err(TrainError::UnsupportedObjective(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOptions {
    pub num_boost_round: usize,
    /// Stop when the validation score has not improved for this many rounds.
    pub early_stopping_rounds: Option<usize>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self { num_boost_round: 100, early_stopping_rounds: Some(50) }
    }
}

/// Encoded rows with their labels.
#[derive(Debug, Clone)]
pub struct DMatrix {
    rows: Vec<FeatureVector>,
    labels: Vec<f64>,
    n_features: usize,
}

impl DMatrix {
    pub fn new(rows: Vec<FeatureVector>, labels: Vec<f64>, n_features: usize) -> Result<Self, TrainError> {
        if rows.len() != labels.len() {
            return Err(TrainError::LabelMismatch { rows: rows.len(), labels: labels.len() });
        }
        Ok(Self { rows, labels, n_features })
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Column-major copy of the non-zero entries, each column sorted by value.
struct Columns {
    cols: Vec<Vec<(usize, f64)>>,
}

impl Columns {
    fn build(m: &DMatrix) -> Self {
        let mut cols: Vec<Vec<(usize, f64)>> = vec![Vec::new(); m.n_features];
        for (row, fv) in m.rows.iter().enumerate() {
            for &(col, v) in fv.entries() {
                if v != 0.0 && col < cols.len() {
                    cols[col].push((row, v));
                }
            }
        }
        for col in &mut cols {
            col.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
        Self { cols }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GradStats {
    g: f64,
    h: f64,
    n: usize,
}

impl GradStats {
    fn add(&mut self, g: f64, h: f64, n: usize) {
        self.g += g;
        self.h += h;
        self.n += n;
    }

    fn minus(&self, other: &GradStats) -> GradStats {
        GradStats { g: self.g - other.g, h: self.h - other.h, n: self.n.saturating_sub(other.n) }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Running left-hand sums while one node's share of a column is scanned.
#[derive(Debug, Clone, Copy, Default)]
struct ScanState {
    left: GradStats,
    last: Option<f64>,
    zero_done: bool,
    nonzero: GradStats,
}

struct TreeGrower<'a> {
    params: &'a BoosterParams,
    columns: &'a Columns,
    grad: &'a [f64],
    hess: &'a [f64],
}

impl TreeGrower<'_> {
    fn soft_threshold(&self, g: f64) -> f64 {
        let alpha = self.params.reg_alpha;
        if g > alpha {
            g - alpha
        } else if g < -alpha {
            g + alpha
        } else {
            0.0
        }
    }

    fn score(&self, s: &GradStats) -> f64 {
        let denom = s.h + self.params.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        let t = self.soft_threshold(s.g);
        t * t / denom
    }

    fn leaf_weight(&self, s: &GradStats) -> f64 {
        let denom = s.h + self.params.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -self.soft_threshold(s.g) / denom * self.params.learning_rate
    }

    fn split_gain(&self, parent: &GradStats, left: &GradStats) -> Option<f64> {
        let right = parent.minus(left);
        if left.h < self.params.min_child_weight || right.h < self.params.min_child_weight {
            return None;
        }
        Some(0.5 * (self.score(left) + self.score(&right) - self.score(parent)))
    }

    /// Grow one tree; returns it with the leaf index every training row ends in.
    fn grow(&self, n_rows: usize) -> (Tree, Vec<usize>) {
        let mut nodes = vec![Node::Leaf { weight: 0.0 }];
        let mut stats = vec![GradStats::default()];
        for i in 0..n_rows {
            stats[0].add(self.grad[i], self.hess[i], 1);
        }
        let mut positions = vec![0usize; n_rows];
        let mut frontier = vec![0usize];
        let mut depth = 0;

        while !frontier.is_empty() {
            if depth >= self.params.max_depth {
                for &n in &frontier {
                    nodes[n] = Node::Leaf { weight: self.leaf_weight(&stats[n]) };
                }
                break;
            }

            let mut active = vec![false; nodes.len()];
            for &n in &frontier {
                active[n] = true;
            }
            let best = self.find_splits(&positions, &active, &stats);

            let mut split_of: Vec<Option<(SplitCandidate, usize, usize)>> = vec![None; nodes.len()];
            let mut next_frontier = Vec::new();
            for &n in &frontier {
                match best[n] {
                    Some(c) => {
                        let left = nodes.len();
                        let right = left + 1;
                        nodes.push(Node::Leaf { weight: 0.0 });
                        nodes.push(Node::Leaf { weight: 0.0 });
                        stats.push(GradStats::default());
                        stats.push(GradStats::default());
                        nodes[n] = Node::Split { feature: c.feature, threshold: c.threshold, left, right };
                        split_of[n] = Some((c, left, right));
                        next_frontier.push(left);
                        next_frontier.push(right);
                    }
                    None => nodes[n] = Node::Leaf { weight: self.leaf_weight(&stats[n]) },
                }
            }

            self.partition(&mut positions, &split_of);
            for (i, &n) in positions.iter().enumerate() {
                if n >= split_of.len() {
                    stats[n].add(self.grad[i], self.hess[i], 1);
                }
            }

            frontier = next_frontier;
            depth += 1;
        }

        (Tree::new(nodes), positions)
    }

    /// Best split per active node over every column.
    fn find_splits(&self, positions: &[usize], active: &[bool], stats: &[GradStats]) -> Vec<Option<SplitCandidate>> {
        let mut best: Vec<Option<SplitCandidate>> = vec![None; active.len()];
        let mut scan = vec![ScanState::default(); active.len()];
        let mut touched: Vec<usize> = Vec::new();

        for (feature, col) in self.columns.cols.iter().enumerate() {
            if col.is_empty() {
                continue;
            }

            for &(row, _) in col {
                let n = positions[row];
                if !active[n] {
                    continue;
                }
                if scan[n].nonzero.n == 0 {
                    touched.push(n);
                }
                scan[n].nonzero.add(self.grad[row], self.hess[row], 1);
            }

            for &(row, v) in col {
                let n = positions[row];
                if !active[n] {
                    continue;
                }
                if !scan[n].zero_done && v > 0.0 {
                    let zeros = stats[n].minus(&scan[n].nonzero);
                    self.push_group(feature, 0.0, zeros, &mut scan[n], &stats[n], &mut best[n]);
                    scan[n].zero_done = true;
                }
                let group = GradStats { g: self.grad[row], h: self.hess[row], n: 1 };
                self.push_group(feature, v, group, &mut scan[n], &stats[n], &mut best[n]);
            }

            for &n in &touched {
                if !scan[n].zero_done {
                    let zeros = stats[n].minus(&scan[n].nonzero);
                    self.push_group(feature, 0.0, zeros, &mut scan[n], &stats[n], &mut best[n]);
                }
                scan[n] = ScanState::default();
            }
            touched.clear();
        }

        best
    }

    /// Add a run of rows sharing value `v` to the left side, first trying a
    /// split between the previous value and `v`.
    fn push_group(
        &self,
        feature: usize,
        v: f64,
        group: GradStats,
        st: &mut ScanState,
        parent: &GradStats,
        best: &mut Option<SplitCandidate>,
    ) {
        if group.n == 0 {
            return;
        }
        if let Some(last) = st.last {
            if v > last {
                if let Some(gain) = self.split_gain(parent, &st.left) {
                    let better = best.map_or(true, |b| gain > b.gain);
                    if gain > MIN_SPLIT_GAIN && better {
                        let mid = last + (v - last) / 2.0;
                        let threshold = if mid > last { mid } else { v };
                        *best = Some(SplitCandidate { feature, threshold, gain });
                    }
                }
            }
        }
        st.left.add(group.g, group.h, group.n);
        st.last = Some(v);
    }

    fn partition(&self, positions: &mut [usize], split_of: &[Option<(SplitCandidate, usize, usize)>]) {
        let before = positions.to_vec();

        // Rows without an entry in the split column hold 0.0
        for pos in positions.iter_mut() {
            if let Some(Some((c, left, right))) = split_of.get(*pos) {
                *pos = if 0.0 < c.threshold { *left } else { *right };
            }
        }

        let mut features: Vec<usize> = split_of.iter().flatten().map(|(c, _, _)| c.feature).collect();
        features.sort_unstable();
        features.dedup();
        for f in features {
            for &(row, v) in &self.columns.cols[f] {
                if let Some(Some((c, left, right))) = split_of.get(before[row]) {
                    if c.feature == f {
                        positions[row] = if v < c.threshold { *left } else { *right };
                    }
                }
            }
        }
    }
}

fn leaf_value(tree: &Tree, node: usize) -> f64 {
    match tree.nodes().get(node) {
        Some(Node::Leaf { weight }) => *weight,
        _ => 0.0,
    }
}

/// Fit a booster on `dtrain`, scoring `dvalid` (when given) after every round.
///
/// With early stopping the returned model is cut back to the best round.
pub fn train(
    params: &BoosterParams,
    dtrain: &DMatrix,
    dvalid: Option<&DMatrix>,
    opts: &TrainOptions,
) -> Result<Booster, TrainError> {
    params.check_objective()?;
    if dtrain.num_rows() == 0 {
        return Err(TrainError::EmptyTrainingSet);
    }

    let labels = dtrain.labels();
    let base_score = labels.iter().sum::<f64>() / labels.len() as f64;
    let columns = Columns::build(dtrain);

    let mut train_pred = vec![base_score; dtrain.num_rows()];
    let mut valid_pred = dvalid.map(|d| vec![base_score; d.num_rows()]);
    let hess = vec![1.0; dtrain.num_rows()];
    let mut grad = vec![0.0; dtrain.num_rows()];

    let mut trees = Vec::with_capacity(opts.num_boost_round);
    let mut best: Option<(usize, f64)> = None;

    for round in 0..opts.num_boost_round {
        for (g, (p, y)) in grad.iter_mut().zip(train_pred.iter().zip(labels)) {
            *g = p - y;
        }

        let grower = TreeGrower { params, columns: &columns, grad: &grad, hess: &hess };
        let (tree, leaves) = grower.grow(dtrain.num_rows());
        for (p, &leaf) in train_pred.iter_mut().zip(&leaves) {
            *p += leaf_value(&tree, leaf);
        }

        if let (Some(d), Some(vp)) = (dvalid, valid_pred.as_mut()) {
            for (p, row) in vp.iter_mut().zip(d.rows()) {
                *p += tree.predict_row(row);
            }
            let score = rmse(d.labels(), vp);
            tracing::debug!("[{}] validation-rmse:{:.5}", round, score);

            if best.map_or(true, |(_, b)| score < b) {
                best = Some((round, score));
            }
        }
        trees.push(tree);

        if let (Some(patience), Some((best_round, best_score))) = (opts.early_stopping_rounds, best) {
            if round - best_round >= patience {
                tracing::info!(best_round, best_score, "stopping early at round {}", round);
                break;
            }
        }
    }

    let mut booster = Booster::new(base_score, trees);
    if let (Some(_), Some((best_round, _))) = (opts.early_stopping_rounds, best) {
        booster.trees.truncate(best_round + 1);
        booster.best_iteration = Some(best_round);
    }
    Ok(booster)
}
