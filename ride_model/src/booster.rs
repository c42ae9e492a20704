use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, Result},
    service::Predict,
    vectorizer::FeatureVector,
};

/// One node of a regression tree, stored in a flat arena.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        weight: f64,
    },
    /// Rows with `value < threshold` go left, the rest go right.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn leaf(weight: f64) -> Self {
        Self { nodes: vec![Node::Leaf { weight }] }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn predict_row(&self, row: &FeatureVector) -> f64 {
        let mut idx = 0;
        while let Some(node) = self.nodes.get(idx) {
            match *node {
                Node::Leaf { weight } => return weight,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row.get(feature) < threshold { left } else { right };
                }
            }
        }
        0.0
    }

    /// Children must come after their parent, which rules out cycles.
    fn validate(&self) -> Result<()> {
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split { left, right, .. } = *node {
                for child in [left, right] {
                    if child <= idx || child >= self.nodes.len() {
                        return Err(ModelError::InvalidModel(format!(
                            "node {} points at child {} (tree has {} nodes)",
                            idx,
                            child,
                            self.nodes.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Additive ensemble of regression trees on top of a constant base score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    pub base_score: f64,
    pub trees: Vec<Tree>,
    /// Round with the best validation score, when trained with early stopping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_iteration: Option<usize>,
}

impl Booster {
    pub fn new(base_score: f64, trees: Vec<Tree>) -> Self {
        Self { base_score, trees, best_iteration: None }
    }

    pub fn predict_row(&self, row: &FeatureVector) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_score.is_finite() {
            return Err(ModelError::InvalidModel(format!("base score {} is not finite", self.base_score)));
        }
        self.trees.iter().try_for_each(Tree::validate)
    }
}

impl Predict for Booster {
    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<f64>> {
        Ok(batch.iter().map(|row| self.predict_row(row)).collect())
    }
}
