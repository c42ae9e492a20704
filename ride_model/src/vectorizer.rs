use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::features::{FeatureValue, Features};

/// Sparse row: `(column, value)` pairs sorted by column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    entries: Vec<(usize, f64)>,
}

impl FeatureVector {
    /// Sorts by column. A column given more than once keeps its last value.
    pub fn from_entries(mut entries: Vec<(usize, f64)>) -> Self {
        entries.sort_by_key(|(idx, _)| *idx);
        let mut deduped: Vec<(usize, f64)> = Vec::with_capacity(entries.len());
        for (idx, value) in entries {
            match deduped.last_mut() {
                Some(last) if last.0 == idx => last.1 = value,
                _ => deduped.push((idx, value)),
            }
        }
        Self { entries: deduped }
    }

    /// Value at `column`; columns not present read as `0.0`.
    pub fn get(&self, column: usize) -> f64 {
        self.entries
            .binary_search_by_key(&column, |(idx, _)| *idx)
            .map(|pos| self.entries[pos].1)
            .unwrap_or(0.0)
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct VectorizerRepr {
    feature_names: Vec<String>,
}

/// Maps feature mappings into a sparse numeric space.
///
/// Categorical values become one-hot columns named `key=value`, numeric
/// values keep their key as the column name. Columns are sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "VectorizerRepr", into = "VectorizerRepr")]
pub struct DictVectorizer {
    feature_names: Vec<String>,
    vocabulary: BTreeMap<String, usize>,
}

impl From<VectorizerRepr> for DictVectorizer {
    fn from(repr: VectorizerRepr) -> Self {
        Self::with_feature_names(repr.feature_names)
    }
}

impl From<DictVectorizer> for VectorizerRepr {
    fn from(v: DictVectorizer) -> Self {
        VectorizerRepr { feature_names: v.feature_names }
    }
}

fn column_name(key: &str, value: &FeatureValue<'_>) -> String {
    match value {
        FeatureValue::Text(s) => format!("{}={}", key, s),
        FeatureValue::Number(_) => key.to_string(),
    }
}

impl DictVectorizer {
    fn with_feature_names(feature_names: Vec<String>) -> Self {
        let vocabulary = feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { feature_names, vocabulary }
    }

    /// Learn the column vocabulary from `rows`, replacing any previous one.
    pub fn fit(&mut self, rows: &[Features]) -> &mut Self {
        let names: BTreeSet<String> = rows
            .iter()
            .flat_map(|row| row.entries().map(|(key, value)| column_name(key, &value)))
            .collect();
        *self = Self::with_feature_names(names.into_iter().collect());
        self
    }

    /// Encode `rows`; names not seen during `fit` are dropped.
    pub fn transform(&self, rows: &[Features]) -> Vec<FeatureVector> {
        rows.iter()
            .map(|row| {
                let entries = row
                    .entries()
                    .iter()
                    .filter_map(|(key, value)| {
                        let col = *self.vocabulary.get(&column_name(key, value))?;
                        let v = match value {
                            FeatureValue::Text(_) => 1.0,
                            FeatureValue::Number(n) => *n,
                        };
                        Some((col, v))
                    })
                    .collect();
                FeatureVector::from_entries(entries)
            })
            .collect()
    }

    pub fn fit_transform(&mut self, rows: &[Features]) -> Vec<FeatureVector> {
        self.fit(rows);
        self.transform(rows)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}
