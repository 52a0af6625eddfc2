//! Score components and the composite blend.
//!
//! Every component lives in a known range: semantic in [-1, 1] (cosine),
//! temporal in (0, 1], relational in [0, 1]. Weights are applied as given and
//! never normalized.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WeightsConfig;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Missing fields keep their default weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub semantic: f64,
    pub temporal: f64,
    pub relational: f64,
}

impl From<WeightsConfig> for Weights {
    fn from(w: WeightsConfig) -> Self {
        Self {
            semantic: w.semantic,
            temporal: w.temporal,
            relational: w.relational,
        }
    }
}

impl Default for Weights {
    fn default() -> Self {
        WeightsConfig::default().into()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub temporal: f64,
    pub relational: f64,
}

impl ScoreBreakdown {
    pub fn composite(&self, w: &Weights) -> f64 {
        w.semantic * self.semantic + w.temporal * self.temporal + w.relational * self.relational
    }
}

/// `exp(-λ · age_days)`. Future timestamps count as age zero; no timestamp scores 0.
pub fn temporal_score(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>, decay_per_day: f64) -> f64 {
    let Some(ts) = timestamp else {
        return 0.0;
    };
    let age_days = ((now - ts).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY).max(0.0);
    (-decay_per_day * age_days).exp()
}

/// Fraction of the (deduplicated) context ids found among `related`.
pub fn relational_score(context: &HashSet<String>, related: &[String]) -> f64 {
    if context.is_empty() {
        return 0.0;
    }
    let hits: HashSet<&str> = related
        .iter()
        .map(String::as_str)
        .filter(|id| context.contains(*id))
        .collect();
    hits.len() as f64 / context.len() as f64
}

/// Descending score, then ascending id.
pub fn by_score_then_id(a: (f64, &str), b: (f64, &str)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1))
}
