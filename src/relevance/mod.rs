//! Composite relevance scoring.
//!
//! Ranks a candidate memory against a query by blending four normalized
//! [0.0, 1.0] components — semantic similarity, recency, importance, and
//! access frequency — into a single weighted score. Grounded on the
//! teacher's hybrid-search scoring shape (a pure function composed from
//! weighted sub-scores), generalized to this spec's exact component set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::types::Memory;

/// Weights applied to each relevance component. Must not be negative;
/// they are not required to sum to 1.0 (the final score is normalized
/// implicitly by the weighted-average computation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceWeights {
    pub semantic: f32,
    pub recency: f32,
    pub importance: f32,
    pub frequency: f32,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            recency: 0.2,
            importance: 0.2,
            frequency: 0.1,
        }
    }
}

/// A query as seen by the relevance engine: an embedding (if the
/// configured provider produced one) plus an optional keyword fallback.
pub struct RelevanceQuery<'a> {
    pub embedding: Option<&'a [f32]>,
    pub keywords: &'a [String],
    pub session_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// Multiplicative boost applied when a candidate's `session_id` matches
/// the query's active session. Chosen as a moderate nudge: enough to
/// break near-ties in favor of same-session continuity without letting
/// session membership dominate over actual relevance.
const SESSION_BOOST: f32 = 1.15;

fn semantic_component(memory: &Memory, query: &RelevanceQuery) -> f32 {
    if let (Some(q), Some(m)) = (query.embedding, memory.embedding.as_deref()) {
        // cosine_similarity is in [-1, 1]; rescale to [0, 1].
        let sim = cosine_similarity(q, m);
        return ((sim + 1.0) / 2.0).clamp(0.0, 1.0);
    }
    if query.keywords.is_empty() {
        return 0.0;
    }
    let text_lower = memory.text.to_lowercase();
    let hits = query
        .keywords
        .iter()
        .filter(|kw| text_lower.contains(&kw.to_lowercase()))
        .count();
    (hits as f32 / query.keywords.len() as f32).clamp(0.0, 1.0)
}

fn recency_component(memory: &Memory, now: DateTime<Utc>, recency_horizon_days: f32) -> f32 {
    let age_days = (now - memory.updated_at).num_seconds().max(0) as f32 / 86_400.0;
    (-age_days / recency_horizon_days.max(0.001)).exp().clamp(0.0, 1.0)
}

/// Effective importance at evaluation time: `stored_importance *
/// exp(-decay_rate * days_since_updated)`. A `decay_rate` of zero (a
/// pinned memory) leaves the stored importance unchanged regardless of
/// age.
fn importance_component(memory: &Memory, now: DateTime<Utc>) -> f32 {
    let age_days = (now - memory.updated_at).num_seconds().max(0) as f32 / 86_400.0;
    let decayed = memory.importance * (-memory.decay_rate * age_days).exp();
    decayed.clamp(0.0, 1.0)
}

fn frequency_component(memory: &Memory, cap: u64) -> f32 {
    if cap == 0 {
        return 0.0;
    }
    (memory.access_count.min(cap) as f32 / cap as f32).clamp(0.0, 1.0)
}

/// Compute the composite relevance score for `memory` against `query`.
pub fn score(
    memory: &Memory,
    query: &RelevanceQuery,
    weights: &RelevanceWeights,
    recency_horizon_days: f32,
    frequency_cap: u64,
) -> f32 {
    let semantic = semantic_component(memory, query);
    let recency = recency_component(memory, query.now, recency_horizon_days);
    let importance = importance_component(memory, query.now);
    let frequency = frequency_component(memory, frequency_cap);

    let weight_sum = weights.semantic + weights.recency + weights.importance + weights.frequency;
    let mut combined = if weight_sum > 0.0 {
        (weights.semantic * semantic
            + weights.recency * recency
            + weights.importance * importance
            + weights.frequency * frequency)
            / weight_sum
    } else {
        0.0
    };

    if let Some(session_id) = query.session_id {
        if memory.session_id.as_deref() == Some(session_id) {
            combined *= SESSION_BOOST;
        }
    }

    combined.clamp(0.0, 1.0)
}

/// Order candidates by score descending, breaking ties by more-recent
/// `updated_at` first, then by `id` for total determinism.
pub fn rank(mut scored: Vec<(Memory, f32)>) -> Vec<(Memory, f32)> {
    scored.sort_by(|(a_mem, a_score), (b_mem, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b_mem.updated_at.cmp(&a_mem.updated_at))
            .then_with(|| a_mem.id.cmp(&b_mem.id))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, MemoryId, Scope};
    use chrono::Duration;

    fn make_memory(importance: f32, access_count: u64, age_days: i64) -> Memory {
        let now = Utc::now();
        Memory {
            id: MemoryId::new(),
            text: "the quick brown fox".to_string(),
            metadata: Default::default(),
            category: Category::Context,
            embedding: None,
            session_id: None,
            importance,
            decay_rate: 0.05,
            access_count,
            created_at: now - Duration::days(age_days),
            updated_at: now - Duration::days(age_days),
            scope: Scope::Global,
        }
    }

    #[test]
    fn more_recent_memory_scores_higher_all_else_equal() {
        let now = Utc::now();
        let fresh = make_memory(0.5, 1, 0);
        let stale = make_memory(0.5, 1, 60);
        let query = RelevanceQuery {
            embedding: None,
            keywords: &[],
            session_id: None,
            now,
        };
        let weights = RelevanceWeights::default();
        let s_fresh = score(&fresh, &query, &weights, 30.0, 100);
        let s_stale = score(&stale, &query, &weights, 30.0, 100);
        assert!(s_fresh > s_stale);
    }

    #[test]
    fn session_match_boosts_score() {
        let now = Utc::now();
        let mut in_session = make_memory(0.5, 5, 1);
        in_session.session_id = Some("s1".to_string());
        let out_of_session = make_memory(0.5, 5, 1);
        let query = RelevanceQuery {
            embedding: None,
            keywords: &[],
            session_id: Some("s1"),
            now,
        };
        let weights = RelevanceWeights::default();
        let s_in = score(&in_session, &query, &weights, 30.0, 100);
        let s_out = score(&out_of_session, &query, &weights, 30.0, 100);
        assert!(s_in > s_out);
    }

    #[test]
    fn score_is_always_clamped_to_unit_interval() {
        let now = Utc::now();
        let memory = make_memory(1.0, 1000, 0);
        let query = RelevanceQuery {
            embedding: None,
            keywords: &["quick".to_string(), "fox".to_string()],
            session_id: None,
            now,
        };
        let weights = RelevanceWeights::default();
        let s = score(&memory, &query, &weights, 30.0, 100);
        assert!((0.0..=1.0).contains(&s));
    }
}
