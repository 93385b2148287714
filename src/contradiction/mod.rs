//! Contradiction detection and compaction.
//!
//! Finds near-duplicate memories within a single store and merges them:
//! the higher-importance memory survives, access counts are summed, and
//! metadata is unioned. Grounded on the teacher's
//! `intelligence::consolidation` module (similarity-based merge with the
//! same keep-higher-importance/sum-access-count/union-metadata shape),
//! generalized from the teacher's always-available TF-IDF embeddings to
//! this crate's `none` provider, which requires a token-overlap fallback
//! the teacher never needed.

use std::collections::HashSet;

use crate::embedding::cosine_similarity;
use crate::types::Memory;

/// Default cosine-similarity threshold above which a new memory is
/// considered to contradict (or restate) an existing one on write.
pub const T_CONTRADICT: f32 = 0.75;

/// A proposed merge: `keep` survives, `absorbed` is deleted after its
/// access count and metadata are folded into `keep`.
pub struct MergePlan {
    pub keep: Memory,
    pub absorbed: Vec<Memory>,
}

/// One existing memory found to contradict a candidate embedding,
/// together with the cosine similarity that triggered the match.
pub struct Contradiction {
    pub existing: Memory,
    pub similarity: f32,
}

/// Find stored memories in `existing` whose embedding is at least
/// `threshold` cosine-similar to `candidate_embedding`, sorted by
/// similarity descending. `candidate_embedding` must be non-empty for
/// any contradiction to be found; memories with no embedding of their
/// own are skipped.
pub fn find_contradictions(candidate_embedding: &[f32], existing: &[Memory], threshold: f32) -> Vec<Contradiction> {
    if candidate_embedding.is_empty() {
        return Vec::new();
    }
    let mut hits: Vec<Contradiction> = existing
        .iter()
        .filter_map(|m| {
            let emb = m.embedding.as_ref()?;
            let cos = cosine_similarity(candidate_embedding, emb);
            let sim = (cos + 1.0) / 2.0;
            if sim >= threshold {
                Some(Contradiction {
                    existing: m.clone(),
                    similarity: sim,
                })
            } else {
                None
            }
        })
        .collect();
    hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 1)
        .map(String::from)
        .collect()
}

fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Similarity between two memories: cosine similarity on embeddings when
/// both have one, else Jaccard token overlap on raw text.
fn similarity(a: &Memory, b: &Memory) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(ea), Some(eb)) => {
            let cos = cosine_similarity(ea, eb);
            (cos + 1.0) / 2.0
        }
        _ => jaccard_similarity(&a.text, &b.text),
    }
}

fn merge_metadata(into: &mut Memory, from: &Memory) {
    for (k, v) in &from.metadata {
        into.metadata.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

/// Partition `memories` into merge plans, grouping any set of memories
/// whose pairwise similarity exceeds `threshold` under a single
/// surviving memory (the one with the highest importance; ties broken by
/// higher `access_count`, then more recent `updated_at`). Memories with
/// no near-duplicate are returned as singleton plans.
pub fn plan_compaction(memories: Vec<Memory>, threshold: f32) -> Vec<MergePlan> {
    let mut remaining: Vec<Memory> = memories;
    let mut plans = Vec::new();

    while let Some(anchor) = remaining.pop() {
        let mut group = vec![anchor];
        let mut i = 0;
        while i < remaining.len() {
            if similarity(&group[0], &remaining[i]) >= threshold {
                group.push(remaining.remove(i));
            } else {
                i += 1;
            }
        }

        if group.len() == 1 {
            let keep = group.pop().unwrap();
            plans.push(MergePlan { keep, absorbed: vec![] });
            continue;
        }

        group.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.access_count.cmp(&a.access_count))
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        let mut keep = group.remove(0);
        let absorbed = group;
        for other in &absorbed {
            keep.access_count += other.access_count;
            merge_metadata(&mut keep, other);
        }
        plans.push(MergePlan { keep, absorbed });
    }

    plans
}
