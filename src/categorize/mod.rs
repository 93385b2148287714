//! Auto-categorisation heuristic.
//!
//! Classifies free-form text into one of the nine fixed categories by
//! keyword-bucket matching, falling back to `Context` when nothing
//! matches strongly. Grounded on the teacher's `intelligence::auto_tagging`
//! module (category inference from text via keyword buckets), re-derived
//! for this crate's fixed nine-category list.

use crate::types::Category;

struct Bucket {
    category: Category,
    keywords: &'static [&'static str],
}

const BUCKETS: &[Bucket] = &[
    Bucket {
        category: Category::Preference,
        keywords: &["prefer", "i like", "i don't like", "rather have", "favorite"],
    },
    Bucket {
        category: Category::Guardrail,
        keywords: &["never do", "always do", "must not", "don't ever", "forbidden", "not allowed"],
    },
    Bucket {
        category: Category::Mistake,
        keywords: &["mistake", "bug", "broke", "regression", "went wrong", "failed because"],
    },
    Bucket {
        category: Category::Personality,
        keywords: &["tone", "style of writing", "communication style", "personality", "demeanor"],
    },
    Bucket {
        category: Category::Question,
        keywords: &["?", "why does", "how do", "what is", "wondering"],
    },
    Bucket {
        category: Category::Decision,
        keywords: &["decided", "we chose", "decision", "going with", "settled on"],
    },
    Bucket {
        category: Category::Pattern,
        keywords: &["pattern", "convention", "usually structured", "typically uses", "architecture"],
    },
    Bucket {
        category: Category::SessionSummary,
        keywords: &["summary of this session", "to recap", "session summary", "in this session"],
    },
];

/// Classify `text` into the category whose keyword bucket matches most
/// strongly. Ties are broken by bucket declaration order. Text matching
/// no bucket defaults to `Context` (the catch-all project-scope category).
pub fn categorize(text: &str) -> Category {
    let lower = text.to_lowercase();
    let mut best: Option<(Category, usize)> = None;

    for bucket in BUCKETS {
        let hits = bucket.keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if hits == 0 {
            continue;
        }
        match best {
            Some((_, best_hits)) if best_hits >= hits => {}
            _ => best = Some((bucket.category, hits)),
        }
    }

    best.map(|(category, _)| category).unwrap_or(Category::Context)
}
