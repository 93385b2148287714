//! Subject inference: deciding whether a memory is about the user/agent
//! relationship (global scope) or about the current project (project
//! scope), used as a fallback when neither an explicit scope argument nor
//! the category's implied scope settles the question.
//!
//! Grounded on the teacher's `intelligence::project_context` module
//! (keyword-bucket classification of text into project-vs-personal
//! buckets).

use crate::types::Scope;

const PROJECT_KEYWORDS: &[&str] = &[
    "this repo", "this project", "the codebase", "this file", "this module",
    "the build", "the pipeline", "this service", "the api", "the schema",
];

const USER_KEYWORDS: &[&str] = &[
    "i prefer", "i like", "i don't like", "about me", "my name is", "i work",
    "i am a", "call me",
];

/// Infer which scope `text` is about. Ties (or no signal at all) resolve
/// to `Scope::Project`, the more local default.
pub fn infer_scope(text: &str) -> Scope {
    let lower = text.to_lowercase();
    let project_hits = PROJECT_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    let user_hits = USER_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();

    if user_hits > project_hits {
        Scope::Global
    } else {
        Scope::Project
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_language_infers_project_scope() {
        assert_eq!(infer_scope("In this repo, migrations live under db/migrate"), Scope::Project);
    }

    #[test]
    fn personal_language_infers_global_scope() {
        assert_eq!(infer_scope("I prefer tabs over spaces in general"), Scope::Global);
    }

    #[test]
    fn ambiguous_text_defaults_to_project() {
        assert_eq!(infer_scope("the weather is nice"), Scope::Project);
    }
}
