// Categorization Rule Entity - description pattern → category
//
// Rules are evaluated by the categorization process; the ingestion engine
// only persists them and bumps their hit counter.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Primary-store identity. Empty until saved.
    #[serde(default)]
    pub id: String,

    /// Case-insensitive substring matched against the description
    pub pattern: String,

    pub category_id: String,

    /// Higher priority rules are evaluated first
    #[serde(default)]
    pub priority: i32,

    /// How many transactions this rule has categorized
    #[serde(default)]
    pub match_count: i64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(pattern: impl Into<String>, category_id: impl Into<String>, priority: i32) -> Self {
        Rule {
            id: String::new(),
            pattern: pattern.into(),
            category_id: category_id.into(),
            priority,
            match_count: 0,
            enabled: true,
        }
    }
}
