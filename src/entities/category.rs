// Category Entity - spending/income buckets transactions are filed under
//
// Only persistence lives here; category assignment happens elsewhere.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Primary-store identity. Empty until saved.
    #[serde(default)]
    pub id: String,

    /// Display name (e.g., "Groceries")
    pub name: String,

    /// Group the category is listed under (e.g., "Everyday")
    pub group_name: String,

    #[serde(default)]
    pub archived: bool,
}

impl Category {
    pub fn new(name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Category {
            id: String::new(),
            name: name.into(),
            group_name: group_name.into(),
            archived: false,
        }
    }
}
