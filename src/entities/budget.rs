// Budget Entity - monthly allocation for one category
//
// Allocation arithmetic (carryover, ready-to-assign) is not done here;
// this is the persisted row only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Primary-store identity. Empty until saved.
    #[serde(default)]
    pub id: String,

    pub category_id: String,

    /// Budget month as `YYYY-MM`
    pub month: String,

    /// Amount allocated for the month, minor units
    pub allocated: i64,
}

impl Budget {
    pub fn new(category_id: impl Into<String>, month: impl Into<String>, allocated: i64) -> Self {
        Budget {
            id: String::new(),
            category_id: category_id.into(),
            month: month.into(),
            allocated,
        }
    }
}
