use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// What a device is allowed to do, derived from the workspace subscription.
/// FULL and GRACE both unlock the product; GRACE signals the client to nag
/// about the failed payment. BLOCKED locks everything but billing screens.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    Full,
    Grace,
    #[default]
    Blocked,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Full => "FULL",
            AccessMode::Grace => "GRACE",
            AccessMode::Blocked => "BLOCKED",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "FULL" => AccessMode::Full,
            "GRACE" => AccessMode::Grace,
            _ => AccessMode::Blocked,
        }
    }
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
