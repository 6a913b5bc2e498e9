use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Annual,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "MONTHLY",
            BillingCycle::Annual => "ANNUAL",
        }
    }

    pub fn try_from_str(value: &str) -> Option<Self> {
        match value {
            "MONTHLY" => Some(BillingCycle::Monthly),
            "ANNUAL" => Some(BillingCycle::Annual),
            _ => None,
        }
    }

    pub fn months(&self) -> i64 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Annual => 12,
        }
    }

    /// Nominal period length used by invoice proration, 30 days per month.
    pub fn total_days(&self) -> i64 {
        self.months() * 30
    }
}

impl Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
