use thiserror::Error;

use crate::domain::value_objects::enums::billing_cycles::BillingCycle;

/// Store product identifiers follow `<namespace>.<plan>.<cycle>`, with `_`
/// accepted as the delimiter for stores that forbid dots. The plan token maps
/// to an upper-cased plan code; the cycle token must be `monthly`, `annual`
/// or `yearly`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProductIdError {
    #[error("malformed product id: {0}")]
    Malformed(String),
    #[error("unknown billing cycle token: {0}")]
    UnknownCycle(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProductId {
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
}

pub fn parse_product_id(product_id: &str) -> Result<ParsedProductId, ProductIdError> {
    let delimiter = if product_id.contains('.') { '.' } else { '_' };
    let segments: Vec<&str> = product_id.split(delimiter).collect();
    if segments.len() < 3 {
        return Err(ProductIdError::Malformed(product_id.to_string()));
    }

    let cycle_token = segments[segments.len() - 1].to_ascii_lowercase();
    let plan_token = segments[segments.len() - 2];
    if plan_token.is_empty() {
        return Err(ProductIdError::Malformed(product_id.to_string()));
    }

    let billing_cycle = match cycle_token.as_str() {
        "monthly" => BillingCycle::Monthly,
        "annual" | "yearly" => BillingCycle::Annual,
        _ => return Err(ProductIdError::UnknownCycle(cycle_token)),
    };

    Ok(ParsedProductId {
        plan_code: plan_token.to_ascii_uppercase(),
        billing_cycle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dot_delimited_product_id() {
        let parsed = parse_product_id("com.subledger.pro.monthly").unwrap();
        assert_eq!(parsed.plan_code, "PRO");
        assert_eq!(parsed.billing_cycle, BillingCycle::Monthly);
    }

    #[test]
    fn parses_underscore_delimited_product_id() {
        let parsed = parse_product_id("subledger_standard_yearly").unwrap();
        assert_eq!(parsed.plan_code, "STANDARD");
        assert_eq!(parsed.billing_cycle, BillingCycle::Annual);
    }

    #[test]
    fn rejects_too_few_segments() {
        let err = parse_product_id("pro.monthly").unwrap_err();
        assert!(matches!(err, ProductIdError::Malformed(_)));
    }

    #[test]
    fn rejects_unknown_cycle_token() {
        let err = parse_product_id("com.subledger.pro.weekly").unwrap_err();
        assert_eq!(err, ProductIdError::UnknownCycle("weekly".to_string()));
    }
}
