use crate::error::{ReportError, Result};
use crate::schema::{Granularity, RevenueBasis};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Jurisdiction and business rules the builders consult. Every field has a
/// default, so an empty JSON object is a valid policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReportingPolicy {
    #[schemars(description = "Revenue basis used when a request does not specify one")]
    pub default_basis: RevenueBasis,

    #[schemars(
        description = "Day of the month after the period end on which the VAT return is due (1-31, clamped to month length)"
    )]
    pub vat_filing_day: u32,

    #[schemars(
        description = "Lower bounds in days of the overdue aging buckets. Must start at 0 and be strictly increasing."
    )]
    pub aging_edges: Vec<i64>,

    #[schemars(
        description = "Relative change above which a transition is increasing (and below the negative of which it is decreasing), e.g. 0.05 for 5%"
    )]
    pub trend_threshold: Decimal,

    #[schemars(description = "Granularity used by trends and cash flow waterfalls when not requested")]
    pub default_granularity: Granularity,

    #[schemars(description = "Cash on hand before the first recorded payment or expense")]
    pub opening_cash_balance: Decimal,
}

impl Default for ReportingPolicy {
    fn default() -> Self {
        Self {
            default_basis: RevenueBasis::Accrual,
            vat_filing_day: 20,
            aging_edges: vec![0, 30, 60, 90],
            trend_threshold: Decimal::new(5, 2),
            default_granularity: Granularity::Month,
            opening_cash_balance: Decimal::ZERO,
        }
    }
}

impl ReportingPolicy {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=31).contains(&self.vat_filing_day) {
            return Err(ReportError::InvalidPolicy(format!(
                "vat_filing_day {} must be between 1 and 31",
                self.vat_filing_day
            )));
        }

        validate_aging_edges(&self.aging_edges)?;

        if self.trend_threshold.is_sign_negative() {
            return Err(ReportError::InvalidPolicy(format!(
                "trend_threshold {} must not be negative",
                self.trend_threshold
            )));
        }

        Ok(())
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&schemars::schema_for!(ReportingPolicy))
    }
}

pub fn validate_aging_edges(edges: &[i64]) -> Result<()> {
    match edges.first() {
        None => {
            return Err(ReportError::InvalidPolicy(
                "aging_edges must contain at least one edge".to_string(),
            ))
        }
        Some(&first) if first != 0 => {
            return Err(ReportError::InvalidPolicy(format!(
                "aging_edges must start at 0, got {}",
                first
            )))
        }
        Some(_) => {}
    }

    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ReportError::InvalidPolicy(format!(
            "aging_edges must be strictly increasing, got {:?}",
            edges
        )));
    }

    Ok(())
}
