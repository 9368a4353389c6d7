use crate::error::{ReportError, Result};
use crate::utils::{parse_period_string, round_money};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Customer {
    pub id: String,
    #[schemars(description = "Display name shown on invoices and in report breakdowns")]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: CustomerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub unit_price: Decimal,
    #[schemars(description = "Tax rate as a fraction, e.g. 0.16 for 16% VAT")]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub category: Option<String>,
}

/// Catalog details frozen on a line item at sale time, so later catalog edits do
/// not rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ProductSnapshot {
    pub name: String,
    pub unit_price: Decimal,
    #[serde(default)]
    pub category: Option<String>,
}

impl From<&Product> for ProductSnapshot {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            unit_price: product.unit_price,
            category: product.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Paid,
    PartiallyPaid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::PartiallyPaid => "partially_paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    /// Drafts were never issued and cancelled invoices were voided; neither
    /// counts toward revenue, tax or receivables.
    pub fn is_revenue_bearing(&self) -> bool {
        !matches!(self, Self::Draft | Self::Cancelled)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub number: String,
    pub customer_id: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub paid_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    #[serde(default)]
    pub discount_total: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub amount_paid: Decimal,
    pub status: InvoiceStatus,
}

impl Invoice {
    pub fn check_invariants(&self) -> Result<()> {
        let expected = self.subtotal + self.tax_total - self.discount_total;
        if self.total != expected {
            return Err(ReportError::InvariantViolation {
                entity: "invoice",
                id: self.id.clone(),
                details: format!(
                    "total {} != subtotal {} + tax {} - discount {}",
                    self.total, self.subtotal, self.tax_total, self.discount_total
                ),
            });
        }

        if self.status == InvoiceStatus::Paid && self.amount_paid < self.total {
            return Err(ReportError::InvariantViolation {
                entity: "invoice",
                id: self.id.clone(),
                details: format!(
                    "marked paid but amount_paid {} is below total {}",
                    self.amount_paid, self.total
                ),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct InvoiceLineItem {
    pub id: String,
    pub invoice_id: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub snapshot: Option<ProductSnapshot>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    #[schemars(description = "Tax-inclusive total: quantity * unit_price plus tax rounded to cents")]
    pub line_total: Decimal,
}

impl InvoiceLineItem {
    /// Builds a line item whose `line_total` follows the tax-inclusive convention.
    pub fn compute(
        id: impl Into<String>,
        invoice_id: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
    ) -> Self {
        let mut item = Self {
            id: id.into(),
            invoice_id: invoice_id.into(),
            product_id: None,
            snapshot: None,
            quantity,
            unit_price,
            tax_rate,
            line_total: Decimal::ZERO,
        };
        item.line_total = item.net_amount() + item.tax_amount();
        item
    }

    pub fn with_product(mut self, product: &Product) -> Self {
        self.product_id = Some(product.id.clone());
        self.snapshot = Some(ProductSnapshot::from(product));
        self
    }

    pub fn net_amount(&self) -> Decimal {
        round_money(self.quantity * self.unit_price)
    }

    pub fn tax_amount(&self) -> Decimal {
        round_money(self.net_amount() * self.tax_rate)
    }

    pub fn category(&self) -> Option<&str> {
        self.snapshot.as_ref().and_then(|s| s.category.as_deref())
    }

    pub fn check_invariants(&self) -> Result<()> {
        let expected = self.net_amount() + self.tax_amount();
        if self.line_total != expected {
            return Err(ReportError::InvariantViolation {
                entity: "invoice_line_item",
                id: self.id.clone(),
                details: format!("line_total {} != expected {}", self.line_total, expected),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mpesa,
    Card,
    BankTransfer,
    Cash,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mpesa => "mpesa",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Cash => "cash",
            Self::Cheque => "cheque",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Failed,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Payment {
    pub id: String,
    #[serde(default)]
    #[schemars(description = "Invoice this payment settles; absent for stand-alone payments")]
    pub invoice_id: Option<String>,
    pub customer_id: String,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_ref: Option<String>,
    pub paid_at: NaiveDateTime,
}

fn default_currency() -> String {
    "KES".to_string()
}

impl Payment {
    pub fn date(&self) -> NaiveDate {
        self.paid_at.date()
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Money leaving the business: operating expenses and taxable purchases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Expense {
    pub id: String,
    pub date: NaiveDate,
    pub category: String,
    #[schemars(description = "Net amount before input tax")]
    pub amount: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub tax_amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

impl Expense {
    pub fn gross(&self) -> Decimal {
        self.amount + self.tax_amount
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(ReportError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Everything up to and including `end`.
    pub fn until(end: NaiveDate) -> Self {
        Self {
            start: NaiveDate::MIN,
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    #[default]
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RevenueBasis {
    #[schemars(description = "Revenue recognized when invoiced, regardless of payment timing")]
    #[default]
    Accrual,
    #[schemars(description = "Revenue recognized when payment is received")]
    Cash,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    IncomeStatement,
    CashFlow,
    ArAging,
    VatSummary,
    TrendRevenue,
    TrendExpense,
    ComparisonMom,
    ComparisonYoy,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncomeStatement => "income_statement",
            Self::CashFlow => "cash_flow",
            Self::ArAging => "ar_aging",
            Self::VatSummary => "vat_summary",
            Self::TrendRevenue => "trend_revenue",
            Self::TrendExpense => "trend_expense",
            Self::ComparisonMom => "comparison_mom",
            Self::ComparisonYoy => "comparison_yoy",
        }
    }

    pub fn all() -> &'static [ReportType] {
        &[
            Self::IncomeStatement,
            Self::CashFlow,
            Self::ArAging,
            Self::VatSummary,
            Self::TrendRevenue,
            Self::TrendExpense,
            Self::ComparisonMom,
            Self::ComparisonYoy,
        ]
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ReportError::UnknownReportType(s.to_string()))
    }
}

/// Optional entity filters applied on top of the date range.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ReportFilters {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub invoice_id: Option<String>,
}

impl ReportFilters {
    pub fn matches_customer(&self, customer_id: &str) -> bool {
        self.customer_id
            .as_deref()
            .map_or(true, |wanted| wanted == customer_id)
    }

    pub fn matches_invoice(&self, invoice_id: &str) -> bool {
        self.invoice_id
            .as_deref()
            .map_or(true, |wanted| wanted == invoice_id)
    }
}

/// Parameters an HTTP handler passes straight through to the report facade.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportRequest {
    #[schemars(
        description = "One of income_statement, cash_flow, ar_aging, vat_summary, trend_revenue, trend_expense, comparison_mom, comparison_yoy"
    )]
    pub report_type: String,

    #[schemars(description = "First day of the reporting window (YYYY-MM-DD, inclusive)")]
    pub start_date: NaiveDate,

    #[schemars(description = "Last day of the reporting window (YYYY-MM-DD, inclusive)")]
    pub end_date: NaiveDate,

    #[serde(flatten)]
    pub filters: ReportFilters,

    #[serde(default)]
    #[schemars(description = "Period size for trends and cash flow waterfalls. Defaults to month.")]
    pub granularity: Option<Granularity>,

    #[serde(default)]
    #[schemars(description = "Revenue recognition basis. Defaults to the policy basis (accrual).")]
    pub basis: Option<RevenueBasis>,

    #[serde(default)]
    #[schemars(
        description = "Reference date for AR aging and VAT filing status. Defaults to end_date."
    )]
    pub as_of: Option<NaiveDate>,
}

impl ReportRequest {
    pub fn new(report_type: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            report_type: report_type.into(),
            start_date,
            end_date,
            filters: ReportFilters::default(),
            granularity: None,
            basis: None,
            as_of: None,
        }
    }

    /// Builds a request over whole months, e.g. `"2024-01"` or `"2024-01:2024-03"`.
    pub fn for_period(report_type: impl Into<String>, period: &str) -> Result<Self> {
        let range = parse_period_string(period)?;
        Ok(Self::new(report_type, range.start, range.end))
    }

    pub fn range(&self) -> Result<DateRange> {
        DateRange::new(self.start_date, self.end_date)
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or(self.end_date)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportRequest)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_invoice() -> Invoice {
        Invoice {
            id: "inv-1".to_string(),
            number: "INV-0001".to_string(),
            customer_id: "cus-1".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 2, 4).unwrap(),
            paid_date: None,
            subtotal: dec!(1000.00),
            tax_total: dec!(160.00),
            discount_total: dec!(50.00),
            total: dec!(1110.00),
            amount_paid: Decimal::ZERO,
            status: InvoiceStatus::Pending,
        }
    }

    #[test]
    fn test_line_item_convention_is_tax_inclusive() {
        let item = InvoiceLineItem::compute("li-1", "inv-1", dec!(3), dec!(33.33), dec!(0.16));
        assert_eq!(item.net_amount(), dec!(99.99));
        assert_eq!(item.tax_amount(), dec!(16.00));
        assert_eq!(item.line_total, dec!(115.99));
        assert!(item.check_invariants().is_ok());

        let mut tampered = item.clone();
        tampered.line_total = dec!(99.99);
        assert!(tampered.check_invariants().is_err());
    }

    #[test]
    fn test_invoice_invariants() {
        let invoice = sample_invoice();
        assert!(invoice.check_invariants().is_ok());

        let mut wrong_total = invoice.clone();
        wrong_total.total = dec!(1160.00);
        assert!(matches!(
            wrong_total.check_invariants(),
            Err(ReportError::InvariantViolation { .. })
        ));

        let mut underpaid = invoice;
        underpaid.status = InvoiceStatus::Paid;
        underpaid.amount_paid = dec!(1000.00);
        assert!(underpaid.check_invariants().is_err());
    }

    #[test]
    fn test_report_type_parsing() {
        assert_eq!(
            "income_statement".parse::<ReportType>().unwrap(),
            ReportType::IncomeStatement
        );
        assert_eq!(" COMPARISON_YOY ".parse::<ReportType>().unwrap(), ReportType::ComparisonYoy);
        assert!(matches!(
            "balance_sheet".parse::<ReportType>(),
            Err(ReportError::UnknownReportType(_))
        ));
    }

    #[test]
    fn test_date_range_rejects_inverted_bounds() {
        let jan = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let feb = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(DateRange::new(jan, feb).is_ok());
        assert!(DateRange::new(jan, jan).is_ok());
        assert!(matches!(
            DateRange::new(feb, jan),
            Err(ReportError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_request_deserializes_flattened_filters() {
        let json = r#"{
            "report_type": "ar_aging",
            "start_date": "2024-01-01",
            "end_date": "2024-01-31",
            "customer_id": "cus-7",
            "granularity": "quarter"
        }"#;
        let request: ReportRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.filters.customer_id.as_deref(), Some("cus-7"));
        assert_eq!(request.granularity, Some(Granularity::Quarter));
        assert_eq!(request.as_of(), request.end_date);
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = ReportRequest::schema_as_json().unwrap();
        assert!(schema_json.contains("report_type"));
        assert!(schema_json.contains("start_date"));
        assert!(schema_json.contains("granularity"));
    }
}
