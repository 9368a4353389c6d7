//! # Invoice Ledger Reports
//!
//! The reporting core of an invoicing back office: turns normalized customers,
//! products, invoices, line items, payments and expenses into period-based
//! financial statements and trend comparisons.
//!
//! ## Core Concepts
//!
//! - **Record Store**: read-only access to normalized records ([`RecordStore`]);
//!   everything a report needs is materialized into a [`RecordSet`] before any
//!   aggregation starts
//! - **Statements**: income statement (accrual or cash basis), cash flow with a
//!   per-period waterfall, AR aging and VAT summary
//! - **Trends**: per-period revenue/expense series plus month-over-month and
//!   year-over-year comparisons
//! - **Policy**: filing day, aging edges, trend threshold and default basis,
//!   loadable from JSON ([`ReportingPolicy`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use invoice_ledger_reports::*;
//! use chrono::NaiveDate;
//! use std::sync::Arc;
//!
//! let mut store = InMemoryStore::new();
//! store.add_invoice(invoice).add_payment(payment);
//!
//! let facade = ReportFacade::new(Arc::new(store), ReportingPolicy::default())?;
//! let request = ReportRequest::new(
//!     "income_statement",
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
//! );
//!
//! match facade.generate(&request) {
//!     Ok(report) => println!("{}", report.to_csv_string()?),
//!     Err(envelope) => eprintln!("{:?}: {}", envelope.kind, envelope.message),
//! }
//! ```

pub mod engine;
pub mod error;
pub mod export;
pub mod normalize;
pub mod policy;
pub mod schema;
pub mod statements;
pub mod store;
pub mod trend;
pub mod utils;

pub use engine::{
    aging_buckets, bucket_by_period, count_by, percentage_change, period_ranges, ratio,
    running_balance, sum_by, validate_range, AgingBucket, Flow, Period, PeriodBucket, Receivable,
};
pub use error::{ErrorEnvelope, ErrorKind, ReportError, Result};
pub use export::{rows_to_csv, split_path, FlatRow, Flatten, ReportOutput};
pub use normalize::{normalize_documents, EmbeddedInvoiceDocument, NormalizedRecords};
pub use policy::ReportingPolicy;
pub use schema::*;
pub use statements::{
    ArAgingReport, Breakdown, CashFlowStatement, IncomeStatement, StatementBuilder,
    StatementParams, VatPosition, VatSummary,
};
pub use store::{CancelFlag, InMemoryStore, RecordKinds, RecordQuery, RecordSet, RecordStore};
pub use trend::{
    ComparisonKind, Direction, PeriodComparison, TrendAnalyzer, TrendMetric, TrendSeries,
};

use log::{debug, info};
use std::sync::Arc;

/// Single entry point for report generation. Holds the record store and the
/// policy; cheap to clone and safe to share between threads.
#[derive(Clone)]
pub struct ReportFacade {
    store: Arc<dyn RecordStore>,
    policy: ReportingPolicy,
}

impl ReportFacade {
    pub fn new(store: Arc<dyn RecordStore>, policy: ReportingPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { store, policy })
    }

    pub fn with_default_policy(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            policy: ReportingPolicy::default(),
        }
    }

    pub fn policy(&self) -> &ReportingPolicy {
        &self.policy
    }

    pub fn generate(&self, request: &ReportRequest) -> std::result::Result<ReportOutput, ErrorEnvelope> {
        self.generate_with_cancel(request, &CancelFlag::new())
    }

    pub fn generate_with_cancel(
        &self,
        request: &ReportRequest,
        cancel: &CancelFlag,
    ) -> std::result::Result<ReportOutput, ErrorEnvelope> {
        self.try_generate(request, cancel).map_err(|e| {
            debug!("Report {} failed: {}", request.report_type, e);
            ErrorEnvelope::from(e)
        })
    }

    fn try_generate(&self, request: &ReportRequest, cancel: &CancelFlag) -> Result<ReportOutput> {
        let report_type: ReportType = request.report_type.parse()?;
        let range = request.range()?;

        let params = StatementParams {
            start: range.start,
            end: range.end,
            filters: request.filters.clone(),
            basis: request.basis.unwrap_or(self.policy.default_basis),
            granularity: request.granularity.unwrap_or(self.policy.default_granularity),
            as_of: request.as_of(),
        };

        info!("Generating {} report for {}", report_type, range);

        let window = record_window(report_type, &params);
        let records = RecordSet::load_only(
            self.store.as_ref(),
            &window,
            &params.filters,
            record_kinds(report_type),
            cancel,
        )?;

        if records.is_empty() {
            debug!("No records in {} for {}; reporting zeros", window, report_type);
        }
        debug!(
            "Dispatching {} ({:?} basis, {:?} granularity) over {}",
            report_type, params.basis, params.granularity, window
        );

        let builder = StatementBuilder::new(&self.policy);
        let output = match report_type {
            ReportType::IncomeStatement => {
                ReportOutput::IncomeStatement(builder.income_statement(&records, &params)?)
            }
            ReportType::CashFlow => ReportOutput::CashFlow(builder.cash_flow(&records, &params)?),
            ReportType::ArAging => ReportOutput::ArAging(builder.ar_aging(&records, &params)?),
            ReportType::VatSummary => ReportOutput::VatSummary(builder.vat_summary(&records, &params)?),
            ReportType::TrendRevenue => {
                ReportOutput::TrendRevenue(TrendAnalyzer::new(builder).revenue_trend(&records, &params)?)
            }
            ReportType::TrendExpense => {
                ReportOutput::TrendExpense(TrendAnalyzer::new(builder).expense_trend(&records, &params)?)
            }
            ReportType::ComparisonMom => {
                ReportOutput::ComparisonMom(TrendAnalyzer::new(builder).month_over_month(&records, &params)?)
            }
            ReportType::ComparisonYoy => {
                ReportOutput::ComparisonYoy(TrendAnalyzer::new(builder).year_over_year(&records, &params)?)
            }
        };

        Ok(output)
    }
}

/// Dates whose records a report reads. Cash flow and aging need history back to
/// the first record; comparisons need both compared months.
pub fn record_window(report_type: ReportType, params: &StatementParams) -> DateRange {
    match report_type {
        ReportType::IncomeStatement
        | ReportType::VatSummary
        | ReportType::TrendRevenue
        | ReportType::TrendExpense => DateRange {
            start: params.start,
            end: params.end,
        },
        ReportType::CashFlow => DateRange::until(params.end),
        ReportType::ArAging => DateRange::until(params.as_of),
        ReportType::ComparisonMom => ComparisonKind::MonthOverMonth.record_window(params.end),
        ReportType::ComparisonYoy => ComparisonKind::YearOverYear.record_window(params.end),
    }
}

/// Record collections each builder reads. Cash flow works from payments and
/// expenses alone; aging never looks at line items or expenses.
pub fn record_kinds(report_type: ReportType) -> RecordKinds {
    match report_type {
        ReportType::CashFlow => RecordKinds {
            payments: true,
            expenses: true,
            ..RecordKinds::NONE
        },
        ReportType::ArAging => RecordKinds {
            invoices: true,
            payments: true,
            ..RecordKinds::NONE
        },
        ReportType::VatSummary => RecordKinds {
            payments: false,
            ..RecordKinds::ALL
        },
        ReportType::IncomeStatement
        | ReportType::TrendRevenue
        | ReportType::TrendExpense
        | ReportType::ComparisonMom
        | ReportType::ComparisonYoy => RecordKinds::ALL,
    }
}

/// Generates a report with the default policy.
pub fn generate_report(
    store: Arc<dyn RecordStore>,
    request: &ReportRequest,
) -> std::result::Result<ReportOutput, ErrorEnvelope> {
    ReportFacade::with_default_policy(store).generate(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store_with_one_invoice() -> Arc<dyn RecordStore> {
        let mut store = InMemoryStore::new();
        store
            .add_customer(Customer {
                id: "cus-1".to_string(),
                name: "Acme".to_string(),
                email: None,
                phone: None,
                status: CustomerStatus::Active,
            })
            .add_invoice(Invoice {
                id: "inv-1".to_string(),
                number: "INV-0001".to_string(),
                customer_id: "cus-1".to_string(),
                issue_date: d(2024, 1, 10),
                due_date: d(2024, 2, 9),
                paid_date: None,
                subtotal: dec!(1000),
                tax_total: dec!(160),
                discount_total: Decimal::ZERO,
                total: dec!(1160),
                amount_paid: Decimal::ZERO,
                status: InvoiceStatus::Pending,
            });
        Arc::new(store)
    }

    #[test]
    fn test_dispatches_by_report_type() {
        let facade = ReportFacade::with_default_policy(store_with_one_invoice());
        for report_type in ReportType::all() {
            let request = ReportRequest::new(report_type.as_str(), d(2024, 1, 1), d(2024, 1, 31));
            let output = facade.generate(&request).unwrap();
            assert_eq!(output.report_type(), *report_type);
        }
    }

    #[test]
    fn test_unknown_report_type() {
        let facade = ReportFacade::with_default_policy(store_with_one_invoice());
        let request = ReportRequest::new("balance_sheet", d(2024, 1, 1), d(2024, 1, 31));
        let envelope = facade.generate(&request).unwrap_err();
        assert_eq!(envelope.kind, ErrorKind::UnknownReportType);
        assert!(envelope.message.contains("balance_sheet"));
    }

    #[test]
    fn test_inverted_range_is_rejected_before_loading() {
        let facade = ReportFacade::with_default_policy(store_with_one_invoice());
        let request = ReportRequest::new("income_statement", d(2024, 2, 1), d(2024, 1, 1));
        assert_eq!(facade.generate(&request).unwrap_err().kind, ErrorKind::InvalidRange);
    }

    #[test]
    fn test_missing_filter_reference() {
        let facade = ReportFacade::with_default_policy(store_with_one_invoice());
        let mut request = ReportRequest::new("ar_aging", d(2024, 1, 1), d(2024, 1, 31));
        request.filters.invoice_id = Some("inv-404".to_string());
        assert_eq!(facade.generate(&request).unwrap_err().kind, ErrorKind::MissingReference);
    }

    #[test]
    fn test_cancelled_request() {
        let facade = ReportFacade::with_default_policy(store_with_one_invoice());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let request = ReportRequest::new("cash_flow", d(2024, 1, 1), d(2024, 1, 31));
        let envelope = facade.generate_with_cancel(&request, &cancel).unwrap_err();
        assert_eq!(envelope.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_policy_basis_applies_when_request_is_silent() {
        let policy = ReportingPolicy {
            default_basis: RevenueBasis::Cash,
            ..ReportingPolicy::default()
        };
        let facade = ReportFacade::new(store_with_one_invoice(), policy).unwrap();
        let request = ReportRequest::new("income_statement", d(2024, 1, 1), d(2024, 1, 31));
        match facade.generate(&request).unwrap() {
            ReportOutput::IncomeStatement(statement) => {
                assert_eq!(statement.basis, RevenueBasis::Cash);
                assert_eq!(statement.revenue, Decimal::ZERO);
            }
            other => panic!("unexpected output {:?}", other.report_type()),
        }
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let policy = ReportingPolicy {
            aging_edges: vec![10, 5],
            ..ReportingPolicy::default()
        };
        assert!(matches!(
            ReportFacade::new(store_with_one_invoice(), policy),
            Err(ReportError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_history_reports_skip_unused_collections() {
        let cash_flow = record_kinds(ReportType::CashFlow);
        assert!(!cash_flow.invoices && !cash_flow.line_items);
        assert!(cash_flow.payments && cash_flow.expenses);

        let aging = record_kinds(ReportType::ArAging);
        assert!(aging.invoices && aging.payments);
        assert!(!aging.line_items && !aging.expenses);

        assert!(!record_kinds(ReportType::VatSummary).payments);
        assert_eq!(record_kinds(ReportType::IncomeStatement), RecordKinds::ALL);
    }

    #[test]
    fn test_cash_flow_through_facade_ignores_invoices() {
        let facade = ReportFacade::with_default_policy(store_with_one_invoice());
        let request = ReportRequest::new("cash_flow", d(2024, 1, 1), d(2024, 1, 31));
        match facade.generate(&request).unwrap() {
            ReportOutput::CashFlow(statement) => {
                assert_eq!(statement.inflows, Decimal::ZERO);
                assert_eq!(statement.closing_balance, facade.policy().opening_cash_balance);
            }
            other => panic!("unexpected output {:?}", other.report_type()),
        }
    }

    #[test]
    fn test_record_windows() {
        let params = StatementParams::new(d(2024, 3, 1), d(2024, 3, 31)).with_as_of(d(2024, 4, 15));
        assert_eq!(record_window(ReportType::CashFlow, &params).end, d(2024, 3, 31));
        assert_eq!(record_window(ReportType::ArAging, &params).end, d(2024, 4, 15));
        assert_eq!(record_window(ReportType::ComparisonMom, &params).start, d(2024, 2, 1));
        assert_eq!(record_window(ReportType::ComparisonYoy, &params).start, d(2023, 3, 1));
        assert_eq!(record_window(ReportType::VatSummary, &params).start, d(2024, 3, 1));
    }
}
