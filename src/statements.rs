use crate::engine::{
    aging_buckets, count_by, percentage_shares, period_ranges, ratio, running_balance, sum_by,
    validate_range, AgingBucket, Flow, Receivable,
};
use crate::error::Result;
use crate::policy::ReportingPolicy;
use crate::schema::{
    DateRange, Expense, Granularity, Invoice, InvoiceLineItem, InvoiceStatus, Payment,
    ReportFilters, RevenueBasis,
};
use crate::store::RecordSet;
use crate::utils::{day_before, filing_deadline, rate_label};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const UNCATEGORIZED: &str = "uncategorized";
pub const UNSPECIFIED_RATE: &str = "unspecified";

/// Inputs shared by every builder besides the records themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub filters: ReportFilters,
    pub basis: RevenueBasis,
    pub granularity: Granularity,
    pub as_of: NaiveDate,
}

impl StatementParams {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            filters: ReportFilters::default(),
            basis: RevenueBasis::default(),
            granularity: Granularity::default(),
            as_of: end,
        }
    }

    pub fn with_filters(mut self, filters: ReportFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_basis(mut self, basis: RevenueBasis) -> Self {
        self.basis = basis;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    /// Same parameters narrowed to another range; `as_of` follows the range end.
    pub fn for_range(&self, range: &DateRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
            as_of: range.end,
            ..self.clone()
        }
    }

    fn range(&self) -> Result<DateRange> {
        validate_range(self.start, self.end)
    }
}

/// Amounts and record counts grouped by label. `total` is always the sum of
/// `amounts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Breakdown {
    pub amounts: BTreeMap<String, Decimal>,
    pub counts: BTreeMap<String, u64>,
    pub total: Decimal,
}

impl Breakdown {
    pub fn from_records<T, KF, VF>(records: &[T], key_fn: KF, value_fn: VF) -> Self
    where
        KF: Fn(&T) -> String,
        VF: Fn(&T) -> Decimal,
    {
        let amounts = sum_by(records, &key_fn, value_fn);
        let counts = count_by(records, &key_fn);
        let total = amounts.values().copied().sum();
        Self {
            amounts,
            counts,
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IncomeStatement {
    pub period: DateRange,
    pub basis: RevenueBasis,
    pub revenue: Decimal,
    pub expenses: Decimal,
    pub net_income: Decimal,
    /// `net_income / revenue`; `None` when there is no revenue.
    pub margin: Option<Decimal>,
    /// By customer on accrual basis, by payment method on cash basis.
    pub revenue_breakdown: Breakdown,
    pub invoices_by_status: BTreeMap<String, u64>,
    pub expenses_by_category: Breakdown,
    /// Net line amounts by product category (accrual basis only).
    pub net_sales_by_category: Breakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CashFlowPeriod {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub opening_balance: Decimal,
    pub inflows: Decimal,
    pub outflows: Decimal,
    pub closing_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BalancePoint {
    pub date: NaiveDate,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CashFlowStatement {
    pub period: DateRange,
    pub opening_balance: Decimal,
    pub inflows: Decimal,
    pub outflows: Decimal,
    pub net_cash_flow: Decimal,
    pub closing_balance: Decimal,
    pub inflows_by_method: Breakdown,
    pub outflows_by_category: Breakdown,
    pub periods: Vec<CashFlowPeriod>,
    /// Balance at the end of every day with movement.
    pub daily_balances: Vec<BalancePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgingLine {
    #[serde(flatten)]
    pub bucket: AgingBucket,
    pub percentage: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArAgingReport {
    pub as_of: NaiveDate,
    pub total_outstanding: Decimal,
    pub invoice_count: u64,
    pub buckets: Vec<AgingLine>,
    pub outstanding_by_customer: Breakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VatPosition {
    Payable,
    Reclaimable,
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    OnTime,
    Late,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FilingCompliance {
    pub deadline: NaiveDate,
    pub as_of: NaiveDate,
    /// Negative once the deadline has passed.
    pub days_until_deadline: i64,
    pub status: FilingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VatSummary {
    pub period: DateRange,
    pub taxable_sales: Decimal,
    pub taxable_purchases: Decimal,
    pub output_vat: Decimal,
    pub input_vat: Decimal,
    /// Output minus input; positive is payable, negative reclaimable.
    pub net_vat: Decimal,
    pub position: VatPosition,
    pub output_by_rate: Breakdown,
    pub input_by_rate: Breakdown,
    pub filing: FilingCompliance,
}

/// A single cash movement used for balances and waterfalls.
#[derive(Debug, Clone, PartialEq)]
struct CashMovement {
    date: NaiveDate,
    amount: Decimal,
    flow: Flow,
}

pub struct StatementBuilder<'a> {
    policy: &'a ReportingPolicy,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(policy: &'a ReportingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReportingPolicy {
        self.policy
    }

    pub fn income_statement(
        &self,
        records: &RecordSet,
        params: &StatementParams,
    ) -> Result<IncomeStatement> {
        let range = params.range()?;

        let invoices = revenue_invoices(records, &range, &params.filters);
        let invoices_by_status = count_by(&invoices, |i| i.status.to_string());

        let (revenue_breakdown, net_sales_by_category) = match params.basis {
            RevenueBasis::Accrual => {
                let by_customer =
                    Breakdown::from_records(&invoices, |i| i.customer_id.clone(), |i| i.total);
                let lines = lines_of(records, &invoices);
                let by_category = Breakdown::from_records(
                    &lines,
                    |li| li.category().unwrap_or(UNCATEGORIZED).to_string(),
                    |li| li.net_amount(),
                );
                (by_customer, by_category)
            }
            RevenueBasis::Cash => {
                let payments = received_payments(records, &range, &params.filters);
                let by_method =
                    Breakdown::from_records(&payments, |p| p.method.to_string(), |p| p.amount);
                (by_method, Breakdown::default())
            }
        };

        let expenses = expenses_in(records, &range);
        let expenses_by_category =
            Breakdown::from_records(&expenses, |e| e.category.clone(), |e| e.amount);

        let revenue = revenue_breakdown.total;
        let expense_total = expenses_by_category.total;
        let net_income = revenue - expense_total;

        debug!(
            "Income statement {} ({:?}): revenue {}, expenses {}",
            range, params.basis, revenue, expense_total
        );

        Ok(IncomeStatement {
            period: range,
            basis: params.basis,
            revenue,
            expenses: expense_total,
            net_income,
            margin: ratio(net_income, revenue),
            revenue_breakdown,
            invoices_by_status,
            expenses_by_category,
            net_sales_by_category,
        })
    }

    /// Records must reach back to the beginning of history (at least everything
    /// up to `params.end`) for the opening balance to be meaningful.
    pub fn cash_flow(&self, records: &RecordSet, params: &StatementParams) -> Result<CashFlowStatement> {
        let range = params.range()?;

        let movements = cash_movements(records, &params.filters);
        let opening_balance = match day_before(range.start) {
            Some(last_day) => self.policy.opening_cash_balance + net_movement(&movements, &DateRange::until(last_day)),
            None => self.policy.opening_cash_balance,
        };

        let payments = received_payments(records, &range, &params.filters);
        let inflows_by_method = Breakdown::from_records(&payments, |p| p.method.to_string(), |p| p.amount);
        let expenses = expenses_in(records, &range);
        let outflows_by_category = Breakdown::from_records(&expenses, |e| e.category.clone(), |e| e.gross());

        let inflows = inflows_by_method.total;
        let outflows = outflows_by_category.total;
        let net_cash_flow = inflows - outflows;

        let mut periods = Vec::new();
        let mut running = opening_balance;
        for (period, span) in period_ranges(&range, params.granularity)? {
            let (period_in, period_out) = flow_totals(&movements, &span);
            let closing = running + period_in - period_out;
            periods.push(CashFlowPeriod {
                label: period.label(),
                start: span.start,
                end: span.end,
                opening_balance: running,
                inflows: period_in,
                outflows: period_out,
                closing_balance: closing,
            });
            running = closing;
        }

        let mut in_range: Vec<CashMovement> = movements
            .into_iter()
            .filter(|m| range.contains(m.date))
            .collect();
        in_range.sort_by_key(|m| m.date);
        let balances = running_balance(&in_range, |m| m.date, |m| m.amount, |m| m.flow);
        let mut daily_balances: Vec<BalancePoint> = Vec::new();
        for (movement, balance) in in_range.iter().zip(balances) {
            let balance = opening_balance + balance;
            match daily_balances.last_mut() {
                Some(point) if point.date == movement.date => point.balance = balance,
                _ => daily_balances.push(BalancePoint {
                    date: movement.date,
                    balance,
                }),
            }
        }

        Ok(CashFlowStatement {
            period: range,
            opening_balance,
            inflows,
            outflows,
            net_cash_flow,
            closing_balance: opening_balance + net_cash_flow,
            inflows_by_method,
            outflows_by_category,
            periods,
            daily_balances,
        })
    }

    /// Ages balances still open on `params.as_of`. Records must include every
    /// invoice issued and payment made up to that date.
    pub fn ar_aging(&self, records: &RecordSet, params: &StatementParams) -> Result<ArAgingReport> {
        params.range()?;
        let as_of = params.as_of;

        let mut applied: HashMap<&str, Decimal> = HashMap::new();
        for payment in &records.payments {
            if !payment.is_completed() || payment.date() > as_of {
                continue;
            }
            if let Some(invoice_id) = payment.invoice_id.as_deref() {
                *applied.entry(invoice_id).or_insert(Decimal::ZERO) += payment.amount;
            }
        }

        let receivables: Vec<Receivable> = records
            .invoices
            .iter()
            .filter(|i| {
                i.status.is_revenue_bearing()
                    && i.issue_date <= as_of
                    && params.filters.matches_customer(&i.customer_id)
                    && params.filters.matches_invoice(&i.id)
            })
            .filter_map(|invoice| {
                let settled = settled_amount(invoice, applied.get(invoice.id.as_str()).copied(), as_of);
                let outstanding = invoice.total - settled;
                (outstanding > Decimal::ZERO).then(|| Receivable {
                    invoice_id: invoice.id.clone(),
                    customer_id: invoice.customer_id.clone(),
                    due_date: invoice.due_date,
                    outstanding,
                })
            })
            .collect();

        let buckets = aging_buckets(&receivables, as_of, &self.policy.aging_edges)?;
        let total_outstanding: Decimal = buckets.iter().map(|b| b.amount).sum();
        let outstanding_by_customer =
            Breakdown::from_records(&receivables, |r| r.customer_id.clone(), |r| r.outstanding);

        let amounts: Vec<Decimal> = buckets.iter().map(|b| b.amount).collect();
        let buckets = buckets
            .into_iter()
            .zip(percentage_shares(&amounts))
            .map(|(bucket, percentage)| AgingLine { bucket, percentage })
            .collect();

        Ok(ArAgingReport {
            as_of,
            total_outstanding,
            invoice_count: receivables.len() as u64,
            buckets,
            outstanding_by_customer,
        })
    }

    pub fn vat_summary(&self, records: &RecordSet, params: &StatementParams) -> Result<VatSummary> {
        let range = params.range()?;

        let invoices = revenue_invoices(records, &range, &params.filters);
        let lines = lines_of(records, &invoices);

        // Legacy invoices without line items still carry a tax total.
        let itemized: HashSet<&str> =
            lines.iter().map(|li| li.invoice_id.as_str()).collect();
        let mut sales: Vec<(String, Decimal, Decimal)> = lines
            .iter()
            .map(|li| (rate_label(li.tax_rate), li.net_amount(), li.tax_amount()))
            .collect();
        sales.extend(
            invoices
                .iter()
                .filter(|i| !itemized.contains(i.id.as_str()))
                .map(|i| (UNSPECIFIED_RATE.to_string(), i.subtotal, i.tax_total)),
        );

        let purchases: Vec<&Expense> = expenses_in(records, &range)
            .into_iter()
            .filter(|e| !e.tax_rate.is_zero() || !e.tax_amount.is_zero())
            .collect();

        let output_by_rate = Breakdown::from_records(&sales, |s| s.0.clone(), |s| s.2);
        let input_by_rate =
            Breakdown::from_records(&purchases, |e| rate_label(e.tax_rate), |e| e.tax_amount);

        let output_vat = output_by_rate.total;
        let input_vat = input_by_rate.total;
        let net_vat = output_vat - input_vat;
        let position = if net_vat > Decimal::ZERO {
            VatPosition::Payable
        } else if net_vat < Decimal::ZERO {
            VatPosition::Reclaimable
        } else {
            VatPosition::Nil
        };

        let deadline = filing_deadline(range.end, self.policy.vat_filing_day);
        let days_until_deadline = (deadline - params.as_of).num_days();
        let status = if params.as_of <= deadline {
            FilingStatus::OnTime
        } else {
            FilingStatus::Late
        };

        Ok(VatSummary {
            period: range,
            taxable_sales: sales.iter().map(|s| s.1).sum(),
            taxable_purchases: purchases.iter().map(|e| e.amount).sum(),
            output_vat,
            input_vat,
            net_vat,
            position,
            output_by_rate,
            input_by_rate,
            filing: FilingCompliance {
                deadline,
                as_of: params.as_of,
                days_until_deadline,
                status,
            },
        })
    }
}

fn revenue_invoices<'r>(records: &'r RecordSet, range: &DateRange, filters: &ReportFilters) -> Vec<&'r Invoice> {
    records
        .invoices
        .iter()
        .filter(|i| {
            i.status.is_revenue_bearing()
                && range.contains(i.issue_date)
                && filters.matches_customer(&i.customer_id)
                && filters.matches_invoice(&i.id)
        })
        .collect()
}

fn received_payments<'r>(records: &'r RecordSet, range: &DateRange, filters: &ReportFilters) -> Vec<&'r Payment> {
    records
        .payments
        .iter()
        .filter(|p| {
            p.is_completed()
                && range.contains(p.date())
                && filters.matches_customer(&p.customer_id)
                && filters
                    .invoice_id
                    .as_deref()
                    .map_or(true, |wanted| p.invoice_id.as_deref() == Some(wanted))
        })
        .collect()
}

fn expenses_in<'r>(records: &'r RecordSet, range: &DateRange) -> Vec<&'r Expense> {
    records
        .expenses
        .iter()
        .filter(|e| range.contains(e.date))
        .collect()
}

fn lines_of<'r>(records: &'r RecordSet, invoices: &[&Invoice]) -> Vec<&'r InvoiceLineItem> {
    let ids: HashSet<&str> = invoices.iter().map(|i| i.id.as_str()).collect();
    records
        .line_items
        .iter()
        .filter(|li| ids.contains(li.invoice_id.as_str()))
        .collect()
}

/// Payments first, then expenses, each in input order.
fn cash_movements(records: &RecordSet, filters: &ReportFilters) -> Vec<CashMovement> {
    let everything = DateRange {
        start: NaiveDate::MIN,
        end: NaiveDate::MAX,
    };
    let mut movements: Vec<CashMovement> = received_payments(records, &everything, filters)
        .into_iter()
        .map(|p| CashMovement {
            date: p.date(),
            amount: p.amount,
            flow: Flow::Inflow,
        })
        .collect();
    movements.extend(records.expenses.iter().map(|e| CashMovement {
        date: e.date,
        amount: e.gross(),
        flow: Flow::Outflow,
    }));
    movements
}

fn flow_totals(movements: &[CashMovement], range: &DateRange) -> (Decimal, Decimal) {
    movements
        .iter()
        .filter(|m| range.contains(m.date))
        .fold((Decimal::ZERO, Decimal::ZERO), |(inflow, outflow), m| match m.flow {
            Flow::Inflow => (inflow + m.amount, outflow),
            Flow::Outflow => (inflow, outflow + m.amount),
        })
}

fn net_movement(movements: &[CashMovement], range: &DateRange) -> Decimal {
    let (inflow, outflow) = flow_totals(movements, range);
    inflow - outflow
}

/// How much of `invoice` had been settled on `as_of`. An invoice marked paid on
/// or before that date is settled in full even without linked payments. Linked
/// payments win over the invoice's own `amount_paid`, which only counts when no
/// payment is linked (payments may be recorded against the customer alone).
fn settled_amount(invoice: &Invoice, applied: Option<Decimal>, as_of: NaiveDate) -> Decimal {
    if invoice.status == InvoiceStatus::Paid {
        return match invoice.paid_date {
            Some(paid) if paid > as_of => applied.unwrap_or(Decimal::ZERO).min(invoice.total),
            _ => invoice.total,
        };
    }
    applied
        .unwrap_or(invoice.amount_paid)
        .max(Decimal::ZERO)
        .min(invoice.total)
}
