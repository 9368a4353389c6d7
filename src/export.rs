use crate::error::{ReportError, Result};
use crate::schema::ReportType;
use crate::statements::{ArAgingReport, Breakdown, CashFlowStatement, IncomeStatement, VatSummary};
use crate::trend::{PeriodComparison, TrendSeries};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A finished report, tagged with the report type that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "report_type", rename_all = "snake_case")]
pub enum ReportOutput {
    IncomeStatement(IncomeStatement),
    CashFlow(CashFlowStatement),
    ArAging(ArAgingReport),
    VatSummary(VatSummary),
    TrendRevenue(TrendSeries),
    TrendExpense(TrendSeries),
    ComparisonMom(PeriodComparison),
    ComparisonYoy(PeriodComparison),
}

impl ReportOutput {
    pub fn report_type(&self) -> ReportType {
        match self {
            ReportOutput::IncomeStatement(_) => ReportType::IncomeStatement,
            ReportOutput::CashFlow(_) => ReportType::CashFlow,
            ReportOutput::ArAging(_) => ReportType::ArAging,
            ReportOutput::VatSummary(_) => ReportType::VatSummary,
            ReportOutput::TrendRevenue(_) => ReportType::TrendRevenue,
            ReportOutput::TrendExpense(_) => ReportType::TrendExpense,
            ReportOutput::ComparisonMom(_) => ReportType::ComparisonMom,
            ReportOutput::ComparisonYoy(_) => ReportType::ComparisonYoy,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_csv_string(&self) -> Result<String> {
        rows_to_csv(&self.flatten())
    }

    pub fn schema_as_json() -> serde_json::Result<String> {
        serde_json::to_string_pretty(&schemars::schema_for!(ReportOutput))
    }
}

/// One numeric value addressed by a dot-separated path, e.g.
/// `revenue_breakdown.amounts.cus-1`. Dots and backslashes inside a segment are
/// backslash-escaped, so `7.5%` appears as `7\.5%`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlatRow {
    pub path: String,
    pub value: Decimal,
}

impl FlatRow {
    pub fn segments(&self) -> Vec<String> {
        split_path(&self.path)
    }
}

fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == '.' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Splits a row path back into its unescaped labels.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

#[derive(Debug, Default)]
pub struct RowWriter {
    prefix: Vec<String>,
    rows: Vec<FlatRow>,
}

impl RowWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&mut self, key: &str, value: Decimal) {
        let path = self
            .prefix
            .iter()
            .cloned()
            .chain(std::iter::once(escape_segment(key)))
            .collect::<Vec<_>>()
            .join(".");
        self.rows.push(FlatRow { path, value });
    }

    pub fn count(&mut self, key: &str, count: u64) {
        self.value(key, Decimal::from(count));
    }

    /// Absent values produce no row.
    pub fn optional(&mut self, key: &str, value: Option<Decimal>) {
        if let Some(value) = value {
            self.value(key, value);
        }
    }

    pub fn section<F: FnOnce(&mut Self)>(&mut self, key: &str, f: F) {
        self.prefix.push(escape_segment(key));
        f(self);
        self.prefix.pop();
    }

    pub fn into_rows(self) -> Vec<FlatRow> {
        self.rows
    }
}

pub trait Flatten {
    fn flatten_into(&self, out: &mut RowWriter);

    fn flatten(&self) -> Vec<FlatRow> {
        let mut writer = RowWriter::new();
        self.flatten_into(&mut writer);
        writer.into_rows()
    }
}

impl Flatten for Breakdown {
    fn flatten_into(&self, out: &mut RowWriter) {
        out.section("amounts", |out| {
            for (key, amount) in &self.amounts {
                out.value(key, *amount);
            }
        });
        out.section("counts", |out| {
            for (key, count) in &self.counts {
                out.count(key, *count);
            }
        });
        out.value("total", self.total);
    }
}

impl Flatten for IncomeStatement {
    fn flatten_into(&self, out: &mut RowWriter) {
        out.value("revenue", self.revenue);
        out.value("expenses", self.expenses);
        out.value("net_income", self.net_income);
        out.optional("margin", self.margin);
        out.section("revenue_breakdown", |out| self.revenue_breakdown.flatten_into(out));
        out.section("invoices_by_status", |out| {
            for (status, count) in &self.invoices_by_status {
                out.count(status, *count);
            }
        });
        out.section("expenses_by_category", |out| self.expenses_by_category.flatten_into(out));
        out.section("net_sales_by_category", |out| self.net_sales_by_category.flatten_into(out));
    }
}

impl Flatten for CashFlowStatement {
    fn flatten_into(&self, out: &mut RowWriter) {
        out.value("opening_balance", self.opening_balance);
        out.value("inflows", self.inflows);
        out.value("outflows", self.outflows);
        out.value("net_cash_flow", self.net_cash_flow);
        out.value("closing_balance", self.closing_balance);
        out.section("inflows_by_method", |out| self.inflows_by_method.flatten_into(out));
        out.section("outflows_by_category", |out| self.outflows_by_category.flatten_into(out));
        out.section("periods", |out| {
            for period in &self.periods {
                out.section(&period.label, |out| {
                    out.value("opening_balance", period.opening_balance);
                    out.value("inflows", period.inflows);
                    out.value("outflows", period.outflows);
                    out.value("closing_balance", period.closing_balance);
                });
            }
        });
        out.section("daily_balances", |out| {
            for point in &self.daily_balances {
                out.value(&point.date.to_string(), point.balance);
            }
        });
    }
}

impl Flatten for ArAgingReport {
    fn flatten_into(&self, out: &mut RowWriter) {
        out.value("total_outstanding", self.total_outstanding);
        out.count("invoice_count", self.invoice_count);
        out.section("buckets", |out| {
            for line in &self.buckets {
                out.section(&line.bucket.label, |out| {
                    out.optional("min_days", line.bucket.min_days.map(Decimal::from));
                    out.optional("max_days", line.bucket.max_days.map(Decimal::from));
                    out.count("count", line.bucket.count);
                    out.value("amount", line.bucket.amount);
                    out.optional("percentage", line.percentage);
                });
            }
        });
        out.section("outstanding_by_customer", |out| self.outstanding_by_customer.flatten_into(out));
    }
}

impl Flatten for VatSummary {
    fn flatten_into(&self, out: &mut RowWriter) {
        out.value("taxable_sales", self.taxable_sales);
        out.value("taxable_purchases", self.taxable_purchases);
        out.value("output_vat", self.output_vat);
        out.value("input_vat", self.input_vat);
        out.value("net_vat", self.net_vat);
        out.section("output_by_rate", |out| self.output_by_rate.flatten_into(out));
        out.section("input_by_rate", |out| self.input_by_rate.flatten_into(out));
        out.section("filing", |out| {
            out.value("days_until_deadline", Decimal::from(self.filing.days_until_deadline));
        });
    }
}

impl Flatten for TrendSeries {
    fn flatten_into(&self, out: &mut RowWriter) {
        out.section("points", |out| {
            for point in &self.points {
                out.section(&point.label, |out| {
                    out.value("value", point.value);
                    out.optional("change", point.change);
                });
            }
        });
        out.value("total", self.total);
        out.optional("average", self.average);
        out.optional("projected_next", self.projected_next);
    }
}

impl Flatten for PeriodComparison {
    fn flatten_into(&self, out: &mut RowWriter) {
        for metric in &self.metrics {
            out.section(metric.metric.as_str(), |out| {
                out.value("current", metric.current);
                out.value("previous", metric.previous);
                out.value("delta", metric.delta);
                out.optional("change", metric.change);
            });
        }
    }
}

impl Flatten for ReportOutput {
    fn flatten_into(&self, out: &mut RowWriter) {
        match self {
            ReportOutput::IncomeStatement(report) => report.flatten_into(out),
            ReportOutput::CashFlow(report) => report.flatten_into(out),
            ReportOutput::ArAging(report) => report.flatten_into(out),
            ReportOutput::VatSummary(report) => report.flatten_into(out),
            ReportOutput::TrendRevenue(report) | ReportOutput::TrendExpense(report) => report.flatten_into(out),
            ReportOutput::ComparisonMom(report) | ReportOutput::ComparisonYoy(report) => report.flatten_into(out),
        }
    }
}

/// Two-column `path,value` CSV with a header row.
pub fn rows_to_csv(rows: &[FlatRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["path", "value"])?;
    for row in rows {
        writer.write_record([row.path.as_str(), row.value.to_string().as_str()])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ReportError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
