use crate::engine::{percentage_change, period_ranges, validate_range};
use crate::error::Result;
use crate::schema::{DateRange, Granularity, RevenueBasis};
use crate::statements::{IncomeStatement, StatementBuilder, StatementParams};
use crate::store::RecordSet;
use crate::utils::{month_range, months_between, round_money, shifted_month_range};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

impl Direction {
    /// Classifies a relative change against a symmetric threshold. An undefined
    /// change (zero baseline) is stable.
    pub fn classify(change: Option<Decimal>, threshold: Decimal) -> Self {
        match change {
            Some(change) if change > threshold => Direction::Increasing,
            Some(change) if change < -threshold => Direction::Decreasing,
            _ => Direction::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    Revenue,
    Expenses,
    NetIncome,
}

impl TrendMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendMetric::Revenue => "revenue",
            TrendMetric::Expenses => "expenses",
            TrendMetric::NetIncome => "net_income",
        }
    }

    pub fn value_of(&self, statement: &IncomeStatement) -> Decimal {
        match self {
            TrendMetric::Revenue => statement.revenue,
            TrendMetric::Expenses => statement.expenses,
            TrendMetric::NetIncome => statement.net_income,
        }
    }
}

impl fmt::Display for TrendMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendPoint {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub value: Decimal,
    /// Relative change against the previous point; `None` for the first point
    /// or when the previous value is zero.
    pub change: Option<Decimal>,
    /// `None` for the first point.
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendSeries {
    pub metric: TrendMetric,
    pub granularity: Granularity,
    pub basis: RevenueBasis,
    pub period: DateRange,
    pub points: Vec<TrendPoint>,
    pub total: Decimal,
    pub average: Option<Decimal>,
    /// Direction from the first to the last point.
    pub overall_direction: Direction,
    /// Least-squares projection of the next period; needs at least two points.
    pub projected_next: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    MonthOverMonth,
    YearOverYear,
}

impl ComparisonKind {
    fn month_offset(&self) -> i32 {
        match self {
            ComparisonKind::MonthOverMonth => -1,
            ComparisonKind::YearOverYear => -12,
        }
    }

    /// The two calendar months compared for a window ending on `end`.
    pub fn periods(&self, end: NaiveDate) -> (DateRange, DateRange) {
        (month_range(end), shifted_month_range(end, self.month_offset()))
    }

    /// Smallest window holding both compared months.
    pub fn record_window(&self, end: NaiveDate) -> DateRange {
        let (current, previous) = self.periods(end);
        DateRange {
            start: previous.start,
            end: current.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricComparison {
    pub metric: TrendMetric,
    pub current: Decimal,
    pub previous: Decimal,
    pub delta: Decimal,
    pub change: Option<Decimal>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeriodComparison {
    pub kind: ComparisonKind,
    pub basis: RevenueBasis,
    pub current_period: DateRange,
    pub previous_period: DateRange,
    pub metrics: Vec<MetricComparison>,
}

impl PeriodComparison {
    pub fn metric(&self, metric: TrendMetric) -> Option<&MetricComparison> {
        self.metrics.iter().find(|m| m.metric == metric)
    }
}

pub struct TrendAnalyzer<'a> {
    builder: StatementBuilder<'a>,
}

impl<'a> TrendAnalyzer<'a> {
    pub fn new(builder: StatementBuilder<'a>) -> Self {
        Self { builder }
    }

    pub fn revenue_trend(&self, records: &RecordSet, params: &StatementParams) -> Result<TrendSeries> {
        self.series(records, params, TrendMetric::Revenue)
    }

    pub fn expense_trend(&self, records: &RecordSet, params: &StatementParams) -> Result<TrendSeries> {
        self.series(records, params, TrendMetric::Expenses)
    }

    pub fn month_over_month(&self, records: &RecordSet, params: &StatementParams) -> Result<PeriodComparison> {
        self.compare(records, params, ComparisonKind::MonthOverMonth)
    }

    pub fn year_over_year(&self, records: &RecordSet, params: &StatementParams) -> Result<PeriodComparison> {
        self.compare(records, params, ComparisonKind::YearOverYear)
    }

    pub fn series(&self, records: &RecordSet, params: &StatementParams, metric: TrendMetric) -> Result<TrendSeries> {
        let range = validate_range(params.start, params.end)?;
        let threshold = self.builder.policy().trend_threshold;

        let mut points: Vec<TrendPoint> = Vec::new();
        for (period, span) in period_ranges(&range, params.granularity)? {
            let statement = self.builder.income_statement(records, &params.for_range(&span))?;
            let value = metric.value_of(&statement);
            let (change, direction) = match points.last() {
                Some(previous) => {
                    let change = percentage_change(value, previous.value);
                    (change, Some(Direction::classify(change, threshold)))
                }
                None => (None, None),
            };
            points.push(TrendPoint {
                label: period.label(),
                start: span.start,
                end: span.end,
                value,
                change,
                direction,
            });
        }

        let values: Vec<Decimal> = points.iter().map(|p| p.value).collect();
        let total: Decimal = values.iter().copied().sum();
        let average = if values.is_empty() {
            None
        } else {
            Some(round_money(total / Decimal::from(values.len())))
        };
        let overall_direction = match (values.first(), values.last()) {
            (Some(&first), Some(&last)) if values.len() > 1 => {
                Direction::classify(percentage_change(last, first), threshold)
            }
            _ => Direction::Stable,
        };

        debug!(
            "{} trend over {} ({} periods spanning {} months)",
            metric,
            range,
            points.len(),
            months_between(range.start, range.end) + 1
        );

        Ok(TrendSeries {
            metric,
            granularity: params.granularity,
            basis: params.basis,
            period: range,
            total,
            average,
            overall_direction,
            projected_next: linear_projection(&values),
            points,
        })
    }

    /// Compares the calendar month containing `params.end` with the month
    /// `kind` looks back to.
    pub fn compare(&self, records: &RecordSet, params: &StatementParams, kind: ComparisonKind) -> Result<PeriodComparison> {
        validate_range(params.start, params.end)?;
        let threshold = self.builder.policy().trend_threshold;
        let (current_period, previous_period) = kind.periods(params.end);

        let current = self.builder.income_statement(records, &params.for_range(&current_period))?;
        let previous = self.builder.income_statement(records, &params.for_range(&previous_period))?;

        let metrics = [TrendMetric::Revenue, TrendMetric::Expenses, TrendMetric::NetIncome]
            .into_iter()
            .map(|metric| {
                let now = metric.value_of(&current);
                let then = metric.value_of(&previous);
                let change = percentage_change(now, then);
                MetricComparison {
                    metric,
                    current: now,
                    previous: then,
                    delta: now - then,
                    change,
                    direction: Direction::classify(change, threshold),
                }
            })
            .collect();

        Ok(PeriodComparison {
            kind,
            basis: params.basis,
            current_period,
            previous_period,
            metrics,
        })
    }
}

/// Ordinary least squares over `(index, value)`, evaluated one step past the
/// last point.
pub fn linear_projection(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }

    let n = Decimal::from(values.len());
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) =
        (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
    for (i, &y) in values.iter().enumerate() {
        let x = Decimal::from(i);
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.is_zero() {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y).checked_div(denominator)?;
    let intercept = (sum_y - slope * sum_x).checked_div(n)?;
    Some(round_money(intercept + slope * n))
}
