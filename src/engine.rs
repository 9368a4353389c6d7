use crate::error::{ReportError, Result};
use crate::policy::validate_aging_edges;
use crate::schema::{DateRange, Granularity};
use crate::utils::{first_day_of_month, last_day_of_month, round_money};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange> {
    DateRange::new(start, end)
}

pub fn sum_by<T, K, KF, VF>(records: &[T], key_fn: KF, value_fn: VF) -> BTreeMap<K, Decimal>
where
    K: Ord,
    KF: Fn(&T) -> K,
    VF: Fn(&T) -> Decimal,
{
    let mut sums = BTreeMap::new();
    for record in records {
        *sums.entry(key_fn(record)).or_insert(Decimal::ZERO) += value_fn(record);
    }
    sums
}

pub fn count_by<T, K, KF>(records: &[T], key_fn: KF) -> BTreeMap<K, u64>
where
    K: Ord,
    KF: Fn(&T) -> K,
{
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(key_fn(record)).or_insert(0) += 1;
    }
    counts
}

/// `(current - previous) / previous` to four decimal places, or `None` when the
/// baseline is zero.
pub fn percentage_change(current: Decimal, previous: Decimal) -> Option<Decimal> {
    ratio(current - previous, previous)
}

pub fn ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator.is_zero() {
        return None;
    }
    numerator
        .checked_div(denominator)
        .map(|r| r.round_dp(4).normalize())
}

/// Share of `whole` in percent, rounded to cents.
pub fn percentage_of(part: Decimal, whole: Decimal) -> Option<Decimal> {
    if whole.is_zero() {
        return None;
    }
    part.checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|p| p.checked_div(whole))
        .map(round_money)
}

/// Each part's share of their sum in percent, rounded to cents. Whatever the
/// rounding leaves over goes to the largest part (the first one on ties), so the
/// shares add up to exactly 100. All `None` when the parts sum to zero.
pub fn percentage_shares(parts: &[Decimal]) -> Vec<Option<Decimal>> {
    let whole: Decimal = parts.iter().copied().sum();
    let mut shares: Vec<Option<Decimal>> = parts.iter().map(|&part| percentage_of(part, whole)).collect();
    let allocated: Decimal = shares.iter().flatten().copied().sum();

    let mut largest: Option<usize> = None;
    for (i, part) in parts.iter().enumerate() {
        if largest.map_or(true, |l| *part > parts[l]) {
            largest = Some(i);
        }
    }
    if let Some(share) = largest.and_then(|i| shares[i].as_mut()) {
        *share += Decimal::ONE_HUNDRED - allocated;
    }
    shares
}

/// A calendar period identified by its granularity and first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Period {
    pub granularity: Granularity,
    pub start: NaiveDate,
}

impl Period {
    pub fn containing(date: NaiveDate, granularity: Granularity) -> Self {
        let start = match granularity {
            Granularity::Day => date,
            Granularity::Month => first_day_of_month(date.year(), date.month()),
            Granularity::Quarter => {
                first_day_of_month(date.year(), (date.month() - 1) / 3 * 3 + 1)
            }
            Granularity::Year => first_day_of_month(date.year(), 1),
        };
        Self { granularity, start }
    }

    pub fn end(&self) -> NaiveDate {
        match self.granularity {
            Granularity::Day => self.start,
            Granularity::Month => last_day_of_month(self.start.year(), self.start.month()),
            Granularity::Quarter => last_day_of_month(self.start.year(), self.start.month() + 2),
            Granularity::Year => last_day_of_month(self.start.year(), 12),
        }
    }

    pub fn next(&self) -> Option<Self> {
        self.end()
            .succ_opt()
            .map(|d| Self::containing(d, self.granularity))
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end(),
        }
    }

    pub fn label(&self) -> String {
        match self.granularity {
            Granularity::Day => self.start.format("%Y-%m-%d").to_string(),
            Granularity::Month => self.start.format("%Y-%m").to_string(),
            Granularity::Quarter => {
                format!("{}-Q{}", self.start.year(), (self.start.month() - 1) / 3 + 1)
            }
            Granularity::Year => self.start.year().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeriodBucket<'a, T> {
    pub period: Period,
    pub records: Vec<&'a T>,
}

impl<T> PeriodBucket<'_, T> {
    pub fn label(&self) -> String {
        self.period.label()
    }
}

/// Groups records into calendar periods, oldest first. Periods without records
/// that fall between the first and last populated period are kept as empty
/// buckets so the series has no gaps. Records keep their input order within a
/// bucket.
pub fn bucket_by_period<'a, T, F>(
    records: &'a [T],
    date_fn: F,
    granularity: Granularity,
) -> Vec<PeriodBucket<'a, T>>
where
    F: Fn(&T) -> NaiveDate,
{
    let mut grouped: BTreeMap<Period, Vec<&'a T>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(Period::containing(date_fn(record), granularity))
            .or_default()
            .push(record);
    }

    let (first, last) = match (grouped.keys().next(), grouped.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Vec::new(),
    };

    let mut buckets = Vec::new();
    let mut current = Some(first);
    while let Some(period) = current {
        if period > last {
            break;
        }
        buckets.push(PeriodBucket {
            period,
            records: grouped.remove(&period).unwrap_or_default(),
        });
        current = period.next();
    }
    buckets
}

/// Consecutive calendar periods covering `range`, each clipped to it.
pub fn period_ranges(range: &DateRange, granularity: Granularity) -> Result<Vec<(Period, DateRange)>> {
    let range = validate_range(range.start, range.end)?;

    let mut periods = Vec::new();
    let mut current = Some(Period::containing(range.start, granularity));
    while let Some(period) = current {
        let span = period.range();
        periods.push((
            period,
            DateRange {
                start: span.start.max(range.start),
                end: span.end.min(range.end),
            },
        ));
        if span.end >= range.end {
            break;
        }
        current = period.next();
    }
    Ok(periods)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Inflow,
    Outflow,
}

/// Cumulative balance after each record in chronological order. Records with
/// equal dates keep their input order.
pub fn running_balance<T, D, DF, AF, SF>(
    records: &[T],
    date_fn: DF,
    amount_fn: AF,
    sign_fn: SF,
) -> Vec<Decimal>
where
    D: Ord,
    DF: Fn(&T) -> D,
    AF: Fn(&T) -> Decimal,
    SF: Fn(&T) -> Flow,
{
    let mut order: Vec<&T> = records.iter().collect();
    order.sort_by_key(|r| date_fn(r));

    let mut balance = Decimal::ZERO;
    order
        .into_iter()
        .map(|record| {
            match sign_fn(record) {
                Flow::Inflow => balance += amount_fn(record),
                Flow::Outflow => balance -= amount_fn(record),
            }
            balance
        })
        .collect()
}

/// An open balance on a single invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Receivable {
    pub invoice_id: String,
    pub customer_id: String,
    pub due_date: NaiveDate,
    pub outstanding: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgingBucket {
    pub label: String,
    /// Inclusive lower bound in days overdue; `None` for the not-yet-due bucket.
    pub min_days: Option<i64>,
    /// Exclusive upper bound in days overdue; `None` for the open-ended bucket.
    pub max_days: Option<i64>,
    pub count: u64,
    pub amount: Decimal,
}

pub const CURRENT_BUCKET: &str = "current";

/// Places each receivable by `as_of - due_date`. Receivables not yet due go to
/// the leading `current` bucket; overdue ones go to `[edges[i], edges[i+1])` or
/// the trailing open-ended bucket.
pub fn aging_buckets(
    receivables: &[Receivable],
    as_of: NaiveDate,
    edges: &[i64],
) -> Result<Vec<AgingBucket>> {
    validate_aging_edges(edges)?;

    let mut buckets = Vec::with_capacity(edges.len() + 1);
    buckets.push(AgingBucket {
        label: CURRENT_BUCKET.to_string(),
        min_days: None,
        max_days: Some(0),
        count: 0,
        amount: Decimal::ZERO,
    });
    for (i, &lower) in edges.iter().enumerate() {
        let upper = edges.get(i + 1).copied();
        let label = match upper {
            Some(upper) => format!("{}-{}", lower, upper),
            None => format!("{}+", lower),
        };
        buckets.push(AgingBucket {
            label,
            min_days: Some(lower),
            max_days: upper,
            count: 0,
            amount: Decimal::ZERO,
        });
    }

    for receivable in receivables {
        let days_overdue = (as_of - receivable.due_date).num_days();
        let index = if days_overdue < 0 {
            0
        } else {
            edges.iter().rposition(|&edge| edge <= days_overdue).map_or(0, |i| i + 1)
        };
        let bucket = buckets
            .get_mut(index)
            .ok_or_else(|| ReportError::InvalidPolicy(format!("no aging bucket for {} days", days_overdue)))?;
        bucket.count += 1;
        bucket.amount += receivable.outstanding;
    }

    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_sum_and_count_by_empty_input() {
        let empty: Vec<(String, Decimal)> = Vec::new();
        assert!(sum_by(&empty, |r| r.0.clone(), |r| r.1).is_empty());
        assert!(count_by(&empty, |r| r.0.clone()).is_empty());
    }

    #[test]
    fn test_sum_by_groups_exactly() {
        let records = vec![
            ("rent", dec!(0.10)),
            ("fuel", dec!(0.20)),
            ("rent", dec!(0.20)),
        ];
        let sums = sum_by(&records, |r| r.0, |r| r.1);
        assert_eq!(sums["rent"], dec!(0.30));
        assert_eq!(sums["fuel"], dec!(0.20));

        let counts = count_by(&records, |r| r.0);
        assert_eq!(counts["rent"], 2);
    }

    #[test]
    fn test_period_labels_and_bounds() {
        let q = Period::containing(d(2024, 5, 17), Granularity::Quarter);
        assert_eq!(q.start, d(2024, 4, 1));
        assert_eq!(q.end(), d(2024, 6, 30));
        assert_eq!(q.label(), "2024-Q2");

        let m = Period::containing(d(2024, 2, 10), Granularity::Month);
        assert_eq!(m.end(), d(2024, 2, 29));
        assert_eq!(m.label(), "2024-02");
        assert_eq!(m.next().unwrap().label(), "2024-03");

        let y = Period::containing(d(2023, 7, 1), Granularity::Year);
        assert_eq!(y.label(), "2023");
        assert_eq!(y.end(), d(2023, 12, 31));

        let day = Period::containing(d(2024, 12, 31), Granularity::Day);
        assert_eq!(day.next().unwrap().start, d(2025, 1, 1));
    }

    #[test]
    fn test_bucket_by_period_fills_gaps() {
        let records = vec![d(2024, 1, 3), d(2024, 4, 9), d(2024, 1, 20)];
        let buckets = bucket_by_period(&records, |r| *r, Granularity::Month);

        let labels: Vec<String> = buckets.iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["2024-01", "2024-02", "2024-03", "2024-04"]);
        assert_eq!(buckets[0].records, vec![&d(2024, 1, 3), &d(2024, 1, 20)]);
        assert!(buckets[1].records.is_empty());
        assert!(buckets[2].records.is_empty());
        assert_eq!(buckets[3].records.len(), 1);
    }

    #[test]
    fn test_bucket_by_period_fills_quarter_and_year_gaps() {
        let records = vec![d(2023, 11, 2), d(2024, 8, 30)];

        let quarters = bucket_by_period(&records, |r| *r, Granularity::Quarter);
        let labels: Vec<String> = quarters.iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["2023-Q4", "2024-Q1", "2024-Q2", "2024-Q3"]);
        assert_eq!(quarters[1].period.range(), DateRange { start: d(2024, 1, 1), end: d(2024, 3, 31) });
        assert!(quarters[1].records.is_empty() && quarters[2].records.is_empty());

        let sparse = vec![d(2021, 6, 1), d(2024, 1, 1)];
        let years = bucket_by_period(&sparse, |r| *r, Granularity::Year);
        let labels: Vec<String> = years.iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["2021", "2022", "2023", "2024"]);
        assert_eq!(years.iter().map(|b| b.records.len()).sum::<usize>(), 2);
    }

    #[test]
    fn test_bucket_by_period_empty() {
        let records: Vec<NaiveDate> = Vec::new();
        assert!(bucket_by_period(&records, |r| *r, Granularity::Day).is_empty());
    }

    #[test]
    fn test_period_ranges_are_clipped_and_contiguous() {
        let range = DateRange::new(d(2024, 1, 15), d(2024, 3, 10)).unwrap();
        let periods = period_ranges(&range, Granularity::Month).unwrap();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].1.start, d(2024, 1, 15));
        assert_eq!(periods[0].1.end, d(2024, 1, 31));
        assert_eq!(periods[2].1.end, d(2024, 3, 10));
        for pair in periods.windows(2) {
            assert_eq!(pair[0].1.end.succ_opt().unwrap(), pair[1].1.start);
        }

        let inverted = DateRange {
            start: d(2024, 3, 1),
            end: d(2024, 1, 1),
        };
        assert!(matches!(
            period_ranges(&inverted, Granularity::Month),
            Err(ReportError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_running_balance_keeps_insertion_order_on_ties() {
        let records = vec![
            (d(2024, 1, 2), dec!(50), Flow::Outflow),
            (d(2024, 1, 1), dec!(100), Flow::Inflow),
            (d(2024, 1, 2), dec!(30), Flow::Inflow),
        ];
        let balances = running_balance(&records, |r| r.0, |r| r.1, |r| r.2);
        assert_eq!(balances, vec![dec!(100), dec!(50), dec!(80)]);
    }

    #[test]
    fn test_growth_guards_zero_baseline() {
        assert_eq!(percentage_change(dec!(100), Decimal::ZERO), None);
        assert_eq!(percentage_change(dec!(110), dec!(100)), Some(dec!(0.1)));
        assert_eq!(percentage_change(dec!(90), dec!(100)), Some(dec!(-0.1)));
        assert_eq!(ratio(dec!(1), dec!(3)), Some(dec!(0.3333)));
        assert_eq!(percentage_of(dec!(1), Decimal::ZERO), None);
        assert_eq!(percentage_of(dec!(1), dec!(3)), Some(dec!(33.33)));
    }

    #[test]
    fn test_percentage_shares_sum_to_one_hundred() {
        let shares = percentage_shares(&[dec!(10), dec!(10), dec!(10)]);
        assert_eq!(shares, vec![Some(dec!(33.34)), Some(dec!(33.33)), Some(dec!(33.33))]);

        let shares = percentage_shares(&[dec!(1), dec!(5), dec!(1)]);
        assert_eq!(shares, vec![Some(dec!(14.29)), Some(dec!(71.42)), Some(dec!(14.29))]);
        let total: Decimal = shares.iter().flatten().sum();
        assert_eq!(total, dec!(100));

        assert_eq!(percentage_shares(&[Decimal::ZERO, Decimal::ZERO]), vec![None, None]);
        assert!(percentage_shares(&[]).is_empty());
    }

    #[test]
    fn test_aging_buckets_assignment() {
        let as_of = d(2024, 4, 1);
        let receivable = |id: &str, due: NaiveDate, amount: Decimal| Receivable {
            invoice_id: id.to_string(),
            customer_id: "cus".to_string(),
            due_date: due,
            outstanding: amount,
        };
        let receivables = vec![
            receivable("not-due", d(2024, 4, 15), dec!(10)),
            receivable("due-today", d(2024, 4, 1), dec!(20)),
            receivable("29-days", d(2024, 3, 3), dec!(30)),
            receivable("30-days", d(2024, 3, 2), dec!(40)),
            receivable("95-days", d(2023, 12, 28), dec!(50)),
        ];

        let buckets = aging_buckets(&receivables, as_of, &[0, 30, 60, 90]).unwrap();
        let labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["current", "0-30", "30-60", "60-90", "90+"]);

        assert_eq!(buckets[0].amount, dec!(10));
        assert_eq!(buckets[1].amount, dec!(50));
        assert_eq!(buckets[1].count, 2);
        assert_eq!(buckets[2].amount, dec!(40));
        assert_eq!(buckets[3].count, 0);
        assert_eq!(buckets[4].amount, dec!(50));

        let total: Decimal = buckets.iter().map(|b| b.amount).sum();
        assert_eq!(total, dec!(150));
    }

    #[test]
    fn test_aging_rejects_bad_edges() {
        assert!(aging_buckets(&[], d(2024, 1, 1), &[10, 20]).is_err());
        assert!(aging_buckets(&[], d(2024, 1, 1), &[]).is_err());
    }
}
