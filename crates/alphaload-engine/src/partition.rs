//! Partition strategies: split an ordered item list into batches.
//!
//! Every strategy is pure and order preserving; concatenating its output
//! gives back the input.

use chrono::{Datelike, Days, NaiveDate};

use crate::errors::PlanError;

/// Split `items` into consecutive batches.
pub trait PartitionStrategy<T>: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`PlanError`] when the input does not fit the strategy.
    fn partition(&self, items: &[T]) -> Result<Vec<Vec<T>>, PlanError>;
}

/// Fixed-size chunks; the last chunk may be smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BySize {
    size: usize,
}

impl BySize {
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidArgument`] when `size` is zero.
    pub fn new(size: usize) -> Result<Self, PlanError> {
        if size == 0 {
            return Err(PlanError::InvalidArgument(
                "partition size must be greater than 0".into(),
            ));
        }
        Ok(Self { size })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl<T: Clone + Send + Sync> PartitionStrategy<T> for BySize {
    fn partition(&self, items: &[T]) -> Result<Vec<Vec<T>>, PlanError> {
        Ok(items.chunks(self.size).map(<[T]>::to_vec).collect())
    }
}

/// Parse a strict `YYYYMMDD` date.
///
/// # Errors
///
/// Returns [`PlanError::InvalidDateRange`] for anything else.
pub fn parse_yyyymmdd(value: &str) -> Result<NaiveDate, PlanError> {
    let trimmed = value.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PlanError::InvalidDateRange(format!(
            "'{value}' is not a YYYYMMDD date"
        )));
    }
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .map_err(|e| PlanError::InvalidDateRange(format!("'{value}': {e}")))
}

#[must_use]
pub fn format_yyyymmdd(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Granularity picked by [`SmartTimePartition`] for a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTier {
    Single,
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl TimeTier {
    fn months(self) -> Option<u32> {
        match self {
            Self::Single => None,
            Self::Monthly => Some(1),
            Self::Quarterly => Some(3),
            Self::SemiAnnual => Some(6),
            Self::Annual => Some(12),
        }
    }
}

/// Date-range splitter that sizes buckets from the total span.
///
/// Input is exactly `[start_date, end_date]` as `YYYYMMDD` strings; output
/// batches are `[bucket_start, bucket_end]` pairs. Buckets follow calendar
/// periods (months, quarters, half years, years), clipped to the range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmartTimePartition;

impl SmartTimePartition {
    /// Tier for the inclusive range `start..=end`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn tier(start: NaiveDate, end: NaiveDate) -> TimeTier {
        let total_days = (end - start).num_days();
        let total_months =
            12 * (end.year() - start.year()) + (end.month() as i32 - start.month() as i32);
        if total_days <= 31 {
            TimeTier::Single
        } else if total_months <= 3 {
            TimeTier::Monthly
        } else if total_months <= 24 {
            TimeTier::Quarterly
        } else if total_months <= 120 {
            TimeTier::SemiAnnual
        } else {
            TimeTier::Annual
        }
    }

    /// Buckets covering `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidDateRange`] when `start > end`.
    pub fn buckets(
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, NaiveDate)>, PlanError> {
        if start > end {
            return Err(PlanError::InvalidDateRange(format!(
                "start {} is after end {}",
                format_yyyymmdd(start),
                format_yyyymmdd(end)
            )));
        }
        let Some(months) = Self::tier(start, end).months() else {
            return Ok(vec![(start, end)]);
        };

        let mut buckets = Vec::new();
        let mut cursor = start;
        loop {
            let bucket_end = period_end(cursor, months)?.min(end);
            buckets.push((cursor, bucket_end));
            if bucket_end >= end {
                break;
            }
            cursor = bucket_end
                .checked_add_days(Days::new(1))
                .ok_or_else(|| PlanError::InvalidDateRange("date overflow".into()))?;
        }
        Ok(buckets)
    }
}

/// Last day of the `months`-long calendar period containing `date`.
fn period_end(date: NaiveDate, months: u32) -> Result<NaiveDate, PlanError> {
    let period_start_month = (date.month0() / months) * months;
    let last_month0 = period_start_month + months - 1;
    let (year, next_month) = if last_month0 == 11 {
        (date.year() + 1, 1)
    } else {
        (date.year(), last_month0 + 2)
    };
    NaiveDate::from_ymd_opt(year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| PlanError::InvalidDateRange(format!("no period end for {date}")))
}

impl PartitionStrategy<String> for SmartTimePartition {
    fn partition(&self, items: &[String]) -> Result<Vec<Vec<String>>, PlanError> {
        let [start, end] = items else {
            return Err(PlanError::InvalidDateRange(format!(
                "expected [start_date, end_date], got {} item(s)",
                items.len()
            )));
        };
        let start = parse_yyyymmdd(start)?;
        let end = parse_yyyymmdd(end)?;
        Ok(Self::buckets(start, end)?
            .into_iter()
            .map(|(from, to)| vec![format_yyyymmdd(from), format_yyyymmdd(to)])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> Vec<Vec<String>> {
        SmartTimePartition
            .partition(&[start.to_string(), end.to_string()])
            .unwrap()
    }

    fn pair(a: &str, b: &str) -> Vec<String> {
        vec![a.to_string(), b.to_string()]
    }

    #[test]
    fn by_size_keeps_order_and_remainder() {
        let items: Vec<i32> = (1..=7).collect();
        let batches = BySize::new(3).unwrap().partition(&items).unwrap();
        assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[test]
    fn by_size_rejects_zero() {
        assert!(matches!(BySize::new(0), Err(PlanError::InvalidArgument(_))));
    }

    #[test]
    fn by_size_of_empty_input_is_empty() {
        let batches = BySize::new(5).unwrap().partition(&Vec::<String>::new()).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn short_range_is_one_batch() {
        assert_eq!(range("20230101", "20230115"), vec![pair("20230101", "20230115")]);
        assert_eq!(range("20230101", "20230101"), vec![pair("20230101", "20230101")]);
        assert_eq!(range("20230101", "20230201"), vec![pair("20230101", "20230201")]);
    }

    #[test]
    fn thirty_two_days_split_monthly() {
        assert_eq!(
            range("20230101", "20230202"),
            vec![pair("20230101", "20230131"), pair("20230201", "20230202")]
        );
    }

    #[test]
    fn multi_year_range_splits_semi_annually() {
        let batches = range("20200101", "20231231");
        assert_eq!(batches.len(), 8);
        assert_eq!(batches[0], pair("20200101", "20200630"));
        assert_eq!(batches[1], pair("20200701", "20201231"));
        assert_eq!(batches[7], pair("20230701", "20231231"));
    }

    #[test]
    fn quarterly_buckets_clip_to_range() {
        let batches = range("20230215", "20231010");
        assert_eq!(
            batches,
            vec![
                pair("20230215", "20230331"),
                pair("20230401", "20230630"),
                pair("20230701", "20230930"),
                pair("20231001", "20231010"),
            ]
        );
    }

    #[test]
    fn long_range_splits_annually() {
        let batches = range("20000301", "20121231");
        assert_eq!(batches.first().unwrap(), &pair("20000301", "20001231"));
        assert_eq!(batches.len(), 13);
    }

    #[test]
    fn tiers_follow_month_span() {
        let d = |s: &str| parse_yyyymmdd(s).unwrap();
        assert_eq!(SmartTimePartition::tier(d("20230101"), d("20230401")), TimeTier::Monthly);
        assert_eq!(SmartTimePartition::tier(d("20230101"), d("20250101")), TimeTier::Quarterly);
        assert_eq!(SmartTimePartition::tier(d("20230101"), d("20330101")), TimeTier::SemiAnnual);
        assert_eq!(SmartTimePartition::tier(d("20230101"), d("20330201")), TimeTier::Annual);
    }

    #[test]
    fn reversed_or_bad_dates_are_rejected() {
        let err = SmartTimePartition
            .partition(&pair("20230201", "20230101"))
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidDateRange(_)));
        assert!(SmartTimePartition.partition(&pair("2023-01-01", "20230101")).is_err());
        assert!(SmartTimePartition.partition(&pair("20230230", "20230301")).is_err());
        assert!(SmartTimePartition.partition(&["20230101".to_string()]).is_err());
    }
}
