// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Monthly aggregation of snapshot tables.
//!
//! Everything here is a pure function of its inputs. Tables are slices of
//! entities; columns are selected with accessor closures.

use crate::error::AggregateError;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

/// Headroom applied above the largest value when sizing a y axis.
const Y_AXIS_HEADROOM: f64 = 1.125;

/// Number of rows falling in one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthBucket {
    /// First day of the month.
    pub month: NaiveDate,
    pub count: u64,
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month after the one containing `date`.
pub fn next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// First day of the month `months` months before the one containing `date`.
pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    let start = month_start(date);
    start
        .checked_sub_months(chrono::Months::new(months))
        .unwrap_or(start)
}

/// Count rows per calendar month of the selected timestamp.
///
/// Rows whose timestamp is `None` are ignored. Only populated months are
/// returned, in chronological order.
pub fn bucket_by_month<T, F>(rows: &[T], timestamp: F) -> Vec<MonthBucket>
where
    F: Fn(&T) -> Option<NaiveDateTime>,
{
    let mut counts: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for ts in rows.iter().filter_map(timestamp) {
        *counts.entry(month_start(ts.date())).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(month, count)| MonthBucket { month, count })
        .collect()
}

/// Keep the earliest row for each actor, ordered by timestamp.
///
/// Ties on the timestamp keep input order.
pub fn first_event_per_actor<T, K, A, F>(rows: &[T], actor: A, timestamp: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    A: Fn(&T) -> K,
    F: Fn(&T) -> NaiveDateTime,
{
    let mut sorted: Vec<&T> = rows.iter().collect();
    sorted.sort_by_key(|row| timestamp(row));

    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|row| seen.insert(actor(row)))
        .cloned()
        .collect()
}

/// Running sum of a count series.
pub fn cumulative(counts: &[u64]) -> Vec<u64> {
    counts
        .iter()
        .scan(0u64, |total, count| {
            *total += count;
            Some(*total)
        })
        .collect()
}

/// A deduplicated set of member ids.
#[derive(Debug, Clone, Default)]
pub struct MembershipSet {
    ids: HashSet<i64>,
}

impl MembershipSet {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }
}

/// Split rows into those whose key is in `members` and those that are not.
///
/// Rows without a key are never members. Each row lands in exactly one side,
/// so duplicate ids in the source member list cannot inflate counts.
pub fn partition_by_membership<T, F>(rows: &[T], members: &MembershipSet, key: F) -> (Vec<T>, Vec<T>)
where
    T: Clone,
    F: Fn(&T) -> Option<i64>,
{
    rows.iter()
        .cloned()
        .partition(|row| key(row).is_some_and(|id| members.contains(id)))
}

/// Every first-of-month from the month of `start` to the month of `end`,
/// inclusive. Empty if `end` is before `start`.
pub fn month_ticks(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let end = month_start(end);
    let mut ticks = Vec::new();
    let mut month = month_start(start);
    while month <= end {
        ticks.push(month);
        month = next_month(month);
    }
    ticks
}

/// Values of `buckets` at each tick, with zero for months not present.
pub fn align(buckets: &[MonthBucket], ticks: &[NaiveDate]) -> Vec<u64> {
    let by_month: BTreeMap<NaiveDate, u64> =
        buckets.iter().map(|b| (b.month, b.count)).collect();
    ticks
        .iter()
        .map(|tick| by_month.get(tick).copied().unwrap_or(0))
        .collect()
}

/// Sum of the counts in months strictly before `month`.
pub fn total_before(buckets: &[MonthBucket], month: NaiveDate) -> u64 {
    buckets
        .iter()
        .filter(|b| b.month < month)
        .map(|b| b.count)
        .sum()
}

/// Y axis range `[0, ceil(max * 1.125)]` over all values of all series.
pub fn y_axis_range(series: &[&[u64]]) -> Result<(u64, u64), AggregateError> {
    let max = series
        .iter()
        .flat_map(|values| values.iter().copied())
        .max()
        .ok_or(AggregateError::EmptyInput {
            operation: "y_axis_range",
        })?;
    Ok((0, (max as f64 * Y_AXIS_HEADROOM).ceil() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        date(y, m, d).and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_bucket_by_month() {
        let rows = vec![at(2023, 1, 5), at(2023, 1, 20), at(2023, 2, 1)];
        let buckets = bucket_by_month(&rows, |ts| Some(*ts));

        assert_eq!(
            buckets,
            vec![
                MonthBucket {
                    month: date(2023, 1, 1),
                    count: 2
                },
                MonthBucket {
                    month: date(2023, 2, 1),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_bucket_by_month_skips_empty_months_and_missing_values() {
        let rows = vec![Some(at(2023, 3, 9)), None, Some(at(2022, 12, 31))];
        let buckets = bucket_by_month(&rows, |ts| *ts);

        let months: Vec<_> = buckets.iter().map(|b| b.month).collect();
        assert_eq!(months, vec![date(2022, 12, 1), date(2023, 3, 1)]);
        assert!(buckets.iter().all(|b| b.count == 1));
    }

    #[test]
    fn test_cumulative() {
        assert_eq!(cumulative(&[1, 2, 0, 3]), vec![1, 3, 3, 6]);
        assert!(cumulative(&[]).is_empty());
    }

    #[test]
    fn test_first_event_per_actor() {
        let rows = vec![("A", at(2023, 1, 2)), ("A", at(2023, 1, 1)), ("B", at(2023, 1, 3))];
        let firsts = first_event_per_actor(&rows, |r| r.0, |r| r.1);

        assert_eq!(firsts, vec![("A", at(2023, 1, 1)), ("B", at(2023, 1, 3))]);
    }

    #[test]
    fn test_partition_by_membership() {
        let members = MembershipSet::new([1, 2, 2]);
        assert!(members.contains(2));
        assert!(!members.contains(3));

        let rows = vec![1i64, 2, 3];
        let (inside, outside) = partition_by_membership(&rows, &members, |id| Some(*id));

        assert_eq!(inside, vec![1, 2]);
        assert_eq!(outside, vec![3]);
    }

    #[test]
    fn test_partition_without_key_is_outside() {
        let members = MembershipSet::new([1]);
        let rows = vec![Some(1i64), None];
        let (inside, outside) = partition_by_membership(&rows, &members, |id| *id);

        assert_eq!(inside, vec![Some(1)]);
        assert_eq!(outside, vec![None]);
    }

    #[test]
    fn test_month_ticks_and_align() {
        let ticks = month_ticks(date(2022, 11, 15), date(2023, 2, 3));
        assert_eq!(
            ticks,
            vec![date(2022, 11, 1), date(2022, 12, 1), date(2023, 1, 1), date(2023, 2, 1)]
        );

        let buckets = vec![
            MonthBucket {
                month: date(2022, 11, 1),
                count: 4,
            },
            MonthBucket {
                month: date(2023, 2, 1),
                count: 1,
            },
        ];
        assert_eq!(align(&buckets, &ticks), vec![4, 0, 0, 1]);
        assert_eq!(total_before(&buckets, date(2023, 1, 1)), 4);

        assert!(month_ticks(date(2023, 2, 1), date(2023, 1, 1)).is_empty());
    }

    #[test]
    fn test_months_before() {
        assert_eq!(months_before(date(2023, 3, 17), 5), date(2022, 10, 1));
        assert_eq!(months_before(date(2023, 3, 17), 0), date(2023, 3, 1));
    }

    #[test]
    fn test_y_axis_range() {
        assert_eq!(y_axis_range(&[&[1, 2, 8]]), Ok((0, 9)));
        // 7 * 1.125 = 7.875 rounds up.
        assert_eq!(y_axis_range(&[&[7], &[3]]), Ok((0, 8)));
        assert_eq!(y_axis_range(&[&[0, 0]]), Ok((0, 0)));
    }

    #[test]
    fn test_y_axis_range_empty_input_fails() {
        let err = y_axis_range(&[&[], &[]]).unwrap_err();
        assert_eq!(
            err,
            AggregateError::EmptyInput {
                operation: "y_axis_range"
            }
        );
        assert!(y_axis_range(&[]).is_err());
    }
}
