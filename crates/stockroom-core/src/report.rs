//! # Checkout Reports
//!
//! Summaries computed from checkout history. Pure functions over slices of
//! records; the caller decides which logs to feed in (usually a time window
//! fetched with `CheckoutLogRepository::get_between`).
//!
//! ## Report Contents
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CheckoutReport                                                         │
//! │  ├── totals: checkouts, open, overdue, average closed duration         │
//! │  ├── by_item:  [ItemUsage]      most-used first                        │
//! │  ├── by_staff: [StaffActivity]  most active first                      │
//! │  └── daily:    [DailyCount]     one bucket per UTC calendar day        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CheckoutLog, EpochMillis, Item, Staff};

/// Label used when a log references a record that is no longer local.
const UNKNOWN: &str = "(unknown)";

/// Usage of a single item within the report window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUsage {
    pub item_id: String,
    pub item_name: String,
    pub checkouts: u32,
    /// Whether the item is out right now according to the logs.
    pub currently_out: bool,
}

/// Activity of a single staff member within the report window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffActivity {
    pub staff_id: String,
    pub staff_name: String,
    pub department: String,
    pub checkouts: u32,
    pub open: u32,
    pub overdue: u32,
}

/// Number of checkouts started on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub checkouts: u32,
}

/// Aggregate view of checkout history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutReport {
    pub generated_at: EpochMillis,
    pub total_checkouts: u32,
    pub open_checkouts: u32,
    pub overdue_checkouts: u32,
    /// Mean duration of closed checkouts, `None` when nothing was returned.
    pub average_duration_millis: Option<i64>,
    pub by_item: Vec<ItemUsage>,
    pub by_staff: Vec<StaffActivity>,
    pub daily: Vec<DailyCount>,
}

impl CheckoutReport {
    /// Builds a report from `logs`, resolving names through `items` and
    /// `staff`. `now` decides which open logs count as overdue.
    pub fn build(logs: &[CheckoutLog], items: &[Item], staff: &[Staff], now: EpochMillis) -> Self {
        let item_names: HashMap<&str, &str> =
            items.iter().map(|i| (i.id.as_str(), i.name.as_str())).collect();
        let staff_by_id: HashMap<&str, &Staff> = staff.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut by_item: HashMap<&str, ItemUsage> = HashMap::new();
        let mut by_staff: HashMap<&str, StaffActivity> = HashMap::new();
        let mut daily: BTreeMap<NaiveDate, u32> = BTreeMap::new();

        let mut open_checkouts = 0;
        let mut overdue_checkouts = 0;
        let mut closed = 0i64;
        let mut closed_total = 0i64;

        for log in logs {
            let open = log.is_open();
            let overdue = log.is_overdue(now);
            if open {
                open_checkouts += 1;
            }
            if overdue {
                overdue_checkouts += 1;
            }
            if let Some(duration) = log.duration_millis() {
                closed += 1;
                closed_total += duration;
            }

            let usage = by_item.entry(log.item_id.as_str()).or_insert_with(|| ItemUsage {
                item_id: log.item_id.clone(),
                item_name: item_names
                    .get(log.item_id.as_str())
                    .copied()
                    .unwrap_or(UNKNOWN)
                    .to_string(),
                checkouts: 0,
                currently_out: false,
            });
            usage.checkouts += 1;
            usage.currently_out |= open;

            let activity = by_staff.entry(log.staff_id.as_str()).or_insert_with(|| {
                let member = staff_by_id.get(log.staff_id.as_str());
                StaffActivity {
                    staff_id: log.staff_id.clone(),
                    staff_name: member.map_or(UNKNOWN, |s| s.name.as_str()).to_string(),
                    department: member.map_or(UNKNOWN, |s| s.department.as_str()).to_string(),
                    checkouts: 0,
                    open: 0,
                    overdue: 0,
                }
            });
            activity.checkouts += 1;
            activity.open += u32::from(open);
            activity.overdue += u32::from(overdue);

            if let Some(date) = day_of(log.checkout_time) {
                *daily.entry(date).or_default() += 1;
            }
        }

        let mut by_item: Vec<ItemUsage> = by_item.into_values().collect();
        by_item.sort_by(|a, b| {
            b.checkouts
                .cmp(&a.checkouts)
                .then_with(|| a.item_name.cmp(&b.item_name))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        let mut by_staff: Vec<StaffActivity> = by_staff.into_values().collect();
        by_staff.sort_by(|a, b| {
            b.checkouts
                .cmp(&a.checkouts)
                .then_with(|| a.staff_name.cmp(&b.staff_name))
                .then_with(|| a.staff_id.cmp(&b.staff_id))
        });

        CheckoutReport {
            generated_at: now,
            total_checkouts: logs.len() as u32,
            open_checkouts,
            overdue_checkouts,
            average_duration_millis: (closed > 0).then(|| closed_total / closed),
            by_item,
            by_staff,
            daily: daily
                .into_iter()
                .map(|(date, checkouts)| DailyCount { date, checkouts })
                .collect(),
        }
    }

    /// Pretty-printed JSON for export.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn day_of(millis: EpochMillis) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400_000;

    #[test]
    fn test_empty_report() {
        let report = CheckoutReport::build(&[], &[], &[], 0);
        assert_eq!(report.total_checkouts, 0);
        assert_eq!(report.average_duration_millis, None);
        assert!(report.by_item.is_empty());
        assert!(report.daily.is_empty());
    }

    #[test]
    fn test_report_aggregates() {
        let drill = Item::new("Drill", "Tools");
        let saw = Item::new("Saw", "Tools");
        let kim = Staff::new("Kim", "Workshop");
        let lee = Staff::new("Lee", "Facilities");

        let mut returned = CheckoutLog::open(&drill.id, &kim.id, 0, Some(DAY));
        returned.checkin_time = Some(DAY / 2);
        let overdue = CheckoutLog::open(&drill.id, &lee.id, DAY, Some(DAY + 1_000));
        let open = CheckoutLog::open(&saw.id, &kim.id, DAY + 5, None);

        let now = 2 * DAY;
        let report = CheckoutReport::build(
            &[returned, overdue, open],
            &[drill.clone(), saw],
            &[kim.clone(), lee],
            now,
        );

        assert_eq!(report.total_checkouts, 3);
        assert_eq!(report.open_checkouts, 2);
        assert_eq!(report.overdue_checkouts, 1);
        assert_eq!(report.average_duration_millis, Some(DAY / 2));

        assert_eq!(report.by_item[0].item_id, drill.id);
        assert_eq!(report.by_item[0].checkouts, 2);
        assert!(report.by_item[0].currently_out);

        assert_eq!(report.by_staff[0].staff_id, kim.id);
        assert_eq!(report.by_staff[0].checkouts, 2);
        assert_eq!(report.by_staff[0].open, 1);

        assert_eq!(report.daily.len(), 2);
        assert_eq!(report.daily[0].checkouts, 1);
        assert_eq!(report.daily[1].checkouts, 2);
    }

    #[test]
    fn test_unknown_references() {
        let log = CheckoutLog::open("gone-item", "gone-staff", 0, None);
        let report = CheckoutReport::build(&[log], &[], &[], 1);

        assert_eq!(report.by_item[0].item_name, UNKNOWN);
        assert_eq!(report.by_staff[0].department, UNKNOWN);
        assert!(report.to_json_pretty().unwrap().contains("\"total_checkouts\": 1"));
    }
}
