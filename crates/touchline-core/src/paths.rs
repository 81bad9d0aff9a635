//! Conversion paths: the channel sequence behind each purchase.
//!
//! Paths are cut from the sorted chain rows. Two optional reshaping steps
//! follow: purchases a few days apart are merged into one path, and paths of
//! recent earlier purchases are prepended to later ones.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::chains::ChainRow;
use crate::channel::ChannelGroup;
use crate::error::CoreError;
use crate::event::local_date;

pub const PATH_SEPARATOR: &str = " > ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPath {
    pub customer_id: String,
    /// `<session_id>.<YYYYMMDD>` of the converting session.
    pub conversion_id: String,
    /// Last event of the converting session, microseconds since the epoch.
    pub conversion_timestamp: i64,
    pub channels: Vec<ChannelGroup>,
    pub first_event: NaiveDate,
    pub purchase_date: NaiveDate,
    pub purchase_value: f64,
}

impl ConversionPath {
    pub fn chain_len(&self) -> usize {
        self.channels.len()
    }

    pub fn chain_duration_days(&self) -> i64 {
        (self.purchase_date - self.first_event).num_days()
    }

    /// Channel labels joined with `" > "`, the format expected by Markov
    /// attribution libraries.
    pub fn path_string(&self) -> String {
        self.channels
            .iter()
            .map(ChannelGroup::label)
            .collect::<Vec<_>>()
            .join(PATH_SEPARATOR)
    }
}

/// Cut chain rows into one path per converting session.
///
/// `rows` must be ordered as returned by [`crate::chains::build_chains`].
/// Walking each customer's rows in order, every channel is appended to the
/// open path; the last row of a converted session closes it. Rows after a
/// customer's last conversion never close a path and are dropped.
pub fn assemble_paths(rows: &[ChainRow], tz: Tz) -> Result<Vec<ConversionPath>, CoreError> {
    let mut paths = Vec::new();
    let mut channels: Vec<ChannelGroup> = Vec::new();
    let mut first_event: Option<NaiveDate> = None;

    for (idx, row) in rows.iter().enumerate() {
        let next = rows.get(idx + 1);
        if idx > 0 && rows[idx - 1].cookie_id != row.cookie_id {
            channels.clear();
            first_event = None;
        }

        channels.push(row.channel_group);
        let first = *first_event.get_or_insert_with(|| local_date(row.first_event_timestamp, tz));

        let session_ends = next
            .map(|n| n.session_id != row.session_id || n.cookie_id != row.cookie_id)
            .unwrap_or(true);
        if row.f_converted && session_ends {
            let purchase_date = local_date(row.last_event_timestamp, tz);
            paths.push(ConversionPath {
                customer_id: row.cookie_id.clone(),
                conversion_id: format!("{}.{}", row.session_id, purchase_date.format("%Y%m%d")),
                conversion_timestamp: row.last_event_timestamp,
                channels: std::mem::take(&mut channels),
                first_event: first,
                purchase_date,
                purchase_value: row.session_revenue_usd,
            });
            first_event = None;
        }
    }

    let converted_sessions: BTreeSet<&str> = rows
        .iter()
        .filter(|r| r.f_converted)
        .map(|r| r.session_id.as_str())
        .collect();
    let conversion_ids: BTreeSet<&str> = paths.iter().map(|p| p.conversion_id.as_str()).collect();
    if converted_sessions.len() != paths.len() || conversion_ids.len() != paths.len() {
        return Err(CoreError::Consistency(format!(
            "{} converted sessions produced {} paths ({} distinct conversion ids)",
            converted_sessions.len(),
            paths.len(),
            conversion_ids.len()
        )));
    }

    Ok(paths)
}

fn by_customer(paths: Vec<ConversionPath>) -> BTreeMap<String, Vec<ConversionPath>> {
    let mut customers: BTreeMap<String, Vec<ConversionPath>> = BTreeMap::new();
    for path in paths {
        customers
            .entry(path.customer_id.clone())
            .or_default()
            .push(path);
    }
    for customer_paths in customers.values_mut() {
        customer_paths.sort_by_key(|p| p.conversion_timestamp);
    }
    customers
}

/// Merge purchases of the same customer that follow each other within
/// `max_gap_days`.
///
/// A new group starts whenever a purchase date is more than `max_gap_days`
/// after the previous purchase, so a run of closely spaced purchases merges
/// even when its ends are further apart. Each group keeps the last conversion
/// id and timestamp, the earliest first event, the latest purchase date, the
/// summed value and the concatenated channels.
pub fn merge_near_purchases(
    paths: Vec<ConversionPath>,
    max_gap_days: u32,
) -> Result<Vec<ConversionPath>, CoreError> {
    let max_gap = i64::from(max_gap_days);
    let mut merged = Vec::new();

    for (_, customer_paths) in by_customer(paths) {
        let mut current: Option<ConversionPath> = None;
        for path in customer_paths {
            current = Some(match current.take() {
                Some(mut group)
                    if (path.purchase_date - group.purchase_date).num_days() <= max_gap =>
                {
                    group.conversion_id = path.conversion_id;
                    group.conversion_timestamp = path.conversion_timestamp;
                    group.first_event = group.first_event.min(path.first_event);
                    group.purchase_date = group.purchase_date.max(path.purchase_date);
                    group.purchase_value += path.purchase_value;
                    group.channels.extend(path.channels);
                    group
                }
                Some(group) => {
                    merged.push(group);
                    path
                }
                None => path,
            });
        }
        merged.extend(current);
    }

    let ids: BTreeSet<&str> = merged.iter().map(|p| p.conversion_id.as_str()).collect();
    if ids.len() != merged.len() {
        return Err(CoreError::Consistency(
            "merged paths share a conversion id".to_string(),
        ));
    }
    Ok(merged)
}

/// Prefix every path with the channels of the same customer's earlier
/// purchases made at most `window_days` before it, oldest first.
///
/// Purchases stay separate: the number of paths does not change.
pub fn concatenate_recent_paths(paths: Vec<ConversionPath>, window_days: u32) -> Vec<ConversionPath> {
    let window = i64::from(window_days);
    let mut out = Vec::new();

    for (_, customer_paths) in by_customer(paths) {
        for path in &customer_paths {
            let mut channels: Vec<ChannelGroup> = customer_paths
                .iter()
                .filter(|earlier| {
                    earlier.purchase_date < path.purchase_date
                        && (path.purchase_date - earlier.purchase_date).num_days() <= window
                })
                .flat_map(|earlier| earlier.channels.iter().copied())
                .collect();
            channels.extend(path.channels.iter().copied());
            out.push(ConversionPath {
                channels,
                ..path.clone()
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MICROS_PER_DAY;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn at(day: NaiveDate) -> i64 {
        day.and_hms_opt(10, 0, 0)
            .expect("valid time")
            .and_utc()
            .timestamp_micros()
    }

    fn row(cookie: &str, session: &str, channel: ChannelGroup, start: i64, revenue: Option<f64>) -> ChainRow {
        ChainRow {
            cookie_id: cookie.to_string(),
            session_id: session.to_string(),
            country: None,
            is_engaged: true,
            source: "s".to_string(),
            medium: "m".to_string(),
            campaign: "(none)".to_string(),
            source_medium: "s / m".to_string(),
            channel_group: channel,
            event_timestamp: start,
            f_converted: revenue.is_some(),
            total_transactions: i64::from(revenue.is_some()),
            total_item_quantity: 1,
            session_revenue_usd: revenue.unwrap_or(0.0),
            first_event_timestamp: start,
            last_event_timestamp: start + 1_000_000,
        }
    }

    fn path(customer: &str, id: &str, purchase: NaiveDate, channels: &[ChannelGroup], value: f64) -> ConversionPath {
        ConversionPath {
            customer_id: customer.to_string(),
            conversion_id: id.to_string(),
            conversion_timestamp: at(purchase),
            channels: channels.to_vec(),
            first_event: purchase,
            purchase_date: purchase,
            purchase_value: value,
        }
    }

    #[test]
    fn paths_close_at_end_of_converted_session() {
        let d1 = at(date(2024, 6, 1));
        let rows = vec![
            row("c1", "s1", ChannelGroup::Email, d1, None),
            row("c1", "s2", ChannelGroup::OrganicSearch, d1 + MICROS_PER_DAY, Some(50.0)),
            row("c1", "s2", ChannelGroup::PaidSearch, d1 + MICROS_PER_DAY + 5, Some(50.0)),
            row("c1", "s3", ChannelGroup::Direct, d1 + 3 * MICROS_PER_DAY, Some(20.0)),
            row("c1", "s4", ChannelGroup::Referral, d1 + 4 * MICROS_PER_DAY, None),
            row("c2", "s5", ChannelGroup::Display, d1, Some(10.0)),
        ];

        let paths = assemble_paths(&rows, Tz::UTC).expect("paths");
        assert_eq!(paths.len(), 3);
        assert_eq!(
            paths[0].channels,
            vec![ChannelGroup::Email, ChannelGroup::OrganicSearch, ChannelGroup::PaidSearch]
        );
        assert_eq!(paths[0].conversion_id, "s2.20240602");
        assert_eq!(paths[0].first_event, date(2024, 6, 1));
        assert_eq!(paths[0].purchase_value, 50.0);
        assert_eq!(paths[0].chain_duration_days(), 1);
        assert_eq!(paths[1].channels, vec![ChannelGroup::Direct]);
        assert_eq!(paths[1].first_event, date(2024, 6, 4));
        assert_eq!(paths[2].customer_id, "c2");
        assert_eq!(paths[2].path_string(), "Display");
        assert_eq!(paths[0].path_string(), "Email > Organic Search > Paid Search");
    }

    #[test]
    fn close_purchases_merge_into_one_path() {
        let paths = vec![
            path("c1", "a", date(2024, 6, 1), &[ChannelGroup::Email], 10.0),
            path("c1", "b", date(2024, 6, 3), &[ChannelGroup::Direct], 5.0),
            path("c1", "c", date(2024, 6, 6), &[ChannelGroup::Referral], 1.0),
            path("c1", "d", date(2024, 6, 20), &[ChannelGroup::PaidSearch], 7.0),
        ];
        let merged = merge_near_purchases(paths, 3).expect("merge");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].conversion_id, "c");
        assert_eq!(merged[0].purchase_value, 16.0);
        assert_eq!(merged[0].first_event, date(2024, 6, 1));
        assert_eq!(merged[0].purchase_date, date(2024, 6, 6));
        assert_eq!(
            merged[0].channels,
            vec![ChannelGroup::Email, ChannelGroup::Direct, ChannelGroup::Referral]
        );
        assert_eq!(merged[1].conversion_id, "d");
    }

    #[test]
    fn recent_paths_are_prepended_oldest_first() {
        let paths = vec![
            path("c1", "a", date(2024, 6, 1), &[ChannelGroup::Email], 10.0),
            path("c1", "b", date(2024, 6, 5), &[ChannelGroup::Direct], 5.0),
            path("c1", "c", date(2024, 6, 9), &[ChannelGroup::Referral], 1.0),
            path("c1", "d", date(2024, 6, 30), &[ChannelGroup::PaidSearch], 7.0),
            path("c2", "e", date(2024, 6, 8), &[ChannelGroup::Display], 3.0),
        ];
        let out = concatenate_recent_paths(paths, 10);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].channels, vec![ChannelGroup::Email]);
        assert_eq!(out[1].channels, vec![ChannelGroup::Email, ChannelGroup::Direct]);
        assert_eq!(
            out[2].channels,
            vec![ChannelGroup::Email, ChannelGroup::Direct, ChannelGroup::Referral]
        );
        assert_eq!(out[3].channels, vec![ChannelGroup::PaidSearch]);
        assert_eq!(out[4].channels, vec![ChannelGroup::Display]);
        assert_eq!(out[2].purchase_value, 1.0, "values are not summed");
    }
}
