use std::collections::{BTreeMap, BTreeSet};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelGroup;
use crate::config::AttributionWindow;
use crate::event::local_date;
use crate::touchpoint::AttributionEvent;

/// One row of the `attribution_chains` relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRow {
    pub cookie_id: String,
    pub session_id: String,
    /// Most recent web country of the customer inside the candidate range.
    pub country: Option<String>,
    pub is_engaged: bool,
    pub source: String,
    pub medium: String,
    pub campaign: String,
    pub source_medium: String,
    pub channel_group: ChannelGroup,
    pub event_timestamp: i64,
    pub f_converted: bool,
    pub total_transactions: i64,
    pub total_item_quantity: i64,
    pub session_revenue_usd: f64,
    pub first_event_timestamp: i64,
    pub last_event_timestamp: i64,
}

impl ChainRow {
    fn from_event(cookie_id: &str, country: Option<String>, event: &AttributionEvent) -> Self {
        Self {
            cookie_id: cookie_id.to_string(),
            session_id: event.session_id.clone(),
            country,
            is_engaged: event.is_engaged,
            source: event.source.clone(),
            medium: event.medium.clone(),
            campaign: event.campaign.clone(),
            source_medium: event.source_medium.clone(),
            channel_group: event.channel_group,
            event_timestamp: event.event_timestamp,
            f_converted: event.f_converted,
            total_transactions: event.total_transactions,
            total_item_quantity: event.total_item_quantity,
            session_revenue_usd: event.session_revenue_usd,
            first_event_timestamp: event.first_event_timestamp,
            last_event_timestamp: event.last_event_timestamp,
        }
    }
}

/// Select the touchpoints that lead to a conversion inside `window`.
///
/// - conversions: converted sessions whose first event falls in the
///   conversion period;
/// - candidates: touchpoints whose session started inside the candidate
///   range; conversions before the conversion period are demoted to plain
///   touchpoints so an old purchase is not attributed twice;
/// - a candidate is kept when some conversion of the same customer started
///   at or after it and less than `lookback_days` later.
///
/// Rows are sorted by customer, session end, session id, event time. The
/// session id only breaks ties between sessions ending at the same instant,
/// keeping each session's rows contiguous.
pub fn build_chains(
    events: &[AttributionEvent],
    window: &AttributionWindow,
    tz: Tz,
) -> Vec<ChainRow> {
    let lookback = window.lookback_micros();

    let mut conversions: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
    for event in events {
        let Some(cookie) = event.cookie_id.as_deref() else {
            continue;
        };
        if event.f_converted
            && window.in_conversion_period(local_date(event.first_event_timestamp, tz))
        {
            conversions
                .entry(cookie)
                .or_default()
                .insert(event.first_event_timestamp);
        }
    }

    let mut candidates: BTreeMap<&str, Vec<AttributionEvent>> = BTreeMap::new();
    for event in events {
        let Some(cookie) = event.cookie_id.as_deref() else {
            continue;
        };
        let date = local_date(event.first_event_timestamp, tz);
        if !window.in_candidate_range(date) {
            continue;
        }
        let mut candidate = event.clone();
        if date < window.conversion_start {
            candidate.clear_conversion();
        }
        candidates.entry(cookie).or_default().push(candidate);
    }

    let mut rows = Vec::new();
    for (cookie, customer_events) in &candidates {
        let Some(conversion_times) = conversions.get(cookie) else {
            continue;
        };

        let country = customer_events
            .iter()
            .filter(|e| e.country_web.is_some())
            .max_by_key(|e| (e.last_event_timestamp, e.event_timestamp))
            .and_then(|e| e.country_web.clone());

        for event in customer_events {
            let start = event.first_event_timestamp;
            // Smallest conversion at or after this session start.
            let credited = conversion_times
                .range(start..)
                .next()
                .map(|conversion| start > conversion - lookback)
                .unwrap_or(false);
            if credited {
                rows.push(ChainRow::from_event(cookie, country.clone(), event));
            }
        }
    }

    rows.sort_by(|a, b| {
        a.cookie_id
            .cmp(&b.cookie_id)
            .then(a.last_event_timestamp.cmp(&b.last_event_timestamp))
            .then(a.session_id.cmp(&b.session_id))
            .then(a.event_timestamp.cmp(&b.event_timestamp))
            .then(a.channel_group.cmp(&b.channel_group))
    });
    rows
}
