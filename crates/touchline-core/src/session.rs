use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::RawEvent;

/// Session-level aggregate over all in-scope events sharing a session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub cookie_id: Option<String>,
    pub is_engaged: bool,
    pub country_web: Option<String>,
    pub f_converted: bool,
    pub total_transactions: i64,
    pub total_item_quantity: i64,
    pub session_revenue_usd: f64,
    pub first_event_timestamp: i64,
    pub last_event_timestamp: i64,
}

/// Group events by session id, keeping input order inside each session.
///
/// Events without a session id cannot be attributed and are left out; the
/// second element of the tuple counts them.
pub fn group_by_session<'a>(
    events: impl IntoIterator<Item = &'a RawEvent>,
) -> (BTreeMap<String, Vec<&'a RawEvent>>, usize) {
    let mut sessions: BTreeMap<String, Vec<&'a RawEvent>> = BTreeMap::new();
    let mut skipped = 0;
    for event in events {
        match event.session_id() {
            Some(session_id) => sessions.entry(session_id).or_default().push(event),
            None => skipped += 1,
        }
    }
    (sessions, skipped)
}

/// Collapse one session's events into a [`Session`].
///
/// Returns `None` for an empty slice. "Last" values (cookie, country) come
/// from the chronologically last event carrying one; among events with the
/// same timestamp the later one in input order wins.
pub fn aggregate_session(session_id: &str, events: &[&RawEvent]) -> Option<Session> {
    let first = events.first()?;

    let mut session = Session {
        session_id: session_id.to_string(),
        cookie_id: None,
        is_engaged: false,
        country_web: None,
        f_converted: false,
        total_transactions: 0,
        total_item_quantity: 0,
        session_revenue_usd: 0.0,
        first_event_timestamp: first.event_timestamp,
        last_event_timestamp: first.event_timestamp,
    };
    let mut cookie_seen_at = i64::MIN;
    let mut country_seen_at = i64::MIN;

    for event in events {
        let ts = event.event_timestamp;
        session.first_event_timestamp = session.first_event_timestamp.min(ts);
        session.last_event_timestamp = session.last_event_timestamp.max(ts);
        session.is_engaged |= event.session_engaged.unwrap_or(false);

        if let Some(cookie) = event.cookie_id.as_deref().filter(|c| !c.is_empty()) {
            if ts >= cookie_seen_at {
                session.cookie_id = Some(cookie.to_string());
                cookie_seen_at = ts;
            }
        }
        if let Some(country) = event.country.as_deref().filter(|c| !c.is_empty()) {
            if ts >= country_seen_at {
                session.country_web = Some(country.to_string());
                country_seen_at = ts;
            }
        }

        if event.is_purchase() {
            session.f_converted = true;
            session.total_transactions += 1;
            session.total_item_quantity += event.item_quantity.unwrap_or(0);
            session.session_revenue_usd += event.purchase_revenue.unwrap_or(0.0);
        }
    }

    Some(session)
}

/// Aggregate every session present in `events`, ordered by session id.
pub fn aggregate_sessions(events: &[RawEvent]) -> Vec<Session> {
    let (sessions, skipped) = group_by_session(events);
    if skipped > 0 {
        tracing::warn!(skipped, "Events without a session id left out of aggregation");
    }
    sessions
        .iter()
        .filter_map(|(session_id, events)| aggregate_session(session_id, events))
        .collect()
}
