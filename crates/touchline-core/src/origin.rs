use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::RawEvent;

/// Placeholder for a missing medium, campaign, or explicit source.
pub const NOT_PRESENT: &str = "(none)";
/// Placeholder for a missing first-touch source.
pub const DIRECT_SOURCE: &str = "(direct)";

/// A resolved touchpoint of a session, before channel classification.
///
/// Fields are trimmed and lower-cased, which is what the channel classifier
/// expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub source: String,
    pub medium: String,
    pub campaign: String,
    /// Microseconds since the Unix epoch of the earliest event with this triple.
    pub timestamp: i64,
    /// Collected from UTM parameters on the session's own events rather than
    /// from the user's first-touch attribution.
    pub is_explicit: bool,
}

impl Origin {
    /// `"source / medium"`, the composite shown in reports.
    pub fn source_medium(&self) -> String {
        format!("{} / {}", self.source, self.medium)
    }
}

fn normalize(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

/// Explicit (source, medium, campaign) of one event, `None` when the event
/// carries neither a source nor a medium.
///
/// Paid search clicks sometimes reach the collector with a gclid but without
/// a medium; a `google` source with a click id is therefore forced to
/// `google / cpc`.
fn explicit_triple(event: &RawEvent) -> Option<(String, String, String)> {
    let source = normalize(event.source.as_deref());
    let mut medium = normalize(event.medium.as_deref());
    let has_click_id = event
        .click_id
        .as_deref()
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);

    if source.as_deref() == Some("google") && has_click_id {
        medium = Some("cpc".to_string());
    }
    if source.is_none() && medium.is_none() {
        return None;
    }

    Some((
        source.unwrap_or_else(|| NOT_PRESENT.to_string()),
        medium.unwrap_or_else(|| NOT_PRESENT.to_string()),
        normalize(event.campaign.as_deref()).unwrap_or_else(|| NOT_PRESENT.to_string()),
    ))
}

/// Resolve the origins of one session.
///
/// With at least one explicit event, returns one origin per distinct explicit
/// triple stamped with its earliest timestamp. Otherwise returns the single
/// first-touch origin of the earliest event. The result is sorted by
/// timestamp and is empty only for an empty session.
pub fn resolve_origins(events: &[&RawEvent]) -> Vec<Origin> {
    let mut explicit: BTreeMap<(String, String, String), i64> = BTreeMap::new();
    for event in events {
        if let Some(triple) = explicit_triple(event) {
            explicit
                .entry(triple)
                .and_modify(|ts| *ts = (*ts).min(event.event_timestamp))
                .or_insert(event.event_timestamp);
        }
    }

    if !explicit.is_empty() {
        let mut origins: Vec<Origin> = explicit
            .into_iter()
            .map(|((source, medium, campaign), timestamp)| Origin {
                source,
                medium,
                campaign,
                timestamp,
                is_explicit: true,
            })
            .collect();
        // Stable sort keeps the triple order for equal timestamps.
        origins.sort_by_key(|o| o.timestamp);
        return origins;
    }

    let Some(earliest) = events.iter().min_by_key(|e| e.event_timestamp) else {
        return Vec::new();
    };
    vec![Origin {
        source: normalize(earliest.first_source.as_deref())
            .unwrap_or_else(|| DIRECT_SOURCE.to_string()),
        medium: normalize(earliest.first_medium.as_deref())
            .unwrap_or_else(|| NOT_PRESENT.to_string()),
        campaign: normalize(earliest.first_campaign.as_deref())
            .unwrap_or_else(|| NOT_PRESENT.to_string()),
        timestamp: earliest.event_timestamp,
        is_explicit: false,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: i64, source: Option<&str>, medium: Option<&str>) -> RawEvent {
        RawEvent {
            cookie_id: Some("c".to_string()),
            session_number: Some(1),
            event_name: "page_view".to_string(),
            event_timestamp: ts,
            source: source.map(str::to_string),
            medium: medium.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn google_with_click_id_is_forced_to_cpc() {
        let mut e = event(10, Some("Google"), None);
        e.click_id = Some("EAIaIQobChMI".to_string());
        let origins = resolve_origins(&[&e]);
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0].source, "google");
        assert_eq!(origins[0].medium, "cpc");
        assert_eq!(origins[0].campaign, NOT_PRESENT);
        assert!(origins[0].is_explicit);
    }

    #[test]
    fn explicit_triples_keep_earliest_timestamp() {
        let a = event(500, Some("newsletter"), Some("email"));
        let b = event(300, Some("newsletter"), Some("email"));
        let c = event(400, Some("bing"), Some("organic"));
        let origins = resolve_origins(&[&a, &b, &c]);
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0].source, "newsletter");
        assert_eq!(origins[0].timestamp, 300);
        assert_eq!(origins[1].source, "bing");
    }

    #[test]
    fn medium_alone_makes_an_event_explicit() {
        let e = event(1, None, Some("referral"));
        let origins = resolve_origins(&[&e]);
        assert_eq!(origins[0].source, NOT_PRESENT);
        assert_eq!(origins[0].medium, "referral");
        assert!(origins[0].is_explicit);
    }

    #[test]
    fn fallback_uses_first_touch_of_earliest_event() {
        let mut late = event(900, None, None);
        late.first_source = Some("bing".to_string());
        let mut early = event(100, None, None);
        early.first_source = None;
        early.first_medium = None;
        let origins = resolve_origins(&[&late, &early]);
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0].source, DIRECT_SOURCE);
        assert_eq!(origins[0].medium, NOT_PRESENT);
        assert_eq!(origins[0].timestamp, 100);
        assert!(!origins[0].is_explicit);
    }

    #[test]
    fn explicit_sessions_never_mix_in_fallback() {
        let mut untagged = event(1, None, None);
        untagged.first_source = Some("facebook".to_string());
        untagged.first_medium = Some("social".to_string());
        let tagged = event(2, Some("google"), Some("organic"));
        let origins = resolve_origins(&[&untagged, &tagged]);
        assert_eq!(origins.len(), 1);
        assert!(origins.iter().all(|o| o.is_explicit));
    }

    #[test]
    fn empty_session_has_no_origin() {
        assert!(resolve_origins(&[]).is_empty());
    }
}
