use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Event name that marks a completed transaction.
pub const PURCHASE_EVENT: &str = "purchase";

/// One tracked interaction, mirroring a row of the `events` table.
///
/// The session identifier is not stored: it is the composite of `cookie_id`
/// and `session_number`, see [`RawEvent::session_id`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub cookie_id: Option<String>,
    pub session_number: Option<i64>,
    pub event_name: String,
    /// Microseconds since the Unix epoch.
    pub event_timestamp: i64,
    pub session_engaged: Option<bool>,
    pub country: Option<String>,
    /// Traffic source collected on this very event (UTM parameters).
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    /// Paid search click identifier (gclid).
    pub click_id: Option<String>,
    /// Traffic source that first acquired the user.
    pub first_source: Option<String>,
    pub first_medium: Option<String>,
    pub first_campaign: Option<String>,
    pub item_quantity: Option<i64>,
    pub purchase_revenue: Option<f64>,
    /// `None` means the consent state was not recorded and counts as granted.
    pub consent: Option<bool>,
}

impl RawEvent {
    /// `<cookie_id>:<session_number>`; `None` when either is missing.
    ///
    /// The number never contains `:`, so the last `:` always splits the two
    /// parts and distinct pairs never share an id.
    pub fn session_id(&self) -> Option<String> {
        match (self.cookie_id.as_deref(), self.session_number) {
            (Some(cookie), Some(number)) if !cookie.is_empty() => Some(format!("{cookie}:{number}")),
            _ => None,
        }
    }

    pub fn is_purchase(&self) -> bool {
        self.event_name == PURCHASE_EVENT
    }

    /// Consent granted (or unspecified) and not an instrumentation event.
    pub fn is_in_scope(&self) -> bool {
        self.consent != Some(false) && !is_internal_event(&self.event_name)
    }
}

/// Tag-manager lifecycle events and underscore-prefixed debug events are
/// emitted by the tracking setup itself, not by the visitor.
pub fn is_internal_event(event_name: &str) -> bool {
    let name = event_name.trim();
    name.is_empty() || name.starts_with("gtm.") || name.starts_with('_')
}

/// Convert an epoch-microsecond timestamp to UTC. Out-of-range values clamp
/// to the epoch.
pub fn micros_to_utc(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

/// Calendar date of an epoch-microsecond timestamp in the reporting timezone.
pub fn local_date(micros: i64, tz: Tz) -> NaiveDate {
    micros_to_utc(micros).with_timezone(&tz).date_naive()
}

pub const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> RawEvent {
        RawEvent {
            cookie_id: Some("123.456".to_string()),
            session_number: Some(1700000000),
            event_name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn session_id_joins_cookie_and_number() {
        assert_eq!(event("page_view").session_id().as_deref(), Some("123.456:1700000000"));

        let mut anonymous = event("page_view");
        anonymous.cookie_id = None;
        assert_eq!(anonymous.session_id(), None);
    }

    #[test]
    fn session_id_keeps_overlapping_cookies_apart() {
        let mut a = event("page_view");
        a.cookie_id = Some("ab1".to_string());
        a.session_number = Some(23);
        let mut b = event("page_view");
        b.cookie_id = Some("ab12".to_string());
        b.session_number = Some(3);
        assert_ne!(a.session_id(), b.session_id());

        let mut negative = event("page_view");
        negative.cookie_id = Some("x-".to_string());
        negative.session_number = Some(3);
        let mut dashed = event("page_view");
        dashed.cookie_id = Some("x".to_string());
        dashed.session_number = Some(-3);
        assert_ne!(negative.session_id(), dashed.session_id());
    }

    #[test]
    fn consent_denied_and_internal_events_are_out_of_scope() {
        let mut denied = event("page_view");
        denied.consent = Some(false);
        assert!(!denied.is_in_scope());

        let mut granted = event("page_view");
        granted.consent = Some(true);
        assert!(granted.is_in_scope());

        assert!(event("page_view").is_in_scope(), "unspecified consent counts as granted");
        assert!(!event("gtm.js").is_in_scope());
        assert!(!event("_debug_ping").is_in_scope());
    }

    #[test]
    fn local_date_follows_reporting_timezone() {
        // 2024-03-31 23:30:00 UTC is already April 1st in Rome.
        let micros = 1_711_927_800_000_000;
        assert_eq!(local_date(micros, Tz::UTC), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(
            local_date(micros, chrono_tz::Europe::Rome),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
        );
    }
}
