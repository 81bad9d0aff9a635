use serde::{Deserialize, Serialize};

use crate::channel::ChannelGroup;
use crate::dedup::ClassifiedOrigin;
use crate::session::Session;

/// One row of the `attribution_events` relation: a (session, channel group)
/// touchpoint enriched with its session aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionEvent {
    pub session_id: String,
    pub cookie_id: Option<String>,
    pub is_engaged: bool,
    pub country_web: Option<String>,
    /// At least one origin behind this touchpoint was explicit.
    pub f_tp: bool,
    pub event_timestamp: i64,
    pub source: String,
    pub medium: String,
    pub campaign: String,
    pub source_medium: String,
    pub channel_group: ChannelGroup,
    pub f_converted: bool,
    pub total_transactions: i64,
    pub total_item_quantity: i64,
    pub session_revenue_usd: f64,
    pub first_event_timestamp: i64,
    pub last_event_timestamp: i64,
}

impl AttributionEvent {
    pub fn new(session: &Session, touch: ClassifiedOrigin) -> Self {
        let source_medium = touch.origin.source_medium();
        Self {
            session_id: touch.session_id,
            cookie_id: session.cookie_id.clone(),
            is_engaged: session.is_engaged,
            country_web: session.country_web.clone(),
            f_tp: touch.origin.is_explicit,
            event_timestamp: touch.origin.timestamp,
            source: touch.origin.source,
            medium: touch.origin.medium,
            campaign: touch.origin.campaign,
            source_medium,
            channel_group: touch.channel_group,
            f_converted: session.f_converted,
            total_transactions: session.total_transactions,
            total_item_quantity: session.total_item_quantity,
            session_revenue_usd: session.session_revenue_usd,
            first_event_timestamp: session.first_event_timestamp,
            last_event_timestamp: session.last_event_timestamp,
        }
    }

    /// Demote an early conversion to a plain touchpoint.
    pub fn clear_conversion(&mut self) {
        self.f_converted = false;
        self.total_transactions = 0;
        self.total_item_quantity = 0;
        self.session_revenue_usd = 0.0;
    }
}
