//! End-to-end run: raw events to attribution events, chains, paths and
//! their summaries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};

use crate::chains::{build_chains, ChainRow};
use crate::channel::ChannelClassifier;
use crate::config::{AttributionWindow, PipelineConfig};
use crate::dedup::{dedup_session_channels, ClassifiedOrigin};
use crate::error::CoreError;
use crate::event::{local_date, RawEvent};
use crate::origin::resolve_origins;
use crate::paths::{
    assemble_paths, concatenate_recent_paths, merge_near_purchases, ConversionPath,
};
use crate::session::{aggregate_session, group_by_session};
use crate::stats::{
    channel_stats, model_input, perimeter_recap, ChannelStats, ModelInputRow, PerimeterRecap,
};
use crate::store::AttributionStore;
use crate::touchpoint::AttributionEvent;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub window: AttributionWindow,
    pub attribution_events: Vec<AttributionEvent>,
    pub chains: Vec<ChainRow>,
    /// Final paths: concatenated when enabled, merged otherwise.
    pub paths: Vec<ConversionPath>,
    pub channel_stats: Vec<ChannelStats>,
    pub perimeter: Option<PerimeterRecap>,
    pub model_input: Vec<ModelInputRow>,
}

/// Build one attribution event per (session, channel group).
///
/// Out-of-scope events (no consent, internal names) are dropped first, so a
/// session made only of such events produces nothing.
pub fn build_attribution_events(
    events: &[RawEvent],
    classifier: &ChannelClassifier,
) -> Result<Vec<AttributionEvent>, CoreError> {
    let (sessions, skipped) = group_by_session(events.iter().filter(|e| e.is_in_scope()));
    if skipped > 0 {
        warn!(skipped, "Events without a session id left out of attribution");
    }

    let mut out = Vec::new();
    for (session_id, session_events) in &sessions {
        let session = aggregate_session(session_id, session_events).ok_or_else(|| {
            CoreError::Consistency(format!("session {session_id} has no events"))
        })?;

        let origins = resolve_origins(session_events);
        if origins.is_empty() {
            return Err(CoreError::Consistency(format!(
                "session {session_id} resolved no origin"
            )));
        }
        let explicit = origins.iter().filter(|o| o.is_explicit).count();
        if explicit != 0 && explicit != origins.len() {
            return Err(CoreError::Consistency(format!(
                "session {session_id} mixes explicit and first-touch origins"
            )));
        }

        let classified = origins
            .into_iter()
            .map(|origin| ClassifiedOrigin::classify(session_id, origin, classifier))
            .collect();
        out.extend(
            dedup_session_channels(classified)
                .into_iter()
                .map(|touch| AttributionEvent::new(&session, touch)),
        );
    }
    Ok(out)
}

/// Check the session-level invariants of the attribution events: one row per
/// (session, channel group), and a single last-event date and conversion flag
/// per session.
pub fn validate_attribution_events(events: &[AttributionEvent], tz: Tz) -> Result<(), CoreError> {
    let mut seen = BTreeSet::new();
    let mut per_session: BTreeMap<&str, (BTreeSet<NaiveDate>, BTreeSet<bool>)> = BTreeMap::new();

    for event in events {
        if !seen.insert((event.session_id.as_str(), event.channel_group)) {
            return Err(CoreError::Consistency(format!(
                "session {} has channel {} twice",
                event.session_id, event.channel_group
            )));
        }
        let entry = per_session.entry(event.session_id.as_str()).or_default();
        entry.0.insert(local_date(event.last_event_timestamp, tz));
        entry.1.insert(event.f_converted);
    }

    for (session_id, (dates, flags)) in per_session {
        if dates.len() != 1 {
            return Err(CoreError::Consistency(format!(
                "session {session_id} has {} distinct last event dates",
                dates.len()
            )));
        }
        if flags.len() != 1 {
            return Err(CoreError::Consistency(format!(
                "session {session_id} is both converted and not converted"
            )));
        }
    }
    Ok(())
}

/// Run the whole pipeline in memory.
///
/// `run_date` only matters when `config.reference_date` is unset and for the
/// perimeter recap.
pub fn run(
    events: &[RawEvent],
    classifier: &ChannelClassifier,
    config: &PipelineConfig,
    run_date: NaiveDate,
) -> Result<PipelineOutput, CoreError> {
    let window = config.window(run_date)?;
    let tz = config.timezone;
    info!(
        conversion_start = %window.conversion_start,
        conversion_end = %window.conversion_end,
        candidate_start = %window.candidate_start(),
        lookback_days = window.lookback_days,
        "Attribution window resolved"
    );

    let attribution_events = build_attribution_events(events, classifier)?;
    validate_attribution_events(&attribution_events, tz)?;
    info!(
        events = events.len(),
        attribution_events = attribution_events.len(),
        "Attribution events built"
    );

    let chains = build_chains(&attribution_events, &window, tz);
    let raw_paths = assemble_paths(&chains, tz)?;
    info!(chain_rows = chains.len(), paths = raw_paths.len(), "Chains built");

    let merged = merge_near_purchases(raw_paths.clone(), config.merge_purchase_days)?;
    info!(
        paths = merged.len(),
        max_gap_days = config.merge_purchase_days,
        "Near purchases merged"
    );
    let paths = if config.concat_chains {
        let concatenated = concatenate_recent_paths(raw_paths, config.concat_chain_days);
        info!(
            paths = concatenated.len(),
            window_days = config.concat_chain_days,
            "Recent paths concatenated"
        );
        concatenated
    } else {
        merged
    };

    let channel_stats = channel_stats(&paths);
    let perimeter = perimeter_recap(&paths, run_date);
    let model_input = model_input(&paths);
    if perimeter.is_none() {
        warn!("No conversion in the conversion period");
    }

    Ok(PipelineOutput {
        window,
        attribution_events,
        chains,
        paths,
        channel_stats,
        perimeter,
        model_input,
    })
}

/// Load from `store`, run, and publish the three relations.
///
/// Nothing is published when the run fails.
pub async fn execute<S: AttributionStore + ?Sized>(
    store: &S,
    config: &PipelineConfig,
    run_date: NaiveDate,
) -> anyhow::Result<PipelineOutput> {
    let categories = store.load_source_categories().await?;
    let classifier = ChannelClassifier::new(categories)?;
    let events = store.load_events().await?;
    info!(events = events.len(), "Events loaded");

    let output = run(&events, &classifier, config, run_date)?;

    store
        .publish_attribution_events(&output.attribution_events)
        .await?;
    store.publish_chains(&output.chains).await?;
    store.publish_paths(&output.paths).await?;
    info!(
        attribution_events = output.attribution_events.len(),
        chain_rows = output.chains.len(),
        paths = output.paths.len(),
        "Attribution tables published"
    );
    Ok(output)
}
