//! File output of a pipeline run: one CSV per relation plus a JSON recap.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use touchline_core::chains::ChainRow;
use touchline_core::paths::ConversionPath;
use touchline_core::pipeline::PipelineOutput;
use touchline_core::stats::{ChannelStats, ModelInputRow};
use touchline_core::touchpoint::AttributionEvent;

pub const ATTRIBUTION_EVENTS_FILE: &str = "attribution_events.csv";
pub const CHAINS_FILE: &str = "attribution_chains.csv";
pub const PATHS_FILE: &str = "conversion_paths.csv";
pub const CHANNEL_STATS_FILE: &str = "channel_stats.csv";
pub const MODEL_INPUT_FILE: &str = "model_input.csv";
pub const PERIMETER_FILE: &str = "perimeter.json";

/// Prefix values that spreadsheet applications would evaluate as formulas.
pub fn sanitize_csv_field(val: &str) -> Cow<'_, str> {
    if val.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        Cow::Owned(format!("'{val}"))
    } else {
        Cow::Borrowed(val)
    }
}

fn text(val: &str) -> String {
    sanitize_csv_field(val).into_owned()
}

fn opt_num(val: Option<f64>) -> String {
    val.map(|v| v.to_string()).unwrap_or_default()
}

/// Write every output of `output` into `dir`, creating it if needed.
/// Returns the written paths.
///
/// `attribution_events.csv` and `attribution_chains.csv` feed the model and
/// carry values verbatim; the formula guard applies to the report files.
pub fn write_outputs(dir: &Path, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let written = vec![
        write_attribution_events(&dir.join(ATTRIBUTION_EVENTS_FILE), &output.attribution_events)?,
        write_chains(&dir.join(CHAINS_FILE), &output.chains)?,
        write_paths(&dir.join(PATHS_FILE), &output.paths)?,
        write_channel_stats(&dir.join(CHANNEL_STATS_FILE), &output.channel_stats)?,
        write_model_input(&dir.join(MODEL_INPUT_FILE), &output.model_input)?,
        write_perimeter(&dir.join(PERIMETER_FILE), output)?,
    ];
    info!(dir = %dir.display(), files = written.len(), "Outputs written");
    Ok(written)
}

fn write_attribution_events(path: &Path, rows: &[AttributionEvent]) -> Result<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "session_id",
        "cookie_id",
        "is_engaged",
        "country_web",
        "f_tp",
        "event_timestamp",
        "source",
        "medium",
        "campaign",
        "source_medium",
        "channel_group",
        "f_converted",
        "total_transactions",
        "total_item_quantity",
        "session_revenue_usd",
        "first_event_timestamp",
        "last_event_timestamp",
    ])?;
    for row in rows {
        wtr.write_record([
            row.session_id.clone(),
            row.cookie_id.as_deref().unwrap_or_default().to_string(),
            row.is_engaged.to_string(),
            row.country_web.as_deref().unwrap_or_default().to_string(),
            row.f_tp.to_string(),
            row.event_timestamp.to_string(),
            row.source.clone(),
            row.medium.clone(),
            row.campaign.clone(),
            row.source_medium.clone(),
            row.channel_group.label().to_string(),
            row.f_converted.to_string(),
            row.total_transactions.to_string(),
            row.total_item_quantity.to_string(),
            row.session_revenue_usd.to_string(),
            row.first_event_timestamp.to_string(),
            row.last_event_timestamp.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}

fn write_chains(path: &Path, rows: &[ChainRow]) -> Result<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "cookie_id",
        "session_id",
        "country",
        "is_engaged",
        "source",
        "medium",
        "campaign",
        "source_medium",
        "channel_group",
        "event_timestamp",
        "f_converted",
        "total_transactions",
        "total_item_quantity",
        "session_revenue_usd",
        "first_event_timestamp",
        "last_event_timestamp",
    ])?;
    for row in rows {
        wtr.write_record([
            row.cookie_id.clone(),
            row.session_id.clone(),
            row.country.as_deref().unwrap_or_default().to_string(),
            row.is_engaged.to_string(),
            row.source.clone(),
            row.medium.clone(),
            row.campaign.clone(),
            row.source_medium.clone(),
            row.channel_group.label().to_string(),
            row.event_timestamp.to_string(),
            row.f_converted.to_string(),
            row.total_transactions.to_string(),
            row.total_item_quantity.to_string(),
            row.session_revenue_usd.to_string(),
            row.first_event_timestamp.to_string(),
            row.last_event_timestamp.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}

fn write_paths(path: &Path, paths: &[ConversionPath]) -> Result<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "customer_id",
        "conversion_id",
        "path",
        "chain_len",
        "first_event",
        "purchase_date",
        "chain_duration_days",
        "purchase_value",
    ])?;
    for p in paths {
        wtr.write_record([
            text(&p.customer_id),
            text(&p.conversion_id),
            p.path_string(),
            p.chain_len().to_string(),
            p.first_event.format("%Y-%m-%d").to_string(),
            p.purchase_date.format("%Y-%m-%d").to_string(),
            p.chain_duration_days().to_string(),
            p.purchase_value.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}

fn write_channel_stats(path: &Path, rows: &[ChannelStats]) -> Result<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "channel_name",
        "nr_appearances",
        "nr_chains",
        "nr_mono_touch_chains",
        "nr_first_touch_chains",
        "first_touch_chains_value",
        "nr_last_touch_chains",
        "last_touch_chains_value",
        "nr_assisted_chains",
        "assisted_chains_value",
        "mean_chain_len",
        "assisted_per_last_touch",
        "first_per_last_touch",
    ])?;
    for row in rows {
        wtr.write_record([
            row.channel_name.label().to_string(),
            row.nr_appearances.to_string(),
            row.nr_chains.to_string(),
            row.nr_mono_touch_chains.to_string(),
            row.nr_first_touch_chains.to_string(),
            row.first_touch_chains_value.to_string(),
            row.nr_last_touch_chains.to_string(),
            row.last_touch_chains_value.to_string(),
            row.nr_assisted_chains.to_string(),
            row.assisted_chains_value.to_string(),
            row.mean_chain_len.to_string(),
            opt_num(row.assisted_per_last_touch),
            opt_num(row.first_per_last_touch),
        ])?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}

fn write_model_input(path: &Path, rows: &[ModelInputRow]) -> Result<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["path", "nr_chains", "total_revenue"])?;
    for row in rows {
        wtr.write_record([
            row.path.clone(),
            row.nr_chains.to_string(),
            row.total_revenue.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}

/// Window of the run and the perimeter recap (`null` without conversions).
fn write_perimeter(path: &Path, output: &PipelineOutput) -> Result<PathBuf> {
    let body = serde_json::json!({
        "window": output.window,
        "candidate_start": output.window.candidate_start(),
        "perimeter": output.perimeter,
    });
    std::fs::write(path, serde_json::to_vec_pretty(&body)?)?;
    Ok(path.to_path_buf())
}
