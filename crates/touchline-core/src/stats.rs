use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::channel::ChannelGroup;
use crate::paths::ConversionPath;

/// Per-channel touch statistics over all conversion paths.
///
/// A first touch needs a path of at least two channels: a mono-touch path
/// only counts as a last touch. Any position before the last is an assist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStats {
    pub channel_name: ChannelGroup,
    pub nr_appearances: i64,
    pub nr_chains: i64,
    pub nr_mono_touch_chains: i64,
    pub nr_first_touch_chains: i64,
    pub first_touch_chains_value: f64,
    pub nr_last_touch_chains: i64,
    pub last_touch_chains_value: f64,
    pub nr_assisted_chains: i64,
    pub assisted_chains_value: f64,
    pub mean_chain_len: f64,
    pub assisted_per_last_touch: Option<f64>,
    pub first_per_last_touch: Option<f64>,
}

#[derive(Default)]
struct ChannelAccumulator {
    appearances: i64,
    chains: BTreeSet<usize>,
    mono_touch: i64,
    first_touch: i64,
    first_touch_value: f64,
    last_touch: i64,
    last_touch_value: f64,
    assisted: BTreeSet<usize>,
    assisted_value: f64,
    chain_len_sum: usize,
}

fn ratio(numerator: i64, denominator: i64) -> Option<f64> {
    (denominator != 0).then(|| numerator as f64 / denominator as f64)
}

pub fn channel_stats(paths: &[ConversionPath]) -> Vec<ChannelStats> {
    let mut acc: BTreeMap<ChannelGroup, ChannelAccumulator> = BTreeMap::new();

    for (path_idx, path) in paths.iter().enumerate() {
        let len = path.chain_len();
        for (pos, channel) in path.channels.iter().enumerate() {
            let order = pos + 1;
            let entry = acc.entry(*channel).or_default();
            entry.appearances += 1;
            if entry.chains.insert(path_idx) {
                entry.chain_len_sum += len;
            }
            if len == 1 {
                entry.mono_touch += 1;
            }
            if order == 1 && order < len {
                entry.first_touch += 1;
                entry.first_touch_value += path.purchase_value;
            }
            if order == len {
                entry.last_touch += 1;
                entry.last_touch_value += path.purchase_value;
            }
            if order < len && entry.assisted.insert(path_idx) {
                entry.assisted_value += path.purchase_value;
            }
        }
    }

    acc.into_iter()
        .map(|(channel, a)| {
            let nr_chains = a.chains.len() as i64;
            let nr_assisted = a.assisted.len() as i64;
            ChannelStats {
                channel_name: channel,
                nr_appearances: a.appearances,
                nr_chains,
                nr_mono_touch_chains: a.mono_touch,
                nr_first_touch_chains: a.first_touch,
                first_touch_chains_value: a.first_touch_value,
                nr_last_touch_chains: a.last_touch,
                last_touch_chains_value: a.last_touch_value,
                nr_assisted_chains: nr_assisted,
                assisted_chains_value: a.assisted_value,
                mean_chain_len: if nr_chains == 0 {
                    0.0
                } else {
                    a.chain_len_sum as f64 / nr_chains as f64
                },
                assisted_per_last_touch: ratio(nr_assisted, a.last_touch),
                first_per_last_touch: ratio(a.first_touch, a.last_touch),
            }
        })
        .collect()
}

/// Run-level summary of the analysed conversions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerimeterRecap {
    pub events_start_date: NaiveDate,
    pub events_end_date: NaiveDate,
    pub conversions_start_date: NaiveDate,
    pub conversions_end_date: NaiveDate,
    pub nr_customers: usize,
    pub nr_conversions: usize,
    pub conversions_value: f64,
    pub mean_conversions_value: f64,
    pub median_conversions_value: f64,
    pub mean_chain_len: f64,
    pub median_chain_len: f64,
    pub multi_tp_nr_customers: usize,
    pub multi_tp_nr_conversions: usize,
    pub multi_tp_conversions_value: f64,
    pub multi_tp_mean_conversions_value: Option<f64>,
    pub multi_tp_median_conversions_value: Option<f64>,
    pub multi_tp_mean_chain_len: Option<f64>,
    pub multi_tp_median_chain_len: Option<f64>,
    pub run_date: NaiveDate,
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn count_customers<'a>(paths: impl Iterator<Item = &'a ConversionPath>) -> usize {
    paths
        .map(|p| p.customer_id.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

fn count_conversions<'a>(paths: impl Iterator<Item = &'a ConversionPath>) -> usize {
    paths
        .map(|p| p.conversion_id.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Summary of `paths`; `None` when there is nothing to summarise.
pub fn perimeter_recap(paths: &[ConversionPath], run_date: NaiveDate) -> Option<PerimeterRecap> {
    let events_start_date = paths.iter().map(|p| p.first_event).min()?;
    let events_end_date = paths.iter().map(|p| p.first_event).max()?;
    let conversions_start_date = paths.iter().map(|p| p.purchase_date).min()?;
    let conversions_end_date = paths.iter().map(|p| p.purchase_date).max()?;

    let values: Vec<f64> = paths.iter().map(|p| p.purchase_value).collect();
    let lens: Vec<f64> = paths.iter().map(|p| p.chain_len() as f64).collect();
    let multi: Vec<&ConversionPath> = paths.iter().filter(|p| p.chain_len() > 1).collect();
    let multi_values: Vec<f64> = multi.iter().map(|p| p.purchase_value).collect();
    let multi_lens: Vec<f64> = multi.iter().map(|p| p.chain_len() as f64).collect();

    Some(PerimeterRecap {
        events_start_date,
        events_end_date,
        conversions_start_date,
        conversions_end_date,
        nr_customers: count_customers(paths.iter()),
        nr_conversions: count_conversions(paths.iter()),
        conversions_value: values.iter().sum(),
        mean_conversions_value: mean(&values).unwrap_or(0.0),
        median_conversions_value: median(&values).unwrap_or(0.0),
        mean_chain_len: round2(mean(&lens).unwrap_or(0.0)),
        median_chain_len: round2(median(&lens).unwrap_or(0.0)),
        multi_tp_nr_customers: count_customers(multi.iter().copied()),
        multi_tp_nr_conversions: count_conversions(multi.iter().copied()),
        multi_tp_conversions_value: multi_values.iter().sum(),
        multi_tp_mean_conversions_value: mean(&multi_values),
        multi_tp_median_conversions_value: median(&multi_values),
        multi_tp_mean_chain_len: mean(&multi_lens).map(round2),
        multi_tp_median_chain_len: median(&multi_lens).map(round2),
        run_date,
    })
}

/// Aggregated input of a path-based attribution model: one row per distinct
/// channel sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInputRow {
    pub path: String,
    pub nr_chains: i64,
    pub total_revenue: f64,
}

/// Sorted by chain count (descending), then path.
pub fn model_input(paths: &[ConversionPath]) -> Vec<ModelInputRow> {
    let mut grouped: BTreeMap<String, (i64, f64)> = BTreeMap::new();
    for path in paths {
        let entry = grouped.entry(path.path_string()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += path.purchase_value;
    }

    let mut rows: Vec<ModelInputRow> = grouped
        .into_iter()
        .map(|(path, (nr_chains, total_revenue))| ModelInputRow {
            path,
            nr_chains,
            total_revenue,
        })
        .collect();
    rows.sort_by(|a, b| b.nr_chains.cmp(&a.nr_chains).then_with(|| a.path.cmp(&b.path)));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn path(customer: &str, id: &str, channels: &[ChannelGroup], value: f64) -> ConversionPath {
        let day = date(2024, 6, 10);
        ConversionPath {
            customer_id: customer.to_string(),
            conversion_id: id.to_string(),
            conversion_timestamp: day
                .and_hms_opt(12, 0, 0)
                .expect("valid time")
                .and_utc()
                .timestamp_micros(),
            channels: channels.to_vec(),
            first_event: date(2024, 6, 1),
            purchase_date: day,
            purchase_value: value,
        }
    }

    fn sample() -> Vec<ConversionPath> {
        use ChannelGroup::*;
        vec![
            path("c1", "p1", &[Email, OrganicSearch, Email], 100.0),
            path("c2", "p2", &[Direct], 40.0),
            path("c3", "p3", &[OrganicSearch, Direct], 60.0),
        ]
    }

    #[test]
    fn channel_stats_count_positions() {
        let stats = channel_stats(&sample());
        let email = stats
            .iter()
            .find(|s| s.channel_name == ChannelGroup::Email)
            .expect("email row");
        assert_eq!(email.nr_appearances, 2);
        assert_eq!(email.nr_chains, 1);
        assert_eq!(email.nr_first_touch_chains, 1);
        assert_eq!(email.first_touch_chains_value, 100.0);
        assert_eq!(email.nr_last_touch_chains, 1);
        assert_eq!(email.nr_assisted_chains, 1);
        assert_eq!(email.assisted_chains_value, 100.0, "assist value counted once per chain");
        assert_eq!(email.mean_chain_len, 3.0);

        let direct = stats
            .iter()
            .find(|s| s.channel_name == ChannelGroup::Direct)
            .expect("direct row");
        assert_eq!(direct.nr_mono_touch_chains, 1);
        assert_eq!(direct.nr_first_touch_chains, 0, "mono-touch is not a first touch");
        assert_eq!(direct.nr_last_touch_chains, 2);
        assert_eq!(direct.last_touch_chains_value, 100.0);
        assert_eq!(direct.assisted_per_last_touch, Some(0.0));

        let search = stats
            .iter()
            .find(|s| s.channel_name == ChannelGroup::OrganicSearch)
            .expect("search row");
        assert_eq!(search.nr_last_touch_chains, 0);
        assert_eq!(search.assisted_per_last_touch, None);
        assert_eq!(search.mean_chain_len, 2.5);
    }

    #[test]
    fn perimeter_recap_summarises_paths() {
        let recap = perimeter_recap(&sample(), date(2024, 7, 1)).expect("recap");
        assert_eq!(recap.nr_customers, 3);
        assert_eq!(recap.nr_conversions, 3);
        assert_eq!(recap.conversions_value, 200.0);
        assert_eq!(recap.median_conversions_value, 60.0);
        assert_eq!(recap.mean_chain_len, 2.0);
        assert_eq!(recap.multi_tp_nr_conversions, 2);
        assert_eq!(recap.multi_tp_median_chain_len, Some(2.5));
        assert_eq!(recap.conversions_start_date, date(2024, 6, 10));
        assert!(perimeter_recap(&[], date(2024, 7, 1)).is_none());
    }

    #[test]
    fn model_input_groups_identical_paths() {
        let mut paths = sample();
        paths.push(path("c4", "p4", &[ChannelGroup::Direct], 10.0));
        let rows = model_input(&paths);
        assert_eq!(rows[0].path, "Direct");
        assert_eq!(rows[0].nr_chains, 2);
        assert_eq!(rows[0].total_revenue, 50.0);
        assert_eq!(rows.len(), 3);
    }
}
