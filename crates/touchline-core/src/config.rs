use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::CoreError;
use crate::event::MICROS_PER_DAY;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub database_path: String,
    pub duckdb_memory_limit: String,
    pub output_dir: String,
    pub pipeline: PipelineConfig,
}

/// Upper bound for the conversion period and the lookback window (100 years).
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// Parameters of one pipeline run. Passed explicitly so that runs with
/// different parameters are reproducible side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub conversion_period_days: u32,
    pub lookback_window_days: u32,
    /// Last day of the conversion period. `None` means the last day of the
    /// month before the run date.
    pub reference_date: Option<NaiveDate>,
    /// Timezone used to turn event timestamps into calendar dates.
    pub timezone: Tz,
    pub concat_chains: bool,
    /// Purchases closer than this many days are merged into one path.
    pub merge_purchase_days: u32,
    /// Paths of earlier purchases within this many days are prepended.
    pub concat_chain_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            conversion_period_days: 30,
            lookback_window_days: 90,
            reference_date: None,
            timezone: Tz::UTC,
            concat_chains: true,
            merge_purchase_days: 3,
            concat_chain_days: 10,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.conversion_period_days == 0 {
            return Err(CoreError::InvalidConfig(
                "conversion_period must be at least 1 day".to_string(),
            ));
        }
        if self.lookback_window_days == 0 {
            return Err(CoreError::InvalidConfig(
                "lookback_window must be at least 1 day".to_string(),
            ));
        }
        for (name, days) in [
            ("conversion_period", self.conversion_period_days),
            ("lookback_window", self.lookback_window_days),
        ] {
            if days > MAX_WINDOW_DAYS {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be at most {MAX_WINDOW_DAYS} days, got {days}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the concrete date bounds of a run started on `today`.
    pub fn window(&self, today: NaiveDate) -> Result<AttributionWindow, CoreError> {
        self.validate()?;
        let conversion_end = self
            .reference_date
            .unwrap_or_else(|| end_of_previous_month(today));
        let span = i64::from(self.conversion_period_days) - 1 + i64::from(self.lookback_window_days);
        if conversion_end.checked_sub_signed(Duration::days(span)).is_none() {
            return Err(CoreError::InvalidConfig(format!(
                "window of {span} days before {conversion_end} is out of the calendar range"
            )));
        }
        Ok(AttributionWindow::new(
            conversion_end,
            self.conversion_period_days,
            self.lookback_window_days,
        ))
    }
}

/// Conversion period and lookback window of a run.
///
/// The conversion period holds exactly `conversion_period_days` calendar
/// days ending at `conversion_end` (inclusive). Candidate touchpoints may
/// start up to `lookback_days` before the conversion period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttributionWindow {
    pub conversion_start: NaiveDate,
    pub conversion_end: NaiveDate,
    pub lookback_days: i64,
}

impl AttributionWindow {
    pub fn new(conversion_end: NaiveDate, conversion_period_days: u32, lookback_days: u32) -> Self {
        let period = i64::from(conversion_period_days.max(1));
        Self {
            conversion_start: conversion_end - Duration::days(period - 1),
            conversion_end,
            lookback_days: i64::from(lookback_days),
        }
    }

    pub fn candidate_start(&self) -> NaiveDate {
        self.conversion_start - Duration::days(self.lookback_days)
    }

    pub fn lookback_micros(&self) -> i64 {
        self.lookback_days * MICROS_PER_DAY
    }

    pub fn in_conversion_period(&self, date: NaiveDate) -> bool {
        self.conversion_start <= date && date <= self.conversion_end
    }

    pub fn in_candidate_range(&self, date: NaiveDate) -> bool {
        self.candidate_start() <= date && date <= self.conversion_end
    }
}

/// Last day of the calendar month preceding `today`.
pub fn end_of_previous_month(today: NaiveDate) -> NaiveDate {
    today
        .with_day(1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(today)
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {key}: {e}")),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let data_dir =
            std::env::var("TOUCHLINE_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let database_path = std::env::var("TOUCHLINE_DATABASE")
            .unwrap_or_else(|_| format!("{data_dir}/touchline.db"));
        let output_dir = std::env::var("TOUCHLINE_OUTPUT_DIR")
            .unwrap_or_else(|_| format!("{data_dir}/output"));

        let defaults = PipelineConfig::default();
        let reference_date = match std::env::var("TOUCHLINE_REFERENCE_DATE") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                    "invalid TOUCHLINE_REFERENCE_DATE, expected YYYY-MM-DD".to_string()
                })?,
            ),
            _ => None,
        };
        let pipeline = PipelineConfig {
            conversion_period_days: env_or(
                "TOUCHLINE_CONVERSION_PERIOD",
                defaults.conversion_period_days,
            )?,
            lookback_window_days: env_or(
                "TOUCHLINE_LOOKBACK_WINDOW",
                defaults.lookback_window_days,
            )?,
            reference_date,
            timezone: env_or("TOUCHLINE_TIMEZONE", defaults.timezone)?,
            concat_chains: std::env::var("TOUCHLINE_CONCAT_CHAINS")
                .map(|v| v != "false")
                .unwrap_or(defaults.concat_chains),
            merge_purchase_days: env_or(
                "TOUCHLINE_MERGE_PURCHASE_DAYS",
                defaults.merge_purchase_days,
            )?,
            concat_chain_days: env_or("TOUCHLINE_CONCAT_CHAIN_DAYS", defaults.concat_chain_days)?,
        };
        pipeline.validate().map_err(|e| e.to_string())?;

        Ok(Self {
            data_dir,
            database_path,
            duckdb_memory_limit: std::env::var("TOUCHLINE_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            output_dir,
            pipeline,
        })
    }
}
