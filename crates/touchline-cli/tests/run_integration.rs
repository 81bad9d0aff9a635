/// End-to-end tests of the `touchline` commands against a DuckDB file.
use std::path::Path;

use chrono::NaiveDate;
use clap::Parser;

use touchline_cli::cli::{dispatch, Cli};
use touchline_cli::export::{CHANNEL_STATS_FILE, MODEL_INPUT_FILE, PATHS_FILE, PERIMETER_FILE};
use touchline_core::config::{Config, PipelineConfig};
use touchline_core::event::RawEvent;
use touchline_duckdb::DuckDbBackend;

fn test_config(dir: &Path) -> Config {
    let data_dir = dir.to_string_lossy().to_string();
    Config {
        database_path: format!("{data_dir}/touchline.db"),
        output_dir: format!("{data_dir}/output"),
        data_dir,
        duckdb_memory_limit: "256MB".to_string(),
        pipeline: PipelineConfig::default(),
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn at(day: NaiveDate, hour: u32) -> i64 {
    day.and_hms_opt(hour, 0, 0)
        .expect("valid time")
        .and_utc()
        .timestamp_micros()
}

fn event(cookie: &str, session: i64, name: &str, ts: i64) -> RawEvent {
    RawEvent {
        cookie_id: Some(cookie.to_string()),
        session_number: Some(session),
        event_name: name.to_string(),
        event_timestamp: ts,
        ..Default::default()
    }
}

fn visit(cookie: &str, session: i64, ts: i64, source: &str, medium: &str) -> RawEvent {
    RawEvent {
        source: Some(source.to_string()),
        medium: Some(medium.to_string()),
        ..event(cookie, session, "page_view", ts)
    }
}

fn purchase(cookie: &str, session: i64, ts: i64, revenue: f64) -> RawEvent {
    RawEvent {
        item_quantity: Some(1),
        purchase_revenue: Some(revenue),
        ..event(cookie, session, "purchase", ts)
    }
}

async fn seed(cfg: &Config) {
    let db = DuckDbBackend::open(&cfg.database_path, &cfg.duckdb_memory_limit).expect("db");
    db.insert_events(&[
        visit("c1", 1, at(date(2024, 5, 28), 9), "newsletter", "email"),
        visit("c1", 2, at(date(2024, 6, 5), 9), "facebook", "cpc"),
        purchase("c1", 2, at(date(2024, 6, 5), 10), 80.0),
        visit("c2", 1, at(date(2024, 6, 7), 9), "google", "organic"),
        purchase("c2", 1, at(date(2024, 6, 7), 9), 20.0),
        visit("c3", 1, at(date(2024, 6, 8), 9), "bing", "organic"),
    ])
    .await
    .expect("insert");
}

#[tokio::test]
async fn test_run_writes_every_output_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = test_config(dir.path());
    seed(&cfg).await;

    let cli = Cli::try_parse_from(["touchline", "run", "--reference-date", "2024-06-30"])
        .expect("parse");
    dispatch(cli, cfg.clone(), date(2024, 7, 3))
        .await
        .expect("run");

    let out = Path::new(&cfg.output_dir);
    for file in [
        "attribution_events.csv",
        "attribution_chains.csv",
        PATHS_FILE,
        CHANNEL_STATS_FILE,
        MODEL_INPUT_FILE,
        PERIMETER_FILE,
    ] {
        assert!(out.join(file).exists(), "{file} missing");
    }

    let mut reader = csv::Reader::from_path(out.join(PATHS_FILE)).expect("paths csv");
    let rows: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .expect("records");
    assert_eq!(rows.len(), 2);
    let c1 = rows.iter().find(|r| &r[0] == "c1").expect("c1 row");
    assert_eq!(&c1[1], "c1:2.20240605");
    assert_eq!(&c1[2], "Email > Paid Social");
    assert_eq!(&c1[3], "2");

    let perimeter: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join(PERIMETER_FILE)).expect("read"))
            .expect("json");
    assert_eq!(perimeter["perimeter"]["nr_conversions"], 2);
    assert_eq!(perimeter["window"]["conversion_end"], "2024-06-30");
}

#[tokio::test]
async fn test_run_flags_change_the_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = test_config(dir.path());
    seed(&cfg).await;

    // A 7-day lookback drops the newsletter visit 8 days before the purchase.
    let cli = Cli::try_parse_from([
        "touchline",
        "run",
        "--reference-date",
        "2024-06-30",
        "--lookback-window",
        "7",
    ])
    .expect("parse");
    dispatch(cli, cfg.clone(), date(2024, 7, 3))
        .await
        .expect("run");

    let db = DuckDbBackend::open(&cfg.database_path, &cfg.duckdb_memory_limit).expect("db");
    let conn = db.conn_for_test().await;
    let path: String = conn
        .query_row(
            "SELECT path FROM conversion_paths WHERE customer_id = 'c1'",
            [],
            |row| row.get(0),
        )
        .expect("path");
    assert_eq!(path, "Paid Social");
}

#[tokio::test]
async fn test_import_categories_changes_classification_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = test_config(dir.path());
    let csv_path = dir.path().join("categories.csv");
    std::fs::write(&csv_path, "source,category\nmynewsite,search\n").expect("write");

    let cli = Cli::try_parse_from([
        "touchline",
        "import-categories",
        csv_path.to_str().expect("utf-8 path"),
    ])
    .expect("parse");
    dispatch(cli, cfg.clone(), date(2024, 7, 3))
        .await
        .expect("import");

    let db = DuckDbBackend::open(&cfg.database_path, &cfg.duckdb_memory_limit).expect("db");
    let categories = db.load_source_categories().await.expect("load");
    assert_eq!(categories.len(), 1);
    assert!(categories.contains("search", "mynewsite"));
}
