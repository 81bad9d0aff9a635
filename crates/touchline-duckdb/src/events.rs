use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use tracing::info;

use touchline_core::event::RawEvent;

use crate::DuckDbBackend;

/// Columns of the `events` table with their DuckDB types, in table order.
pub const EVENT_COLUMNS: [(&str, &str); 16] = [
    ("cookie_id", "VARCHAR"),
    ("session_number", "BIGINT"),
    ("event_name", "VARCHAR"),
    ("event_timestamp", "BIGINT"),
    ("session_engaged", "BOOLEAN"),
    ("country", "VARCHAR"),
    ("source", "VARCHAR"),
    ("medium", "VARCHAR"),
    ("campaign", "VARCHAR"),
    ("click_id", "VARCHAR"),
    ("first_source", "VARCHAR"),
    ("first_medium", "VARCHAR"),
    ("first_campaign", "VARCHAR"),
    ("item_quantity", "BIGINT"),
    ("purchase_revenue", "DOUBLE"),
    ("consent", "BOOLEAN"),
];

const REQUIRED_COLUMNS: [&str; 2] = ["event_name", "event_timestamp"];

/// DuckDB table function reading `path`: Parquet by extension, CSV otherwise.
///
/// Table functions do not take bound parameters, so the path is inlined as a
/// quoted string literal.
pub(crate) fn file_scan_sql(path: &Path) -> Result<String> {
    let raw = path
        .to_str()
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))?;
    let literal = format!("'{}'", raw.replace('\'', "''"));
    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);
    Ok(if is_parquet {
        format!("read_parquet({literal})")
    } else {
        format!("read_csv_auto({literal}, header = true)")
    })
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names of a table, keyed by their lower-cased form.
pub(crate) fn table_columns(conn: &duckdb::Connection, table: &str) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns WHERE table_name = ?1",
    )?;
    let names = stmt.query_map(duckdb::params![table], |row| row.get::<_, String>(0))?;
    let mut columns = HashMap::new();
    for name in names {
        let name = name?;
        columns.insert(name.to_lowercase(), name);
    }
    Ok(columns)
}

impl DuckDbBackend {
    /// Append the rows of a CSV or Parquet file to `events`.
    ///
    /// Column names are matched case-insensitively; known columns missing
    /// from the file are stored as NULL and unknown ones are ignored. The
    /// whole file is imported in one transaction. Returns the row count.
    pub async fn import_events(&self, path: &Path) -> Result<usize> {
        let scan = file_scan_sql(path)?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute_batch(&format!(
            "CREATE OR REPLACE TEMP TABLE events_staging AS SELECT * FROM {scan}"
        ))?;
        let present = table_columns(&tx, "events_staging")?;
        for required in REQUIRED_COLUMNS {
            if !present.contains_key(required) {
                bail!("{} has no `{required}` column", path.display());
            }
        }

        let target: Vec<&str> = EVENT_COLUMNS.iter().map(|(name, _)| *name).collect();
        let select: Vec<String> = EVENT_COLUMNS
            .iter()
            .map(|(name, ty)| match present.get(*name) {
                Some(original) => format!("CAST({} AS {ty})", quote_ident(original)),
                None => format!("CAST(NULL AS {ty})"),
            })
            .collect();
        let inserted = tx.execute(
            &format!(
                "INSERT INTO events ({}) SELECT {} FROM events_staging",
                target.join(", "),
                select.join(", ")
            ),
            [],
        )?;
        tx.execute_batch("DROP TABLE events_staging")?;
        tx.commit()?;

        info!("Imported {} events from {}", inserted, path.display());
        Ok(inserted)
    }

    /// Events eligible for attribution, in insertion order.
    ///
    /// Rows without consent and tag-manager/debug events are filtered here;
    /// the pipeline applies the same rule again on its side.
    pub async fn load_events(&self) -> Result<Vec<RawEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT
                cookie_id, session_number, event_name, event_timestamp,
                session_engaged, country,
                source, medium, campaign, click_id,
                first_source, first_medium, first_campaign,
                item_quantity, purchase_revenue, consent
            FROM events
            WHERE COALESCE(consent, true)
              AND trim(event_name) <> ''
              AND NOT starts_with(trim(event_name), 'gtm.')
              AND NOT starts_with(trim(event_name), '_')
            ORDER BY rowid"#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawEvent {
                cookie_id: row.get(0)?,
                session_number: row.get(1)?,
                event_name: row.get(2)?,
                event_timestamp: row.get(3)?,
                session_engaged: row.get(4)?,
                country: row.get(5)?,
                source: row.get(6)?,
                medium: row.get(7)?,
                campaign: row.get(8)?,
                click_id: row.get(9)?,
                first_source: row.get(10)?,
                first_medium: row.get(11)?,
                first_campaign: row.get(12)?,
                item_quantity: row.get(13)?,
                purchase_revenue: row.get(14)?,
                consent: row.get(15)?,
            })
        })?;

        let events = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Insert already-typed events in a single transaction. Used by tests and
    /// by callers that collect events themselves.
    pub async fn insert_events(&self, events: &[RawEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO events (
                    cookie_id, session_number, event_name, event_timestamp,
                    session_engaged, country,
                    source, medium, campaign, click_id,
                    first_source, first_medium, first_campaign,
                    item_quantity, purchase_revenue, consent
                ) VALUES (
                    ?1, ?2, ?3, ?4,
                    ?5, ?6,
                    ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13,
                    ?14, ?15, ?16
                )"#,
            )?;
            for event in events {
                stmt.execute(duckdb::params![
                    event.cookie_id,
                    event.session_number,
                    event.event_name,
                    event.event_timestamp,
                    event.session_engaged,
                    event.country,
                    event.source,
                    event.medium,
                    event.campaign,
                    event.click_id,
                    event.first_source,
                    event.first_medium,
                    event.first_campaign,
                    event.item_quantity,
                    event.purchase_revenue,
                    event.consent,
                ])?;
            }
        }
        tx.commit()?;
        info!("Inserted {} events into DuckDB", events.len());
        Ok(())
    }
}
