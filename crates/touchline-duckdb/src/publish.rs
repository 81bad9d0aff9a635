use anyhow::Result;
use tracing::info;

use touchline_core::chains::ChainRow;
use touchline_core::paths::ConversionPath;
use touchline_core::touchpoint::AttributionEvent;

use crate::DuckDbBackend;

// Each publish empties and refills its table inside one transaction, so a
// failed run leaves the previous output in place.

impl DuckDbBackend {
    pub async fn publish_attribution_events(&self, rows: &[AttributionEvent]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM attribution_events", [])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO attribution_events (
                    session_id, cookie_id, is_engaged, country_web, f_tp,
                    event_timestamp, source, medium, campaign, source_medium,
                    channel_group, f_converted, total_transactions,
                    total_item_quantity, session_revenue_usd,
                    first_event_timestamp, last_event_timestamp
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5,
                    ?6, ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13,
                    ?14, ?15,
                    ?16, ?17
                )"#,
            )?;
            for row in rows {
                stmt.execute(duckdb::params![
                    row.session_id,
                    row.cookie_id,
                    row.is_engaged,
                    row.country_web,
                    row.f_tp,
                    row.event_timestamp,
                    row.source,
                    row.medium,
                    row.campaign,
                    row.source_medium,
                    row.channel_group.label(),
                    row.f_converted,
                    row.total_transactions,
                    row.total_item_quantity,
                    row.session_revenue_usd,
                    row.first_event_timestamp,
                    row.last_event_timestamp,
                ])?;
            }
        }
        tx.commit()?;
        info!("Published {} attribution events", rows.len());
        Ok(())
    }

    /// `row_order` records the position of each row so readers can restore
    /// chain order without re-deriving the sort.
    pub async fn publish_chains(&self, rows: &[ChainRow]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM attribution_chains", [])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO attribution_chains (
                    cookie_id, session_id, country, is_engaged,
                    source, medium, campaign, source_medium, channel_group,
                    event_timestamp, f_converted, total_transactions,
                    total_item_quantity, session_revenue_usd,
                    first_event_timestamp, last_event_timestamp, row_order
                ) VALUES (
                    ?1, ?2, ?3, ?4,
                    ?5, ?6, ?7, ?8, ?9,
                    ?10, ?11, ?12,
                    ?13, ?14,
                    ?15, ?16, ?17
                )"#,
            )?;
            for (idx, row) in rows.iter().enumerate() {
                stmt.execute(duckdb::params![
                    row.cookie_id,
                    row.session_id,
                    row.country,
                    row.is_engaged,
                    row.source,
                    row.medium,
                    row.campaign,
                    row.source_medium,
                    row.channel_group.label(),
                    row.event_timestamp,
                    row.f_converted,
                    row.total_transactions,
                    row.total_item_quantity,
                    row.session_revenue_usd,
                    row.first_event_timestamp,
                    row.last_event_timestamp,
                    idx as i64,
                ])?;
            }
        }
        tx.commit()?;
        info!("Published {} chain rows", rows.len());
        Ok(())
    }

    pub async fn publish_paths(&self, paths: &[ConversionPath]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM conversion_paths", [])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO conversion_paths (
                    conversion_id, customer_id, conversion_timestamp, path,
                    chain_len, first_event, purchase_date,
                    chain_duration_days, purchase_value
                ) VALUES (
                    ?1, ?2, ?3, ?4,
                    ?5, CAST(?6 AS DATE), CAST(?7 AS DATE),
                    ?8, ?9
                )"#,
            )?;
            for path in paths {
                stmt.execute(duckdb::params![
                    path.conversion_id,
                    path.customer_id,
                    path.conversion_timestamp,
                    path.path_string(),
                    path.chain_len() as i64,
                    path.first_event.format("%Y-%m-%d").to_string(),
                    path.purchase_date.format("%Y-%m-%d").to_string(),
                    path.chain_duration_days(),
                    path.purchase_value,
                ])?;
            }
        }
        tx.commit()?;
        info!("Published {} conversion paths", paths.len());
        Ok(())
    }
}
