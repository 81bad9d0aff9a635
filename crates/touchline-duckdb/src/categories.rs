use std::path::Path;

use anyhow::{bail, Result};
use tracing::info;

use touchline_core::channel::SourceCategories;

use crate::events::{file_scan_sql, quote_ident, table_columns};
use crate::DuckDbBackend;

impl DuckDbBackend {
    pub async fn load_source_categories(&self) -> Result<SourceCategories> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT source, category FROM source_categories ORDER BY category, source")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let pairs = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(SourceCategories::from_pairs(pairs))
    }

    /// Replace `source_categories` with the given set in one transaction.
    pub async fn replace_source_categories(&self, categories: &SourceCategories) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM source_categories", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO source_categories (source, category) VALUES (?1, ?2)")?;
            for (source, category) in categories.pairs() {
                stmt.execute(duckdb::params![source, category])?;
            }
        }
        tx.commit()?;
        info!("Stored {} source categories", categories.len());
        Ok(())
    }

    /// Read a `source,category` CSV and make it the new category list.
    ///
    /// Category names may carry the `SOURCE_CATEGORY_` prefix used by GA4
    /// exports; sources are lower-cased. Returns the stored pair count.
    pub async fn import_source_categories(&self, path: &Path) -> Result<usize> {
        let scan = file_scan_sql(path)?;
        let pairs = {
            let conn = self.conn.lock().await;
            conn.execute_batch(&format!(
                "CREATE OR REPLACE TEMP TABLE categories_staging AS SELECT * FROM {scan}"
            ))?;
            let present = table_columns(&conn, "categories_staging")?;
            let (Some(source), Some(category)) = (present.get("source"), present.get("category"))
            else {
                conn.execute_batch("DROP TABLE categories_staging")?;
                bail!("{} needs `source` and `category` columns", path.display());
            };

            let (source, category) = (quote_ident(source), quote_ident(category));
            let mut stmt = conn.prepare(&format!(
                "SELECT CAST({source} AS VARCHAR), CAST({category} AS VARCHAR) \
                 FROM categories_staging \
                 WHERE {source} IS NOT NULL AND {category} IS NOT NULL"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let pairs = rows.collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);
            conn.execute_batch("DROP TABLE categories_staging")?;
            pairs
        };

        let categories = SourceCategories::from_pairs(pairs);
        if categories.is_empty() {
            bail!("{} holds no source category", path.display());
        }
        self.replace_source_categories(&categories).await?;
        Ok(categories.len())
    }
}
