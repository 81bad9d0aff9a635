use async_trait::async_trait;

use touchline_core::chains::ChainRow;
use touchline_core::channel::SourceCategories;
use touchline_core::event::RawEvent;
use touchline_core::paths::ConversionPath;
use touchline_core::store::AttributionStore;
use touchline_core::touchpoint::AttributionEvent;

use crate::DuckDbBackend;

#[async_trait]
impl AttributionStore for DuckDbBackend {
    async fn load_events(&self) -> anyhow::Result<Vec<RawEvent>> {
        DuckDbBackend::load_events(self).await
    }

    async fn load_source_categories(&self) -> anyhow::Result<SourceCategories> {
        DuckDbBackend::load_source_categories(self).await
    }

    async fn publish_attribution_events(&self, rows: &[AttributionEvent]) -> anyhow::Result<()> {
        DuckDbBackend::publish_attribution_events(self, rows).await
    }

    async fn publish_chains(&self, rows: &[ChainRow]) -> anyhow::Result<()> {
        DuckDbBackend::publish_chains(self, rows).await
    }

    async fn publish_paths(&self, paths: &[ConversionPath]) -> anyhow::Result<()> {
        DuckDbBackend::publish_paths(self, paths).await
    }
}
