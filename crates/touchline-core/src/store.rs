//! Storage abstraction used by the pipeline.

use crate::chains::ChainRow;
use crate::channel::SourceCategories;
use crate::event::RawEvent;
use crate::paths::ConversionPath;
use crate::touchpoint::AttributionEvent;

/// Event source and result sink of a pipeline run.
///
/// Every `publish_*` call replaces the whole relation atomically: readers
/// observe either the previous run's rows or the new ones, never a mix.
#[async_trait::async_trait]
pub trait AttributionStore: Send + Sync + 'static {
    /// Raw events eligible for attribution (consented, non-internal).
    async fn load_events(&self) -> anyhow::Result<Vec<RawEvent>>;

    async fn load_source_categories(&self) -> anyhow::Result<SourceCategories>;

    async fn publish_attribution_events(&self, rows: &[AttributionEvent]) -> anyhow::Result<()>;

    async fn publish_chains(&self, rows: &[ChainRow]) -> anyhow::Result<()>;

    async fn publish_paths(&self, paths: &[ConversionPath]) -> anyhow::Result<()>;
}
