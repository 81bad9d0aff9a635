use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// An invariant of the pipeline was violated by the data it produced.
    /// Runs abort on this error instead of publishing partial output.
    #[error("consistency check failed: {0}")]
    Consistency(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
