//! Attribution data preparation: raw clickstream events in, channel-labelled
//! touchpoints and per-customer conversion chains out.

pub mod chains;
pub mod channel;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod origin;
pub mod paths;
pub mod pipeline;
pub mod session;
pub mod stats;
pub mod store;
pub mod touchpoint;
