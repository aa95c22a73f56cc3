//! Chainstat core library — CI build-chain ingestion and aggregation.
//!
//! The main entry point is [`chain::ChainProcessor`], which resolves a server
//! handle through the [`connect::ConnectionCache`], expands the snapshot
//! dependency chain of a root build, and reduces it into an
//! [`types::AggregatedChainStatus`].

pub mod agg;
pub mod chain;
pub mod config;
pub mod connect;
pub mod creds;
pub mod error;
pub mod interner;
pub mod store;
pub mod types;
pub mod upstream;
