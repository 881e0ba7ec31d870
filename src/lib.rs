//! Athena Monitor -- execution monitoring client for the Athena runbook
//! automation service.
//!
//! This crate consumes the service's live progress stream (or polls its
//! snapshot endpoint), assembles per-execution append-only timelines, detects
//! terminal completion, and tracks any number of concurrent executions
//! without letting them interfere with each other.

pub mod channel;
pub mod client;
pub mod config;
pub mod model;
pub mod poller;
pub mod registry;
pub mod source;
pub mod timeline;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use channel::HttpStreamTransport;
use client::ExecutionApi;
use poller::SnapshotPoller;
use registry::ExecutionRegistry;
use source::StreamingSource;

/// The assembled monitoring stack: REST client, stream-fed registry, and
/// snapshot poller, all pointed at one execution service.
pub struct Monitor {
    pub api: ExecutionApi,
    pub registry: ExecutionRegistry,
    pub poller: SnapshotPoller,
}

/// Wire up the monitoring stack against the configured service.
pub fn connect(config: &config::MonitorConfig) -> Result<Monitor> {
    let api = ExecutionApi::new(
        &config.api.base_url,
        Duration::from_secs(config.api.timeout_sec),
    )?;
    let transport = HttpStreamTransport::new(&config.api.base_url)?;
    let registry = ExecutionRegistry::new(Arc::new(StreamingSource::new(Arc::new(transport))));
    let poller = SnapshotPoller::new(Arc::new(api.clone()));

    tracing::info!(base_url = %config.api.base_url, "monitor connected");
    Ok(Monitor {
        api,
        registry,
        poller,
    })
}
