//! The metrics/health HTTP surface (§4.6, §6): a `/metrics` endpoint in
//! the Prometheus text format, plus a `/healthz` liveness probe for
//! orchestrators. Bound separately from the SSH listener and sharing no
//! state with it beyond the process-wide metric registry.

use std::result::Result;

use prometheus::{Encoder, TextEncoder};
use warp::{
    reject::{self, Reject},
    Rejection, Reply,
};

#[allow(dead_code)]
#[derive(Debug)]
struct GatherError(prometheus::Error);

impl Reject for GatherError {}

pub async fn metrics() -> Result<impl Reply, Rejection> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|err| reject::custom(GatherError(err)))?;

    Ok(buffer)
}

/// The process is alive if this handler runs at all; there's no deeper
/// liveness condition to check since the SSH listener and the metrics
/// server share nothing but the metric registry.
pub async fn healthz() -> Result<impl Reply, Rejection> {
    Ok("ok")
}
