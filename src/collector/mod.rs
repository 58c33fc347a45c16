//! Collector module
//!
//! This module groups all logic responsible for:
//! - Running one collection cycle against the upstream API
//! - Mapping stream info / stats payloads onto `StreamMetrics`
//! - Reconciling upstream cumulative values into monotonic counters
//! - Driving cycles on a fixed interval (runner)
//!
//! The collector layer sits between:
//! - The `MediaApi` (input)
//! - The `StreamMetrics` registry (output)
//!
//! FAILURE ISOLATION:
//! - Nothing in a cycle is fatal
//! - One vhost without streams never blocks the others
//! - One stream's failure never blocks the others
//! - Info and stats of a stream are mapped independently
pub mod probe;
pub mod reconcile;
pub mod runner;

use futures_util::{StreamExt, stream};
use log::{error, info, warn};
use prometheus::GaugeVec;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    api::{self, MediaApi},
    metrics::StreamMetrics,
    schema::{StreamInfo, StreamStats, Text, or_zero},
    util,
};

use reconcile::{Cumulative, ReconciliationState};

const UNKNOWN_CODEC: &str = "unknown";

/// A payload that decoded into an unexpected shape.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("unexpected stream info payload: {0}")]
    Info(#[source] serde_json::Error),

    #[error("unexpected stream stats payload: {0}")]
    Stats(#[source] serde_json::Error),
}

/// Outcome of a completed cycle, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub vhosts: usize,
    pub streams_up: usize,
    pub streams_down: usize,
}

/// Runs collection cycles and owns the counter reconciliation state.
///
/// CONCURRENCY:
/// - `collect` is not re-entrant: an overlapping call is skipped
/// - Streams of one vhost are processed by up to `concurrency`
///   tasks; the reconciliation state sits behind a mutex
/// - The registry may be scraped at any time during a cycle
///
pub struct Collector {
    api: Arc<dyn MediaApi>,
    metrics: Arc<StreamMetrics>,
    state: Mutex<ReconciliationState>,
    cycle: tokio::sync::Mutex<()>,
    concurrency: usize,
}

impl Collector {
    pub fn new(api: Arc<dyn MediaApi>, metrics: Arc<StreamMetrics>, concurrency: usize) -> Self {
        Self {
            api,
            metrics,
            state: Mutex::new(ReconciliationState::default()),
            cycle: tokio::sync::Mutex::new(()),
            concurrency: concurrency.max(1),
        }
    }

    /// Run one full cycle.
    ///
    /// Returns `None` when another cycle is still in flight.
    pub async fn collect(&self) -> Option<CycleSummary> {
        let Ok(_running) = self.cycle.try_lock() else {
            warn!("Previous collection cycle still running, skipping this one");
            return None;
        };

        let mut summary = CycleSummary::default();

        let vhosts = name_list(self.api.list_vhosts().await, "virtual hosts");
        if vhosts.is_empty() {
            error!("No virtual hosts found, skipping collection cycle.");
            return Some(summary);
        }
        summary.vhosts = vhosts.len();

        for vhost in &vhosts {
            let streams = name_list(
                self.api.list_streams(vhost).await,
                &format!("streams of vhost {vhost}"),
            );
            if streams.is_empty() {
                info!("No streams found for vhost {vhost}");
                continue;
            }

            // Owned names keep the per-stream futures `Send` for `tokio::spawn`
            let results: Vec<bool> = stream::iter(streams)
                .map(|stream: String| async move { self.collect_stream(vhost, &stream).await })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let up = results.iter().filter(|up| **up).count();
            summary.streams_up += up;
            summary.streams_down += results.len() - up;
        }

        Some(summary)
    }

    /// Fetch and publish a single stream. Returns its availability.
    async fn collect_stream(&self, vhost: &str, stream: &str) -> bool {
        let (info, stats) = tokio::join!(
            self.api.stream_info(vhost, stream),
            self.api.stream_stats(vhost, stream),
        );

        let available = !api::is_empty(&info) && !api::is_empty(&stats);
        self.metrics
            .up
            .with_label_values(&[vhost, stream])
            .set(if available { 1.0 } else { 0.0 });

        // Liveness only: keep whatever was published last time
        if !available {
            return false;
        }

        if let Err(e) = self.map_info(vhost, stream, info) {
            error!("Error parsing stream info for {stream} in {vhost}: {e}");
        }
        if let Err(e) = self.map_stats(vhost, stream, stats) {
            error!("Error parsing stream stats for {stream} in {vhost}: {e}");
        }

        true
    }

    fn map_info(&self, vhost: &str, stream: &str, raw: Value) -> Result<(), MappingError> {
        let info: StreamInfo = serde_json::from_value(raw).map_err(MappingError::Info)?;
        let m = &*self.metrics;
        let labels = [vhost, stream];

        let Some(video) = info.video_track() else {
            warn!("No video track info for stream {stream} in vhost {vhost}");
            m.codec_info
                .with_label_values(&[vhost, stream, UNKNOWN_CODEC])
                .set(1.0);
            return Ok(());
        };

        let codec = video
            .codec
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN_CODEC);
        m.codec_info.with_label_values(&[vhost, stream, codec]).set(1.0);

        m.bitrate_latest_bps.with_label_values(&labels).set(or_zero(video.bitrate_latest));
        m.bitrate_avg_bps.with_label_values(&labels).set(or_zero(video.bitrate_avg));
        m.framerate_latest_fps.with_label_values(&labels).set(or_zero(video.framerate_latest));
        m.framerate_avg_fps.with_label_values(&labels).set(or_zero(video.framerate_avg));
        m.resolution_width_pixels.with_label_values(&labels).set(or_zero(video.width).trunc());
        m.resolution_height_pixels.with_label_values(&labels).set(or_zero(video.height).trunc());
        m.keyframe_interval_latest
            .with_label_values(&labels)
            .set(or_zero(video.key_frame_interval_latest));
        m.keyframe_interval_avg
            .with_label_values(&labels)
            .set(or_zero(video.key_frame_interval_avg));

        let bframes = if video.has_bframes.is_some_and(|f| f.0) { 1.0 } else { 0.0 };
        m.has_bframes.with_label_values(&labels).set(bframes);

        Ok(())
    }

    fn map_stats(&self, vhost: &str, stream: &str, raw: Value) -> Result<(), MappingError> {
        let stats: StreamStats = serde_json::from_value(raw).map_err(MappingError::Stats)?;
        let m = &*self.metrics;
        let labels = [vhost, stream];

        m.throughput_in_bps.with_label_values(&labels).set(or_zero(stats.avg_throughput_in));
        m.throughput_out_bps.with_label_values(&labels).set(or_zero(stats.avg_throughput_out));
        m.last_throughput_in_bps
            .with_label_values(&labels)
            .set(or_zero(stats.last_throughput_in));
        m.last_throughput_out_bps
            .with_label_values(&labels)
            .set(or_zero(stats.last_throughput_out));
        m.max_throughput_in_bps
            .with_label_values(&labels)
            .set(or_zero(stats.max_throughput_in));
        m.max_throughput_out_bps
            .with_label_values(&labels)
            .set(or_zero(stats.max_throughput_out));

        // --------------------------------------------------------
        // Cumulative -> monotonic counters
        // --------------------------------------------------------
        let (bytes_in, bytes_out, connections) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (
                state.advance(Cumulative::BytesIn, vhost, stream, or_zero(stats.total_bytes_in)),
                state.advance(Cumulative::BytesOut, vhost, stream, or_zero(stats.total_bytes_out)),
                state.advance(
                    Cumulative::Connections,
                    vhost,
                    stream,
                    or_zero(stats.total_connections),
                ),
            )
        };
        if bytes_in > 0.0 {
            m.total_bytes_in.with_label_values(&labels).inc_by(bytes_in);
        }
        if bytes_out > 0.0 {
            m.total_bytes_out.with_label_values(&labels).inc_by(bytes_out);
        }
        if connections > 0.0 {
            m.total_connections.with_label_values(&labels).inc_by(connections);
        }

        // Protocols missing from this payload keep their last value
        for (protocol, count) in stats.connection_counts() {
            match count {
                Ok(count) => m
                    .active_connections
                    .with_label_values(&[vhost, stream, protocol])
                    .set(count.0.trunc()),
                Err(e) => warn!(
                    "Skipping {protocol} connection count for stream {stream} in {vhost}: {e}"
                ),
            }
        }

        // --------------------------------------------------------
        // Timestamps: each field is independent
        // --------------------------------------------------------
        let timestamps = [
            ("createdTime", &stats.created_time, &m.created_timestamp),
            ("lastRecvTime", &stats.last_recv_time, &m.last_recv_timestamp),
            ("lastSentTime", &stats.last_sent_time, &m.last_sent_timestamp),
            ("lastUpdatedTime", &stats.last_updated_time, &m.last_updated_timestamp),
            (
                "maxTotalConnectionTime",
                &stats.max_total_connection_time,
                &m.max_total_connection_time,
            ),
        ];
        for (field, raw, gauge) in timestamps {
            set_timestamp(gauge, field, raw.as_ref(), vhost, stream);
        }

        Ok(())
    }
}

/// Set a timestamp gauge, leaving it untouched when the value is
/// absent, empty or unparseable.
fn set_timestamp(gauge: &GaugeVec, field: &str, raw: Option<&Text>, vhost: &str, stream: &str) {
    let Some(Text(raw)) = raw else {
        return;
    };
    if raw.trim().is_empty() {
        return;
    }

    match util::parse_timestamp(raw) {
        Ok(ts) => gauge.with_label_values(&[vhost, stream]).set(ts),
        Err(e) => warn!("Failed to parse {field} timestamp {raw:?} for stream {stream} in {vhost}: {e}"),
    }
}

/// Decode a list of names (vhosts, streams).
///
/// Anything other than an array of strings is reported and treated
/// as an empty list.
pub(crate) fn name_list(value: Value, what: &str) -> Vec<String> {
    if api::is_empty(&value) {
        return Vec::new();
    }
    match serde_json::from_value(value) {
        Ok(names) => names,
        Err(e) => {
            error!("Unexpected payload for {what}: {e}");
            Vec::new()
        }
    }
}
