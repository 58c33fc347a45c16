use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

const STREAM_LABELS: &[&str] = &["vhost", "stream"];

/// Prometheus series published for every OvenMediaEngine stream.
///
/// Purpose:
/// - Single owner of the registry the `/metrics` endpoint encodes
/// - Typed handles the collector writes into
///
/// Design:
/// - Constructed explicitly and shared via `Arc`, never a global;
///   two collectors in one process get two independent registries
/// - Every write is visible to the next `gather()`; there is no
///   buffering between the collector and the scrape
///
/// Series names match what the previous Python exporter exposed,
/// including the `_total` / `_info` suffixes, so existing dashboards
/// keep working.
pub struct StreamMetrics {
    registry: Registry,

    // Liveness
    pub up: GaugeVec,

    // Video descriptor (first video track)
    pub bitrate_latest_bps: GaugeVec,
    pub bitrate_avg_bps: GaugeVec,
    pub framerate_latest_fps: GaugeVec,
    pub framerate_avg_fps: GaugeVec,
    pub resolution_width_pixels: GaugeVec,
    pub resolution_height_pixels: GaugeVec,
    pub keyframe_interval_latest: GaugeVec,
    pub keyframe_interval_avg: GaugeVec,
    pub has_bframes: GaugeVec,

    // Throughput
    pub throughput_in_bps: GaugeVec,
    pub throughput_out_bps: GaugeVec,
    pub last_throughput_in_bps: GaugeVec,
    pub last_throughput_out_bps: GaugeVec,
    pub max_throughput_in_bps: GaugeVec,
    pub max_throughput_out_bps: GaugeVec,

    /// Labels: vhost, stream, protocol
    pub active_connections: GaugeVec,

    // Lifecycle timestamps (Unix seconds)
    pub created_timestamp: GaugeVec,
    pub last_recv_timestamp: GaugeVec,
    pub last_sent_timestamp: GaugeVec,
    pub last_updated_timestamp: GaugeVec,
    pub max_total_connection_time: GaugeVec,

    // Reconciled cumulative counters
    pub total_bytes_in: CounterVec,
    pub total_bytes_out: CounterVec,
    pub total_connections: CounterVec,

    /// Labels: vhost, stream, codec. Value is always 1.
    pub codec_info: GaugeVec,
}

impl StreamMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let gauge = |name: &str, help: &str| -> prometheus::Result<GaugeVec> {
            let vec = GaugeVec::new(Opts::new(name, help), STREAM_LABELS)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let counter = |name: &str, help: &str| -> prometheus::Result<CounterVec> {
            let vec = CounterVec::new(Opts::new(name, help), STREAM_LABELS)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let active_connections = GaugeVec::new(
            Opts::new("oven_stream_active_connections", "Active connections by protocol"),
            &["vhost", "stream", "protocol"],
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        let codec_info = GaugeVec::new(
            Opts::new("oven_stream_codec_info_info", "Codec information"),
            &["vhost", "stream", "codec"],
        )?;
        registry.register(Box::new(codec_info.clone()))?;

        Ok(Self {
            up: gauge("oven_stream_up", "Stream availability (1=up, 0=down)")?,

            bitrate_latest_bps: gauge("oven_stream_bitrate_latest_bps", "Latest bitrate (bps)")?,
            bitrate_avg_bps: gauge("oven_stream_bitrate_avg_bps", "Average bitrate (bps)")?,
            framerate_latest_fps: gauge(
                "oven_stream_framerate_latest_fps",
                "Latest framerate (fps)",
            )?,
            framerate_avg_fps: gauge("oven_stream_framerate_avg_fps", "Average framerate (fps)")?,
            resolution_width_pixels: gauge(
                "oven_stream_resolution_width_pixels",
                "Video resolution width (pixels)",
            )?,
            resolution_height_pixels: gauge(
                "oven_stream_resolution_height_pixels",
                "Video resolution height (pixels)",
            )?,
            keyframe_interval_latest: gauge(
                "oven_stream_keyframe_interval_latest",
                "Latest keyframe interval (frames)",
            )?,
            keyframe_interval_avg: gauge(
                "oven_stream_keyframe_interval_avg",
                "Average keyframe interval (frames)",
            )?,
            has_bframes: gauge(
                "oven_stream_has_bframes",
                "Whether B-frames are used (1=yes, 0=no)",
            )?,

            throughput_in_bps: gauge(
                "oven_stream_throughput_in_bps",
                "Current input throughput (bps)",
            )?,
            throughput_out_bps: gauge(
                "oven_stream_throughput_out_bps",
                "Current output throughput (bps)",
            )?,
            last_throughput_in_bps: gauge(
                "oven_stream_last_throughput_in_bps",
                "Last sampled input throughput (bps)",
            )?,
            last_throughput_out_bps: gauge(
                "oven_stream_last_throughput_out_bps",
                "Last sampled output throughput (bps)",
            )?,
            max_throughput_in_bps: gauge(
                "oven_stream_max_throughput_in_bps",
                "Maximum input throughput (bps)",
            )?,
            max_throughput_out_bps: gauge(
                "oven_stream_max_throughput_out_bps",
                "Maximum output throughput (bps)",
            )?,

            active_connections,

            created_timestamp: gauge(
                "oven_stream_created_timestamp",
                "Unix timestamp of stream creation",
            )?,
            last_recv_timestamp: gauge(
                "oven_stream_last_recv_timestamp",
                "Unix timestamp of last data received",
            )?,
            last_sent_timestamp: gauge(
                "oven_stream_last_sent_timestamp",
                "Unix timestamp of last data sent",
            )?,
            last_updated_timestamp: gauge(
                "oven_stream_last_updated_timestamp",
                "Unix timestamp of last stats update",
            )?,
            max_total_connection_time: gauge(
                "oven_stream_max_total_connection_time",
                "Maximum total connection time (seconds)",
            )?,

            total_bytes_in: counter("oven_stream_total_bytes_in_total", "Total bytes received")?,
            total_bytes_out: counter("oven_stream_total_bytes_out_total", "Total bytes sent")?,
            total_connections: counter(
                "oven_stream_total_connections_total",
                "Total connections since start",
            )?,

            codec_info,

            registry,
        })
    }

    /// Render the current snapshot in the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Sample lines of one series from an encoded snapshot whose labels
/// contain every `name="value"` pair in `labels`.
#[cfg(test)]
pub fn sample_values(text: &str, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
    let prefix = format!("{name}{{");
    text.lines()
        .filter(|line| line.starts_with(&prefix))
        .filter(|line| {
            labels
                .iter()
                .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
        })
        .filter_map(|line| line.rsplit(' ').next()?.parse().ok())
        .collect()
}
