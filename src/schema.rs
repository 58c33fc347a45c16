use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

// ------------------------------------------------------------
// OvenMediaEngine payloads
// ------------------------------------------------------------
//
// The upstream API is not under our control: fields come and go
// between server versions, numbers are sometimes sent as strings,
// and whole sub-records may be missing. Every field is therefore
// optional and decoded leniently, once, at the mapping boundary.
//
// DEFAULTS:
// - Absent numeric fields read as 0 (see `or_zero`)
// - Absent codec reads as "unknown"
// - Absent timestamps are skipped by the collector
//
// A scalar field that is present but has an impossible shape
// (e.g. a non-numeric string where a number is expected) fails
// the whole record. The collector treats that as a mapping error
// for the affected section only. Per-protocol connection counts
// are decoded entry by entry instead.
//

// ------------------------------------------------------------
// Lenient scalar types
// ------------------------------------------------------------

/// A number that may arrive as a JSON number, a numeric string or a bool.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Numeric(pub f64);

impl<'de> Deserialize<'de> for Numeric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NumericVisitor;

        impl Visitor<'_> for NumericVisitor {
            type Value = Numeric;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a number or a numeric string")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Numeric, E> {
                Ok(Numeric(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Numeric, E> {
                Ok(Numeric(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Numeric, E> {
                Ok(Numeric(v as f64))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Numeric, E> {
                Ok(Numeric(if v { 1.0 } else { 0.0 }))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Numeric, E> {
                v.trim()
                    .parse::<f64>()
                    .map(Numeric)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(NumericVisitor)
    }
}

/// A yes/no flag. Accepts a bool, a number (non-zero is true) or a
/// string ("false", "0", "no", "off" and "" are false).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flag(pub bool);

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Flag(match value {
            serde_json::Value::Bool(b) => b,
            serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            serde_json::Value::String(s) => !matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "" | "false" | "0" | "no" | "off"
            ),
            serde_json::Value::Null => false,
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Object(o) => !o.is_empty(),
        }))
    }
}

/// Free-form text. Non-string scalars are kept as their JSON rendering,
/// so a bogus timestamp shows up as a per-field parse warning instead of
/// failing the whole stats record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Text(pub String);

impl<'de> Deserialize<'de> for Text {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => Text(s),
            other => Text(other.to_string()),
        })
    }
}

/// Zero default for an absent numeric field.
pub fn or_zero(value: Option<Numeric>) -> f64 {
    value.map_or(0.0, |n| n.0)
}

// ------------------------------------------------------------
// Stream info
// ------------------------------------------------------------
//
// GET /v1/vhosts/{vhost}/apps/{app}/streams/{stream}
//
// Only `input.tracks` is read. Output renditions are ignored.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StreamInfo {
    pub input: Option<StreamInput>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StreamInput {
    pub tracks: Option<Vec<Track>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Track {
    /// "Video", "Audio", "Data", ...
    #[serde(rename = "type")]
    pub kind: Option<String>,

    pub video: Option<VideoTrack>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoTrack {
    pub codec: Option<String>,
    pub bitrate_latest: Option<Numeric>,
    pub bitrate_avg: Option<Numeric>,
    pub framerate_latest: Option<Numeric>,
    pub framerate_avg: Option<Numeric>,
    pub width: Option<Numeric>,
    pub height: Option<Numeric>,
    pub key_frame_interval_latest: Option<Numeric>,
    pub key_frame_interval_avg: Option<Numeric>,
    pub has_bframes: Option<Flag>,
}

impl VideoTrack {
    /// True when none of the fields this exporter reads are present.
    pub fn is_empty(&self) -> bool {
        self.codec.is_none()
            && self.bitrate_latest.is_none()
            && self.bitrate_avg.is_none()
            && self.framerate_latest.is_none()
            && self.framerate_avg.is_none()
            && self.width.is_none()
            && self.height.is_none()
            && self.key_frame_interval_latest.is_none()
            && self.key_frame_interval_avg.is_none()
            && self.has_bframes.is_none()
    }
}

impl StreamInfo {
    /// The video sub-record of the first track typed "Video".
    ///
    /// Later video tracks are ignored, and a first video track
    /// with a missing or empty `video` record counts as no video
    /// at all.
    pub fn video_track(&self) -> Option<&VideoTrack> {
        self.input
            .as_ref()?
            .tracks
            .as_ref()?
            .iter()
            .find(|t| t.kind.as_deref() == Some("Video"))?
            .video
            .as_ref()
            .filter(|v| !v.is_empty())
    }
}

// ------------------------------------------------------------
// Stream statistics
// ------------------------------------------------------------
//
// GET /v1/stats/current/vhosts/{vhost}/apps/{app}/streams/{stream}
//
// Byte and connection totals are cumulative since the upstream
// process started and reset when it restarts.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamStats {
    pub avg_throughput_in: Option<Numeric>,
    pub avg_throughput_out: Option<Numeric>,
    pub last_throughput_in: Option<Numeric>,
    pub last_throughput_out: Option<Numeric>,
    pub max_throughput_in: Option<Numeric>,
    pub max_throughput_out: Option<Numeric>,

    pub total_bytes_in: Option<Numeric>,
    pub total_bytes_out: Option<Numeric>,
    pub total_connections: Option<Numeric>,

    /// Active connections keyed by protocol ("webrtc", "llhls", ...).
    /// Kept raw; see `connection_counts`.
    pub connections: Option<BTreeMap<String, serde_json::Value>>,

    pub created_time: Option<Text>,
    pub last_recv_time: Option<Text>,
    pub last_sent_time: Option<Text>,
    pub last_updated_time: Option<Text>,
    pub max_total_connection_time: Option<Text>,
}

impl StreamStats {
    /// Active connection counts by protocol, each entry decoded on
    /// its own so one bad count does not hide the others.
    pub fn connection_counts(
        &self,
    ) -> impl Iterator<Item = (&str, Result<Numeric, serde_json::Error>)> + '_ {
        self.connections
            .iter()
            .flatten()
            .map(|(protocol, count)| (protocol.as_str(), Numeric::deserialize(count)))
    }
}
