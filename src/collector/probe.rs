use std::io::{self, Write};

use serde_json::Value;

use super::name_list;
use crate::api::MediaApi;

/// One-shot dump of everything the collector would read.
///
/// Useful to check credentials and payload shapes against a live
/// server without starting the exporter. Falls back to
/// `default_vhost` when the server lists no virtual hosts.
pub async fn probe<W: Write>(
    api: &dyn MediaApi,
    default_vhost: &str,
    out: &mut W,
) -> io::Result<()> {
    let raw = api.list_vhosts().await;
    writeln!(out, "=== Virtual Hosts ===")?;
    writeln!(out, "{raw}")?;

    let mut vhosts = name_list(raw, "virtual hosts");
    if vhosts.is_empty() {
        vhosts.push(default_vhost.to_string());
    }

    for vhost in &vhosts {
        let raw = api.list_streams(vhost).await;
        writeln!(out, "\n=== Streams in {vhost} ===")?;
        writeln!(out, "{raw}")?;

        let status = api.stream_status(vhost).await;
        writeln!(out, "Stream status in {vhost}: {status}")?;

        for stream in name_list(raw, "streams") {
            let (info, stats) = tokio::join!(
                api.stream_info(vhost, &stream),
                api.stream_stats(vhost, &stream),
            );
            writeln!(out, "\nStream: {stream}")?;
            writeln!(out, "  Info: {}", pretty(&info))?;
            writeln!(out, "  Stats: {}", pretty(&stats))?;
        }
    }

    Ok(())
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
