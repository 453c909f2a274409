use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::TelemetryMessage;

/// Drain queued messages into `writer` as JSON lines until every sender is
/// dropped, then hand the writer back.
///
/// A failed write drops that message and keeps going; the session loop never
/// learns about it.
pub async fn deliver<W>(mut rx: mpsc::UnboundedReceiver<TelemetryMessage>, mut writer: W) -> W
where
    W: AsyncWrite + Unpin,
{
    let mut delivered: u64 = 0;
    let mut dropped: u64 = 0;

    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Could not encode message");
                dropped += 1;
                continue;
            }
        };
        line.push(b'\n');

        let result = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Telemetry delivery failed");
                dropped += 1;
            }
        }
    }

    tracing::debug!(delivered, dropped, "Telemetry delivery stopped");
    writer
}
