use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::mqtt::message_manager::InboundMessage;

/// Logs every inbound message until the channel closes or `cancel` fires.
///
/// Returns the number of messages seen.
pub async fn run_monitor(
    mut inbound: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) -> u64 {
    info!("Monitoring started");
    let mut seen = 0;
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = inbound.recv() => message,
        };
        let Some(message) = message else {
            break;
        };

        seen += 1;
        info!(
            "Received message {} from topic {} at {}",
            message.payload,
            message.topic,
            message.received_at.format("%H:%M:%S%.3f")
        );
    }
    info!("Monitoring finished after {} messages", seen);
    seen
}
