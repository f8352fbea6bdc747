pub mod client;
pub mod event;

pub use client::OneBotClient;
pub use event::Origin;

use huiying_core::{CommandDispatcher, InboundMessage};
use tokio::sync::mpsc;

/// Drive the auto-reply loop: each inbound message is answered (or not)
/// before the next one is taken. Returns when the inbound channel closes.
pub async fn serve(
    client: &OneBotClient,
    mut inbound: mpsc::Receiver<InboundMessage>,
    dispatcher: &CommandDispatcher,
) {
    while let Some(message) = inbound.recv().await {
        let Some(reply) = dispatcher.respond(&message).await else {
            continue;
        };

        let origin = match message.origin.parse::<Origin>() {
            Ok(origin) => origin,
            Err(e) => {
                tracing::warn!("Cannot route reply: {}", e);
                continue;
            }
        };

        if let Err(e) = client.send_reply(origin, &reply).await {
            tracing::error!("Failed to send reply to {}: {}", origin, e);
        }
    }
    tracing::info!("OneBot inbound channel closed");
}
