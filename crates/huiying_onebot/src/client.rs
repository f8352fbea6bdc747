use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use huiying_core::InboundMessage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, Request};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::event::{OneBotEvent, OneBotResponse, Origin, SendMessageAction};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct OneBotClient {
    tx: mpsc::Sender<String>, // Channel to send outgoing actions to the WS task
}

impl OneBotClient {
    /// Spawn the connection task. Inbound chat messages arrive on the
    /// returned receiver; the task reconnects on its own when the link drops.
    pub fn new(url: &str, access_token: Option<String>) -> Result<(Self, mpsc::Receiver<InboundMessage>)> {
        let ws_url = Url::parse(url).context("Invalid OneBot WS URL")?;
        // Fail fast on a token that can't be put in a header.
        build_request(&ws_url, access_token.as_deref())?;

        let (tx, mut rx) = mpsc::channel::<String>(32);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(32);

        tokio::spawn(async move {
            let mut retry_count = 0;
            loop {
                tracing::info!("Connecting to OneBot at {}...", ws_url);
                let request = match build_request(&ws_url, access_token.as_deref()) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::error!("Cannot build OneBot request: {:#}", e);
                        return;
                    }
                };
                match connect_async(request).await {
                    Ok((ws_stream, _)) => {
                        tracing::info!("Connected to OneBot!");
                        retry_count = 0;
                        if let Err(e) = Self::handle_connection(ws_stream, &mut rx, &inbound_tx).await {
                            tracing::error!("OneBot connection error: {}", e);
                        }
                        if inbound_tx.is_closed() {
                            tracing::info!("Inbound receiver dropped, stopping OneBot client");
                            return;
                        }
                    }
                    Err(e) => {
                        let wait_secs = 5u64.min(2u64.pow(retry_count));
                        tracing::error!("Failed to connect to OneBot: {}. Retrying in {}s...", e, wait_secs);
                        tokio::time::sleep(tokio::time::Duration::from_secs(wait_secs)).await;
                        if retry_count < 6 {
                            retry_count += 1;
                        }
                        continue;
                    }
                }
                // Connection lost. Wait before reconnect.
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });

        Ok((Self { tx }, inbound_rx))
    }

    async fn handle_connection(
        stream: WsStream,
        rx: &mut mpsc::Receiver<String>,
        inbound_tx: &mpsc::Sender<InboundMessage>,
    ) -> Result<()> {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                incoming = read.next() => {
                    let Some(msg) = incoming else {
                        anyhow::bail!("OneBot closed the connection");
                    };
                    if let Message::Text(text) = msg? {
                        match serde_json::from_str::<OneBotEvent>(&text) {
                            Ok(OneBotEvent::Message(event)) => {
                                if inbound_tx.send(event.to_inbound()).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Ok(_) => {}
                            Err(_) => match serde_json::from_str::<OneBotResponse>(&text) {
                                Ok(resp) if resp.status != "ok" => {
                                    tracing::warn!(
                                        "OneBot action failed (retcode {}): {} {}",
                                        resp.retcode, resp.message, resp.wording
                                    );
                                }
                                Ok(_) => {}
                                Err(_) => tracing::debug!("Ignored unrecognized OneBot payload"),
                            },
                        }
                    }
                }

                Some(json_payload) = rx.recv() => {
                    write.send(Message::Text(json_payload)).await?;
                }
            }
        }
    }

    /// Queue a text reply to a group or private chat.
    pub async fn send_reply(&self, origin: Origin, message: &str) -> Result<()> {
        let json = serde_json::to_string(&SendMessageAction::reply(origin, message))?;
        self.tx.send(json).await.map_err(|_| anyhow::anyhow!("WS task dropped"))?;
        Ok(())
    }
}

fn build_request(url: &Url, access_token: Option<&str>) -> Result<Request<()>> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = access_token.filter(|t| !t.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("Access token is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}
