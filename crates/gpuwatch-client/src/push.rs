use crate::session::{Session, SessionEvent, ShutdownSignal, Transport};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// WebSocket transport: one connection per session, one frame per message.
#[derive(Debug, Clone)]
pub struct PushTransport {
    url: Url,
}

impl PushTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for PushTransport {
    fn name(&self) -> &'static str {
        "push"
    }

    fn open(&self, events: mpsc::Sender<SessionEvent>) -> Session {
        let url = self.url.clone();
        Session::spawn(move |shutdown| run_push_session(url, events, shutdown))
    }
}

async fn run_push_session(
    url: Url,
    events: mpsc::Sender<SessionEvent>,
    mut shutdown: ShutdownSignal,
) {
    let connect = tokio::select! {
        _ = &mut shutdown => return,
        result = connect_async(url.as_str()) => result,
    };
    let mut ws = match connect {
        Ok((ws, _)) => ws,
        Err(err) => {
            warn!(event = "push_connect_error", url = %url, error = %err);
            let _ = events
                .send(SessionEvent::Closed {
                    reason: err.to_string(),
                })
                .await;
            return;
        }
    };
    info!(event = "push_connected", url = %url);
    if events.send(SessionEvent::Opened).await.is_err() {
        let _ = ws.close(None).await;
        return;
    }

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = ws.close(None).await;
                debug!(event = "push_closed_locally", url = %url);
                return;
            }
            msg = ws.next() => {
                let payload = match msg {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!("closed by peer: {} {}", frame.code, frame.reason),
                            None => "closed by peer".to_string(),
                        };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => break err.to_string(),
                    None => break "stream ended".to_string(),
                };
                if events.send(SessionEvent::Payload(payload)).await.is_err() {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    };

    warn!(event = "push_disconnected", url = %url, reason = %reason);
    let _ = events.send(SessionEvent::Closed { reason }).await;
}
