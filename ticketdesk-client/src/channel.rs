use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};
use url::Url;

use ticketdesk_core::{
    ClientMessage, Join, ServerMessage, decode_server_message, encode_client_message,
};

/// Callback invoked once per inbound notification payload. Payloads are
/// backend-defined and passed through unmodified.
pub type NotificationHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Connection lifecycle as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Websocket URL of the backend push endpoint.
    pub server_url: String,
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// Handle to the live connection task.
#[derive(Debug)]
pub struct ChannelHandle {
    user_id: String,
    shutdown_tx: watch::Sender<bool>,
    status_tx: watch::Sender<ChannelStatus>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status_tx.borrow()
    }

    /// Watch cell for status displays (tray icon, header badge).
    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }
}

/// Owns at most one live push-channel connection for the session.
///
/// Intended to be owned by the session controller and handed down by
/// reference; opening a new connection always tears the previous one
/// down first, so two connections can never deliver concurrently.
#[derive(Debug)]
pub struct NotificationChannel {
    config: ChannelConfig,
    active: Option<ChannelHandle>,
}

impl NotificationChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Opens the push channel as `user_id`, authenticated by `token`,
    /// delivering inbound notifications to `handler`. Any existing
    /// connection is torn down before the new transport attempt.
    ///
    /// Returns `None` without touching the transport when the token is
    /// empty; the caller is expected to send the user back through
    /// authentication.
    pub fn connect(
        &mut self,
        token: &str,
        user_id: &str,
        handler: NotificationHandler,
    ) -> Option<&ChannelHandle> {
        self.disconnect();

        if token.trim().is_empty() {
            error!("refusing to open push channel without a credential");
            return None;
        }

        let url = match channel_url(&self.config.server_url, token) {
            Ok(url) => url,
            Err(err) => {
                error!(server_url = %self.config.server_url, "invalid push channel url: {err}");
                return None;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, _) = watch::channel(ChannelStatus::Connecting);
        let task = tokio::spawn(run_channel(
            url,
            user_id.to_owned(),
            handler,
            self.config.connect_timeout,
            status_tx.clone(),
            shutdown_rx,
        ));

        self.active = Some(ChannelHandle {
            user_id: user_id.to_owned(),
            shutdown_tx,
            status_tx,
            task,
        });
        self.active.as_ref()
    }

    /// Current connection handle, if one is open.
    pub fn active(&self) -> Option<&ChannelHandle> {
        self.active.as_ref()
    }

    /// Tears down the live connection. Safe to call when already closed.
    pub fn disconnect(&mut self) {
        if let Some(handle) = self.active.take() {
            let _ = handle.shutdown_tx.send(true);
            handle.task.abort();
            let _ = handle.status_tx.send(ChannelStatus::Closed);
            info!(user_id = %handle.user_id, "push channel closed");
        }
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn channel_url(server_url: &str, token: &str) -> Result<Url, url::ParseError> {
    // Credential rides the connection URL; identity travels in the join
    // directive only.
    let mut url = Url::parse(server_url)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

async fn run_channel(
    url: Url,
    user_id: String,
    handler: NotificationHandler,
    connect_timeout: Duration,
    status_tx: watch::Sender<ChannelStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        if *shutdown_rx.borrow() {
            let _ = status_tx.send(ChannelStatus::Closed);
            return;
        }

        let _ = status_tx.send(if ever_connected {
            ChannelStatus::Reconnecting
        } else {
            ChannelStatus::Connecting
        });

        let ws_stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                warn!(attempt, "push channel connect failed: {err}");
                if backoff_or_shutdown(&mut attempt, &mut shutdown_rx).await {
                    let _ = status_tx.send(ChannelStatus::Closed);
                    return;
                }
                continue;
            }
            Err(_) => {
                warn!(attempt, "push channel connect timed out after {connect_timeout:?}");
                if backoff_or_shutdown(&mut attempt, &mut shutdown_rx).await {
                    let _ = status_tx.send(ChannelStatus::Closed);
                    return;
                }
                continue;
            }
        };

        attempt = 0;
        ever_connected = true;

        let (mut write, mut read) = ws_stream.split();

        // Re-sent on every (re)connect so server-side delivery is scoped
        // to this user again after a drop.
        let join = ClientMessage::Join(Join {
            user_id: user_id.clone(),
        });
        match encode_client_message(&join) {
            Ok(text) => {
                if let Err(err) = write.send(Message::Text(text.into())).await {
                    warn!("failed to send join directive: {err}");
                    let _ = status_tx.send(ChannelStatus::Disconnected);
                    continue;
                }
            }
            Err(err) => {
                // Only reachable with an empty user id; nothing to rejoin as.
                error!("failed to encode join directive: {err}");
                let _ = status_tx.send(ChannelStatus::Closed);
                return;
            }
        }

        let _ = status_tx.send(ChannelStatus::Connected);
        info!(user_id = %user_id, "push channel joined");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        let _ = status_tx.send(ChannelStatus::Closed);
                        return;
                    }
                }
                next = read.next() => {
                    match next {
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "push channel closed by server");
                            break;
                        }
                        Some(Ok(message)) => dispatch_message(message, &handler),
                        Some(Err(err)) => {
                            warn!("push channel read failed: {err}");
                            break;
                        }
                        None => {
                            info!("push channel stream ended");
                            break;
                        }
                    }
                }
            }
        }

        let _ = status_tx.send(ChannelStatus::Disconnected);

        if backoff_or_shutdown(&mut attempt, &mut shutdown_rx).await {
            let _ = status_tx.send(ChannelStatus::Closed);
            return;
        }
    }
}

/// Sleeps out the next backoff step. Returns true when shutdown was
/// requested while waiting.
async fn backoff_or_shutdown(attempt: &mut u32, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    *attempt = attempt.saturating_add(1);
    let shift = attempt.saturating_sub(1).min(6);
    let backoff_ms = BACKOFF_BASE_MS
        .saturating_mul(1_u64 << shift)
        .min(BACKOFF_MAX_MS);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}

fn dispatch_message(message: Message, handler: &NotificationHandler) {
    let text = match message {
        Message::Text(text) => text,
        Message::Binary(_) => {
            warn!("ignoring unexpected binary frame on push channel");
            return;
        }
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => return,
    };

    match decode_server_message(text.as_str()) {
        Ok(ServerMessage::Notification(payload)) => handler(payload),
        Ok(ServerMessage::Error { message }) => warn!("push channel error event: {message}"),
        Err(err) => warn!("undecodable push message: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording_handler() -> (NotificationHandler, Arc<Mutex<Vec<serde_json::Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: NotificationHandler =
            Arc::new(move |payload| sink.lock().unwrap().push(payload));
        (handler, seen)
    }

    #[test]
    fn channel_url_carries_the_token() {
        let url = channel_url("wss://backend.example/push", "tok-123").unwrap();
        assert_eq!(url.as_str(), "wss://backend.example/push?token=tok-123");
    }

    #[test]
    fn empty_token_yields_no_handle_and_no_transport_attempt() {
        // No runtime here: a transport attempt would panic before it
        // could fail to resolve anything.
        let mut channel = NotificationChannel::new(ChannelConfig::new("wss://backend.example/push"));
        let (handler, _) = recording_handler();
        assert!(channel.connect("", "user-1", handler).is_none());
        assert!(channel.active().is_none());
    }

    #[test]
    fn notification_payloads_reach_the_handler() {
        let (handler, seen) = recording_handler();
        let frame = r#"{"type":"notification","data":{"ticket_id":7}}"#;
        dispatch_message(Message::Text(frame.to_owned().into()), &handler);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["ticket_id"], 7);
    }

    #[test]
    fn error_events_and_garbage_are_swallowed() {
        let (handler, seen) = recording_handler();
        dispatch_message(
            Message::Text(r#"{"type":"error","data":{"message":"boom"}}"#.to_owned().into()),
            &handler,
        );
        dispatch_message(Message::Text("not json".to_owned().into()), &handler);
        dispatch_message(Message::Binary(vec![1, 2, 3].into()), &handler);

        assert!(seen.lock().unwrap().is_empty());
    }
}
