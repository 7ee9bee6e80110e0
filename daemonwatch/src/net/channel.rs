//! Push channel
//!
//! A WebSocket connection to one stream endpoint, run on its own task and
//! reported back as a sequence of `ChannelEvent`s: `Opened`, any number of
//! `Message`s, then exactly one of `Closed` or `Failed`. Nothing is ever sent
//! to the server apart from the final close frame.
//!
//! Dropping a `PushChannel` also closes the connection.

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use std::time::Duration;

/// Reported when the server closes without a status code.
pub const NO_STATUS_CLOSE: u16 = 1005;
/// Reported when the connection drops without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    Closed(u16),
    Failed(String),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] tungstenite::Error),
}

pub struct PushChannel {
    url: Url,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    /// Starts connecting to `url` in the background. With no timeout a
    /// connect that never completes simply produces no events.
    pub fn open(url: Url, connect_timeout: Option<Duration>) -> PushChannel {
        let (tx, events) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_channel(url.clone(), connect_timeout, tx, shutdown_rx));
        PushChannel {
            url,
            events,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next lifecycle event or message, in arrival order. Returns `None`
    /// once the channel is finished. Safe to use inside `select!`.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Sends a normal close frame (if connected) and waits for the channel
    /// task to finish.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.events.close();
    }
}

async fn connect(url: &Url, timeout: Option<Duration>) -> Result<WsStream, ChannelError> {
    let attempt = connect_async(url.as_str());
    let (ws, _response) = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| ChannelError::Timeout(limit))?,
        None => attempt.await,
    }
    .map_err(ChannelError::Connect)?;
    Ok(ws)
}

async fn run_channel(
    url: Url,
    timeout: Option<Duration>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        _ = &mut shutdown => return,
        res = connect(&url, timeout) => res,
    };

    let mut ws = match connected {
        Ok(ws) => ws,
        Err(err) => {
            info!("{}: {}", url.path(), err);
            let _ = tx.send(ChannelEvent::Failed(err.to_string()));
            return;
        }
    };
    info!("{}: connected", url.path());
    if tx.send(ChannelEvent::Opened).is_err() {
        return;
    }

    loop {
        let msg = tokio::select! {
            _ = &mut shutdown => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                if let Err(err) = ws.close(Some(frame)).await {
                    debug!("{}: close failed: {}", url.path(), err);
                }
                return;
            }
            msg = ws.next() => msg,
        };

        let event = match msg {
            Some(Ok(Message::Text(text))) => ChannelEvent::Message(text.as_str().to_owned()),
            Some(Ok(Message::Binary(data))) => {
                ChannelEvent::Message(String::from_utf8_lossy(&data).into_owned())
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map_or(NO_STATUS_CLOSE, |f| u16::from(f.code));
                info!("{}: closed by server with code {}", url.path(), code);
                let _ = tx.send(ChannelEvent::Closed(code));
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                let err = ChannelError::Transport(err);
                info!("{}: {}", url.path(), err);
                let _ = tx.send(ChannelEvent::Failed(err.to_string()));
                return;
            }
            None => {
                let _ = tx.send(ChannelEvent::Closed(ABNORMAL_CLOSE));
                return;
            }
        };

        if tx.send(event).is_err() {
            // Nobody is listening any more.
            return;
        }
    }
}
