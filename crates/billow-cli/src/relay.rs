//! WebSocket listener for the browser extension.
//!
//! The extension sends `{"type":"tab","url":..,"title":..}` whenever the
//! active tab changes. Each message becomes one browser interval.

use std::net::SocketAddr;

use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::tracker::TrackerHandle;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind browser relay on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("websocket handshake failed")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Deserialize)]
struct ExtensionMessage {
    #[serde(rename = "type")]
    kind: String,
    url: Option<String>,
    title: Option<String>,
}

/// A tab change reported by the extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabChange {
    pub url: String,
    pub title: Option<String>,
}

/// Decodes one extension message. Anything other than a `tab` message with
/// a URL yields `None`.
pub fn parse_tab_message(text: &str) -> Option<TabChange> {
    let message: ExtensionMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "dropping undecodable relay message");
            return None;
        }
    };
    if message.kind != "tab" {
        debug!(kind = %message.kind, "dropping relay message");
        return None;
    }
    let url = message.url.filter(|url| !url.is_empty())?;
    Some(TabChange {
        url,
        title: message.title,
    })
}

pub struct Relay {
    listener: TcpListener,
}

impl Relay {
    pub async fn bind(addr: &str) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` flips.
    pub async fn serve(self, tracker: TrackerHandle, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, "browser relay listening");
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let tracker = tracker.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, tracker, shutdown).await {
                                warn!(%peer, error = %err, "browser relay connection failed");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "failed to accept relay connection"),
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("browser relay stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    tracker: TrackerHandle,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RelayError> {
    let mut socket = tokio_tungstenite::accept_async(stream).await?;
    debug!("browser extension connected");
    loop {
        let message = tokio::select! {
            message = socket.next() => message,
            _ = shutdown.changed() => break,
        };
        let Some(message) = message else {
            break;
        };
        match message {
            Ok(Message::Text(text)) => {
                let Some(tab) = parse_tab_message(text.as_str()) else {
                    continue;
                };
                let now = Utc::now();
                let recorded = tracker
                    .with_blocking(move |tracker| tracker.tab(now, &tab.url, tab.title, None))
                    .await;
                if let Err(err) = recorded {
                    warn!(error = %err, "dropping browser tab");
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "browser relay receive error");
                break;
            }
        }
    }
    debug!("browser extension disconnected");
    Ok(())
}
