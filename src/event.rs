//! Host protocol: JSON lines in on stdin, JSON lines out on stdout.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::clients::ClientMessage;
use crate::http::{Request, Response};
use crate::lifecycle::LifecycleState;
use crate::notify::Notification;

/// Events delivered by the host runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
  /// A page issued a request
  Fetch {
    request_id: String,
    #[serde(default)]
    client_id: Option<String>,
    request: Request,
  },
  Install,
  Activate,
  /// Force the waiting instance to take over immediately
  SkipWaiting,
  /// Background sync; connectivity has likely been restored
  Sync { tag: String },
  /// Raw push message payload
  Push {
    #[serde(default)]
    payload: Option<String>,
  },
  NotificationClick { tag: String },
  ClientConnected { id: String, url: String },
  ClientDisconnected { id: String },
}

/// Side effects the host must carry out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
  Response {
    request_id: String,
    response: Response,
  },
  /// The request failed the way a network error would
  FetchFailed { request_id: String, error: String },
  PostMessage {
    client_id: String,
    message: ClientMessage,
  },
  ShowNotification(Notification),
  CloseNotification { tag: String },
  FocusClient { client_id: String },
  OpenWindow { url: String },
  StateChanged { state: LifecycleState },
}

/// Event handler that parses host events from stdin
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl EventHandler {
  /// Spawn the stdin reader.
  pub fn stdin() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if line.trim().is_empty() {
              continue;
            }
            match serde_json::from_str::<HostEvent>(&line) {
              Ok(event) => {
                if tx.send(event).is_err() {
                  break;
                }
              }
              Err(e) => warn!(error = %e, "skipping malformed host event"),
            }
          }
          Ok(None) => {
            debug!("host closed stdin");
            break;
          }
          Err(e) => {
            warn!(error = %e, "failed to read from host");
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Wrap an existing channel.
  pub fn from_channel(rx: mpsc::UnboundedReceiver<HostEvent>) -> Self {
    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<HostEvent> {
    self.rx.recv().await
  }
}

/// Spawn the stdout writer. Dropping every sender ends the task.
pub fn stdout_writer() -> (
  mpsc::UnboundedSender<Outbound>,
  tokio::task::JoinHandle<()>,
) {
  let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

  let handle = tokio::spawn(async move {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
      let mut line = match serde_json::to_vec(&message) {
        Ok(line) => line,
        Err(e) => {
          warn!(error = %e, "failed to serialize outbound message");
          continue;
        }
      };
      line.push(b'\n');
      if let Err(e) = stdout.write_all(&line).await {
        warn!(error = %e, "host stdout closed");
        break;
      }
      let _ = stdout.flush().await;
    }
  });

  (tx, handle)
}
