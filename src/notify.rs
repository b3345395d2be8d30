//! Push messages surfaced as notifications, and notification clicks routed
//! back into the application.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::clients::Clients;
use crate::config::NotificationConfig;
use crate::event::Outbound;

/// Push payload as sent by the server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub data: Option<serde_json::Value>,
}

/// A notification to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub tag: String,
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<serde_json::Value>,
}

pub struct NotificationDispatcher {
  config: NotificationConfig,
  /// Absolute URL of the application root page
  root_url: String,
  next_tag: AtomicU64,
}

impl NotificationDispatcher {
  pub fn new(config: NotificationConfig, root_url: String) -> Self {
    Self {
      config,
      root_url,
      next_tag: AtomicU64::new(1),
    }
  }

  /// Build the notification for a raw push payload.
  ///
  /// A payload that is not JSON is shown as the body text.
  pub fn on_push(&self, payload: Option<&str>) -> Notification {
    let payload = match payload {
      None => PushPayload::default(),
      Some(raw) => serde_json::from_str::<PushPayload>(raw).unwrap_or_else(|e| {
        warn!(error = %e, "push payload is not JSON, showing it as text");
        PushPayload {
          body: Some(raw.to_string()),
          ..Default::default()
        }
      }),
    };

    let tag = format!(
      "taskflow-{}",
      self.next_tag.fetch_add(1, Ordering::Relaxed)
    );
    debug!(tag = %tag, "showing push notification");

    Notification {
      tag,
      title: payload
        .title
        .unwrap_or_else(|| self.config.default_title.clone()),
      body: payload
        .body
        .unwrap_or_else(|| self.config.default_body.clone()),
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      data: payload.data,
    }
  }

  /// Dismiss the notification and bring the root page forward, opening it
  /// when no root page is open.
  pub fn on_click(&self, tag: &str, clients: &Clients) -> Vec<Outbound> {
    let mut actions = vec![Outbound::CloseNotification {
      tag: tag.to_string(),
    }];

    match clients.find_by_path("/") {
      Some(client) => actions.push(Outbound::FocusClient {
        client_id: client.id,
      }),
      None => actions.push(Outbound::OpenWindow {
        url: self.root_url.clone(),
      }),
    }

    actions
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dispatcher() -> NotificationDispatcher {
    NotificationDispatcher::new(NotificationConfig::default(), "http://h/".to_string())
  }

  #[test]
  fn test_defaults_when_payload_missing() {
    let n = dispatcher().on_push(None);
    assert_eq!(n.title, "TaskFlow");
    assert_eq!(n.body, "You have a new notification");
    assert_eq!(n.icon, "/favicon.svg");
  }

  #[test]
  fn test_payload_fields_and_unique_tags() {
    let d = dispatcher();
    let a = d.on_push(Some(r#"{"title":"Due soon","body":"Ship it","data":{"taskId":4}}"#));
    let b = d.on_push(Some("{}"));

    assert_eq!(a.title, "Due soon");
    assert_eq!(a.body, "Ship it");
    assert_eq!(a.data, Some(serde_json::json!({"taskId": 4})));
    assert_eq!(b.title, "TaskFlow");
    assert_ne!(a.tag, b.tag);
  }

  #[test]
  fn test_plain_text_payload() {
    let n = dispatcher().on_push(Some("hello"));
    assert_eq!(n.title, "TaskFlow");
    assert_eq!(n.body, "hello");
  }

  #[test]
  fn test_click_focuses_open_root_page() {
    let clients = Clients::new();
    clients.connect("tasks", "http://h/tasks", true);
    clients.connect("root", "http://h/", true);

    let actions = dispatcher().on_click("taskflow-1", &clients);
    assert_eq!(
      actions,
      vec![
        Outbound::CloseNotification {
          tag: "taskflow-1".to_string()
        },
        Outbound::FocusClient {
          client_id: "root".to_string()
        },
      ]
    );
  }

  #[test]
  fn test_click_opens_window_when_root_closed() {
    let clients = Clients::new();
    clients.connect("tasks", "http://h/tasks", true);

    let actions = dispatcher().on_click("taskflow-1", &clients);
    assert_eq!(
      actions[1],
      Outbound::OpenWindow {
        url: "http://h/".to_string()
      }
    );
  }
}
