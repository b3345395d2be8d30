//! Pages known to the agent and which of them it controls.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::http::request_path;

/// An open application page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  pub id: String,
  pub url: String,
  /// Whether this agent intercepts the page's requests
  pub controlled: bool,
}

/// Message posted to controlled pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SyncComplete {
    #[serde(rename = "syncedCount")]
    synced_count: usize,
  },
}

#[derive(Default)]
pub struct Clients {
  pages: Mutex<BTreeMap<String, Client>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a page. `controlled` is true when the page opened while this
  /// agent was already active.
  pub fn connect(&self, id: &str, url: &str, controlled: bool) {
    self.with(|pages| {
      pages.insert(
        id.to_string(),
        Client {
          id: id.to_string(),
          url: url.to_string(),
          controlled,
        },
      );
    });
  }

  pub fn disconnect(&self, id: &str) {
    self.with(|pages| {
      pages.remove(id);
    });
  }

  /// Take control of every open page. Returns how many were newly claimed.
  pub fn claim(&self) -> usize {
    self.with(|pages| {
      let mut claimed = 0;
      for client in pages.values_mut().filter(|c| !c.controlled) {
        client.controlled = true;
        claimed += 1;
      }
      claimed
    })
  }

  pub fn controlled(&self) -> Vec<Client> {
    self.with(|pages| pages.values().filter(|c| c.controlled).cloned().collect())
  }

  /// First open page whose path is `path`.
  pub fn find_by_path(&self, path: &str) -> Option<Client> {
    self.with(|pages| {
      pages
        .values()
        .find(|c| request_path(&c.url) == path)
        .cloned()
    })
  }

  fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Client>) -> R) -> R {
    // A poisoned registry is still structurally valid.
    let mut pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut pages)
  }
}
