//! The long-lived agent: one named handler per host event, run as an actor
//! that handles each event on its own task.

use color_eyre::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStore, PartitionManager};
use crate::clients::{ClientMessage, Clients};
use crate::config::Config;
use crate::event::{EventHandler, HostEvent, Outbound};
use crate::http::{resolve_url, Request};
use crate::lifecycle::{Activation, LifecycleManager, LifecycleState};
use crate::net::Network;
use crate::notify::NotificationDispatcher;
use crate::queue::{PendingRequest, QueueStore};
use crate::router::{Router, Rules};
use crate::sync::{SyncOrchestrator, SyncReport};

pub struct Agent<C: CacheStore, Q: QueueStore, N: Network> {
  router: Router<C, Q, N>,
  lifecycle: Arc<LifecycleManager<C, N>>,
  sync: Arc<SyncOrchestrator<Q, N>>,
  notifications: Arc<NotificationDispatcher>,
  clients: Arc<Clients>,
  network: Arc<N>,
  origin: Arc<str>,
  in_flight: Arc<AtomicUsize>,
}

impl<C: CacheStore, Q: QueueStore, N: Network> Agent<C, Q, N> {
  pub fn new(config: &Config, cache: C, queue: Q, network: N) -> Result<Self> {
    let network = Arc::new(network);
    let queue = Arc::new(queue);
    let cache = PartitionManager::new(cache, &config.version, &config.api_prefix);

    let router = Router::new(
      Arc::clone(&network),
      cache.clone(),
      Arc::clone(&queue),
      Rules::from_config(config)?,
    );
    let lifecycle = LifecycleManager::new(
      cache,
      Arc::clone(&network),
      &config.origin,
      &config.precache,
      config.skip_waiting,
    )?;
    let sync = SyncOrchestrator::new(queue, Arc::clone(&network), &config.sync_tag);
    let notifications = NotificationDispatcher::new(
      config.notification.clone(),
      resolve_url(&config.origin, "/")?,
    );

    Ok(Self {
      router,
      lifecycle: Arc::new(lifecycle),
      sync: Arc::new(sync),
      notifications: Arc::new(notifications),
      clients: Arc::new(Clients::new()),
      network,
      origin: Arc::from(config.origin.as_str()),
      in_flight: Arc::new(AtomicUsize::new(0)),
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  #[cfg(test)]
  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  /// Pending requests, ascending by id.
  pub fn pending(&self) -> Result<Vec<PendingRequest>> {
    self.sync.pending()
  }

  /// Handle an intercepted request.
  ///
  /// The URL is resolved against the origin first, so relative and absolute
  /// forms of the same resource share a cache key. Until the agent is active
  /// the request goes straight to the network, as it would for a page with
  /// no controller.
  pub async fn intercept(&self, request_id: String, mut request: Request) -> Outbound {
    let _guard = InFlight::enter(&self.in_flight);

    request.url = match resolve_url(&self.origin, &request.url) {
      Ok(url) => url,
      Err(e) => {
        warn!(error = %e, "rejecting request with unusable url");
        return Outbound::FetchFailed {
          request_id,
          error: e.to_string(),
        };
      }
    };

    let result = if self.state() == LifecycleState::Active {
      self.router.handle(&request).await
    } else {
      debug!(url = %request.url, "not active, passing request through");
      self.network.fetch(&request).await
    };

    match result {
      Ok(response) => Outbound::Response {
        request_id,
        response,
      },
      Err(e) => {
        warn!(error = %e, url = %request.url, "request failed");
        Outbound::FetchFailed {
          request_id,
          error: e.to_string(),
        }
      }
    }
  }

  /// Precache the manifest; activate right away when skipping the wait.
  pub async fn install(&self) -> Vec<Outbound> {
    if self.state() == LifecycleState::Active {
      info!("this version is already active, skipping install");
      return vec![self.state_changed()];
    }

    let mut out = Vec::new();
    if let Err(e) = self.lifecycle.install().await {
      error!(error = %e, "install failed");
      out.push(self.state_changed());
      return out;
    }
    out.push(self.state_changed());

    if self.lifecycle.skips_waiting() {
      out.extend(self.activate().await);
    }
    out
  }

  /// Purge stale partitions and claim open pages.
  pub async fn activate(&self) -> Vec<Outbound> {
    match self.activate_now() {
      Ok(_) => vec![self.state_changed()],
      Err(e) => {
        warn!(error = %e, "activation skipped");
        Vec::new()
      }
    }
  }

  fn activate_now(&self) -> Result<Activation> {
    self.lifecycle.activate(&self.clients, &self.in_flight)
  }

  /// Forced takeover: activate now if installed, otherwise as soon as the
  /// install finishes.
  pub async fn skip_waiting(&self) -> Vec<Outbound> {
    self.lifecycle.skip_waiting();
    if self.state() == LifecycleState::Installed {
      return self.activate().await;
    }
    Vec::new()
  }

  /// Run a sync pass and return its report.
  pub async fn sync_now(&self, tag: &str) -> Result<Option<SyncReport>> {
    self.sync.on_sync(tag).await
  }

  /// Run a sync pass and broadcast SYNC_COMPLETE to every controlled page.
  pub async fn sync(&self, tag: &str) -> Vec<Outbound> {
    match self.sync_now(tag).await {
      Ok(Some(report)) => self.broadcast(ClientMessage::SyncComplete {
        synced_count: report.synced_count,
      }),
      Ok(None) => Vec::new(),
      Err(e) => {
        error!(error = %e, "sync pass could not read the queue");
        Vec::new()
      }
    }
  }

  fn broadcast(&self, message: ClientMessage) -> Vec<Outbound> {
    self
      .clients
      .controlled()
      .into_iter()
      .map(|client| Outbound::PostMessage {
        client_id: client.id,
        message: message.clone(),
      })
      .collect()
  }

  pub fn push(&self, payload: Option<&str>) -> Vec<Outbound> {
    vec![Outbound::ShowNotification(
      self.notifications.on_push(payload),
    )]
  }

  pub fn notification_click(&self, tag: &str) -> Vec<Outbound> {
    self.notifications.on_click(tag, &self.clients)
  }

  pub fn client_connected(&self, id: &str, url: &str) {
    let controlled = self.state() == LifecycleState::Active;
    self.clients.connect(id, url, controlled);
  }

  fn state_changed(&self) -> Outbound {
    Outbound::StateChanged {
      state: self.state(),
    }
  }

  /// Route a host event to its handler.
  pub async fn dispatch(&self, event: HostEvent) -> Vec<Outbound> {
    match event {
      HostEvent::Fetch {
        request_id,
        client_id,
        request,
      } => {
        debug!(request_id = %request_id, client = ?client_id, "fetch event");
        vec![self.intercept(request_id, request).await]
      }
      HostEvent::Install => self.install().await,
      HostEvent::Activate => self.activate().await,
      HostEvent::SkipWaiting => self.skip_waiting().await,
      HostEvent::Sync { tag } => self.sync(&tag).await,
      HostEvent::Push { payload } => self.push(payload.as_deref()),
      HostEvent::NotificationClick { tag } => self.notification_click(&tag),
      HostEvent::ClientConnected { id, url } => {
        self.client_connected(&id, &url);
        Vec::new()
      }
      HostEvent::ClientDisconnected { id } => {
        self.clients.disconnect(&id);
        Vec::new()
      }
    }
  }

  /// Actor loop. Every event runs on its own task; the loop ends when the
  /// host closes its side, after in-flight tasks finish.
  pub async fn run(self, mut events: EventHandler, out: mpsc::UnboundedSender<Outbound>) {
    let mut tasks = JoinSet::new();

    while let Some(event) = events.next().await {
      let agent = self.clone();
      let out = out.clone();
      tasks.spawn(async move {
        for message in agent.dispatch(event).await {
          if out.send(message).is_err() {
            break;
          }
        }
      });

      // Reap finished tasks so the set does not grow unbounded.
      while tasks.try_join_next().is_some() {}
    }

    info!(remaining = tasks.len(), "host disconnected, draining tasks");
    while tasks.join_next().await.is_some() {}
  }
}

impl<C: CacheStore, Q: QueueStore, N: Network> Clone for Agent<C, Q, N> {
  fn clone(&self) -> Self {
    Self {
      router: self.router.clone(),
      lifecycle: Arc::clone(&self.lifecycle),
      sync: Arc::clone(&self.sync),
      notifications: Arc::clone(&self.notifications),
      clients: Arc::clone(&self.clients),
      network: Arc::clone(&self.network),
      origin: Arc::clone(&self.origin),
      in_flight: Arc::clone(&self.in_flight),
    }
  }
}

/// Counts a request as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
  fn enter(counter: &'a AtomicUsize) -> Self {
    counter.fetch_add(1, Ordering::SeqCst);
    Self(counter)
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}
