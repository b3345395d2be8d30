//! Network seam: the only place requests leave the agent.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;

use crate::http::{Headers, Request, Response};

/// Something that can perform a request against the real network.
///
/// An `Err` means the network could not be reached at all. HTTP error
/// statuses are returned as ordinary responses.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// `reqwest`-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(connect_timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(connect_timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let status = response.status();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
pub mod fake {
  //! Scripted network for tests.

  use super::*;
  use crate::http::Method;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::{Arc, Mutex};

  #[derive(Clone, Default)]
  pub struct FakeNetwork {
    inner: Arc<Inner>,
  }

  #[derive(Default)]
  struct Inner {
    offline: AtomicBool,
    routes: Mutex<HashMap<(Method, String), Response>>,
    failing: Mutex<Vec<String>>,
    log: Mutex<Vec<Request>>,
  }

  impl FakeNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn route(&self, method: Method, url: &str, response: Response) {
      self
        .inner
        .routes
        .lock()
        .unwrap()
        .insert((method, url.to_string()), response);
    }

    /// Fail every request to `url` with a network error, even while online.
    pub fn fail_url(&self, url: &str) {
      self.inner.failing.lock().unwrap().push(url.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
      self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Every request that reached the network, including failed ones.
    pub fn requests(&self) -> Vec<Request> {
      self.inner.log.lock().unwrap().clone()
    }
  }

  impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.inner.log.lock().unwrap().push(request.clone());

      if self.inner.offline.load(Ordering::SeqCst)
        || self.inner.failing.lock().unwrap().contains(&request.url)
      {
        return Err(eyre!("network unreachable: {}", request.url));
      }

      let routes = self.inner.routes.lock().unwrap();
      Ok(
        routes
          .get(&(request.method.clone(), request.url.clone()))
          .cloned()
          .unwrap_or_else(|| Response::new(404, "not found")),
      )
    }
  }
}
