//! Request and response snapshots exchanged between the host, the router and
//! the network.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Header map. Names are stored lowercased.
pub type Headers = BTreeMap<String, String>;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Method {
  #[default]
  Get,
  Head,
  Options,
  Post,
  Put,
  Patch,
  Delete,
  Other(String),
}

impl Method {
  pub fn parse(s: &str) -> Self {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Self::Get,
      "HEAD" => Self::Head,
      "OPTIONS" => Self::Options,
      "POST" => Self::Post,
      "PUT" => Self::Put,
      "PATCH" => Self::Patch,
      "DELETE" => Self::Delete,
      other => Self::Other(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Options => "OPTIONS",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
      Self::Other(s) => s,
    }
  }

  /// Create/update/delete semantics. Unknown verbs count as mutating, so
  /// they are never cached and are queued for replay when offline.
  pub fn is_mutating(&self) -> bool {
    !matches!(self, Self::Get | Self::Head | Self::Options)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for Method {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for Method {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(Self::parse(&s))
  }
}

/// What the page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  #[default]
  #[serde(other)]
  Other,
}

impl Destination {
  pub fn is_static_asset(self) -> bool {
    matches!(
      self,
      Self::Document | Self::Script | Self::Style | Self::Image
    )
  }
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
  #[serde(default)]
  pub method: Method,
  pub url: String,
  #[serde(default)]
  pub destination: Destination,
  #[serde(default)]
  pub headers: Headers,
  #[serde(default)]
  pub body: Option<String>,
}

impl Request {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      destination: Destination::Other,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Path component of the URL, or the raw URL when it does not parse.
  pub fn path(&self) -> String {
    request_path(&self.url)
  }
}

/// Path component of an absolute URL.
pub fn request_path(url: &str) -> String {
  match Url::parse(url) {
    Ok(parsed) => parsed.path().to_string(),
    Err(_) => url.split(|c| c == '?' || c == '#').next().unwrap_or_default().to_string(),
  }
}

/// Resolve `path` against `origin`. Absolute URLs pass through unchanged.
pub fn resolve_url(origin: &str, path: &str) -> Result<String> {
  if let Ok(absolute) = Url::parse(path) {
    return Ok(absolute.to_string());
  }
  let base = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
  base
    .join(path)
    .map(|u| u.to_string())
    .map_err(|e| eyre!("Failed to resolve '{}' against {}: {}", path, origin, e))
}

/// A fully buffered response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireResponse", try_from = "WireResponse")]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: String::new(),
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  /// 2xx status.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json(&self) -> Result<serde_json::Value> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Response body is not JSON: {}", e))
  }

  /// Synthesized 503 returned when the network is unreachable and nothing
  /// usable is cached. `stored` is only set on the write path.
  pub fn offline(message: &str, stored: Option<bool>) -> Self {
    let body = OfflineBody {
      error: "Offline",
      message,
      stored,
    };
    let body = serde_json::to_vec(&body).unwrap_or_default();

    Self {
      status: 503,
      status_text: "Service Unavailable".to_string(),
      headers: Headers::from([("content-type".to_string(), "application/json".to_string())]),
      body,
    }
  }
}

#[derive(Serialize)]
struct OfflineBody<'a> {
  error: &'static str,
  message: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  stored: Option<bool>,
}

/// How a body is written on the host protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BodyEncoding {
  #[default]
  Text,
  Base64,
}

impl BodyEncoding {
  fn is_text(&self) -> bool {
    *self == Self::Text
  }
}

/// Response as it travels over the host protocol. UTF-8 bodies are sent as
/// text, anything else as base64.
#[derive(Serialize, Deserialize)]
struct WireResponse {
  status: u16,
  #[serde(default)]
  status_text: String,
  #[serde(default)]
  headers: Headers,
  #[serde(default)]
  body: Option<String>,
  #[serde(default, skip_serializing_if = "BodyEncoding::is_text")]
  body_encoding: BodyEncoding,
}

impl From<Response> for WireResponse {
  fn from(response: Response) -> Self {
    let (body, body_encoding) = match String::from_utf8(response.body) {
      Ok(text) => (text, BodyEncoding::Text),
      Err(e) => (STANDARD.encode(e.into_bytes()), BodyEncoding::Base64),
    };

    Self {
      status: response.status,
      status_text: response.status_text,
      headers: response.headers,
      body: Some(body),
      body_encoding,
    }
  }
}

impl TryFrom<WireResponse> for Response {
  type Error = String;

  fn try_from(wire: WireResponse) -> std::result::Result<Self, Self::Error> {
    let body = wire.body.unwrap_or_default();
    let body = match wire.body_encoding {
      BodyEncoding::Text => body.into_bytes(),
      BodyEncoding::Base64 => STANDARD
        .decode(body)
        .map_err(|e| format!("invalid base64 body: {}", e))?,
    };

    Ok(Self {
      status: wire.status,
      status_text: wire.status_text,
      headers: wire.headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_parse_is_case_insensitive() {
    assert_eq!(Method::parse("delete"), Method::Delete);
    assert_eq!(Method::parse("PoSt"), Method::Post);
    assert_eq!(Method::parse("purge"), Method::Other("PURGE".to_string()));
  }

  #[test]
  fn test_mutating_methods() {
    assert!(Method::Post.is_mutating());
    assert!(Method::Delete.is_mutating());
    assert!(!Method::Get.is_mutating());
    assert!(!Method::Head.is_mutating());
    assert!(!Method::Options.is_mutating());
  }

  #[test]
  fn test_unknown_methods_are_mutating() {
    assert!(Method::parse("PURGE").is_mutating());
    assert!(Method::parse("lock").is_mutating());
  }

  #[test]
  fn test_binary_body_survives_host_protocol() {
    let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0x00, 0xfe];
    let response = Response::new(200, png.clone()).with_header("Content-Type", "image/png");

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["body_encoding"], "base64");

    let back: Response = serde_json::from_value(json).unwrap();
    assert_eq!(back.body, png);
    assert_eq!(back, response);
  }

  #[test]
  fn test_text_body_is_sent_as_text() {
    let json = serde_json::to_value(Response::new(200, "[]")).unwrap();
    assert_eq!(json["body"], "[]");
    assert!(json.get("body_encoding").is_none());

    let back: Response =
      serde_json::from_str(r#"{"status":204,"body":null}"#).unwrap();
    assert!(back.body.is_empty());
    assert_eq!(back.status_text, "");
  }

  #[test]
  fn test_bad_base64_body_is_rejected() {
    let result: std::result::Result<Response, _> =
      serde_json::from_str(r#"{"status":200,"body":"%%%","body_encoding":"base64"}"#);
    assert!(result.is_err());
  }

  #[test]
  fn test_offline_response_shape() {
    let response = Response::offline("nope", Some(true));
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");

    let json = response.json().unwrap();
    assert_eq!(json["error"], "Offline");
    assert_eq!(json["message"], "nope");
    assert_eq!(json["stored"], true);
  }

  #[test]
  fn test_offline_response_omits_stored_on_read_path() {
    let json = Response::offline("nope", None).json().unwrap();
    assert!(json.get("stored").is_none());
  }

  #[test]
  fn test_request_deserializes_with_defaults() {
    let req: Request = serde_json::from_str(r#"{"url":"http://h/api/tasks"}"#).unwrap();
    assert_eq!(req.method, Method::Get);
    assert_eq!(req.destination, Destination::Other);
    assert_eq!(req.path(), "/api/tasks");
  }

  #[test]
  fn test_unknown_destination_is_other() {
    let req: Request =
      serde_json::from_str(r#"{"url":"http://h/x","destination":"font"}"#).unwrap();
    assert_eq!(req.destination, Destination::Other);
  }

  #[test]
  fn test_resolve_url() {
    assert_eq!(
      resolve_url("http://localhost:5173", "/manifest.json").unwrap(),
      "http://localhost:5173/manifest.json"
    );
    assert_eq!(
      resolve_url("http://localhost:5173", "https://cdn/x.js").unwrap(),
      "https://cdn/x.js"
    );
  }
}
