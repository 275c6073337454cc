//! Host services the bridge drives on behalf of the guest.
//!
//! The bridge only talks to these traits; the native implementations live in the submodules and
//! tests substitute in-memory fakes.

pub mod fetch;
pub mod gzip;
pub mod tcp;

use std::collections::BTreeMap;
use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::BridgeError;

pub use fetch::ReqwestFetcher;
pub use gzip::{GzipDecompressor, GzipFactory};
pub use tcp::TcpTransport;

/// Progress reported by a [`Transport`] after [`Transport::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Data(Vec<u8>),
    Closed,
    Error(String),
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Byte-stream backend behind the guest's accepted socket.
pub trait Transport: Send {
    /// Start connecting. Must not block; completion is reported as [`TransportEvent::Opened`] or
    /// [`TransportEvent::Error`] on `events`, and inbound bytes as [`TransportEvent::Data`].
    fn open(&mut self, events: TransportEvents) -> Result<(), BridgeError>;

    fn send(&mut self, data: Vec<u8>) -> Result<(), BridgeError>;

    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, events: TransportEvents) -> Result<(), BridgeError> {
        <T as Transport>::open(&mut **self, events)
    }

    fn send(&mut self, data: Vec<u8>) -> Result<(), BridgeError> {
        <T as Transport>::send(&mut **self, data)
    }

    fn close(&mut self) {
        <T as Transport>::close(&mut **self)
    }
}

/// Redirect handling requested by the guest's fetch init.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectMode {
    #[default]
    Follow,
    /// Hand the redirect back as an opaque response.
    Manual,
    /// Fail the request on any redirect.
    Error,
}

impl RedirectMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "follow" => Some(Self::Follow),
            "manual" => Some(Self::Manual),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A normalised outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub mode: String,
    pub credentials: String,
    pub redirect: RedirectMode,
    /// Remaining init fields (`cache`, `referrer`, `integrity`, ...) as the guest sent them.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            mode: "cors".to_string(),
            credentials: "omit".to_string(),
            redirect: RedirectMode::Follow,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    /// Lower-cased names; repeated headers are joined with `", "`.
    pub headers: Vec<(String, String)>,
    pub redirected: bool,
    /// Final URL after redirects.
    pub url: String,
    /// Response type as a browser would report it (`basic`, `cors`, ...).
    pub kind: String,
    /// Decoded body. Only read for 2xx responses.
    pub body: Result<Vec<u8>, FetchError>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

pub trait HttpFetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, FetchError>>;
}

impl<F, Fut> HttpFetcher for F
where
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FetchResponse, FetchError>> + Send + 'static,
{
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, FetchError>> {
        (self)(request).boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompressError {
    #[error("corrupt compressed stream: {0}")]
    Corrupt(String),

    #[error("input written after the stream was closed")]
    WriteAfterClose,
}

/// Streaming decompressor with push-input / pull-output semantics.
pub trait Decompressor: Send {
    fn push(&mut self, input: &[u8]) -> Result<(), DecompressError>;

    /// Signal end of input and flush the decoder.
    fn close(&mut self) -> Result<(), DecompressError>;

    /// Take whatever output has been produced so far.
    fn pull(&mut self) -> Vec<u8>;

    /// Input is closed and every output byte has been produced.
    fn is_finished(&self) -> bool;
}

pub trait DecompressorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Decompressor>;
}

impl<F> DecompressorFactory for F
where
    F: Fn() -> Box<dyn Decompressor> + Send + Sync,
{
    fn create(&self) -> Box<dyn Decompressor> {
        (self)()
    }
}
