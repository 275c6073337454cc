//! Control request messages.
//!
//! Requests travel over the native message channel, never through shared memory. On the wire
//! (JSON) each request is an object tagged by `type`; byte payloads are arrays of numbers.
//! Responses are not messages: they are written into the control region as `status`, `len` and
//! `data`.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Accept the pending connection on the listening socket. `data[0] = 1` once accepted.
    #[serde(rename = "accept")]
    Accept,

    #[serde(rename = "send")]
    Send { buf: Vec<u8> },

    #[serde(rename = "recv")]
    Recv { len: usize },

    /// Ask to be signalled through the ring's notify word once it is readable.
    #[serde(rename = "recv-is-readable")]
    RecvIsReadable {
        /// Seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<f64>,
    },

    #[serde(rename = "recv-is-readable-cancel")]
    RecvIsReadableCancel,

    /// The guest wrote `len` bytes into the outbound ring.
    #[serde(rename = "notify-send-from-net")]
    NotifySendFromNet { len: usize },

    #[serde(rename = "http_send")]
    HttpSend {
        address: String,
        /// JSON-encoded fetch init object (`method`, `headers`, ...).
        req: Vec<u8>,
    },

    #[serde(rename = "http_writebody")]
    HttpWriteBody {
        id: i32,
        body: Vec<u8>,
        #[serde(rename = "isEOF", deserialize_with = "flag")]
        is_eof: bool,
    },

    #[serde(rename = "http_isreadable")]
    HttpIsReadable { id: i32 },

    #[serde(rename = "http_recv")]
    HttpRecv { id: i32, len: usize },

    #[serde(rename = "http_readbody")]
    HttpReadBody { id: i32, len: usize },

    #[serde(rename = "send_cert")]
    SendCert { buf: Vec<u8> },

    #[serde(rename = "recv_cert")]
    RecvCert { len: usize },

    #[serde(rename = "layer_request")]
    LayerRequest {
        address: String,
        digest: String,
        #[serde(rename = "isGzip", alias = "isGzipN", deserialize_with = "flag")]
        is_gzip: bool,
    },

    #[serde(rename = "layer_isreadable")]
    LayerIsReadable { id: i32 },

    #[serde(rename = "layer_readat")]
    LayerReadAt { id: i32, offset: usize, len: usize },

    #[serde(rename = "decompress_init")]
    DecompressInit,

    #[serde(rename = "decompress_write")]
    DecompressWrite {
        id: i32,
        chunk: Vec<u8>,
        #[serde(rename = "isEOF", deserialize_with = "flag")]
        is_eof: bool,
    },

    #[serde(rename = "decompress_read")]
    DecompressRead { id: i32, len: usize },
}

impl Request {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire tag, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Request::Accept => "accept",
            Request::Send { .. } => "send",
            Request::Recv { .. } => "recv",
            Request::RecvIsReadable { .. } => "recv-is-readable",
            Request::RecvIsReadableCancel => "recv-is-readable-cancel",
            Request::NotifySendFromNet { .. } => "notify-send-from-net",
            Request::HttpSend { .. } => "http_send",
            Request::HttpWriteBody { .. } => "http_writebody",
            Request::HttpIsReadable { .. } => "http_isreadable",
            Request::HttpRecv { .. } => "http_recv",
            Request::HttpReadBody { .. } => "http_readbody",
            Request::SendCert { .. } => "send_cert",
            Request::RecvCert { .. } => "recv_cert",
            Request::LayerRequest { .. } => "layer_request",
            Request::LayerIsReadable { .. } => "layer_isreadable",
            Request::LayerReadAt { .. } => "layer_readat",
            Request::DecompressInit => "decompress_init",
            Request::DecompressWrite { .. } => "decompress_write",
            Request::DecompressRead { .. } => "decompress_read",
        }
    }
}

/// Accept `true`/`false` as well as the numeric `1`/`0` some guests send.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Number(n) => n != 0.0,
    })
}
