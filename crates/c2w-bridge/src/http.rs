//! HTTP request normalisation and response framing.
//!
//! The guest hands over a fetch init object as JSON. The controller owns the network identity,
//! so the request is forced to `mode: "cors"` / `credentials: "omit"` and the guest's
//! `User-Agent` is dropped. Responses come back to the guest as a JSON header blob followed by
//! the raw body bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::backend::{FetchError, FetchRequest, FetchResponse, HttpFetcher, RedirectMode};

/// Header blob and body produced by a finished fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseOutcome {
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

/// Guest-visible response header blob. Synthesised failures carry only `status` and
/// `statusText`, so every field has a default when decoding.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseHeader {
    pub body_used: bool,
    pub headers: BTreeMap<String, String>,
    pub redirected: bool,
    pub status: u16,
    pub status_text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
struct RequestInit {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    redirect: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Init fields the controller always decides itself.
const OVERRIDDEN: &[&str] = &["mode", "credentials", "body"];

/// Parse the guest's fetch init object and apply the controller's policy. Fields the policy does
/// not touch are carried through in [`FetchRequest::extra`].
pub fn normalize_request(address: &str, raw: &[u8]) -> Result<FetchRequest, serde_json::Error> {
    let init: RequestInit = if raw.is_empty() {
        RequestInit::default()
    } else {
        serde_json::from_slice(raw)?
    };

    let redirect = match init.redirect.as_deref() {
        None => RedirectMode::Follow,
        Some(value) => RedirectMode::parse(value).ok_or_else(|| {
            <serde_json::Error as serde::de::Error>::custom(format!("unknown redirect mode {value:?}"))
        })?,
    };

    let mut headers = init.headers;
    headers.retain(|name, value| !(name.eq_ignore_ascii_case("user-agent") && !value.is_empty()));

    let mut extra = init.extra;
    extra.retain(|name, _| !OVERRIDDEN.contains(&name.as_str()));

    Ok(FetchRequest {
        url: address.to_string(),
        method: init
            .method
            .map(|m| m.to_ascii_uppercase())
            .unwrap_or_else(|| "GET".to_string()),
        headers,
        body: None,
        mode: "cors".to_string(),
        credentials: "omit".to_string(),
        redirect,
        extra,
    })
}

/// Attach the accumulated request body unless the method cannot carry one.
pub fn attach_body(request: &mut FetchRequest, body: Vec<u8>) {
    if request.method != "GET" && request.method != "HEAD" {
        request.body = Some(body);
    }
}

/// Turn a fetch result into what the guest will read.
///
/// Only 2xx responses keep their body. A body that fails to download is replaced by an empty one
/// and the header is still delivered. A failed request becomes a bare 503.
pub fn response_outcome(result: Result<FetchResponse, FetchError>) -> ResponseOutcome {
    let resp = match result {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!("fetch failed: {err}");
            return service_unavailable();
        }
    };

    let ok = resp.is_success();
    let body = if ok {
        match resp.body {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(status = resp.status, "failed to fetch body: {err}");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let mut headers = BTreeMap::new();
    for (name, value) in resp.headers {
        let name = name.to_ascii_lowercase();
        if !body.is_empty() {
            if name == "content-encoding" {
                continue;
            }
            if name == "content-length" {
                headers.insert(name, body.len().to_string());
                continue;
            }
        }
        headers.insert(name, value);
    }

    // The blob is taken before the body is read.
    let header = ResponseHeader {
        body_used: false,
        headers,
        redirected: resp.redirected,
        status: resp.status,
        status_text: resp.status_text,
        kind: resp.kind,
        url: resp.url,
    };
    ResponseOutcome {
        header: encode_json(&header),
        body,
    }
}

pub fn service_unavailable() -> ResponseOutcome {
    let header = serde_json::json!({
        "status": 503,
        "statusText": "Service Unavailable",
    });
    ResponseOutcome {
        header: encode_json(&header),
        body: Vec::new(),
    }
}

fn encode_json<T: Serialize>(value: &T) -> Vec<u8> {
    // Serialising plain maps and strings cannot fail.
    serde_json::to_vec(value).unwrap_or_default()
}

/// Run `request` in the background. The receiver yields exactly one outcome.
pub fn spawn_fetch(
    fetcher: Arc<dyn HttpFetcher>,
    request: FetchRequest,
) -> oneshot::Receiver<ResponseOutcome> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let url = request.url.clone();
        let outcome = response_outcome(fetcher.fetch(request).await);
        tracing::debug!(%url, body_len = outcome.body.len(), "fetch finished");
        let _ = tx.send(outcome);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: Result<Vec<u8>, FetchError>) -> FetchResponse {
        FetchResponse {
            status,
            status_text: "OK".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            redirected: false,
            url: "http://x/y".to_string(),
            kind: "basic".to_string(),
            body,
        }
    }

    fn header_of(outcome: &ResponseOutcome) -> serde_json::Value {
        serde_json::from_slice(&outcome.header).unwrap()
    }

    #[test]
    fn request_policy_is_applied() {
        let raw = br#"{"method":"post","headers":{"User-Agent":"curl/8","Accept":"*/*"},"cache":"no-store"}"#;
        let req = normalize_request("http://x/y", raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.mode, "cors");
        assert_eq!(req.credentials, "omit");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.headers["Accept"], "*/*");

        // An empty User-Agent is left alone.
        let req = normalize_request("http://x/y", br#"{"headers":{"User-Agent":""}}"#).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.headers["User-Agent"], "");

        assert!(normalize_request("http://x/y", b"{not json").is_err());
    }

    #[test]
    fn untouched_init_fields_are_carried_through() {
        let raw = br#"{"method":"GET","redirect":"manual","cache":"no-store","referrer":"","integrity":"sha256-abc","mode":"no-cors","credentials":"include"}"#;
        let req = normalize_request("http://x/y", raw).unwrap();
        assert_eq!(req.redirect, RedirectMode::Manual);
        assert_eq!(req.mode, "cors");
        assert_eq!(req.credentials, "omit");
        assert_eq!(
            serde_json::Value::Object(req.extra),
            serde_json::json!({"cache": "no-store", "referrer": "", "integrity": "sha256-abc"})
        );

        let req = normalize_request("http://x/y", br#"{"redirect":"error"}"#).unwrap();
        assert_eq!(req.redirect, RedirectMode::Error);
        assert_eq!(normalize_request("http://x/y", b"").unwrap().redirect, RedirectMode::Follow);
        assert!(normalize_request("http://x/y", br#"{"redirect":"sideways"}"#).is_err());
    }

    #[test]
    fn body_is_only_attached_for_methods_with_bodies() {
        let mut get = FetchRequest::get("http://x/");
        attach_body(&mut get, b"ignored".to_vec());
        assert_eq!(get.body, None);

        let mut put = FetchRequest::get("http://x/");
        put.method = "PUT".to_string();
        attach_body(&mut put, b"data".to_vec());
        assert_eq!(put.body.as_deref(), Some(&b"data"[..]));
    }

    #[test]
    fn decoded_body_rewrites_length_headers() {
        let outcome = response_outcome(Ok(response(
            200,
            &[
                ("Content-Encoding", "gzip"),
                ("Content-Length", "20"),
                ("Content-Type", "text/plain"),
            ],
            Ok(b"ok".to_vec()),
        )));
        assert_eq!(outcome.body, b"ok");
        let header = header_of(&outcome);
        assert_eq!(header["status"], 200);
        assert_eq!(header["bodyUsed"], false);
        assert_eq!(header["type"], "basic");
        assert_eq!(header["headers"]["content-length"], "2");
        assert_eq!(header["headers"]["content-type"], "text/plain");
        assert!(header["headers"].get("content-encoding").is_none());
    }

    #[test]
    fn non_success_and_failed_bodies_are_empty() {
        let outcome = response_outcome(Ok(response(
            404,
            &[("content-length", "9")],
            Ok(b"not found".to_vec()),
        )));
        assert!(outcome.body.is_empty());
        let header = header_of(&outcome);
        assert_eq!(header["status"], 404);
        assert_eq!(header["headers"]["content-length"], "9");

        let outcome = response_outcome(Ok(response(
            200,
            &[],
            Err(FetchError::Body("reset".to_string())),
        )));
        assert!(outcome.body.is_empty());
        assert_eq!(header_of(&outcome)["status"], 200);
    }

    #[test]
    fn transport_failure_is_503() {
        let outcome = response_outcome(Err(FetchError::Network("refused".to_string())));
        assert!(outcome.body.is_empty());
        assert_eq!(
            header_of(&outcome),
            serde_json::json!({"status": 503, "statusText": "Service Unavailable"})
        );
    }
}
