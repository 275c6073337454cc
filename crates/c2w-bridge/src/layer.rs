//! Content-addressed downloads: the body is only exposed if its SHA-256 matches the digest the
//! guest asked for, and it is read at random offsets instead of being drained.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use crate::backend::gzip::gunzip;
use crate::backend::{FetchRequest, HttpFetcher};
use crate::http::{self, ResponseOutcome};

/// Compare `data` against a hex digest, with or without a `sha256:` prefix.
pub fn verify_digest(expected: &str, data: &[u8]) -> bool {
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    let actual = hex::encode(Sha256::digest(data));
    actual.eq_ignore_ascii_case(expected.trim())
}

pub fn spawn_layer_fetch(
    fetcher: Arc<dyn HttpFetcher>,
    request: FetchRequest,
    digest: String,
    is_gzip: bool,
) -> oneshot::Receiver<ResponseOutcome> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let url = request.url.clone();
        let mut resp = match fetcher.fetch(request).await {
            Ok(resp) => resp,
            Err(err) => {
                let _ = tx.send(http::response_outcome(Err(err)));
                return;
            }
        };

        if resp.is_success() {
            if let Ok(body) = &mut resp.body {
                let raw = std::mem::take(body);
                *body = verified_body(&url, &digest, is_gzip, raw).await;
            }
        }
        let _ = tx.send(http::response_outcome(Ok(resp)));
    });
    rx
}

async fn verified_body(url: &str, digest: &str, is_gzip: bool, body: Vec<u8>) -> Vec<u8> {
    if !verify_digest(digest, &body) {
        tracing::warn!(%url, %digest, "layer digest mismatch; discarding content");
        return Vec::new();
    }
    if !is_gzip {
        return body;
    }
    match tokio::task::spawn_blocking(move || gunzip(&body)).await {
        Ok(Ok(plain)) => plain,
        Ok(Err(err)) => {
            tracing::warn!(%url, "failed to decompress layer: {err}");
            Vec::new()
        }
        Err(err) => {
            tracing::error!(%url, "layer decompression task failed: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn digest_accepts_prefixed_and_bare_hex() {
        assert!(verify_digest(HELLO_SHA256, b"hello"));
        assert!(verify_digest(&format!("sha256:{HELLO_SHA256}"), b"hello"));
        assert!(verify_digest(&HELLO_SHA256.to_ascii_uppercase(), b"hello"));
        assert!(!verify_digest(HELLO_SHA256, b"hello!"));
        assert!(!verify_digest("sha256:", b"hello"));
    }
}
