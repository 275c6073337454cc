use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use reqwest::ClientBuilder;

use super::{FetchError, FetchRequest, FetchResponse, HttpFetcher, RedirectMode};

/// [`HttpFetcher`] backed by `reqwest`.
///
/// The client decodes gzip transparently, so bodies handed to the bridge are already decoded.
/// No cookie store is configured, which matches `credentials: "omit"`. Requests with
/// `redirect: "manual"` or `"error"` go through a second client that never follows redirects.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    follow: reqwest::Client,
    no_follow: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(|builder| builder)
    }

    /// Build both clients from `configure` applied to a default builder.
    pub fn with_config(configure: impl Fn(ClientBuilder) -> ClientBuilder) -> Result<Self, FetchError> {
        let follow = configure(reqwest::Client::builder())
            .build()
            .map_err(|e| FetchError::Network(format_reqwest_error(e)))?;
        let no_follow = configure(reqwest::Client::builder())
            .redirect(Policy::none())
            .build()
            .map_err(|e| FetchError::Network(format_reqwest_error(e)))?;
        Ok(Self { follow, no_follow })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, FetchError>> {
        let client = match request.redirect {
            RedirectMode::Follow => self.follow.clone(),
            RedirectMode::Manual | RedirectMode::Error => self.no_follow.clone(),
        };
        async move {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|_| FetchError::InvalidRequest(format!("method {:?}", request.method)))?;
            let requested = reqwest::Url::parse(&request.url)
                .map_err(|e| FetchError::InvalidRequest(format!("url {:?}: {e}", request.url)))?;

            let mut builder = client.request(method, requested.clone());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let resp = builder
                .send()
                .await
                .map_err(|e| FetchError::Network(format_reqwest_error(e)))?;

            let status = resp.status();
            if status.is_redirection() && resp.headers().contains_key(LOCATION) {
                match request.redirect {
                    RedirectMode::Follow => {}
                    RedirectMode::Error => {
                        return Err(FetchError::Network(format!(
                            "redirect from {} refused",
                            redact_url_for_logs(&requested)
                        )));
                    }
                    RedirectMode::Manual => return Ok(opaque_redirect(&requested)),
                }
            }

            let url = resp.url().clone();
            let headers = flatten_headers(resp.headers());
            let body = if status.is_success() {
                resp.bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| FetchError::Body(format_reqwest_error(e)))
            } else {
                Ok(Vec::new())
            };

            Ok(FetchResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                headers,
                redirected: url != requested,
                kind: if url.origin() == requested.origin() {
                    "basic".to_string()
                } else {
                    "cors".to_string()
                },
                url: url.to_string(),
                body,
            })
        }
        .boxed()
    }
}

/// What a browser exposes for a redirect under `redirect: "manual"`: status 0, no headers.
fn opaque_redirect(requested: &reqwest::Url) -> FetchResponse {
    FetchResponse {
        status: 0,
        status_text: String::new(),
        headers: Vec::new(),
        redirected: false,
        url: requested.to_string(),
        kind: "opaqueredirect".to_string(),
        body: Ok(Vec::new()),
    }
}

fn flatten_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        out.push((name.as_str().to_string(), joined));
    }
    out
}

fn redact_url_for_logs(url: &reqwest::Url) -> reqwest::Url {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn format_reqwest_error(err: reqwest::Error) -> String {
    let mut msg = err.to_string();
    if let Some(url) = err.url() {
        let redacted = redact_url_for_logs(url);
        msg = msg.replace(url.as_str(), redacted.as_str());
    }
    msg
}
