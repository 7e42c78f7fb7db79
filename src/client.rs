/// Signed request engine: JWS-signed POSTs with nonce flow and retries
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;

use crate::config::DriveConfig;
use crate::crypto::AccountKey;
use crate::error::{AcmeError, Result};
use crate::protocol::nonce::REPLAY_NONCE;
use crate::protocol::problem::PROBLEM_JSON;
use crate::protocol::{Directory, DirectoryClient, NonceCache, Problem, jws};
use crate::retry::RetryPolicy;
use crate::types::CancelToken;

const JOSE_JSON: &str = "application/jose+json";

/// Response of one CA request, headers and body retained.
#[derive(Debug)]
pub struct CaResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Parsed body, when the content type announced JSON
    pub json: Option<Value>,
}

impl CaResponse {
    /// `Location` header, the URL of a newly created resource.
    pub fn location(&self) -> Option<String> {
        self.header("location")
    }

    /// Content type of the body
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type")
    }

    /// A plain header value
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Target of a `Link` header with the given relation.
    pub fn link(&self, rel: &str) -> Option<String> {
        let needle = format!("rel=\"{}\"", rel);
        for value in self.headers.get_all("link") {
            let Ok(value) = value.to_str() else { continue };
            for part in value.split(',') {
                let part = part.trim();
                if part.contains(&needle)
                    && let Some(url) = part.split(';').next()
                {
                    let url = url.trim();
                    if url.starts_with('<') && url.ends_with('>') {
                        return Some(url[1..url.len() - 1].to_string());
                    }
                }
            }
        }
        None
    }
}

/// One CA session: directory cache, nonce cache, and the request engine.
///
/// The nonce slot is consumed-and-replaced atomically; a `badNonce`
/// rejection clears it so the retry fetches a fresh one. Payloads are
/// produced by a builder closure that is re-invoked on every attempt.
pub struct AcmeClient {
    http: reqwest::Client,
    directory: DirectoryClient,
    nonce: NonceCache,
    max_retries: u32,
    retry: RetryPolicy,
}

impl AcmeClient {
    /// Create a session against the CA at `ca_url`.
    pub fn new(ca_url: impl Into<String>, config: &DriveConfig) -> Self {
        let http = reqwest::Client::new();
        Self {
            directory: DirectoryClient::new(ca_url, http.clone()),
            http,
            nonce: NonceCache::new(),
            max_retries: config.max_retries,
            retry: config.retry.clone(),
        }
    }

    /// Fetch the directory eagerly; fails fast on an unreachable CA.
    pub async fn setup(&self, cancel: &CancelToken) -> Result<Directory> {
        cancel.check()?;
        self.directory.fetch().await
    }

    /// Cached directory, fetched on first use.
    pub async fn directory(&self) -> Result<Directory> {
        self.directory.get().await
    }

    /// Nonce cache, exposed for tests asserting the single-slot invariant.
    pub fn nonce_cache(&self) -> &NonceCache {
        &self.nonce
    }

    /// Fetch a fresh nonce with a `HEAD` on the CA's nonce endpoint.
    async fn fetch_nonce(&self, cancel: &CancelToken) -> Result<String> {
        cancel.check()?;
        let directory = self.directory.get().await?;
        let url = directory.nonce_url();
        tracing::debug!("fetching nonce from {}", url);

        let response = self.http.head(url).send().await?;
        if !response.status().is_success() {
            return Err(AcmeError::IncorrectResponse {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        response
            .headers()
            .get(REPLAY_NONCE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| AcmeError::malformed(format!("no {} header from {}", REPLAY_NONCE, url)))
    }

    /// POST a signed request to `url`.
    ///
    /// `kid` is the account URL for established accounts, `None` while
    /// the public key itself must identify the requester. `build` is
    /// invoked per attempt to produce the payload; `None` signs the
    /// empty payload.
    pub async fn post_signed<F>(
        &self,
        url: &str,
        key: &AccountKey,
        kid: Option<&str>,
        cancel: &CancelToken,
        build: F,
    ) -> Result<CaResponse>
    where
        F: Fn() -> Result<Option<Value>>,
    {
        let mut attempt: u32 = 0;
        loop {
            cancel.check()?;
            self.directory.get().await?;

            let nonce = match self.nonce.consume() {
                Some(nonce) => nonce,
                None => self.fetch_nonce(cancel).await?,
            };

            let payload = build()?;
            let body = jws::sign(key, url, &nonce, kid, payload.as_ref())?;

            tracing::debug!("POST {}", url);
            let result = self
                .http
                .post(url)
                .header(CONTENT_TYPE, JOSE_JSON)
                .body(body)
                .send()
                .await;

            let error = match result {
                Ok(response) => match self.digest(url, response).await {
                    Ok(ca_response) => return Ok(ca_response),
                    Err(e) => e,
                },
                Err(e) => AcmeError::from(e),
            };

            if !error.is_transient() || attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;

            match error {
                AcmeError::BadNonce => {
                    // The rejected response replenished the slot; drop it
                    // so the retry starts from a freshly fetched nonce.
                    self.nonce.clear();
                    tracing::warn!("bad nonce at {}, retry {} of {}", url, attempt, self.max_retries);
                }
                ref e => {
                    let delay = self.retry.delay(attempt - 1);
                    tracing::warn!(
                        "{} at {}, retry {} of {} in {:?}",
                        e,
                        url,
                        attempt,
                        self.max_retries,
                        delay
                    );
                    cancel.check()?;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Plain GET, used for authorization polling and certificate
    /// download. Replenishes the nonce cache like every other response.
    pub async fn get(&self, url: &str, cancel: &CancelToken) -> Result<CaResponse> {
        let mut attempt: u32 = 0;
        loop {
            cancel.check()?;
            tracing::debug!("GET {}", url);

            let error = match self.http.get(url).send().await {
                Ok(response) => match self.digest(url, response).await {
                    Ok(ca_response) => return Ok(ca_response),
                    Err(e) => e,
                },
                Err(e) => AcmeError::from(e),
            };

            if !error.is_transient() || attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;
            let delay = self.retry.delay(attempt - 1);
            tracing::warn!("{} at {}, retry {} of {} in {:?}", error, url, attempt, self.max_retries, delay);
            cancel.check()?;
            tokio::time::sleep(delay).await;
        }
    }

    /// Common response handling: nonce replenishment, JSON parsing,
    /// problem translation, status policing.
    async fn digest(&self, url: &str, response: reqwest::Response) -> Result<CaResponse> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        self.nonce.replenish_from(&headers);

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.bytes().await?.to_vec();

        if (200..300).contains(&status) {
            let json = if content_type.starts_with("application/") && content_type.contains("json")
            {
                if body.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::from_slice(&body)
                            .map_err(|e| AcmeError::malformed(format!("{}: {}", url, e)))?,
                    )
                }
            } else {
                None
            };
            return Ok(CaResponse {
                status,
                headers,
                body,
                json,
            });
        }

        if content_type.starts_with(PROBLEM_JSON) {
            let problem: Problem = serde_json::from_slice(&body)
                .map_err(|e| AcmeError::malformed(format!("problem document at {}: {}", url, e)))?;
            let error = problem.into_error(url);
            tracing::warn!("ACME problem at {}: {}", url, error);
            return Err(error);
        }

        if status == 404 {
            // A URL the CA handed out earlier but no longer recognizes;
            // the directory may have rolled over.
            self.directory.invalidate().await;
            return Err(AcmeError::not_found(url.to_string()));
        }

        Err(AcmeError::IncorrectResponse {
            status,
            url: url.to_string(),
        })
    }
}
