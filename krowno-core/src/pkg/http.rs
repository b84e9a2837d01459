use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 2xx/3xx — what the resolver treats as "the package exists".
    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("{0}")]
    Other(String),
}

/// The network is an injected collaborator; the core only issues GETs
/// and looks at the status line.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, HttpError>;
}

/// Default collaborator backed by a blocking reqwest client with a
/// 30-second per-call timeout.
pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, HttpError> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| HttpError::Other(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        let resp = self.inner.get(url).send().map_err(classify)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = resp.bytes().map_err(classify)?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl From<HttpError> for crate::error::KrownoError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout => Self::Timeout("http request".into()),
            HttpError::ConnectionFailed(msg) => Self::NetworkUnavailable(msg),
            HttpError::InvalidUrl(msg) => Self::InvalidUrl(msg),
            HttpError::Other(msg) => Self::NetworkUnavailable(msg),
        }
    }
}

fn classify(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else if e.is_builder() {
        HttpError::InvalidUrl(e.to_string())
    } else if e.is_connect() {
        HttpError::ConnectionFailed(e.to_string())
    } else {
        HttpError::Other(e.to_string())
    }
}
