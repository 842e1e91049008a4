//! Network access for the asset worker.

use async_trait::async_trait;
use url::Url;

use super::types::{Method, Request, RequestMode, Response, ResponseType};
use crate::error::CacheError;

/// Anything that can answer a request over the network.
///
/// Transport failures are `Err`; HTTP error statuses are ordinary responses.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError>;
}

/// `reqwest`-backed network that classifies responses relative to the page
/// origin.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: Url,
}

impl HttpNetwork {
    pub fn new(origin: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin,
        }
    }

    pub fn with_client(origin: Url, client: reqwest::Client) -> Self {
        Self { client, origin }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn classify(&self, request: &Request, headers: &[(String, String)]) -> Option<ResponseType> {
        if request.url.origin() == self.origin.origin() {
            return Some(ResponseType::Basic);
        }
        if request.mode == RequestMode::NoCors {
            return Some(ResponseType::Opaque);
        }
        let allowed = headers
            .iter()
            .find(|(k, _)| k == "access-control-allow-origin")
            .map(|(_, v)| v == "*" || *v == self.origin.origin().ascii_serialization())
            .unwrap_or(false);
        match (allowed, request.mode) {
            (true, _) => Some(ResponseType::Cors),
            (false, RequestMode::Navigate) => Some(ResponseType::Opaque),
            (false, _) => None,
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
        let resp = self
            .client
            .request(to_reqwest(request.method), request.url.clone())
            .send()
            .await?;

        let status = resp.status().as_u16();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let kind = self.classify(request, &headers).ok_or_else(|| CacheError::Network {
            url: request.url.to_string(),
            message: "cross-origin response blocked: no matching Access-Control-Allow-Origin"
                .into(),
        })?;

        if kind == ResponseType::Opaque {
            return Ok(Response::new(0, ResponseType::Opaque, Vec::new()));
        }

        let body = resp.bytes().await?.to_vec();
        tracing::trace!(url = %request.url, status, ?kind, "network response");
        Ok(Response {
            status,
            kind,
            headers,
            body,
        })
    }
}
