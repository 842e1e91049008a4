//! Request and response values seen by the asset worker.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// How the request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level page load.
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            mode: RequestMode::SameOrigin,
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            mode: RequestMode::Navigate,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Identity used as the store key: method plus URL without fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }
}

/// Origin classification of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same origin.
    Basic,
    /// Cross origin, allowed by the server.
    Cors,
    /// Cross origin without CORS; status and body are hidden.
    Opaque,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64", default)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, kind: ResponseType, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            kind,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Status in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Only plain 200s from the same origin or an allowed cross origin are
    /// stored at fetch time.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && matches!(self.kind, ResponseType::Basic | ResponseType::Cors)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn cache_key_ignores_fragment() {
        let a = Request::get(url("http://localhost:8080/index.html#top"));
        let b = Request::get(url("http://localhost:8080/index.html"));
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "GET http://localhost:8080/index.html");
    }

    #[test]
    fn cache_key_includes_method() {
        let get = Request::get(url("http://localhost/app.js"));
        let head = get.clone().with_method(Method::Head);
        assert_ne!(get.cache_key(), head.cache_key());
    }

    #[test]
    fn cacheable_requires_200_and_visible_origin() {
        assert!(Response::new(200, ResponseType::Basic, "x").is_cacheable());
        assert!(Response::new(200, ResponseType::Cors, "x").is_cacheable());
        assert!(!Response::new(200, ResponseType::Opaque, "").is_cacheable());
        assert!(!Response::new(204, ResponseType::Basic, "").is_cacheable());
        assert!(!Response::new(404, ResponseType::Basic, "").is_cacheable());
    }

    #[test]
    fn body_survives_json() {
        let resp = Response::new(200, ResponseType::Basic, vec![0u8, 159, 146, 150])
            .with_header("Content-Type", "application/octet-stream");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"type\":\"basic\""));
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
        assert_eq!(back.header("content-type"), Some("application/octet-stream"));
    }

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("post".parse::<Method>(), Ok(Method::Post));
        assert!("BREW".parse::<Method>().is_err());
    }
}
