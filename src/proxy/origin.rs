// src/proxy/origin.rs
//
// Where source images come from: an HTTP upstream or a local directory.

use crate::error::{Result, ThumbnailError};
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::{
    HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
    USER_AGENT,
};
use hyper::{Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ACCEPT_IMAGES: &str = "image/*,*/*;q=0.1";
pub const ORIGIN_USER_AGENT: &str = concat!("thumbnail-proxy/", env!("CARGO_PKG_VERSION"));

/// Request headers forwarded to the origin.
pub const FORWARDED_REQUEST_HEADERS: [hyper::header::HeaderName; 3] =
    [CACHE_CONTROL, IF_MODIFIED_SINCE, IF_NONE_MATCH];

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// An origin response the proxy can work with: 200 with a body, or 304.
#[derive(Debug)]
pub struct Fetched {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Fetched {
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}

pub enum Origin {
    Http(HttpOrigin),
    Local(LocalOrigin),
}

impl Origin {
    /// Fetch `target` (a URL or a path, as produced by the director).
    pub async fn fetch(&self, target: &str, request_headers: &HeaderMap) -> Result<Fetched> {
        match self {
            Self::Http(origin) => origin.fetch(target, request_headers).await,
            Self::Local(origin) => origin.fetch(target).await,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

pub struct HttpOrigin {
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
}

impl HttpOrigin {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }

    async fn fetch(&self, url: &str, request_headers: &HeaderMap) -> Result<Fetched> {
        let uri: Uri = url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ThumbnailError::invalid_request(e.to_string()))?;

        let mut builder = Request::get(uri)
            .header(ACCEPT, ACCEPT_IMAGES)
            .header(USER_AGENT, ORIGIN_USER_AGENT);
        for name in FORWARDED_REQUEST_HEADERS {
            for value in request_headers.get_all(&name) {
                builder = builder.header(&name, value);
            }
        }
        let request = builder
            .body(Empty::new())
            .map_err(|e| ThumbnailError::invalid_request(e.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| ThumbnailError::origin_failed(e.to_string()))?;
            let status = response.status();
            if status != StatusCode::OK && status != StatusCode::NOT_MODIFIED {
                return Err(ThumbnailError::origin_status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                ));
            }
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| ThumbnailError::origin_failed(e.to_string()))?
                .to_bytes();
            Ok(Fetched {
                status,
                headers: parts.headers,
                body,
            })
        };

        let fetched = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ThumbnailError::fetch_timeout())?;
        match &fetched {
            Ok(f) => debug!(%url, status = %f.status, bytes = f.body.len(), "origin fetch"),
            Err(e) => warn!(%url, "origin fetch failed: {e}"),
        }
        fetched
    }
}

pub struct LocalOrigin {
    root: PathBuf,
    timeout: Duration,
}

impl LocalOrigin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Bound each file read, as `HttpOrigin` bounds each exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Map a request path onto a file under the root. Only plain
    /// components are accepted.
    fn resolve(&self, target: &str) -> Result<PathBuf> {
        let relative = Path::new(target.trim_start_matches('/'));
        let mut path = self.root.clone();
        let mut depth = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => {
                    return Err(ThumbnailError::invalid_request(format!(
                        "path escapes the image directory: {target}"
                    )))
                }
            }
        }
        if depth == 0 {
            return Err(ThumbnailError::origin_status(404, "Not Found"));
        }
        Ok(path)
    }

    async fn fetch(&self, target: &str) -> Result<Fetched> {
        let path = self.resolve(target)?;
        tokio::time::timeout(self.timeout, self.read(&path))
            .await
            .map_err(|_| {
                warn!(path = %path.display(), "local fetch timed out");
                ThumbnailError::fetch_timeout()
            })?
    }

    async fn read(&self, path: &Path) -> Result<Fetched> {
        let meta = tokio::fs::metadata(path).await.map_err(io_error)?;
        if !meta.is_file() {
            return Err(ThumbnailError::origin_status(404, "Not Found"));
        }
        let body = tokio::fs::read(path).await.map_err(io_error)?;

        let mut headers = HeaderMap::new();
        if let Ok(modified) = meta.modified() {
            let stamp = http_date(modified.into());
            if let Ok(value) = HeaderValue::from_str(&stamp) {
                headers.insert(LAST_MODIFIED, value);
            }
        }
        debug!(path = %path.display(), bytes = body.len(), "local fetch");

        Ok(Fetched {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(body),
        })
    }
}

fn io_error(e: io::Error) -> ThumbnailError {
    match e.kind() {
        io::ErrorKind::NotFound => ThumbnailError::origin_status(404, "Not Found"),
        io::ErrorKind::PermissionDenied => ThumbnailError::origin_status(403, "Forbidden"),
        _ => ThumbnailError::origin_failed(e.to_string()),
    }
}

/// RFC 1123 date as used in HTTP headers.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_http_date_format() {
        let at = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(at), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_resolve_rejects_parent_components() {
        let origin = LocalOrigin::new("/srv/images");
        assert_eq!(
            origin.resolve("/a/./b.jpg").unwrap(),
            PathBuf::from("/srv/images/a/b.jpg")
        );
        assert!(matches!(
            origin.resolve("/a/../../etc/passwd"),
            Err(ThumbnailError::InvalidRequest { .. })
        ));
        assert!(matches!(
            origin.resolve("/"),
            Err(ThumbnailError::OriginStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_local_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"bytes").unwrap();
        let origin = Origin::Local(LocalOrigin::new(dir.path()));
        assert!(origin.is_local());

        let fetched = origin.fetch("/a.bin", &HeaderMap::new()).await.unwrap();
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(&fetched.body[..], b"bytes");
        assert!(fetched.headers.contains_key(LAST_MODIFIED));

        let err = origin.fetch("/missing.jpg", &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, ThumbnailError::OriginStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_local_fetch_is_bounded_by_timeout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"bytes").unwrap();
        // File reads run on the blocking pool, so a zero budget always expires.
        let origin = LocalOrigin::new(dir.path()).with_timeout(Duration::ZERO);
        let err = origin.fetch("/a.bin").await.unwrap_err();
        assert!(matches!(err, ThumbnailError::FetchTimeout));
    }

    #[tokio::test]
    async fn test_http_fetch_unreachable_is_origin_failure() {
        // Nothing listens on port 1.
        let origin = HttpOrigin::new(Duration::from_secs(5));
        let err = origin
            .fetch("http://127.0.0.1:1/a.jpg", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::OriginFailed { .. }));
    }
}
