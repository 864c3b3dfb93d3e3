// src/proxy.rs
//
// HTTP front end: admission control, origin fetch, worker pool dispatch
// and the error -> status mapping.
//
// Per request:
//   method check -> director -> admission token (bounded wait)
//   -> origin fetch -> conditional GET -> pool -> response
//
// The admission token is held across fetch and compute, never across the
// write to the client.

pub mod director;
pub mod origin;

use crate::engine::{Pool, SourceFormat};
use crate::error::{ErrorCategory, Result, ThumbnailError};
use director::Director;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, AGE, ALLOW, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE,
    DATE, ETAG, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, SERVER,
    X_CONTENT_TYPE_OPTIONS, X_XSS_PROTECTION,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use origin::{Fetched, Origin};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Non-standard "client closed request".
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Queue wait for requests that set no limit of their own.
pub const DEFAULT_MAX_QUEUE_DURATION: Duration = Duration::from_secs(60 * 60);

/// Origin response headers passed through to the client.
pub const COPIED_RESPONSE_HEADERS: [HeaderName; 6] =
    [AGE, CACHE_CONTROL, DATE, ETAG, EXPIRES, LAST_MODIFIED];

/// Origin statuses relayed as-is (with an empty body).
const PASSTHROUGH_STATUSES: [u16; 7] = [400, 401, 403, 404, 408, 410, 504];

pub type Body = Full<Bytes>;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Images admitted at once (fetching or processing). 0 means one per worker.
    pub admission_capacity: usize,
    /// Value of the `Server` response header.
    pub server_name: String,
    /// Used when a request's options carry no queue limit.
    pub default_max_queue_duration: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            admission_capacity: 0,
            server_name: concat!("thumbnail-proxy/", env!("CARGO_PKG_VERSION")).to_string(),
            default_max_queue_duration: DEFAULT_MAX_QUEUE_DURATION,
        }
    }
}

pub struct Proxy {
    director: Arc<dyn Director>,
    origin: Origin,
    pool: Arc<Pool>,
    admission: Arc<Semaphore>,
    config: ProxyConfig,
    shutdown: CancellationToken,
}

impl Proxy {
    pub fn new(
        director: Arc<dyn Director>,
        origin: Origin,
        pool: Arc<Pool>,
        mut config: ProxyConfig,
    ) -> Self {
        if config.admission_capacity == 0 {
            config.admission_capacity = pool.workers();
        }
        Self {
            director,
            origin,
            admission: Arc::new(Semaphore::new(config.admission_capacity)),
            pool,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Admission tokens not currently held.
    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }

    /// Stop accepting connections and cancel every request in flight.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Accept connections until `shutdown` is called.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, admission = self.config.admission_capacity, "proxy listening");
        }
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.shutdown.cancelled() => break,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let proxy = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |request| {
                    let proxy = proxy.clone();
                    async move { Ok::<_, Infallible>(proxy.handle(request, peer).await) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, "connection ended: {e}");
                }
            });
        }
        info!("proxy stopped");
    }

    async fn handle(&self, request: Request<Incoming>, peer: SocketAddr) -> Response<Body> {
        let start = Instant::now();
        // Fires when hyper drops this future (client gone) or on shutdown.
        let cancel = self.shutdown.child_token();
        let _guard = cancel.clone().drop_guard();

        let (parts, _) = request.into_parts();
        let head = parts.method == Method::HEAD;
        let response = if parts.method != Method::GET && !head {
            let mut response = self.empty(StatusCode::METHOD_NOT_ALLOWED);
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            response
        } else {
            match self.director.direct(&parts) {
                Err(status) => self.empty(status),
                Ok(direction) => match self.process(&direction, &parts.headers, &cancel).await {
                    Ok(response) => response,
                    Err(e) => self.error_response(&e),
                },
            }
        };

        debug!(
            %peer,
            method = %parts.method,
            uri = %parts.uri,
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request"
        );
        if head {
            let (parts, _) = response.into_parts();
            return Response::from_parts(parts, Body::default());
        }
        response
    }

    async fn process(
        &self,
        direction: &director::Direction,
        request_headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Response<Body>> {
        let max_queue = direction
            .options
            .max_queue_duration
            .unwrap_or(self.config.default_max_queue_duration);
        let permit = self.admit(max_queue, cancel).await?;

        let fetched = tokio::select! {
            fetched = self.origin.fetch(&direction.origin, request_headers) => fetched?,
            _ = cancel.cancelled() => return Err(ThumbnailError::aborted()),
        };

        let mut headers = self.base_headers();
        copy_headers(&fetched.headers, &mut headers);

        if fetched.is_not_modified() || not_modified(request_headers, &fetched.headers) {
            drop(permit);
            return Ok(with_headers(StatusCode::NOT_MODIFIED, headers, Body::default()));
        }

        let Fetched { body, .. } = fetched;
        let result = self
            .pool
            .thumbnail_async(Vec::from(body), direction.options.clone(), cancel.clone())
            .await;
        drop(permit);
        let out = result?;

        if let Some(format) = SourceFormat::detect(&out) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.mime_type()));
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(out.len()));
        Ok(with_headers(StatusCode::OK, headers, Body::new(Bytes::from(out))))
    }

    /// Wait for an admission token, the queue deadline or cancellation,
    /// whichever comes first.
    async fn admit(
        &self,
        max_queue: Duration,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            permit = self.admission.clone().acquire_owned() => {
                permit.map_err(|_| ThumbnailError::pool_closed())
            }
            _ = tokio::time::sleep(max_queue) => {
                debug!(?max_queue, "admission wait timed out");
                Err(ThumbnailError::queue_timeout())
            }
            _ = cancel.cancelled() => Err(ThumbnailError::aborted()),
        }
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(server) = HeaderValue::from_str(&self.config.server_name) {
            headers.insert(SERVER, server);
        }
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        headers
    }

    fn empty(&self, status: StatusCode) -> Response<Body> {
        with_headers(status, self.base_headers(), Body::default())
    }

    fn error_response(&self, e: &ThumbnailError) -> Response<Body> {
        let status = status_for(e);
        let silent = status.as_u16() == CLIENT_CLOSED_REQUEST
            || matches!(e, ThumbnailError::OriginStatus { .. }) && status != StatusCode::BAD_GATEWAY;
        let category = e.category();
        if status.is_server_error() {
            warn!(status = status.as_u16(), ?category, "request failed: {e}");
        } else {
            debug!(status = status.as_u16(), ?category, "request rejected: {e}");
        }
        if silent {
            return self.empty(status);
        }
        let body = e.to_string();
        let mut headers = self.base_headers();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        with_headers(status, headers, Body::new(Bytes::from(body)))
    }
}

fn with_headers(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for name in COPIED_RESPONSE_HEADERS {
        for value in from.get_all(&name) {
            to.append(&name, value.clone());
        }
    }
}

/// Conditional GET against the origin's validators: an `If-None-Match`
/// hit on the origin's ETag, or an `If-Modified-Since` identical to its
/// `Last-Modified`. Either one is enough.
pub fn not_modified(request: &HeaderMap, response: &HeaderMap) -> bool {
    fn header(map: &HeaderMap, name: HeaderName) -> Option<&str> {
        map.get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }

    if let (Some(etag), Some(if_none_match)) =
        (header(response, ETAG), header(request, IF_NONE_MATCH))
    {
        if if_none_match
            .split(',')
            .map(str::trim)
            .any(|tag| tag == "*" || tag == etag)
        {
            return true;
        }
    }
    match (
        header(request, IF_MODIFIED_SINCE),
        header(response, LAST_MODIFIED),
    ) {
        (Some(since), Some(modified)) => since == modified,
        _ => false,
    }
}

/// The one place errors become HTTP statuses.
pub fn status_for(e: &ThumbnailError) -> StatusCode {
    if e.is_timeout() {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    match (e.category(), e) {
        (_, ThumbnailError::TooBig { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        (_, ThumbnailError::InvalidRequest { .. }) => StatusCode::BAD_REQUEST,
        (ErrorCategory::Input, _) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        (ErrorCategory::Cancelled, _) => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
        }
        (ErrorCategory::Upstream, ThumbnailError::OriginStatus { status, .. }) => {
            if PASSTHROUGH_STATUSES.contains(status) {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            } else {
                StatusCode::BAD_GATEWAY
            }
        }
        // Transport failures, pool shutdown, codec and option faults.
        (ErrorCategory::Upstream | ErrorCategory::ResourceLimit | ErrorCategory::Internal, _) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_for_source_errors() {
        assert_eq!(
            status_for(&ThumbnailError::unknown_format()),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_for(&ThumbnailError::too_small(1, 1)),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_for(&ThumbnailError::decode_failed("truncated")),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_for(&ThumbnailError::too_big("34000x16")),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_for(&ThumbnailError::invalid_request("..")),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_status_for_scheduling_errors() {
        assert_eq!(status_for(&ThumbnailError::aborted()).as_u16(), 499);
        assert_eq!(
            status_for(&ThumbnailError::queue_timeout()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&ThumbnailError::fetch_timeout()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&ThumbnailError::bad_option("quality", "101", "x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ThumbnailError::pool_closed()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_status_for_origin_errors() {
        for code in [404u16, 401, 403, 410] {
            let e = ThumbnailError::origin_status(code, "x");
            assert_eq!(status_for(&e).as_u16(), code);
        }
        assert_eq!(
            status_for(&ThumbnailError::origin_status(500, "Internal Server Error")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ThumbnailError::origin_status(301, "Moved Permanently")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ThumbnailError::origin_failed("reset")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    fn headers(pairs: &[(HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_not_modified_etag() {
        let response = headers(&[(ETAG, "\"abc\"")]);
        assert!(not_modified(&headers(&[(IF_NONE_MATCH, "\"abc\"")]), &response));
        assert!(not_modified(&headers(&[(IF_NONE_MATCH, "\"x\", \"abc\"")]), &response));
        assert!(not_modified(&headers(&[(IF_NONE_MATCH, "*")]), &response));
        assert!(!not_modified(&headers(&[(IF_NONE_MATCH, "\"other\"")]), &response));
        assert!(!not_modified(&HeaderMap::new(), &response));
    }

    #[test]
    fn test_not_modified_wildcard_needs_etag() {
        assert!(!not_modified(&headers(&[(IF_NONE_MATCH, "*")]), &HeaderMap::new()));
        let stamp = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert!(!not_modified(
            &headers(&[(IF_NONE_MATCH, "*")]),
            &headers(&[(LAST_MODIFIED, stamp)])
        ));
    }

    #[test]
    fn test_not_modified_last_modified() {
        let stamp = "Wed, 21 Oct 2015 07:28:00 GMT";
        let response = headers(&[(LAST_MODIFIED, stamp)]);
        assert!(not_modified(&headers(&[(IF_MODIFIED_SINCE, stamp)]), &response));
        assert!(!not_modified(
            &headers(&[(IF_MODIFIED_SINCE, "Thu, 22 Oct 2015 07:28:00 GMT")]),
            &response
        ));
        // A stale tag does not hide a matching date.
        assert!(not_modified(
            &headers(&[(IF_MODIFIED_SINCE, stamp), (IF_NONE_MATCH, "\"stale\"")]),
            &headers(&[(LAST_MODIFIED, stamp), (ETAG, "\"fresh\"")])
        ));
        assert!(!not_modified(&HeaderMap::new(), &response));
    }

    #[test]
    fn test_copy_headers_allow_list() {
        let origin = headers(&[
            (ETAG, "\"abc\""),
            (CACHE_CONTROL, "max-age=60"),
            (CONTENT_TYPE, "image/jpeg"),
            (HeaderName::from_static("set-cookie"), "a=b"),
        ]);
        let mut out = HeaderMap::new();
        copy_headers(&origin, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.contains_key(ETAG));
        assert!(out.contains_key(CACHE_CONTROL));
    }
}
