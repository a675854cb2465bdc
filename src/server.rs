use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use crate::config::Config;
use crate::video::Video;
use crate::ytdl::Ytdl;

/// Hard cap on the size of a POSTed reference body.
pub const MAX_BODY_SIZE: usize = 512;

const STREAM_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum GateError {
    #[error("request body too large")]
    BodyTooLarge,
    #[error("cannot read request body")]
    BodyReadFailure,
    #[error("invalid youtube id or link")]
    InvalidSource,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (StatusCode::NOT_ACCEPTABLE, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    /// No key configured, the guarded feature is unavailable.
    Misconfigured,
    /// No credentials supplied, the client should be challenged.
    MissingCredentials,
    Forbidden,
}

/// State shared by every handler: the immutable configuration, one handle on
/// the downloader and one HTTP client, none of it mutated after startup.
pub struct AppState {
    pub config: Config,
    pub ytdl: Ytdl,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let ytdl = Ytdl::new(&config.program);
        Self {
            config,
            ytdl,
            http: reqwest::Client::new(),
        }
    }
}

/// Builds the full route set. Stream routes are always registered; without a
/// configured key the guard answers 500 rather than 403, so "feature
/// disabled" and "wrong credentials" stay distinguishable.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(redirect_body))
        .route("/{video}", get(redirect_path))
        .route("/link", post(redirect_body))
        .route("/link/{video}", get(redirect_path))
        .route("/redirect", post(redirect_body))
        .route("/redirect/{video}", get(redirect_path))
        .route("/stream", post(stream_body))
        .route("/stream/{video}", get(stream_path))
        .route("/direct", post(stream_body))
        .route("/direct/{video}", get(stream_path))
        .with_state(state)
}

/// Turns the transport-level input into a parsed reference.
///
/// A path-derived candidate wins when it parses; otherwise the body (when
/// there is one) is read, capped at [`MAX_BODY_SIZE`], and parsed in turn.
async fn extract_reference(
    path_candidate: Option<&str>,
    body: Option<Body>,
) -> Result<Video, GateError> {
    if let Some(candidate) = path_candidate {
        if let Ok(video) = Video::from_link(candidate) {
            return Ok(video);
        }
    }

    let Some(body) = body else {
        return Err(GateError::InvalidSource);
    };

    let raw = read_capped(body).await?;
    let text = String::from_utf8_lossy(&raw);
    Video::from_link(&text).map_err(|_| GateError::InvalidSource)
}

async fn read_capped(body: Body) -> Result<Vec<u8>, GateError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|_| GateError::BodyReadFailure)?;
        if buf.len() + chunk.len() > MAX_BODY_SIZE {
            return Err(GateError::BodyTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

/// Authorizes a streaming request against the configured key.
///
/// Accepts the raw key as-is, or a `Basic` credential whose base64 payload
/// decodes to the key (an empty-username `:key` form is tolerated). Plain
/// string comparison; the timing side channel is an accepted limitation of
/// the shared-secret model.
pub fn authorize(header: Option<&str>, key: Option<&str>) -> AuthOutcome {
    let Some(key) = key.filter(|k| !k.is_empty()) else {
        return AuthOutcome::Misconfigured;
    };

    let header = match header {
        Some(h) if !h.is_empty() => h,
        _ => return AuthOutcome::MissingCredentials,
    };

    if header == key {
        return AuthOutcome::Authorized;
    }

    if let Some(encoded) = header.strip_prefix("Basic ") {
        if let Ok(decoded) = BASE64.decode(encoded.trim()) {
            if let Ok(credential) = String::from_utf8(decoded) {
                let credential = credential.strip_prefix(':').unwrap_or(&credential);
                if credential == key {
                    return AuthOutcome::Authorized;
                }
            }
        }
    }

    AuthOutcome::Forbidden
}

fn auth_failure(outcome: AuthOutcome) -> Option<Response> {
    match outcome {
        AuthOutcome::Authorized => None,
        AuthOutcome::Misconfigured => Some(
            (StatusCode::INTERNAL_SERVER_ERROR, "streaming is not enabled").into_response(),
        ),
        AuthOutcome::MissingCredentials => Some(
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic")],
                "authorization required",
            )
                .into_response(),
        ),
        AuthOutcome::Forbidden => {
            Some((StatusCode::FORBIDDEN, "invalid credentials").into_response())
        }
    }
}

/// The caller's real IP, honoring the usual forwarding headers before
/// falling back to the socket peer.
fn real_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }

    peer.ip().to_string()
}

async fn redirect_path(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(video): Path<String>,
) -> Response {
    match extract_reference(Some(&video), None).await {
        Ok(video) => redirect_response(state, &headers, peer, video).await,
        Err(e) => e.into_response(),
    }
}

async fn redirect_body(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match extract_reference(None, Some(body)).await {
        Ok(video) => redirect_response(state, &headers, peer, video).await,
        Err(e) => e.into_response(),
    }
}

async fn redirect_response(
    state: Arc<AppState>,
    headers: &HeaderMap,
    peer: SocketAddr,
    mut video: Video,
) -> Response {
    if state.config.use_client_ip {
        let ip = real_ip(headers, peer);
        if let Err(e) = video.add_source_ip(&ip) {
            error!("cannot set source ip {:?}: {}", ip, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    }

    match state
        .config
        .strategy
        .resolve(&video, &state.ytdl, &state.http)
        .await
    {
        Ok(link) => redirect_found(&link),
        Err(e) => {
            error!("cannot resolve {}: {}", video.id(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn redirect_found(link: &str) -> Response {
    // The resolved link is passed along as-is, no well-formedness check.
    match Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, link)
        .body(Body::empty())
    {
        Ok(response) => response,
        Err(e) => {
            error!("cannot build redirect to {:?}: {}", link, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "cannot get video direct link").into_response()
        }
    }
}

async fn stream_path(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(video): Path<String>,
) -> Response {
    let auth_header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Some(rejection) = auth_failure(authorize(auth_header, state.config.stream_key.as_deref())) {
        return rejection;
    }

    match extract_reference(Some(&video), None).await {
        Ok(video) => stream_response(state, video),
        Err(e) => e.into_response(),
    }
}

async fn stream_body(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let auth_header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Some(rejection) = auth_failure(authorize(auth_header, state.config.stream_key.as_deref())) {
        return rejection;
    }

    match extract_reference(None, Some(body)).await {
        Ok(video) => stream_response(state, video),
        Err(e) => e.into_response(),
    }
}

/// Pipes the downloader's stdout into the response body through an
/// in-process duplex pipe. The response headers go out immediately; a
/// subprocess failure after that can only truncate the payload, which is
/// logged server-side. Dropping the body (client hangup) closes the pipe
/// and the copy task reaps the child.
fn stream_response(state: Arc<AppState>, video: Video) -> Response {
    let (writer, reader) = tokio::io::duplex(STREAM_PIPE_CAPACITY);

    let ytdl = state.ytdl.clone();
    tokio::spawn(async move {
        if let Err(e) = ytdl.stream(&video, writer).await {
            warn!("streaming {} ended with error: {}", video.id(), e);
        }
    });

    (
        [(header::CONTENT_TYPE, "video/mp4")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Strategy;
    use axum::http::Request;
    use tower::ServiceExt;

    const FIXED_LINK: &str = "https://cdn.example.com/fixed.mp4";

    fn test_state(strategy: Strategy, stream_key: Option<&str>) -> Arc<AppState> {
        let mut config = Config::default();
        config.program = "/nonexistent/downloader".into();
        config.strategy = strategy;
        config.stream_key = stream_key.map(String::from);
        Arc::new(AppState::new(config))
    }

    fn with_peer(mut request: Request<Body>) -> Request<Body> {
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        request
    }

    #[test]
    fn authorize_truth_table() {
        let key = Some("secret");

        assert_eq!(authorize(Some("secret"), key), AuthOutcome::Authorized);

        let basic = format!("Basic {}", BASE64.encode(":secret"));
        assert_eq!(authorize(Some(&basic), key), AuthOutcome::Authorized);

        let basic = format!("Basic {}", BASE64.encode("user:wrong"));
        assert_eq!(authorize(Some(&basic), key), AuthOutcome::Forbidden);

        assert_eq!(authorize(Some("Basic !!!"), key), AuthOutcome::Forbidden);
        assert_eq!(authorize(Some("wrong"), key), AuthOutcome::Forbidden);
        assert_eq!(authorize(None, key), AuthOutcome::MissingCredentials);
        assert_eq!(authorize(Some(""), key), AuthOutcome::MissingCredentials);

        assert_eq!(authorize(Some("secret"), None), AuthOutcome::Misconfigured);
        assert_eq!(authorize(None, Some("")), AuthOutcome::Misconfigured);
    }

    #[tokio::test]
    async fn gate_prefers_path_candidate() {
        let video = extract_reference(Some("dQw4w9WgXcQ"), Some(Body::from("other")))
            .await
            .expect("path candidate should win");
        assert_eq!(video.id(), "dQw4w9WgXcQ");

        // Unparseable candidate falls back to the body.
        let video = extract_reference(Some("junk"), Some(Body::from("dQw4w9WgXcQ")))
            .await
            .expect("body should be used as fallback");
        assert_eq!(video.id(), "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn gate_caps_body_size() {
        let oversized = vec![b'a'; MAX_BODY_SIZE + 1];
        assert_eq!(
            extract_reference(None, Some(Body::from(oversized)))
                .await
                .unwrap_err(),
            GateError::BodyTooLarge
        );

        // Exactly at the cap the body is read and parsed (and fails on
        // parsing, not on size).
        let at_cap = vec![b'a'; MAX_BODY_SIZE];
        assert_eq!(
            extract_reference(None, Some(Body::from(at_cap)))
                .await
                .unwrap_err(),
            GateError::InvalidSource
        );
    }

    #[tokio::test]
    async fn gate_rejects_unparseable_input() {
        assert_eq!(
            extract_reference(Some("not a video"), None).await.unwrap_err(),
            GateError::InvalidSource
        );
        assert_eq!(
            extract_reference(None, Some(Body::from("not a video")))
                .await
                .unwrap_err(),
            GateError::InvalidSource
        );
    }

    #[test]
    fn real_ip_precedence() {
        let peer = SocketAddr::from(([192, 0, 2, 1], 5000));

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "203.0.113.10".parse().unwrap());
        assert_eq!(real_ip(&headers, peer), "203.0.113.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.10".parse().unwrap());
        assert_eq!(real_ip(&headers, peer), "203.0.113.10");

        assert_eq!(real_ip(&HeaderMap::new(), peer), "192.0.2.1");
    }

    #[tokio::test]
    async fn get_redirects_with_resolved_location() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), None));
        let request = with_peer(
            Request::builder()
                .uri("/dQw4w9WgXcQ")
                .body(Body::empty())
                .unwrap(),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            FIXED_LINK
        );
    }

    #[tokio::test]
    async fn post_body_redirects() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), None));
        let request = with_peer(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from("https://youtu.be/dQw4w9WgXcQ"))
                .unwrap(),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            FIXED_LINK
        );
    }

    #[tokio::test]
    async fn invalid_reference_is_not_acceptable() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), None));
        let request = with_peer(
            Request::builder()
                .uri("/notavideo")
                .body(Body::empty())
                .unwrap(),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), None));
        let request = Request::builder()
            .method("DELETE")
            .uri("/dQw4w9WgXcQ")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn oversized_post_body_is_rejected() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), None));
        let request = with_peer(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from(vec![b'a'; MAX_BODY_SIZE + 1]))
                .unwrap(),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"request body too large");
    }

    #[tokio::test]
    async fn malformed_client_ip_is_a_server_error() {
        let mut config = Config::default();
        config.strategy = Strategy::Fixed(FIXED_LINK);
        config.use_client_ip = true;
        let app = router(Arc::new(AppState::new(config)));

        let request = with_peer(
            Request::builder()
                .uri("/dQw4w9WgXcQ")
                .header("x-forwarded-for", "not-an-ip")
                .body(Body::empty())
                .unwrap(),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn forwarded_client_ip_is_accepted() {
        let mut config = Config::default();
        config.strategy = Strategy::Fixed(FIXED_LINK);
        config.use_client_ip = true;
        let app = router(Arc::new(AppState::new(config)));

        let request = with_peer(
            Request::builder()
                .uri("/dQw4w9WgXcQ")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap(),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn stream_without_key_is_misconfigured() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), None));
        let request = Request::builder()
            .uri("/stream/dQw4w9WgXcQ")
            .header(header::AUTHORIZATION, "secret")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn stream_without_credentials_is_challenged() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), Some("secret")));
        let request = Request::builder()
            .uri("/stream/dQw4w9WgXcQ")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic"
        );
    }

    #[tokio::test]
    async fn stream_with_wrong_credentials_is_forbidden() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), Some("secret")));
        let request = Request::builder()
            .uri("/stream/dQw4w9WgXcQ")
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", BASE64.encode("user:wrong")),
            )
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stream_with_valid_key_answers_mp4() {
        let app = router(test_state(Strategy::Fixed(FIXED_LINK), Some("secret")));
        let request = Request::builder()
            .uri("/stream/dQw4w9WgXcQ")
            .header(header::AUTHORIZATION, "secret")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp4"
        );
    }
}
