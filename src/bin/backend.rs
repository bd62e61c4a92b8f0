#![forbid(unsafe_code)]

//! HTTP front end for the proxy.
//!
//! Every path that is not one of the small `/_api` routes is treated as a
//! proxied location: YouTube watch pages are answered with the locally cached
//! media file, everything else is fetched upstream and returned with its links
//! rewritten to point back here.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, put},
};
use clap::Parser;
use mime_guess::MimeGuess;
use newtube_proxy::{
    config::{ConfigOverrides, ProxyConfig, resolve_config},
    error::FetchError,
    favorites::FavoritesStore,
    fetch::{Fetcher, UreqFetcher},
    logging::init_logging,
    metadata::{DEFAULT_PAGE_SIZE, MetadataStore, Page, VideoRecord},
    proxy::Proxy,
    response_cache::{CachingFetcher, ResponseCache},
    security::ensure_unprivileged,
    store::is_safe_segment,
    video_cache::{VideoCache, watch_url},
};
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

const HOME_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>newtube proxy</title></head>
<body>
<form onsubmit="location.href = '/' + this.url.value.trim().replace(/^(https?):\/\//, '$1.'); return false;">
<input name="url" size="60" placeholder="https://news.ycombinator.com/" autofocus>
<button>go</button>
</form>
</body>
</html>
"#;

/// Personal web proxy with a local YouTube cache.
#[derive(Parser, Debug)]
#[command(name = "newtube-proxy")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory for downloaded videos, metadata and favorites
    #[arg(long)]
    media_root: Option<PathBuf>,

    /// Directory holding a custom index.html for the home page
    #[arg(long)]
    www_root: Option<PathBuf>,

    /// Directory for cached upstream responses
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Env file read before the process environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Always fetch pages upstream
    #[arg(long)]
    no_response_cache: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            media_root: self.media_root.clone(),
            www_root: self.www_root.clone(),
            response_cache_dir: self.cache_dir.clone(),
            port: self.port,
            host: self.host.clone(),
            env_path: self.env_file.clone(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    proxy: Proxy,
    videos: Arc<VideoCache>,
    metadata: Arc<MetadataStore>,
    favorites: Arc<FavoritesStore>,
    www_root: Option<Arc<PathBuf>>,
}

impl AppState {
    fn from_config(config: &ProxyConfig, response_cache: bool) -> Result<Self> {
        let upstream = UreqFetcher::new(config.fetch_timeout).context("building HTTP client")?;
        let fetcher: Arc<dyn Fetcher> = if response_cache {
            let cache = ResponseCache::open(config.response_cache_dir.clone())?;
            info!(dir = %cache.root().display(), "response cache enabled");
            Arc::new(CachingFetcher::new(upstream, cache))
        } else {
            Arc::new(upstream)
        };

        let metadata = Arc::new(MetadataStore::open(&config.media_root)?);
        let videos = Arc::new(VideoCache::new(
            config.media_root.clone(),
            config.yt_dlp.clone(),
            metadata.clone(),
        )?);

        Ok(Self {
            proxy: Proxy::new(fetcher).with_contact(config.from.clone()),
            videos,
            metadata,
            favorites: Arc::new(FavoritesStore::new(&config.media_root)),
            www_root: config.www_root.clone().map(Arc::new),
        })
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::EmptyPath => Self::not_found(err.to_string()),
            other => Self::bad_gateway(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    ensure_unprivileged()?;
    init_logging()?;

    let config = resolve_config(args.overrides())?;
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("expected an IPv4 or IPv6 address, got {:?}", config.host))?;
    let state = AppState::from_config(&config, !args.no_response_cache)?;
    info!(
        media_root = %config.media_root.display(),
        yt_dlp = %config.yt_dlp.display(),
        "state ready"
    );

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("proxy listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running proxy server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/favicon.ico", get(favicon))
        .route("/_api/videos", get(list_videos))
        .route("/_api/videos/{id}", get(get_video))
        .route("/_api/favorites", get(list_favorites))
        .route(
            "/_api/favorites/{id}",
            put(add_favorite).delete(remove_favorite),
        )
        .fallback(proxy_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {err}");
    }
    info!("shutting down");
}

/// Runs blocking store work off the async executor.
async fn blocking<T, F>(task: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| ApiError::internal(format!("worker failed: {err}")))?
        .map_err(|err| ApiError::internal(format!("{err:#}")))
}

async fn home(State(state): State<AppState>) -> ApiResult<Response> {
    if let Some(root) = &state.www_root {
        let index = root.join("index.html");
        if tokio::fs::metadata(&index).await.is_ok() {
            return stream_file(index, None).await;
        }
        debug!(path = %index.display(), "no custom home page, using built-in");
    }
    Ok(Html(HOME_PAGE).into_response())
}

async fn favicon() -> &'static str {
    ""
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

/// Local file paths stay on the server.
fn sanitize(mut record: VideoRecord) -> VideoRecord {
    record.media_path = None;
    record
}

async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<VideoRecord>>> {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE);
    let metadata = state.metadata.clone();
    let mut listing = blocking(move || metadata.list_page(page, per_page)).await?;
    listing.items = listing.items.into_iter().map(sanitize).collect();
    Ok(Json(listing))
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<VideoRecord>> {
    if !is_safe_segment(&id) {
        return Err(ApiError::not_found("video not found"));
    }
    let metadata = state.metadata.clone();
    let record = blocking(move || metadata.get(&id)).await?;
    record
        .map(|record| Json(sanitize(record)))
        .ok_or_else(|| ApiError::not_found("video not found"))
}

async fn list_favorites(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let favorites = state.favorites.clone();
    Ok(Json(blocking(move || favorites.list()).await?))
}

async fn add_favorite(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<(StatusCode, Json<Vec<String>>)> {
    if !is_safe_segment(&id) {
        return Err(ApiError::bad_request("invalid video id"));
    }
    let favorites = state.favorites.clone();
    let (inserted, list) = blocking(move || {
        let inserted = favorites.add(&id)?;
        Ok((inserted, favorites.list()?))
    })
    .await?;
    let status = if inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(list)))
}

async fn remove_favorite(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<StatusCode> {
    let favorites = state.favorites.clone();
    if blocking(move || favorites.remove(&id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("not a favorite"))
    }
}

/// Router path without its leading `/`, with the query string re-attached.
fn proxied_path(req: &Request<Body>) -> String {
    let path = req.uri().path().trim_start_matches('/');
    match req.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

async fn proxy_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        return ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "only GET is proxied")
            .into_response();
    }
    let path = proxied_path(&req);
    if path == "_api" || path.starts_with("_api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    info!(path = %path, "request");

    let result = match watch_url(&path) {
        Some(url) => serve_video(&state, url, req.headers()).await,
        None => proxy_page(&state, path).await,
    };
    result.unwrap_or_else(|err| err.into_response())
}

async fn proxy_page(state: &AppState, path: String) -> ApiResult<Response> {
    let proxy = state.proxy.clone();
    let html = tokio::task::spawn_blocking(move || proxy.decode_and_fetch(&path))
        .await
        .map_err(|err| ApiError::internal(format!("worker failed: {err}")))?
        .map_err(|err| {
            warn!("proxy fetch failed: {err}");
            ApiError::from(err)
        })?;
    Ok(Html(html).into_response())
}

async fn serve_video(state: &AppState, url: String, headers: &HeaderMap) -> ApiResult<Response> {
    let videos = state.videos.clone();
    let media = tokio::task::spawn_blocking(move || videos.prefetch(&url))
        .await
        .map_err(|err| ApiError::internal(format!("worker failed: {err}")))?
        .map_err(|err| {
            warn!("video prefetch failed: {err:#}");
            ApiError::bad_gateway(format!("{err:#}"))
        })?;
    debug!(path = %media.display(), "disk path for video");
    stream_file(media, Some(headers)).await
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|err| ApiError::internal(err.to_string()))
}

/// Streams a file, honoring a single `Range` request when one is present.
async fn stream_file(path: PathBuf, headers: Option<&HeaderMap>) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?
        .len();

    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::internal(format!("seeking media: {err}")))?;
            let stream = ReaderStream::new(file.take(length));
            let mut response = Body::from_stream(stream).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{size}"))?,
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// Parses `bytes=start-end`, `bytes=start-` and `bytes=-suffix`. Multiple
/// ranges are not supported and fall back to the whole file.
fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let (unit, range) = value.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    let range = range.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    if end_str.is_empty() {
        return Some((start, size.saturating_sub(1).max(start)));
    }
    let end: u64 = end_str.parse().ok()?;
    (end >= start).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::Utc;
    use newtube_proxy::fetch::{FetchRequest, FetchResponse};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use tempfile::{TempDir, tempdir};

    const WATCH: &str = "https://www.youtube.com/watch?v=alpha";

    #[derive(Default)]
    struct StubFetcher {
        body: String,
        fail: bool,
        urls: Mutex<Vec<String>>,
    }

    impl Fetcher for StubFetcher {
        fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            self.urls.lock().push(request.url.clone());
            if self.fail {
                return Err(FetchError::transport(&request.url, "dns failure"));
            }
            Ok(FetchResponse {
                status: 200,
                body: self.body.clone(),
                headers: Vec::new(),
            })
        }
    }

    struct TestContext {
        temp: TempDir,
        media_root: PathBuf,
        fetcher: Arc<StubFetcher>,
        state: AppState,
    }

    impl TestContext {
        fn new(fetcher: StubFetcher) -> Self {
            let temp = tempdir().unwrap();
            let media_root = temp.path().join("media");
            let fetcher = Arc::new(fetcher);
            let metadata = Arc::new(MetadataStore::open(&media_root).unwrap());
            let videos = Arc::new(
                VideoCache::new(
                    &media_root,
                    temp.path().join("missing-yt-dlp"),
                    metadata.clone(),
                )
                .unwrap(),
            );
            let state = AppState {
                proxy: Proxy::new(fetcher.clone()),
                videos,
                metadata,
                favorites: Arc::new(FavoritesStore::new(&media_root)),
                www_root: None,
            };
            Self {
                temp,
                media_root,
                fetcher,
                state,
            }
        }

        fn serving(body: &str) -> Self {
            Self::new(StubFetcher {
                body: body.into(),
                ..StubFetcher::default()
            })
        }

        fn record(&self, videoid: &str, seconds_ago: i64) -> VideoRecord {
            let record = VideoRecord {
                videoid: videoid.into(),
                title: format!("Video {videoid}"),
                description: String::new(),
                uploader: None,
                channel_url: None,
                duration: Some(60),
                views: None,
                upload_date: None,
                thumbnail_url: None,
                tags: Vec::new(),
                source_url: format!("https://www.youtube.com/watch?v={videoid}"),
                media_path: Some(format!("/media/{videoid}.webm")),
                cached_at: Utc::now() - chrono::Duration::seconds(seconds_ago),
            };
            self.state.metadata.put(&record).unwrap();
            record
        }
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn error_message(response: Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        parsed["error"].as_str().unwrap().to_string()
    }

    #[test]
    fn args_map_to_overrides() {
        let args = Args::try_parse_from([
            "newtube-proxy",
            "--media-root",
            "/m",
            "--cache-dir",
            "/c",
            "--port",
            "8080",
            "--host",
            "0.0.0.0",
            "--no-response-cache",
        ])
        .unwrap();
        assert!(args.no_response_cache);
        let overrides = args.overrides();
        assert_eq!(overrides.media_root, Some(PathBuf::from("/m")));
        assert_eq!(overrides.response_cache_dir, Some(PathBuf::from("/c")));
        assert_eq!(overrides.port, Some(8080));
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert!(Args::try_parse_from(["newtube-proxy", "--port", "nope"]).is_err());
    }

    #[test]
    fn state_and_router_build_from_config() {
        let dir = tempdir().unwrap();
        let config = ProxyConfig {
            media_root: dir.path().join("media"),
            response_cache_dir: dir.path().join("cache"),
            www_root: None,
            host: "127.0.0.1".into(),
            port: 0,
            fetch_timeout: std::time::Duration::from_secs(5),
            from: Some("ops@example.com".into()),
            yt_dlp: PathBuf::from("yt-dlp"),
        };
        let state = AppState::from_config(&config, true).unwrap();
        assert!(dir.path().join("cache").is_dir());
        assert!(dir.path().join("media/metadata").is_dir());
        let _app = router(state);
    }

    #[tokio::test]
    async fn fallback_fetches_and_rewrites_pages() {
        let ctx = TestContext::serving(r#"<a href="item?id=1">i</a><a href="/news">n</a>"#);
        let response = proxy_fallback(
            State(ctx.state.clone()),
            get_request("/https.news.example.com/front?p=2"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(html.contains(r#"href="/https.news.example.com/item?id=1""#));
        assert!(html.contains(r#"href="/news.example.com/news""#));
        assert_eq!(
            *ctx.fetcher.urls.lock(),
            ["https://news.example.com/front?p=2"]
        );
    }

    #[tokio::test]
    async fn fetch_failures_are_bad_gateway() {
        let ctx = TestContext::new(StubFetcher {
            fail: true,
            ..StubFetcher::default()
        });
        let response =
            proxy_fallback(State(ctx.state.clone()), get_request("/http.down.test/")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(error_message(response).await.contains("dns failure"));
    }

    #[tokio::test]
    async fn non_get_requests_are_rejected() {
        let ctx = TestContext::serving("");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/http.example.com/form")
            .body(Body::empty())
            .unwrap();
        let response = proxy_fallback(State(ctx.state.clone()), request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(ctx.fetcher.urls.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_api_paths_are_not_proxied() {
        let ctx = TestContext::serving("");
        let response = proxy_fallback(State(ctx.state.clone()), get_request("/_api/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(ctx.fetcher.urls.lock().is_empty());
    }

    #[tokio::test]
    async fn cached_videos_stream_with_ranges() {
        let ctx = TestContext::serving("");
        let media = ctx.media_root.join("alpha.webm");
        std::fs::write(&media, "media-bytes").unwrap();
        let index = BTreeMap::from([(WATCH.to_string(), media.clone())]);
        std::fs::write(
            ctx.media_root.join("index.json"),
            serde_json::to_vec(&index).unwrap(),
        )
        .unwrap();

        let response = proxy_fallback(
            State(ctx.state.clone()),
            get_request("/https.www.youtube.com/watch?v=alpha"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/webm"
        );
        assert_eq!(body_string(response).await, "media-bytes");

        let request = Request::builder()
            .uri("/www.youtube.com/watch?v=alpha")
            .header(header::RANGE, "bytes=0-4")
            .body(Body::empty())
            .unwrap();
        let response = proxy_fallback(State(ctx.state.clone()), request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 0-4/11"
        );
        assert_eq!(body_string(response).await, "media");
        assert!(ctx.fetcher.urls.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_video_downloads_are_bad_gateway() {
        let ctx = TestContext::serving("");
        let response = proxy_fallback(
            State(ctx.state.clone()),
            get_request("/https.www.youtube.com/watch?v=ghost"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn home_prefers_www_index() {
        let mut ctx = TestContext::serving("");
        let response = home(State(ctx.state.clone())).await.unwrap();
        assert!(body_string(response).await.contains("<form"));

        let www = ctx.temp.path().join("www");
        std::fs::create_dir_all(&www).unwrap();
        std::fs::write(www.join("index.html"), "<h1>custom</h1>").unwrap();
        ctx.state.www_root = Some(Arc::new(www));
        let response = home(State(ctx.state.clone())).await.unwrap();
        assert_eq!(body_string(response).await, "<h1>custom</h1>");
    }

    #[tokio::test]
    async fn video_listing_is_paged_and_sanitized() {
        let ctx = TestContext::serving("");
        ctx.record("old", 60);
        ctx.record("new", 0);

        let Json(page) = list_videos(
            State(ctx.state.clone()),
            Query(PageQuery {
                page: Some(1),
                per_page: Some(1),
            }),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].videoid, "new");
        assert!(page.items[0].media_path.is_none());

        let Json(single) = get_video(State(ctx.state.clone()), AxumPath("old".into()))
            .await
            .unwrap();
        assert_eq!(single.title, "Video old");
        assert!(single.media_path.is_none());

        let err = get_video(State(ctx.state.clone()), AxumPath("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = get_video(State(ctx.state.clone()), AxumPath("..".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn favorites_round_trip() {
        let ctx = TestContext::serving("");
        let (status, Json(list)) = add_favorite(State(ctx.state.clone()), AxumPath("alpha".into()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(list, ["alpha"]);

        let (status, _) = add_favorite(State(ctx.state.clone()), AxumPath("alpha".into()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let err = add_favorite(State(ctx.state.clone()), AxumPath("..".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(list) = list_favorites(State(ctx.state.clone())).await.unwrap();
        assert_eq!(list, ["alpha"]);

        let status = remove_favorite(State(ctx.state.clone()), AxumPath("alpha".into()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let err = remove_favorite(State(ctx.state.clone()), AxumPath("alpha".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn range_header_forms() {
        let parse = |raw: &'static str| parse_range_header(&HeaderValue::from_static(raw), 100);
        assert_eq!(parse("bytes=0-9"), Some((0, 9)));
        assert_eq!(parse("bytes=90-"), Some((90, 99)));
        assert_eq!(parse("bytes=-10"), Some((90, 99)));
        assert_eq!(parse("bytes=-500"), Some((0, 99)));
        assert_eq!(parse("bytes=10-5"), None);
        assert_eq!(parse("bytes=0-1,5-6"), None);
        assert_eq!(parse("items=0-1"), None);
        assert_eq!(parse("bytes=-0"), None);
    }

    #[tokio::test]
    async fn unsatisfiable_ranges_report_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.webm");
        std::fs::write(&path, "abc").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=10-"));
        let response = stream_file(path, Some(&headers)).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */3"
        );
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let response = ApiError::from(FetchError::EmptyPath).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = ApiError::bad_gateway("upstream down").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(error_message(response).await, "upstream down");
    }
}
