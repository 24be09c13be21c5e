//! HTTP surface: the parameter-driven endpoint, the fixed per-format
//! endpoints, and server lifecycle.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, RawQuery},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
    add_extension::AddExtensionLayer,
    classify::ServerErrorsFailureClass,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::cache::{PipelineCache, PipelineError};
use crate::config::{CorsConfig, ServerConfig};
use crate::dispatch::{AnnotationDispatcher, AnnotationError, OutputFormat};
use crate::engine::{DynAnnotationEngine, DynPipeline};
use crate::merge::{ConfigError, PropertyResolver};
use crate::properties::{PIPELINE_LANGUAGE, Properties, RawParameters};

const HEALTHZ_PATH: &str = "/healthz";
const ANNOTATE_PATH: &str = "/";
const JSON_PATH: &str = "/json";
const XML_PATH: &str = "/xml";
const CONLL_PATH: &str = "/conll";
const HEALTHZ_STATUS: &str = "ok";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const PREVIEW_CHARS: usize = 100;
const ERROR_UNKNOWN_LANGUAGE: &str = "unknown_language";
const ERROR_INVALID_ENCODING: &str = "invalid_encoding";
const ERROR_CONSTRUCTION_FAILED: &str = "pipeline_construction_failed";
const ERROR_ANNOTATION_FAILED: &str = "annotation_failed";
const ERROR_NOT_FOUND: &str = "not_found";
const ERROR_METHOD_NOT_ALLOWED: &str = "method_not_allowed";
const REQUEST_ID_HEADER: &str = "x-request-id";
const CACHE_HEADER_NAME: &str = "x-pipeline-cache";
const BLOB_FIELD: &str = "properties";

#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
struct HealthzResponse {
    status: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ShutdownEvent {
    Pending,
    CtrlC,
    SigTerm,
    ListenerFailed,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to determine local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CORS configuration: {reason}")]
    CorsConfig { reason: String },
    #[error("invalid fixed pipeline configuration: {source}")]
    FixedConfig {
        #[source]
        source: ConfigError,
    },
    #[error("failed to build fixed pipeline: {source}")]
    FixedPipeline {
        #[source]
        source: PipelineError,
    },
}

/// Pipeline shared by the per-format endpoints, built once at startup.
struct FixedPipeline {
    properties: Properties,
    pipeline: DynPipeline,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayOptions {
    /// `None` keeps every constructed pipeline for the process lifetime.
    pub cache_capacity: Option<u64>,
    /// Options layered over the defaults for the fixed endpoints.
    pub fixed_properties: Properties,
}

/// Process-wide services injected into every handler.
pub struct GatewayState {
    resolver: PropertyResolver,
    cache: PipelineCache,
    dispatcher: AnnotationDispatcher,
    fixed: FixedPipeline,
}

pub type GatewayStateHandle = Arc<GatewayState>;

impl GatewayState {
    /// Resolve the fixed configuration and eagerly build its pipeline.
    pub async fn bootstrap(
        engine: DynAnnotationEngine,
        resolver: PropertyResolver,
        options: GatewayOptions,
    ) -> Result<Self, ServerError> {
        let fixed_raw: RawParameters = options.fixed_properties.iter().collect();
        let properties = resolver
            .resolve(&fixed_raw)
            .await
            .map_err(|source| ServerError::FixedConfig { source })?;
        tracing::info!(%properties, "building fixed pipeline");
        let pipeline = engine
            .build(&properties)
            .await
            .map_err(|error| ServerError::FixedPipeline {
                source: PipelineError::ConstructionFailed {
                    message: error.message,
                },
            })?;

        Ok(Self {
            resolver,
            cache: PipelineCache::with_capacity(engine, options.cache_capacity),
            dispatcher: AnnotationDispatcher,
            fixed: FixedPipeline {
                properties,
                pipeline,
            },
        })
    }

    pub fn fixed_properties(&self) -> &Properties {
        &self.fixed.properties
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

#[derive(Debug, Clone)]
struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            body: ApiErrorBody {
                error,
                message: message.into(),
                field: None,
                request_id: None,
            },
        }
    }

    fn with_field(mut self, field: &str) -> Self {
        debug_assert!(!field.is_empty());
        self.body.field = Some(field.to_string());
        self
    }

    fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        if let Some(id) = request_id {
            debug_assert!(!id.is_empty());
            self.body.request_id = Some(id.to_string());
        }
        self
    }

    fn resource_not_found(path: &str) -> Self {
        debug_assert!(path.starts_with('/'));
        ApiError::new(
            StatusCode::NOT_FOUND,
            ERROR_NOT_FOUND,
            format!("resource `{path}` not found"),
        )
    }

    fn method_not_allowed(method: &str, path: &str) -> Self {
        debug_assert!(!method.is_empty());
        debug_assert!(path.starts_with('/'));
        ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            ERROR_METHOD_NOT_ALLOWED,
            format!("method `{method}` not allowed for `{path}`"),
        )
    }
}

impl From<ConfigError> for ApiError {
    fn from(error: ConfigError) -> Self {
        let message = error.to_string();
        match error {
            ConfigError::UnknownLanguage { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, ERROR_UNKNOWN_LANGUAGE, message)
                    .with_field(PIPELINE_LANGUAGE)
            }
            ConfigError::BadEncoding { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, ERROR_INVALID_ENCODING, message)
                    .with_field(BLOB_FIELD)
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        tracing::error!(%error, "pipeline unavailable");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_CONSTRUCTION_FAILED,
            error.to_string(),
        )
    }
}

impl From<AnnotationError> for ApiError {
    fn from(error: AnnotationError) -> Self {
        tracing::error!(%error, "annotation request failed");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_ANNOTATION_FAILED,
            error.to_string(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Annotation routes with the state attached; no tracing or CORS layers.
pub fn build_api_router(state: GatewayStateHandle) -> Router {
    debug_assert!(HEALTHZ_PATH.starts_with('/'));

    Router::new()
        .route(
            HEALTHZ_PATH,
            get(healthz).fallback(method_not_allowed_handler),
        )
        .route(
            ANNOTATE_PATH,
            get(annotate_with_parameters)
                .post(annotate_with_parameters)
                .fallback(method_not_allowed_handler),
        )
        .route(
            JSON_PATH,
            post(annotate_fixed_json).fallback(method_not_allowed_handler),
        )
        .route(
            XML_PATH,
            post(annotate_fixed_xml).fallback(method_not_allowed_handler),
        )
        .route(
            CONLL_PATH,
            post(annotate_fixed_conll).fallback(method_not_allowed_handler),
        )
        .layer(AddExtensionLayer::new(state))
}

pub async fn serve(config: ServerConfig, state: GatewayStateHandle) -> Result<(), ServerError> {
    debug_assert!(config.listen_addr.len() <= 128);
    debug_assert!(!config.listen_addr.contains('\n'));

    let listen_addr = parse_listen_addr(&config.listen_addr)?;

    let listener = bind_listener(listen_addr).await?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    tracing::info!(%local_addr, "annogate server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownEvent::Pending);

    let shutdown_future = broadcast_shutdown(shutdown_tx);

    let app = build_app_router(&config, state)?;

    let mut server_future = Box::pin(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_future)
            .await
    });

    let drain_rx = shutdown_rx.clone();
    let mut drain_timeout = Box::pin(drain_timeout_future(drain_rx));

    tokio::select! {
        result = server_future.as_mut() => {
            if let Err(source) = result {
                return Err(ServerError::Serve { source });
            }
        }
        _ = drain_timeout.as_mut() => {
            // Timeout elapsed; dropping the server future forces termination.
        }
    }

    let final_event = *shutdown_rx.borrow();
    if final_event == ShutdownEvent::Pending {
        tracing::info!("server stopped without external shutdown signal");
    } else {
        tracing::info!(?final_event, "server shutdown complete");
    }

    Ok(())
}

/// Full application router: API routes plus body limit, CORS, tracing and
/// request-id layers.
fn millis(latency: Duration) -> u64 {
    u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)
}

pub fn build_app_router(
    config: &ServerConfig,
    state: GatewayStateHandle,
) -> Result<Router, ServerError> {
    let mut router = Router::new()
        .merge(build_api_router(state))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(config.max_body_bytes));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let path = matched_path_or_uri(request);
            let request_id =
                header_request_id(request.headers()).unwrap_or_else(|| "-".to_string());
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %path,
                request_id = %request_id
            )
        })
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &tracing::Span| {
                let status = response.status().as_u16();
                tracing::info!(parent: span, status, latency_ms = millis(latency), "request completed");
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, span: &tracing::Span| {
                tracing::error!(parent: span, latency_ms = millis(latency), error = %error, "request failed");
            },
        );

    if config.cors.enabled {
        let cors_layer = build_cors_layer(&config.cors)?;
        router = router.layer(cors_layer);
    }

    router = router.layer(trace_layer);

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    let make_request_id = MakeRequestUuid;
    Ok(router
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, make_request_id)))
}

fn build_cors_layer(config: &CorsConfig) -> Result<CorsLayer, ServerError> {
    if config.allow_origins.is_empty() {
        return Err(ServerError::CorsConfig {
            reason: "allow_origins must list at least one origin when CORS is enabled".to_string(),
        });
    }
    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|err| ServerError::CorsConfig {
                reason: format!("origin `{origin}` is not a valid header value: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let methods: Vec<Method> = config
        .allow_methods
        .iter()
        .map(|method| crate::config::parse_method(method))
        .collect::<Result<_, _>>()
        .map_err(|reason| ServerError::CorsConfig { reason })?;

    let allow_headers: Vec<HeaderName> = config
        .allow_headers
        .iter()
        .map(|name| crate::config::parse_header(name))
        .collect::<Result<_, _>>()
        .map_err(|reason| ServerError::CorsConfig { reason })?;

    let mut cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list(methods))
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs));

    if !allow_headers.is_empty() {
        cors = cors.allow_headers(AllowHeaders::list(allow_headers));
    }

    Ok(cors)
}

async fn annotate_with_parameters(
    Extension(state): Extension<GatewayStateHandle>,
    RawQuery(query): RawQuery,
    text: String,
) -> Result<axum::response::Response, ApiError> {
    let raw = RawParameters::from_query(query.as_deref().unwrap_or_default());
    let properties = state.resolver.resolve(&raw).await?;
    let (pipeline, status) = state.cache.lookup(&properties).await?;
    let format = OutputFormat::from_option(properties.options().output_format());

    log_input(&text);
    let rendered = state
        .dispatcher
        .annotate_and_render(pipeline, text, format)
        .await?;

    let mut response = content_response(format.content_type(), rendered.body);
    response.headers_mut().insert(
        HeaderName::from_static(CACHE_HEADER_NAME),
        HeaderValue::from_static(status.as_str()),
    );
    Ok(response)
}

async fn annotate_fixed_json(
    Extension(state): Extension<GatewayStateHandle>,
    text: String,
) -> Result<axum::response::Response, ApiError> {
    annotate_fixed(&state, text, OutputFormat::Json).await
}

async fn annotate_fixed_xml(
    Extension(state): Extension<GatewayStateHandle>,
    text: String,
) -> Result<axum::response::Response, ApiError> {
    annotate_fixed(&state, text, OutputFormat::Xml).await
}

async fn annotate_fixed_conll(
    Extension(state): Extension<GatewayStateHandle>,
    text: String,
) -> Result<axum::response::Response, ApiError> {
    annotate_fixed(&state, text, OutputFormat::Conll).await
}

async fn annotate_fixed(
    state: &GatewayState,
    text: String,
    format: OutputFormat,
) -> Result<axum::response::Response, ApiError> {
    log_input(&text);
    let rendered = state
        .dispatcher
        .annotate_and_render(Arc::clone(&state.fixed.pipeline), text, format)
        .await?;
    Ok(content_response(format.fixed_content_type(), rendered.body))
}

fn content_response(content_type: &'static str, body: Vec<u8>) -> axum::response::Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        body,
    )
        .into_response()
}

fn log_input(text: &str) {
    tracing::info!(
        preview = %preview(text),
        chars = text.chars().count(),
        "annotating"
    );
}

/// First characters of `text` with every whitespace character shown as a space.
fn preview(text: &str) -> String {
    text.chars()
        .take(PREVIEW_CHARS)
        .map(|ch| if ch.is_whitespace() { ' ' } else { ch })
        .collect()
}

async fn healthz() -> impl IntoResponse {
    debug_assert_eq!(HEALTHZ_STATUS, "ok");

    Json(HealthzResponse {
        status: HEALTHZ_STATUS,
    })
}

async fn method_not_allowed_handler(request: Request<Body>) -> axum::response::Response {
    debug_assert!(request.uri().path().starts_with('/'));
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let request_id = header_request_id(request.headers());
    ApiError::method_not_allowed(&method, &path)
        .with_request_id(request_id.as_deref())
        .into_response()
}

async fn not_found_handler(request: Request<Body>) -> axum::response::Response {
    debug_assert!(request.uri().path().starts_with('/'));
    let path = request.uri().path().to_string();
    let request_id = header_request_id(request.headers());
    ApiError::resource_not_found(&path)
        .with_request_id(request_id.as_deref())
        .into_response()
}

fn matched_path_or_uri<B>(request: &Request<B>) -> String {
    if let Some(path) = request.extensions().get::<MatchedPath>() {
        return path.as_str().to_string();
    }
    request.uri().path().to_string()
}

fn header_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

async fn wait_for_shutdown() -> ShutdownEvent {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }

    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })
}

fn broadcast_shutdown(
    sender: watch::Sender<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    debug_assert!(!sender.is_closed());
    async move {
        let event = wait_for_shutdown().await;
        debug_assert!(event != ShutdownEvent::Pending);
        if let Err(error) = sender.send(event) {
            tracing::warn!(?event, %error, "failed to broadcast shutdown event");
        }
    }
}

fn drain_timeout_future(
    mut receiver: watch::Receiver<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        if receiver.changed().await.is_ok() {
            let event = *receiver.borrow_and_update();
            debug_assert!(event != ShutdownEvent::Pending);
            tracing::info!(?event, "shutdown signal received; draining connections");
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            tracing::warn!(
                ?event,
                seconds = DRAIN_TIMEOUT.as_secs(),
                "graceful shutdown timed out; continuing shutdown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::engine::{Annotation, AnnotationEngine, EngineError, Pipeline};
    use crate::merge::BuiltinDefaults;
    use crate::overlay::{LanguageOverlay, LanguageOverlays};

    /// Renders `<format>|<sorted properties>|<text>` so tests can see which
    /// configuration served a request.
    struct EchoPipeline {
        properties: Properties,
    }

    impl Pipeline for EchoPipeline {
        fn annotate(&self, text: &str) -> Result<Annotation, EngineError> {
            if text == "explode" {
                return Err(EngineError::new("engine exploded"));
            }
            Ok(Annotation::new(text, ()))
        }

        fn render(
            &self,
            annotation: &Annotation,
            format: OutputFormat,
            out: &mut dyn Write,
        ) -> Result<(), EngineError> {
            write!(out, "{}|{}|{}", format, self.properties, annotation.text())?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct EchoEngine {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl AnnotationEngine for EchoEngine {
        async fn build(&self, properties: &Properties) -> Result<DynPipeline, EngineError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if properties.get("annotators") == Some("bogus") {
                return Err(EngineError::new("unknown annotator `bogus`"));
            }
            Ok(Arc::new(EchoPipeline {
                properties: properties.clone(),
            }))
        }
    }

    struct NoOverlays(HashMap<String, Properties>);

    #[async_trait]
    impl LanguageOverlays for NoOverlays {
        async fn overlay_for(&self, tag: &str) -> Option<LanguageOverlay> {
            self.0.get(tag).cloned().map(LanguageOverlay::new)
        }
    }

    async fn test_state() -> (GatewayStateHandle, Arc<EchoEngine>) {
        let engine = Arc::new(EchoEngine::default());
        let defaults = BuiltinDefaults::with_parse_model("model").extend(
            &[("annotators", "tokenize,ssplit")].into_iter().collect(),
        );
        let resolver = PropertyResolver::new(defaults, Arc::new(NoOverlays(HashMap::new())));
        let options = GatewayOptions {
            cache_capacity: None,
            fixed_properties: [("fixed", "yes")].into_iter().collect(),
        };
        let state = GatewayState::bootstrap(engine.clone(), resolver, options)
            .await
            .expect("state bootstraps");
        (Arc::new(state), engine)
    }

    async fn send(router: Router, method: Method, uri: &str, body: &str) -> axum::response::Response {
        router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from(body.to_string()))
                    .expect("request builds"),
            )
            .await
            .expect("request succeeds")
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    fn content_type(response: &axum::response::Response) -> &str {
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn preview_collapses_whitespace_and_truncates() {
        assert_eq!(preview("a\tb\nc"), "a b c");
        let long = "x".repeat(150);
        assert_eq!(preview(&long).len(), PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn parameter_endpoint_defaults_to_json() {
        let (state, _) = test_state().await;
        let response = send(build_api_router(state), Method::POST, "/", "Hello world.").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(content_type(&response), "application/json");
        assert_eq!(
            response.headers().get(CACHE_HEADER_NAME).expect("cache header"),
            "miss"
        );
        let body = body_text(response).await;
        assert!(body.starts_with("json|"), "unexpected body: {body}");
        assert!(body.ends_with("|Hello world."));
        assert!(body.contains("mention.type=dep"));
    }

    #[tokio::test]
    async fn parameter_endpoint_selects_format_and_reuses_pipeline() {
        let (state, engine) = test_state().await;
        let router = build_api_router(state);

        let xml = send(router.clone(), Method::GET, "/?outputFormat=xml", "text").await;
        assert_eq!(xml.status(), StatusCode::OK);
        assert_eq!(content_type(&xml), "text/xml");

        let conll = send(
            router.clone(),
            Method::POST,
            "/?properties=outputFormat%253Dconll",
            "text",
        )
        .await;
        assert_eq!(content_type(&conll), "text/plain");
        assert_eq!(conll.headers().get(CACHE_HEADER_NAME).expect("header"), "miss");

        let again = send(router, Method::POST, "/?outputFormat=conll", "text").await;
        assert_eq!(again.headers().get(CACHE_HEADER_NAME).expect("header"), "hit");

        // fixed pipeline + xml + conll
        assert_eq!(engine.builds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_output_format_renders_json() {
        let (state, _) = test_state().await;
        let response = send(build_api_router(state), Method::POST, "/?outputFormat=yaml", "x").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(content_type(&response), "application/json");
        assert!(body_text(response).await.starts_with("json|"));
    }

    #[tokio::test]
    async fn malformed_blob_is_rejected_without_touching_cache() {
        let (state, engine) = test_state().await;
        let response = send(
            build_api_router(state.clone()),
            Method::POST,
            "/?properties=%ZZ",
            "x",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value: Value = serde_json::from_str(&body_text(response).await).expect("json error");
        assert_eq!(value["error"], json!("invalid_encoding"));
        assert_eq!(value["field"], json!("properties"));
        assert_eq!(state.cache.entry_count().await, 0);
        assert_eq!(engine.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_language_names_the_tag() {
        let (state, _) = test_state().await;
        let response = send(
            build_api_router(state),
            Method::POST,
            "/?pipelineLanguage=klingon",
            "x",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value: Value = serde_json::from_str(&body_text(response).await).expect("json error");
        assert_eq!(value["error"], json!("unknown_language"));
        assert!(value["message"].as_str().expect("message").contains("klingon"));
    }

    #[tokio::test]
    async fn construction_failure_does_not_poison_cache() {
        let (state, _) = test_state().await;
        let router = build_api_router(state.clone());

        let failed = send(router.clone(), Method::POST, "/?annotators=bogus", "x").await;
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value: Value = serde_json::from_str(&body_text(failed).await).expect("json error");
        assert_eq!(value["error"], json!("pipeline_construction_failed"));
        assert_eq!(state.cache.entry_count().await, 0);

        let fixed = send(router, Method::POST, "/?annotators=tokenize", "x").await;
        assert_eq!(fixed.status(), StatusCode::OK);
        assert_eq!(state.cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn annotation_failure_is_server_error() {
        let (state, _) = test_state().await;
        let response = send(build_api_router(state), Method::POST, "/", "explode").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value: Value = serde_json::from_str(&body_text(response).await).expect("json error");
        assert_eq!(value["error"], json!("annotation_failed"));
    }

    #[tokio::test]
    async fn fixed_endpoints_ignore_query_and_use_fixed_pipeline() {
        let (state, engine) = test_state().await;
        let router = build_api_router(state.clone());

        for (path, expected_type, prefix) in [
            ("/json?outputFormat=xml", "application/json", "json|"),
            ("/xml", "application/xml", "xml|"),
            ("/conll", "text/plain", "conll|"),
        ] {
            let response = send(router.clone(), Method::POST, path, "Fixed text").await;
            assert_eq!(response.status(), StatusCode::OK, "{path}");
            assert_eq!(content_type(&response), expected_type, "{path}");
            let body = body_text(response).await;
            assert!(body.starts_with(prefix), "{path}: {body}");
            assert!(body.contains("fixed=yes"), "{path}: {body}");
        }

        assert_eq!(state.fixed_properties().get("fixed"), Some("yes"));
        assert_eq!(state.cache.entry_count().await, 0);
        assert_eq!(engine.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fixed_endpoints_reject_get() {
        let (state, _) = test_state().await;
        let response = send(build_api_router(state), Method::GET, "/json", "").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn app_router_serves_healthz_and_404() {
        let (state, _) = test_state().await;
        let config = ServerConfig::with_listen_addr("127.0.0.1:0");
        let router = build_app_router(&config, state).expect("router builds");

        let health = send(router.clone(), Method::GET, HEALTHZ_PATH, "").await;
        assert_eq!(health.status(), StatusCode::OK);
        assert!(health.headers().get(REQUEST_ID_HEADER).is_some());
        let value: Value = serde_json::from_str(&body_text(health).await).expect("json");
        assert_eq!(value, json!({ "status": "ok" }));

        let missing = send(router, Method::GET, "/nope", "").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let value: Value = serde_json::from_str(&body_text(missing).await).expect("json");
        assert_eq!(value["error"], json!("not_found"));
        assert!(value["request_id"].is_string());
    }

    #[tokio::test]
    async fn cors_enabled_allows_explicit_origin() {
        let (state, _) = test_state().await;
        let mut config = ServerConfig::with_listen_addr("127.0.0.1:0");
        config.cors = CorsConfig {
            enabled: true,
            allow_origins: vec!["http://localhost:5173".to_string()],
            ..CorsConfig::default()
        };
        let router = build_app_router(&config, state).expect("router builds");

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri(HEALTHZ_PATH)
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request succeeds");
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .expect("ACAO header present when enabled"),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn cors_without_origins_is_rejected() {
        let (state, _) = test_state().await;
        let mut config = ServerConfig::with_listen_addr("127.0.0.1:0");
        config.cors.enabled = true;
        assert!(matches!(
            build_app_router(&config, state),
            Err(ServerError::CorsConfig { .. })
        ));
    }

    #[test]
    fn listen_addr_validation() {
        assert!(matches!(parse_listen_addr("  "), Err(ServerError::EmptyListenAddr)));
        assert!(matches!(
            parse_listen_addr("localhost"),
            Err(ServerError::InvalidListenAddr { .. })
        ));
        assert!(parse_listen_addr("127.0.0.1:8080").is_ok());
    }

    #[test]
    fn latency_millis_saturate() {
        assert_eq!(millis(Duration::from_micros(2_500)), 2);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
