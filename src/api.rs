//! REST API for the bundle planner.
//!
//! Provides HTTP endpoints for the web UI and other clients.
//! Uses Axum as the web framework and supports CORS.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use rust_embed::RustEmbed;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};

use crate::config::{ApiConfig, OptimizerConfig};
use crate::model::{BreakdownLine, Variant, VariantKind};
use crate::optimizer::{OrderPlan, plan_order, plan_order_with_progress};
use crate::order::{OrderInput, ValidatedOrder};

#[derive(Clone)]
struct ApiState {
    optimizer_config: Arc<OptimizerConfig>,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>bundle_planner API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Embedded Web Assets (HTML, CSS, JS)
#[derive(RustEmbed)]
#[folder = "web/"]
struct WebAssets;

/// Supported currencies with their denominations, largest first.
#[derive(Serialize, ToSchema)]
#[schema(example = json!({ "currencies": { "USD": [100, 50, 20, 10] } }))]
pub struct CurrenciesResponse {
    pub currencies: BTreeMap<String, Vec<u64>>,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, "Invalid input data", details)
}

fn infeasible_error(details: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, "Cannot fulfil order", details)
}

fn parse_order_request(
    state: &ApiState,
    payload: Result<Json<OrderInput>, JsonRejection>,
) -> Result<ValidatedOrder, Response> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return Err(json_deserialize_error(err)),
    };

    let config = &state.optimizer_config;
    payload
        .into_validated(config.currencies(), &config.order_limits())
        .map_err(|err| validation_error(err.to_string()))
}

#[derive(OpenApi)]
#[openapi(
    paths(handle_optimize, handle_optimize_stream, handle_currencies),
    components(
        schemas(
            OrderInput,
            OrderPlan,
            Variant,
            VariantKind,
            BreakdownLine,
            CurrenciesResponse,
            ErrorResponse
        )
    ),
    tags((name = "planning", description = "Endpoints for bundle and block planning"))
)]
struct ApiDoc;

fn router(optimizer_config: OptimizerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let state = ApiState {
        optimizer_config: Arc::new(optimizer_config),
    };

    Router::new()
        // API endpoints
        .route("/optimize", post(handle_optimize))
        .route("/optimize_stream", post(handle_optimize_stream))
        .route("/currencies", get(handle_currencies))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        // Web-UI (embedded)
        .route("/", get(serve_index))
        .route("/{*path}", get(serve_static))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server.
///
/// Configures CORS for cross-origin requests from the frontend.
/// Blocks until the server is terminated.
pub async fn start_api_server(config: ApiConfig, optimizer_config: OptimizerConfig) {
    let currencies = optimizer_config
        .currencies()
        .codes()
        .collect::<Vec<_>>()
        .join(", ");
    let app = router(optimizer_config);

    let addr = config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Could not bind API server to {}: {}", addr, err);
            return;
        }
    };

    let display_host = config.display_host().to_string();
    info!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() && config.uses_default_host() {
        info!("💡 Local access: http://localhost:{}", config.port());
    }
    info!("API endpoints: POST /optimize, POST /optimize_stream, GET /currencies");
    info!("Currencies: {}", currencies);
    info!("Documentation: GET /docs, GET /docs/openapi.json");

    if let Err(err) = axum::serve(listener, app).await {
        error!("API server terminated with an error: {err}");
    }
}

/// Handler for POST /optimize endpoint.
///
/// Plans an order: full blocks when possible, loose bundles otherwise.
///
/// # Parameters
/// * `payload` - JSON payload with amount, currency, optional stock and variant count
///
/// # Returns
/// JSON response with the ranked variants
#[utoipa::path(
    post,
    path = "/optimize",
    request_body = OrderInput,
    responses(
        (status = 200, description = "Variants for the order", body = OrderPlan),
        (
            status = BAD_REQUEST,
            description = "Invalid order or no allocation fits the stock",
            body = ErrorResponse
        ),
        (status = UNPROCESSABLE_ENTITY, description = "Malformed JSON", body = ErrorResponse)
    ),
    tag = "planning"
)]
async fn handle_optimize(
    State(state): State<ApiState>,
    payload: Result<Json<OrderInput>, JsonRejection>,
) -> impl IntoResponse {
    let order = match parse_order_request(&state, payload) {
        Ok(order) => order,
        Err(response) => return response,
    };

    info!(
        amount = order.amount,
        currency = %order.currency,
        max_variants = order.max_variants.get(),
        stock = ?order.stock,
        "New optimize request"
    );
    let bundle_config = state.optimizer_config.bundle_config();
    let outcome = tokio::task::spawn_blocking(move || plan_order(&order, &bundle_config)).await;

    match outcome {
        Ok(Ok(plan)) => {
            info!(
                mode = ?plan.mode(),
                variants = plan.variant_count(),
                "Order planned"
            );
            (StatusCode::OK, Json(plan)).into_response()
        }
        Ok(Err(err)) => {
            info!("No allocation fits: {err}");
            infeasible_error(err.to_string())
        }
        Err(err) => {
            error!("Planning task failed: {err}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                err.to_string(),
            )
        }
    }
}

/// Handler for POST /optimize_stream endpoint (SSE).
///
/// Streams planning events as Server-Sent Events (text/event-stream) so the
/// frontend can show search progress before the final variants arrive.
#[utoipa::path(
    post,
    path = "/optimize_stream",
    request_body = OrderInput,
    responses(
        (
            status = 200,
            description = "Streams planning events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (status = BAD_REQUEST, description = "Invalid order", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Malformed JSON", body = ErrorResponse)
    ),
    tag = "planning"
)]
async fn handle_optimize_stream(
    State(state): State<ApiState>,
    payload: Result<Json<OrderInput>, JsonRejection>,
) -> impl IntoResponse {
    let order = match parse_order_request(&state, payload) {
        Ok(order) => order,
        Err(response) => return response,
    };

    let (tx, rx) = mpsc::channel::<String>(32);
    let bundle_config = state.optimizer_config.bundle_config();

    tokio::task::spawn_blocking(move || {
        let outcome = plan_order_with_progress(&order, &bundle_config, |evt| {
            if let Ok(json) = serde_json::to_string(evt) {
                // A closed receiver means the client left; later events are dropped.
                let _ = tx.blocking_send(json);
            }
        });
        if let Err(err) = outcome {
            info!("No allocation fits: {err}");
            let event = json!({
                "type": "Error",
                "error": "Cannot fulfil order",
                "details": err.to_string(),
            });
            let _ = tx.blocking_send(event.to_string());
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for GET /currencies endpoint.
#[utoipa::path(
    get,
    path = "/currencies",
    responses((status = 200, description = "Supported currencies", body = CurrenciesResponse)),
    tag = "planning"
)]
async fn handle_currencies(State(state): State<ApiState>) -> Json<CurrenciesResponse> {
    let currencies = state
        .optimizer_config
        .currencies()
        .iter()
        .map(|(code, set)| (code.to_string(), set.as_slice().to_vec()))
        .collect();
    Json(CurrenciesResponse { currencies })
}

/// Serves the index.html main page
async fn serve_index() -> Response {
    match WebAssets::get("index.html") {
        Some(content) => Html(content.data).into_response(),
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

/// Serves static assets (JS, CSS, etc.)
async fn serve_static(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    match WebAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.as_ref())], content.data).into_response()
        }
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(request: Request<Body>) -> (StatusCode, String) {
        let response = router(OptimizerConfig::default())
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body is readable");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn post_json(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("valid request")
    }

    #[test]
    fn openapi_doc_lists_expected_paths() {
        let doc = openapi_doc();
        let paths = &doc.paths.paths;
        for path in ["/optimize", "/optimize_stream", "/currencies"] {
            assert!(
                paths.contains_key(path),
                "OpenAPI documentation is missing the {} path",
                path
            );
        }
    }

    #[test]
    fn openapi_doc_contains_key_schemas() {
        let doc = openapi_doc();
        let components = doc
            .components
            .as_ref()
            .expect("OpenAPI documentation contains no components");
        let schemas = &components.schemas;
        for name in ["OrderInput", "OrderPlan", "Variant", "ErrorResponse"] {
            assert!(
                schemas.contains_key(name),
                "Expected schema '{}' is missing from OpenAPI spec",
                name
            );
        }
    }

    #[tokio::test]
    async fn optimize_returns_grouped_variants() {
        let (status, body) = send(post_json(
            "/optimize",
            r#"{"amount": 300000, "currency": "usd", "max_variants": 2}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["has_grouped"], true);
        assert_eq!(json["currency"], "USD");
        assert_eq!(json["bundle_size"], 100);
        assert_eq!(json["block_size"], 30);
        let variants = json["variants"].as_array().unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0]["kind"], "grouped");
        assert_eq!(variants[0]["blocks"], 1);
        assert_eq!(variants[0]["breakdown"][0]["denomination"], 100);
        assert_eq!(variants[0]["breakdown"][0]["bundles"], 30);
    }

    #[tokio::test]
    async fn optimize_falls_back_to_loose_bundles() {
        let (status, body) = send(post_json(
            "/optimize",
            r#"{"amount": 350000, "currency": "USD", "stock": {"100": 29, "50": "12"}}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["has_grouped"], false);
        assert_eq!(json["variants"][0]["kind"], "loose");
        assert_eq!(json["variants"][0]["total_bundles"], 41);
    }

    #[tokio::test]
    async fn optimize_rejects_invalid_orders() {
        let (status, body) = send(post_json(
            "/optimize",
            r#"{"amount": 150, "currency": "USD"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("divisible by 100"), "unexpected body: {body}");

        let (status, _) = send(post_json(
            "/optimize",
            r#"{"amount": 1000, "currency": "XYZ"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn optimize_reports_infeasible_stock() {
        let (status, body) = send(post_json(
            "/optimize",
            r#"{"amount": 750000, "currency": "USD", "stock": {"100": 18, "50": 40}}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Cannot fulfil order"));
    }

    #[tokio::test]
    async fn optimize_treats_blank_stock_form_as_unlimited() {
        let (status, body) = send(post_json(
            "/optimize",
            r#"{"amount": 300000, "currency": "USD", "stock": {"100": "", "50": "", "20": "", "10": ""}}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["has_grouped"], true);
    }

    #[tokio::test]
    async fn optimize_rejects_malformed_json() {
        let (status, _) = send(post_json("/optimize", r#"{"amount": "#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn optimize_stream_emits_events() {
        let (status, body) = send(post_json(
            "/optimize_stream",
            r#"{"amount": 300000, "currency": "USD", "max_variants": 1}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("SearchStarted"));
        assert!(body.contains("BlockCountSearched"));
        assert!(body.contains("Finished"));
    }

    #[tokio::test]
    async fn optimize_stream_reports_infeasible_orders() {
        let (status, body) = send(post_json(
            "/optimize_stream",
            r#"{"amount": 750000, "currency": "USD", "stock": {"100": 18, "50": 40}}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("FallbackStarted"));
        let error = body
            .lines()
            .filter_map(|line| line.strip_prefix("data:").map(str::trim_start))
            .last()
            .expect("stream carries events");
        let json: serde_json::Value = serde_json::from_str(error).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["details"], "Cannot fulfil order with given stock");
    }

    #[tokio::test]
    async fn currencies_lists_default_table() {
        let request = Request::builder()
            .uri("/currencies")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["currencies"]["USD"], serde_json::json!([100, 50, 20, 10]));
        assert_eq!(json["currencies"]["JPY"], serde_json::json!([10000, 5000, 1000]));
    }

    #[tokio::test]
    async fn index_page_is_embedded() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Bundle Planner"));
    }
}
