use axum::{
    extract::{DefaultBodyLimit, Request, State as AxumState},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::AppState;

mod http;
mod ws;

pub struct Api {
    state: Arc<AppState>,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn default_governor_config() -> Option<IpGovernorConfig> {
    GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

impl Api {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let allowed_origins = parse_allowed_origins("ALLOWED_HTTP_ORIGINS");
        let allow_any_origin = allowed_origins.iter().any(|origin| origin == "*");
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Invalid origin in ALLOWED_HTTP_ORIGINS: {}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();

        let cors = if allow_any_origin {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        // Environment variables override config
        let http_rate_per_sec = parse_env_u64("RATE_LIMIT_HTTP_PER_SEC")
            .or(self.state.config.http_rate_limit_per_second);
        let http_rate_burst = parse_env_u32("RATE_LIMIT_HTTP_BURST")
            .or(self.state.config.http_rate_limit_burst);

        let governor_conf = match (http_rate_per_sec, http_rate_burst) {
            (Some(rate_per_second), Some(burst_size))
                if rate_per_second > 0 && burst_size > 0 =>
            {
                let nanos_per_request = (1_000_000_000u64 / rate_per_second).max(1);
                let period = Duration::from_nanos(nanos_per_request);
                let config = GovernorConfigBuilder::default()
                    .period(period)
                    .burst_size(burst_size)
                    .key_extractor(SmartIpKeyExtractor)
                    .finish()
                    .or_else(|| {
                        tracing::warn!("invalid rate-limit config; falling back to defaults");
                        default_governor_config()
                    });
                config.map(Arc::new)
            }
            _ => None,
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/games", get(http::list_games))
            .route("/games/:game/house-edge", put(http::set_house_edge))
            .route("/users/:user/grant", post(http::grant))
            .route("/users/:user/balance", get(http::balance))
            .route("/users/:user/fairness/:game", get(http::commitment))
            .route("/users/:user/fairness/:game/rotate", post(http::rotate))
            .route("/users/:user/wagers/limbo", post(http::place_limbo))
            .route("/users/:user/wagers/dice", post(http::place_dice))
            .route("/users/:user/wagers/plinko", post(http::place_plinko))
            .route("/users/:user/wagers/:id/risk", post(http::risk))
            .route("/users/:user/wagers", get(http::history))
            .route("/wagers/:id/verify", get(http::verify))
            .route("/metrics/http", get(http::http_metrics))
            .route("/metrics/prometheus", get(http::prometheus_metrics))
            .route("/activity", get(ws::activity_ws));

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        let router = router.layer(cors);
        let router = match self.state.config.http_body_limit_bytes {
            limit if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn_with_state(
            self.state.clone(),
            request_id_middleware,
        ));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.state.clone())
    }
}

fn parse_allowed_origins(var: &str) -> Vec<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

async fn request_id_middleware(
    AxumState(state): AxumState<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    match response.status() {
        StatusCode::UNAUTHORIZED => state.http_metrics().inc_reject_unauthorized(),
        StatusCode::PAYLOAD_TOO_LARGE => state.http_metrics().inc_reject_body_limit(),
        StatusCode::TOO_MANY_REQUESTS => state.http_metrics().inc_reject_rate_limit(),
        _ => {}
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
