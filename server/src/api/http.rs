use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State as AxumState},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fairbet_execution::SettleError;
use fairbet_types::api::{
    BalanceResponse, DiceRequest, ErrorResponse, GameListing, GrantRequest, HouseEdgeUpdate,
    LimboRequest, PlinkoRequest, RevealResponse, RiskRequest, RotateRequest, VerifyResponse,
    WagerResponse,
};
use fairbet_types::{Cents, Commitment, Game, Wager, WagerId, WagerParams};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::LatencySnapshot;
use crate::{AppState, HttpMetricsSnapshot, WagerMetricsSnapshot, WsMetricsSnapshot};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct MetricsResponse {
    http: HttpMetricsSnapshot,
    wagers: WagerMetricsSnapshot,
    ws: WsMetricsSnapshot,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct HistoryQuery {
    limit: Option<usize>,
    game: Option<String>,
}

/// A [`SettleError`] rendered as `{ error, message }` with its HTTP status.
#[derive(Debug)]
pub(super) struct ApiError(SettleError);

impl From<SettleError> for ApiError {
    fn from(err: SettleError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(SettleError::InvalidParameter(rejection.body_text()))
    }
}

fn status_for(err: &SettleError) -> StatusCode {
    match err {
        SettleError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        SettleError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SettleError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        SettleError::Timeout | SettleError::HouseEdge(_) => StatusCode::SERVICE_UNAVAILABLE,
        SettleError::NotFound(_) => StatusCode::NOT_FOUND,
        SettleError::Forbidden(_) => StatusCode::FORBIDDEN,
        SettleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Body of an endpoint whose JSON payload is optional. Only an empty body
/// falls back to the default; anything else must parse.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        ApiError(SettleError::InvalidParameter(format!(
            "Failed to deserialize the JSON body: {err}"
        )))
    })
}

fn parse_game(value: &str) -> Result<Game, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError(SettleError::InvalidParameter(format!("unknown game {value:?}"))))
}

fn parse_wager_id(value: &str) -> Result<WagerId, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError(SettleError::InvalidParameter(format!("invalid wager id {value:?}"))))
}

/// Dice thresholds arrive as decimals on the 0.00..=99.99 scale.
fn dice_target(value: f64) -> Result<u32, ApiError> {
    let hundredths = Cents::from_decimal(value)
        .map_err(|err| ApiError(SettleError::InvalidParameter(format!("dice target: {err}"))))?;
    u32::try_from(hundredths.0)
        .ok()
        .filter(|target| *target <= 9_999)
        .ok_or_else(|| {
            ApiError(SettleError::InvalidParameter(format!(
                "dice target must be in [0.00, 99.99] (got {value})"
            )))
        })
}

fn token_auth_error(headers: &HeaderMap, token: &str, header_name: &str) -> Option<StatusCode> {
    if token.is_empty() {
        return None;
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let header_token = headers
        .get(header_name)
        .and_then(|value| value.to_str().ok());
    if bearer == Some(token) || header_token == Some(token) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

fn metrics_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("METRICS_AUTH_TOKEN").unwrap_or_default();
    token_auth_error(headers, &token, "x-metrics-token")
}

fn admin_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("ADMIN_AUTH_TOKEN").unwrap_or_default();
    token_auth_error(headers, &token, "x-admin-token")
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn list_games(
    AxumState(state): AxumState<Arc<AppState>>,
) -> Json<Vec<GameListing>> {
    Json(state.engine().registry().listing())
}

pub(super) async fn set_house_edge(
    headers: HeaderMap,
    AxumState(state): AxumState<Arc<AppState>>,
    Path(game): Path<String>,
    payload: Result<Json<HouseEdgeUpdate>, JsonRejection>,
) -> Response {
    if let Some(status) = admin_auth_error(&headers) {
        return status.into_response();
    }
    let result = (|| {
        let game = parse_game(&game)?;
        let Json(update) = payload?;
        let edge = state.engine().set_house_edge(game, update.house_edge)?;
        Ok::<_, ApiError>(GameListing {
            game,
            house_edge: edge.value(),
            rtp_percent: (edge.rtp() * 10_000.0).round() / 100.0,
        })
    })();
    match result {
        Ok(listing) => Json(listing).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn grant(
    headers: HeaderMap,
    AxumState(state): AxumState<Arc<AppState>>,
    Path(user): Path<String>,
    payload: Result<Json<GrantRequest>, JsonRejection>,
) -> Response {
    if let Some(status) = admin_auth_error(&headers) {
        return status.into_response();
    }
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    match state
        .engine()
        .grant(&user, request.currency, request.amount)
        .await
    {
        Ok(balance) => Json(BalanceResponse { user, balance }).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

pub(super) async fn balance(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(user): Path<String>,
) -> ApiResult<BalanceResponse> {
    let start = Instant::now();
    let balance = state.engine().balance(&user).await?;
    state.http_metrics().record_query(start.elapsed());
    Ok(Json(BalanceResponse { user, balance }))
}

pub(super) async fn commitment(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((user, game)): Path<(String, String)>,
) -> ApiResult<Commitment> {
    let game = parse_game(&game)?;
    Ok(Json(state.engine().commitment(&user, game).await?))
}

pub(super) async fn rotate(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((user, game)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<RevealResponse> {
    let game = parse_game(&game)?;
    let request: RotateRequest = optional_body(&body)?;
    Ok(Json(
        state
            .engine()
            .rotate(&user, game, request.client_seed)
            .await?,
    ))
}

async fn place(
    state: &AppState,
    user: &str,
    currency: fairbet_types::Currency,
    stake: Cents,
    params: WagerParams,
    client_seed: Option<String>,
) -> ApiResult<WagerResponse> {
    let start = Instant::now();
    let result = state
        .engine()
        .place(user, currency, stake, params, client_seed)
        .await;
    state.http_metrics().record_wager(start.elapsed());
    match result {
        Ok(settled) => {
            state.on_settled(&settled);
            Ok(Json(settled.response()))
        }
        Err(err) => {
            state.on_rejected(&err);
            Err(ApiError(err))
        }
    }
}

pub(super) async fn place_limbo(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(user): Path<String>,
    payload: Result<Json<LimboRequest>, JsonRejection>,
) -> ApiResult<WagerResponse> {
    let Json(request) = payload?;
    let params = WagerParams::Limbo {
        target: request.target_multiplier,
    };
    place(
        &state,
        &user,
        request.currency,
        request.bet_amount,
        params,
        request.client_seed,
    )
    .await
}

pub(super) async fn place_dice(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(user): Path<String>,
    payload: Result<Json<DiceRequest>, JsonRejection>,
) -> ApiResult<WagerResponse> {
    let Json(request) = payload?;
    let params = WagerParams::Dice {
        target: dice_target(request.target)?,
        direction: request.direction,
    };
    place(
        &state,
        &user,
        request.currency,
        request.bet_amount,
        params,
        request.client_seed,
    )
    .await
}

pub(super) async fn place_plinko(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(user): Path<String>,
    payload: Result<Json<PlinkoRequest>, JsonRejection>,
) -> ApiResult<WagerResponse> {
    let Json(request) = payload?;
    let params = WagerParams::Plinko {
        rows: request.rows,
        risk: request.risk,
    };
    place(
        &state,
        &user,
        request.currency,
        request.bet_amount,
        params,
        request.client_seed,
    )
    .await
}

pub(super) async fn risk(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((user, id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<WagerResponse> {
    let wager_id = parse_wager_id(&id)?;
    let request: RiskRequest = optional_body(&body)?;
    let start = Instant::now();
    let result = state
        .engine()
        .risk(&user, wager_id, request.client_seed)
        .await;
    state.http_metrics().record_wager(start.elapsed());
    match result {
        Ok(settled) => {
            state.on_settled(&settled);
            Ok(Json(settled.response()))
        }
        Err(err) => {
            state.on_rejected(&err);
            Err(ApiError(err))
        }
    }
}

pub(super) async fn history(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(user): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Wager>> {
    let game = query.game.as_deref().map(parse_game).transpose()?;
    let start = Instant::now();
    let wagers = state.engine().history(&user, game, query.limit).await?;
    state.http_metrics().record_query(start.elapsed());
    Ok(Json(wagers))
}

pub(super) async fn verify(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<VerifyResponse> {
    let wager_id = parse_wager_id(&id)?;
    Ok(Json(state.engine().verify(wager_id).await?))
}

pub(super) async fn http_metrics(
    headers: HeaderMap,
    AxumState(state): AxumState<Arc<AppState>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers) {
        return status.into_response();
    }
    Json(MetricsResponse {
        http: state.http_metrics_snapshot(),
        wagers: state.wager_metrics_snapshot(),
        ws: state.ws_metrics_snapshot(),
    })
    .into_response()
}

pub(super) async fn prometheus_metrics(
    headers: HeaderMap,
    AxumState(state): AxumState<Arc<AppState>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers) {
        return status.into_response();
    }
    let body = render_prometheus_metrics(&state);
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response()
}

fn render_prometheus_metrics(state: &AppState) -> String {
    let http = state.http_metrics_snapshot();
    let wagers = state.wager_metrics_snapshot();
    let ws = state.ws_metrics_snapshot();
    let edges = state.engine().edges().stats();

    let mut out = String::new();

    append_histogram(&mut out, "fairbet_http_wager_latency_ms", &http.wager);
    append_histogram(&mut out, "fairbet_http_query_latency_ms", &http.query);
    append_counter(
        &mut out,
        "fairbet_http_reject_rate_limit_total",
        http.reject_rate_limit,
    );
    append_counter(
        &mut out,
        "fairbet_http_reject_body_limit_total",
        http.reject_body_limit,
    );
    append_counter(
        &mut out,
        "fairbet_http_reject_unauthorized_total",
        http.reject_unauthorized,
    );

    for (game, counters) in [
        (Game::Limbo, wagers.limbo),
        (Game::Dice, wagers.dice),
        (Game::Plinko, wagers.plinko),
    ] {
        append_counter(
            &mut out,
            &format!("fairbet_wagers_{game}_settled_total"),
            counters.settled,
        );
        append_counter(
            &mut out,
            &format!("fairbet_wagers_{game}_wins_total"),
            counters.wins,
        );
        append_counter(
            &mut out,
            &format!("fairbet_wagers_{game}_staked_cents_total"),
            counters.staked_cents,
        );
        append_counter(
            &mut out,
            &format!("fairbet_wagers_{game}_paid_cents_total"),
            counters.paid_cents,
        );
    }
    append_counter(&mut out, "fairbet_wagers_rejected_total", wagers.rejected);
    append_counter(&mut out, "fairbet_wagers_conflicts_total", wagers.conflicts);
    append_counter(&mut out, "fairbet_wagers_timeouts_total", wagers.timeouts);

    append_counter(&mut out, "fairbet_house_edge_cache_hits_total", edges.hits);
    append_counter(
        &mut out,
        "fairbet_house_edge_cache_misses_total",
        edges.misses,
    );
    append_counter(
        &mut out,
        "fairbet_house_edge_cache_invalidations_total",
        edges.invalidations,
    );

    append_counter(&mut out, "fairbet_ws_lagged_total", ws.lagged);
    append_counter(&mut out, "fairbet_ws_queue_full_total", ws.queue_full);
    append_counter(&mut out, "fairbet_ws_send_errors_total", ws.send_errors);
    append_counter(&mut out, "fairbet_ws_send_timeouts_total", ws.send_timeouts);
    append_counter(
        &mut out,
        "fairbet_ws_connection_reject_global_total",
        ws.connection_reject_global,
    );
    append_counter(
        &mut out,
        "fairbet_ws_connection_reject_per_ip_total",
        ws.connection_reject_per_ip,
    );
    append_gauge(
        &mut out,
        "fairbet_ws_connections",
        state.ws_connection_count(),
    );
    append_gauge(
        &mut out,
        "fairbet_activity_subscribers",
        state.engine().feed().subscriber_count(),
    );

    out
}

fn append_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn append_gauge(out: &mut String, name: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn append_histogram(out: &mut String, name: &str, snapshot: &LatencySnapshot) {
    let _ = writeln!(out, "# TYPE {name} histogram");
    let mut cumulative = 0u64;
    for (bucket, count) in snapshot.buckets_ms.iter().zip(snapshot.counts.iter()) {
        cumulative = cumulative.saturating_add(*count);
        let _ = writeln!(out, "{name}_bucket{{le=\"{bucket}\"}} {cumulative}");
    }
    cumulative = cumulative.saturating_add(snapshot.overflow);
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(out, "{name}_count {}", snapshot.count);
    let sum = snapshot.avg_ms * snapshot.count as f64;
    let _ = writeln!(out, "{name}_sum {sum}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_engine, Api, ServerConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::Router;
    use fairbet_types::api::VerifyStatus;
    use fairbet_types::Currency;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        let config = ServerConfig::default();
        let engine = build_engine(&config).unwrap();
        Api::new(Arc::new(AppState::new(config, engine, None))).router()
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn fund(router: &Router, user: &str, amount: f64) {
        let (status, _) = call(
            router,
            Method::POST,
            &format!("/users/{user}/grant"),
            Some(json!({ "currency": "GC", "amount": amount })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_and_games() {
        let router = router();
        let (status, body) = call(&router, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (status, body) = call(&router, Method::GET, "/games", None).await;
        assert_eq!(status, StatusCode::OK);
        let games = body.as_array().unwrap();
        assert_eq!(games.len(), 3);
        assert!(games.iter().all(|game| game["rtpPercent"] == 99.0));
    }

    #[tokio::test]
    async fn dice_wager_round_trip() {
        let router = router();
        fund(&router, "alice", 10.0).await;

        let (status, body) = call(
            &router,
            Method::POST,
            "/users/alice/wagers/dice",
            Some(json!({ "betAmount": 1.0, "target": 50.0, "direction": "under" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["nonce"], 0);
        assert_eq!(body["currency"], "GC");
        let payout = body["payout"].as_f64().unwrap();
        let expected = 10.0 - 1.0 + payout;
        assert!((body["balance"].as_f64().unwrap() - expected).abs() < 1e-9);

        let (status, body) = call(&router, Method::GET, "/users/alice/wagers?game=dice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["targetParameter"], "under:50.00");
    }

    #[tokio::test]
    async fn insufficient_balance_is_unprocessable() {
        let router = router();
        let (status, body) = call(
            &router,
            Method::POST,
            "/users/bob/wagers/limbo",
            Some(json!({ "betAmount": 1.0, "targetMultiplier": 2.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "insufficient_balance");
    }

    #[tokio::test]
    async fn invalid_parameters_are_bad_requests() {
        let router = router();
        fund(&router, "carol", 10.0).await;

        let (status, body) = call(
            &router,
            Method::POST,
            "/users/carol/wagers/limbo",
            Some(json!({ "betAmount": 1.001, "targetMultiplier": 2.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_parameter");

        let (status, _) = call(
            &router,
            Method::POST,
            "/users/carol/wagers/dice",
            Some(json!({ "betAmount": 1.0, "target": 100.0, "direction": "under" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &router,
            Method::POST,
            "/users/carol/wagers/plinko",
            Some(json!({ "betAmount": 1.0, "rows": 7, "risk": "low" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&router, Method::GET, "/users/carol/fairness/roulette", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&router, Method::GET, "/users/carol/balance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["availableGC"], 10.0);
    }

    #[tokio::test]
    async fn commitment_rotate_and_verify() {
        let router = router();
        fund(&router, "dave", 5.0).await;

        let (status, commitment) =
            call(&router, Method::GET, "/users/dave/fairness/plinko", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(commitment["nonce"], 0);

        let (status, wager) = call(
            &router,
            Method::POST,
            "/users/dave/wagers/plinko",
            Some(json!({ "betAmount": 1.0, "rows": 8, "risk": "medium" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(wager["serverSeedHash"], commitment["serverSeedHash"]);
        let wager_id = wager["wagerId"].as_str().unwrap().to_string();

        let (status, body) = call(&router, Method::GET, &format!("/wagers/{wager_id}/verify"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending_reveal");

        let (status, reveal) = call(
            &router,
            Method::POST,
            "/users/dave/fairness/plinko/rotate",
            Some(json!({ "clientSeed": "fresh" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(reveal["newServerSeedHash"], commitment["serverSeedHash"]);

        let (status, body) = call(&router, Method::GET, &format!("/wagers/{wager_id}/verify"), None).await;
        assert_eq!(status, StatusCode::OK);
        let verified: VerifyResponse = serde_json::from_value(body).unwrap();
        assert_eq!(verified.status, VerifyStatus::Verified);
        assert_eq!(verified.server_seed.as_deref(), reveal["oldServerSeed"].as_str());

        let (_, next) = call(&router, Method::GET, "/users/dave/fairness/plinko", None).await;
        assert_eq!(next["nonce"], 1);
        assert_eq!(next["clientSeed"], "fresh");
    }

    async fn call_raw(router: &Router, uri: &str, body: &'static str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn rotate_rejects_malformed_body() {
        let router = router();
        let (_, before) = call(&router, Method::GET, "/users/gail/fairness/dice", None).await;

        for body in [r#"{"clientSeed": 42}"#, r#"{"clientseed": "typo"}"#, "{not json"] {
            let (status, error) =
                call_raw(&router, "/users/gail/fairness/dice/rotate", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(error["error"], "invalid_parameter");
        }
        let (_, after) = call(&router, Method::GET, "/users/gail/fairness/dice", None).await;
        assert_eq!(after["serverSeedHash"], before["serverSeedHash"]);

        // No body, or a blank one, keeps the current client seed.
        let (status, _) = call(&router, Method::POST, "/users/gail/fairness/dice/rotate", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call_raw(&router, "/users/gail/fairness/dice/rotate", "  ").await;
        assert_eq!(status, StatusCode::OK);
        let (_, rotated) = call(&router, Method::GET, "/users/gail/fairness/dice", None).await;
        assert_ne!(rotated["serverSeedHash"], before["serverSeedHash"]);
        assert_eq!(rotated["clientSeed"], before["clientSeed"]);

        let (status, _) = call_raw(
            &router,
            &format!("/users/gail/wagers/{}/risk", uuid::Uuid::new_v4()),
            r#"{"clientSeed": ["x"]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn risk_on_foreign_or_missing_wager() {
        let router = router();
        fund(&router, "erin", 100.0).await;

        let missing = uuid::Uuid::new_v4();
        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/users/erin/wagers/{missing}/risk"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Keep betting until a win so there is something to risk.
        let mut winner = None;
        for _ in 0..50 {
            let (_, body) = call(
                &router,
                Method::POST,
                "/users/erin/wagers/dice",
                Some(json!({ "betAmount": 1.0, "target": 90.0, "direction": "under" })),
            )
            .await;
            if body["win"] == true {
                winner = Some(body["wagerId"].as_str().unwrap().to_string());
                break;
            }
        }
        let winner = winner.unwrap();

        let (status, body) = call(
            &router,
            Method::POST,
            &format!("/users/mallory/wagers/{winner}/risk"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, body) = call(
            &router,
            Method::POST,
            &format!("/users/erin/wagers/{winner}/risk"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["game"], "dice");

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/users/erin/wagers/{winner}/risk"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn house_edge_update_is_visible_immediately() {
        let router = router();
        let (status, body) = call(
            &router,
            Method::PUT,
            "/games/limbo/house-edge",
            Some(json!({ "houseEdge": 0.04 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rtpPercent"], 96.0);

        let (_, games) = call(&router, Method::GET, "/games", None).await;
        let limbo = games
            .as_array()
            .unwrap()
            .iter()
            .find(|game| game["game"] == "limbo")
            .unwrap();
        assert_eq!(limbo["houseEdge"], 0.04);

        let (status, _) = call(
            &router,
            Method::PUT,
            "/games/limbo/house-edge",
            Some(json!({ "houseEdge": 0.9 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prometheus_exposes_settlement_counters() {
        let router = router();
        fund(&router, "frank", 5.0).await;
        let (status, _) = call(
            &router,
            Method::POST,
            "/users/frank/wagers/limbo",
            Some(json!({ "betAmount": 1.0, "targetMultiplier": 2.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder()
            .uri("/metrics/prometheus")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("fairbet_wagers_limbo_settled_total 1"), "{text}");
        assert!(text.contains("fairbet_http_wager_latency_ms_count 1"), "{text}");
    }

    #[test]
    fn token_auth_accepts_bearer_or_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_auth_error(&headers, "", "x-admin-token"), None);
        assert_eq!(
            token_auth_error(&headers, "secret", "x-admin-token"),
            Some(StatusCode::UNAUTHORIZED)
        );
        headers.insert("x-admin-token", HeaderValue::from_static("secret"));
        assert_eq!(token_auth_error(&headers, "secret", "x-admin-token"), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert_eq!(token_auth_error(&headers, "secret", "x-metrics-token"), None);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            status_for(&SettleError::InsufficientBalance {
                currency: Currency::Sc,
                needed: Cents(2),
                available: Cents(1),
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&SettleError::ConcurrencyConflict("busy".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&SettleError::Timeout), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&SettleError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn dice_targets_are_exact_hundredths() {
        assert_eq!(dice_target(49.5).unwrap(), 4_950);
        assert_eq!(dice_target(99.99).unwrap(), 9_999);
        assert!(dice_target(100.0).is_err());
        assert!(dice_target(-1.0).is_err());
        assert!(dice_target(12.345).is_err());
    }
}
