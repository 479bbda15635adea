use crate::db;
use crate::errors::ApiError;
use crate::models::*;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use fitness_core::badges::Badge;
use fitness_core::constants::bucket_boundaries;
use fitness_core::types::{ActivitySubmission, Address, EncryptedInput, Metric, MetricTriple};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Header carrying the caller's address.
///
/// Stands in for the signature check a wallet-connected deployment performs.
pub const CALLER_HEADER: &str = "X-CALLER";

#[derive(Debug, serde::Deserialize)]
pub struct ListTransactionsParams {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub caller: Option<String>,
}

/// The authenticated caller of a request.
pub struct Caller(pub Address);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| ApiError::BadRequest(format!("missing {CALLER_HEADER} header")))?;

        raw.to_str()
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Caller)
            .ok_or_else(|| ApiError::BadRequest(format!("{CALLER_HEADER} must be a 20-byte hex address")))
    }
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid address '{raw}'")))
}

pub fn router(state: AppState) -> Router {
    let mock_routes = Router::new()
        .route("/api/v1/mock/encrypt", post(mock_encrypt))
        .route("/api/v1/mock/decrypt", post(mock_decrypt))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/contract", get(get_contract))
        .route("/api/v1/activity", post(submit_activity))
        .route("/api/v1/stats/global", get(get_global_stats))
        .route("/api/v1/users/:address/stats", get(get_user_stats))
        .route("/api/v1/users/:address/latest", get(get_user_latest))
        .route("/api/v1/users/:address/badges", get(get_user_badges))
        .route("/api/v1/buckets/:metric", get(get_buckets))
        .route("/api/v1/transactions", get(list_transactions))
        .merge(mock_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(provided_key) = headers.get("X-API-KEY") {
        if provided_key == state.config.api_key.as_str() {
            return Ok(next.run(request).await);
        }
    }

    warn!("unauthorized access attempt");
    Err(ApiError::Unauthorized("missing or invalid X-API-KEY".to_string()))
}

async fn get_contract(State(state): State<AppState>) -> Result<Json<ContractInfoResponse>, ApiError> {
    let ledger = state.lock_ledger().await;

    Ok(Json(ContractInfoResponse {
        address: ledger.board.address(),
        buckets: Metric::ALL
            .into_iter()
            .map(|metric| BucketTable {
                metric,
                lower_bounds: *bucket_boundaries(metric),
            })
            .collect(),
        badges: Badge::ALL
            .into_iter()
            .map(|badge| BadgeRule {
                badge,
                threshold: badge.threshold(),
            })
            .collect(),
        users: ledger.board.user_count() as u64,
        total_submissions: ledger.board.total_submissions(),
    }))
}

fn decode_input(dto: &EncryptedInputDto) -> Result<EncryptedInput, ApiError> {
    let proof = base64::engine::general_purpose::STANDARD
        .decode(&dto.proof_b64)
        .map_err(|_| ApiError::BadRequest("invalid proof_b64".to_string()))?;

    Ok(EncryptedInput {
        handle: dto.handle,
        proof,
    })
}

fn encode_input(input: EncryptedInput) -> EncryptedInputDto {
    EncryptedInputDto {
        handle: input.handle,
        proof_b64: base64::engine::general_purpose::STANDARD.encode(input.proof),
    }
}

async fn submit_activity(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<SubmitActivityRequest>,
) -> Result<Json<SubmitActivityResponse>, ApiError> {
    let submission: ActivitySubmission = MetricTriple::new(
        decode_input(&req.steps)?,
        decode_input(&req.minutes)?,
        decode_input(&req.calories)?,
    );

    let tx_id = Uuid::new_v4();

    // The journal entry is written under the same lock, so its order matches the ledger's.
    // The submission runs on a copy that replaces the live ledger only once both the
    // snapshot and the journal entry are durable.
    let mut current = state.lock_ledger().await;
    let mut next = current.clone();
    let result = next.board.submit(&mut next.fhe, caller, &submission);

    match result {
        Ok(receipt) => {
            let mut journal = db::begin(&state.db).await?;
            db::insert_transaction(
                &mut *journal,
                tx_id,
                TransactionKind::SubmitActivity,
                caller,
                TransactionStatus::Committed,
                &json!({ "submission_count": receipt.submission_count }),
            )
            .await?;

            state.persist(&next).await?;
            if let Err(e) = journal.commit().await {
                warn!(%tx_id, error = %e, "journal commit failed, restoring previous snapshot");
                state.persist(&current).await?;
                return Err(ApiError::Internal);
            }
            *current = next;

            Ok(Json(SubmitActivityResponse {
                tx_id,
                user: receipt.user,
                submission_count: receipt.submission_count,
            }))
        }
        Err(e) => {
            warn!(%caller, %tx_id, error = %e, "activity rejected");
            db::insert_transaction(
                &state.db,
                tx_id,
                TransactionKind::SubmitActivity,
                caller,
                TransactionStatus::Rejected,
                &json!({ "reason": e.to_string() }),
            )
            .await?;

            Err(e.into())
        }
    }
}

async fn get_global_stats(State(state): State<AppState>, Caller(caller): Caller) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state
        .transact(|l| Ok(l.board.global_stats(&mut l.fhe, caller)))
        .await?;
    Ok(Json(stats.into()))
}

async fn get_user_stats(State(state): State<AppState>, Path(address): Path<String>) -> Result<Json<UserStatsResponse>, ApiError> {
    let user = parse_address(&address)?;
    let stats = state
        .transact(|l| Ok(l.board.user_stats(&mut l.fhe, user)))
        .await?;

    Ok(Json(UserStatsResponse {
        user,
        steps: stats.steps,
        minutes: stats.minutes,
        calories: stats.calories,
        submission_count: stats.submission_count,
    }))
}

async fn get_user_latest(State(state): State<AppState>, Path(address): Path<String>) -> Result<Json<StatsResponse>, ApiError> {
    let user = parse_address(&address)?;
    let latest = state
        .transact(|l| Ok(l.board.user_latest(&mut l.fhe, user)))
        .await?;
    Ok(Json(latest.into()))
}

async fn get_user_badges(State(state): State<AppState>, Path(address): Path<String>) -> Result<Json<BadgesResponse>, ApiError> {
    let user = parse_address(&address)?;
    let handles = state
        .transact(|l| l.board.user_badges(&mut l.fhe, user))
        .await?;
    Ok(Json(BadgesResponse::new(user, handles)))
}

async fn get_buckets(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(metric): Path<String>,
) -> Result<Json<BucketsResponse>, ApiError> {
    let metric: Metric = metric.parse()?;
    let counters = state
        .transact(|l| Ok(l.board.buckets(&mut l.fhe, caller, metric)))
        .await?;

    Ok(Json(BucketsResponse {
        metric,
        lower_bounds: *bucket_boundaries(metric),
        counters,
    }))
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<ListTransactionsParams>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(50).min(500);
    let caller = params.caller.as_deref().map(parse_address).transpose()?;

    let total = db::count_transactions(&state.db, caller).await?;
    let transactions = db::list_transactions(&state.db, caller, offset, limit).await?;

    Ok(Json(TransactionListResponse {
        offset,
        limit,
        total,
        transactions,
    }))
}

async fn mock_encrypt(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<MockEncryptRequest>,
) -> Result<Json<MockEncryptResponse>, ApiError> {
    let contract = state.config.contract_address;
    let batch = state
        .transact(|l| l.fhe.encrypt_inputs(contract, caller, &[req.steps, req.minutes, req.calories]))
        .await?;

    let input = |i: usize| batch.input(i).map(encode_input).ok_or(ApiError::Internal);

    info!(%caller, "encrypted activity input");
    Ok(Json(SubmitActivityRequest {
        steps: input(0)?,
        minutes: input(1)?,
        calories: input(2)?,
    }))
}

async fn mock_decrypt(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<MockDecryptRequest>,
) -> Result<Json<MockDecryptResponse>, ApiError> {
    let ledger = state.lock_ledger().await;

    let mut values = Vec::with_capacity(req.handles.len());
    for handle in req.handles {
        let value = ledger.fhe.user_decrypt(handle, caller)?;
        values.push(DecryptedValue { handle, value });
    }

    Ok(Json(MockDecryptResponse { values }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DEFAULT_CONTRACT_ADDRESS};
    use crate::state::Ledger;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use fitness_core::MockCoprocessor;
    use serde_json::Value;
    use std::path::PathBuf;
    use tower::ServiceExt;

    const API_KEY: &str = "test-key";
    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
    const BOB: &str = "0x0000000000000000000000000000000000000b0b";
    const UNSET: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

    async fn app() -> Router {
        app_with_snapshot(None).await
    }

    async fn app_with_snapshot(data_dir: Option<PathBuf>) -> Router {
        let config = Config {
            addr: "127.0.0.1:0".to_string(),
            data_dir: data_dir.clone().unwrap_or_else(|| "unused".into()),
            contract_address: DEFAULT_CONTRACT_ADDRESS.parse().unwrap(),
            api_key: API_KEY.to_string(),
        };
        let snapshot = data_dir.map(|_| config.snapshot_path());
        let ledger = Ledger::deploy(config.contract_address, MockCoprocessor::new(42));
        router(AppState::new(db::memory_db().await, config, ledger, snapshot))
    }

    async fn call(app: &Router, method: Method, uri: &str, caller: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("X-API-KEY", API_KEY);
        if let Some(c) = caller {
            req = req.header(CALLER_HEADER, c);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn encrypt(app: &Router, owner: &str, s: u32, m: u32, c: u32) -> Value {
        let body = json!({ "steps": s, "minutes": m, "calories": c });
        let (status, enc) = call(app, Method::POST, "/api/v1/mock/encrypt", Some(owner), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        enc
    }

    async fn submit(app: &Router, who: &str, s: u32, m: u32, c: u32) -> (StatusCode, Value) {
        let enc = encrypt(app, who, s, m, c).await;
        call(app, Method::POST, "/api/v1/activity", Some(who), Some(enc)).await
    }

    async fn decrypt(app: &Router, who: &str, handles: Vec<Value>) -> (StatusCode, Vec<Value>) {
        let (status, body) = call(app, Method::POST, "/api/v1/mock/decrypt", Some(who), Some(json!({ "handles": handles }))).await;
        let values = body["values"]
            .as_array()
            .map(|vs| vs.iter().map(|v| v["value"].clone()).collect())
            .unwrap_or_default();
        (status, values)
    }

    fn triple(body: &Value) -> Vec<Value> {
        vec![body["steps"].clone(), body["minutes"].clone(), body["calories"].clone()]
    }

    #[tokio::test]
    async fn fresh_deploy_returns_unset_handles() {
        let app = app().await;

        let (status, body) = call(&app, Method::GET, "/api/v1/stats/global", Some(ALICE), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(triple(&body), vec![json!(UNSET); 3]);

        let (_, buckets) = call(&app, Method::GET, "/api/v1/buckets/steps", Some(ALICE), None).await;
        assert_eq!(buckets["counters"], json!([UNSET, UNSET, UNSET, UNSET, UNSET]));
        assert_eq!(buckets["lower_bounds"], json!([0, 2000, 5000, 10000, 20000]));
    }

    #[tokio::test]
    async fn submission_updates_public_totals_and_histograms() {
        let app = app().await;

        let (status, receipt) = submit(&app, ALICE, 6500, 45, 350).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["submission_count"], json!(1));
        assert_eq!(receipt["user"], json!(ALICE));

        // Shared aggregates: anyone may decrypt once they have been read.
        let (_, global) = call(&app, Method::GET, "/api/v1/stats/global", Some(ALICE), None).await;
        let (status, values) = decrypt(&app, BOB, triple(&global)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(values, vec![json!(6500), json!(45), json!(350)]);

        let (_, steps) = call(&app, Method::GET, "/api/v1/buckets/steps", Some(BOB), None).await;
        let counters = steps["counters"].as_array().unwrap().clone();
        let (_, values) = decrypt(&app, BOB, counters).await;
        assert_eq!(values, vec![json!(0), json!(0), json!(1), json!(0), json!(0)]);

        let (_, info) = call(&app, Method::GET, "/api/v1/contract", None, None).await;
        assert_eq!(info["total_submissions"], json!(1));
        assert_eq!(info["users"], json!(1));
    }

    #[tokio::test]
    async fn user_reads_are_private_to_the_owner() {
        let app = app().await;
        submit(&app, ALICE, 3000, 20, 150).await;

        let (_, stats) = call(&app, Method::GET, &format!("/api/v1/users/{ALICE}/stats"), Some(BOB), None).await;
        assert_eq!(stats["submission_count"], json!(1));

        let (status, _) = decrypt(&app, BOB, triple(&stats)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, values) = decrypt(&app, ALICE, triple(&stats)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(values, vec![json!(3000), json!(20), json!(150)]);

        let (_, latest) = call(&app, Method::GET, &format!("/api/v1/users/{ALICE}/latest"), Some(ALICE), None).await;
        let (_, values) = decrypt(&app, ALICE, triple(&latest)).await;
        assert_eq!(values, vec![json!(3000), json!(20), json!(150)]);
    }

    #[tokio::test]
    async fn seven_sessions_unlock_all_badges_in_order() {
        let app = app().await;
        for (s, m, c) in [
            (10_000, 50, 300),
            (10_000, 60, 400),
            (10_000, 100, 500),
            (10_000, 100, 800),
            (20_000, 100, 800),
            (20_000, 100, 800),
            (20_000, 120, 1_200),
        ] {
            let (status, _) = submit(&app, ALICE, s, m, c).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = call(&app, Method::GET, &format!("/api/v1/users/{ALICE}/badges"), Some(ALICE), None).await;
        assert_eq!(status, StatusCode::OK);

        let badges = body["badges"].as_array().unwrap();
        let names: Vec<&str> = badges.iter().map(|b| b["badge"].as_str().unwrap()).collect();
        assert_eq!(names, ["marathoner", "centurion", "calorie_king", "committed", "consistent"]);

        let handles = badges.iter().map(|b| b["handle"].clone()).collect();
        let (_, values) = decrypt(&app, ALICE, handles).await;
        assert_eq!(values, vec![json!(true); 5]);
    }

    #[tokio::test]
    async fn invalid_proof_is_rejected_and_journaled() {
        let app = app().await;

        // Encrypted for Bob, submitted by Alice.
        let enc = encrypt(&app, BOB, 100, 10, 10).await;
        let (status, body) = call(&app, Method::POST, "/api/v1/activity", Some(ALICE), Some(enc)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("proof"));

        let (_, global) = call(&app, Method::GET, "/api/v1/stats/global", Some(ALICE), None).await;
        assert_eq!(triple(&global), vec![json!(UNSET); 3]);

        submit(&app, ALICE, 100, 10, 10).await;

        let (_, journal) = call(&app, Method::GET, &format!("/api/v1/transactions?caller={ALICE}"), None, None).await;
        assert_eq!(journal["total"], json!(2));
        let statuses: Vec<&str> = journal["transactions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, ["rejected", "committed"]);
    }

    #[tokio::test]
    async fn malformed_requests_are_refused() {
        let app = app().await;

        let (status, _) = call(&app, Method::GET, "/api/v1/stats/global", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/api/v1/stats/global", Some("not-an-address"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/api/v1/buckets/heart_rate", Some(ALICE), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/api/v1/users/0x1234/stats", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/mock/encrypt")
            .header(CALLER_HEADER, ALICE)
            .header("content-type", "application/json")
            .body(Body::from(json!({ "steps": 1, "minutes": 1, "calories": 1 }).to_string()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn failed_snapshot_write_rolls_the_submission_back() {
        let dir = std::env::temp_dir().join(format!("fitness-api-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let app = app_with_snapshot(Some(dir.clone())).await;

        let enc = encrypt(&app, ALICE, 6500, 45, 350).await;

        // A directory in the way of the temporary file makes the snapshot write fail.
        let blocker = dir.join("state.json.tmp");
        std::fs::create_dir_all(&blocker).unwrap();
        let (status, _) = call(&app, Method::POST, "/api/v1/activity", Some(ALICE), Some(enc.clone())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (_, info) = call(&app, Method::GET, "/api/v1/contract", None, None).await;
        assert_eq!(info["total_submissions"], json!(0));
        let (_, journal) = call(&app, Method::GET, "/api/v1/transactions", None, None).await;
        assert_eq!(journal["total"], json!(0));

        // Retrying the same submission counts it exactly once.
        std::fs::remove_dir(&blocker).unwrap();
        let (status, receipt) = call(&app, Method::POST, "/api/v1/activity", Some(ALICE), Some(enc)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["submission_count"], json!(1));

        let (_, info) = call(&app, Method::GET, "/api/v1/contract", None, None).await;
        assert_eq!(info["total_submissions"], json!(1));
        let (_, journal) = call(&app, Method::GET, "/api/v1/transactions", None, None).await;
        assert_eq!(journal["total"], json!(1));
        assert!(dir.join("state.json").exists());
    }

    #[tokio::test]
    async fn mock_routes_reject_a_wrong_key_with_a_json_body() {
        let app = app().await;
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/mock/decrypt")
            .header("X-API-KEY", "wrong")
            .header(CALLER_HEADER, ALICE)
            .header("content-type", "application/json")
            .body(Body::from(json!({ "handles": [] }).to_string()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("X-API-KEY"));
    }
}
