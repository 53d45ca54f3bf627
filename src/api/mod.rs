//! HTTP API for registration, evaluation trigger, listing and health

mod error;

use crate::chain::FeeOracle;
use crate::config::ApiConfig;
use crate::engine::{BroadcastEvaluator, CycleOutcome, RecordReport};
use crate::error::{SnoozeError, SnoozeResult};
use crate::events::{EngineEvent, EventBus};
use crate::state::{NewPendingTransaction, PendingStore, PendingTransaction, TransactionStats};
use crate::tx::{TransactionSigner, TransferIntent};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

const NO_PENDING: &str = "No pending signed transactions.";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PendingStore>,
    pub oracle: Arc<dyn FeeOracle>,
    pub evaluator: Arc<BroadcastEvaluator>,
    /// `None` when no wallet key is configured
    pub signer: Option<Arc<dyn TransactionSigner>>,
    pub events: EventBus,
    /// Cancels receipt polling of HTTP-triggered cycles on shutdown
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/tx", get(list_unsent).post(register))
        .route("/tx/all", get(list_all))
        .route("/tx/pending", get(evaluate_now).post(register_intent))
        .route("/tx/:id", get(get_transaction))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server until `shutdown` fires
pub async fn run_server(
    config: ApiConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> SnoozeResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SnoozeError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| SnoozeError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

async fn ping() -> impl IntoResponse {
    Json(MessageResponse {
        message: "Server alive.".to_string(),
    })
}

/// Liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness: store reachable and the fee oracle answering
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await.is_ok();
    let oracle = state.oracle.current_fee().await.is_ok();
    let ready = database && oracle;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            oracle,
        }),
    )
}

async fn get_stats(State(state): State<AppState>) -> SnoozeResult<Json<TransactionStats>> {
    Ok(Json(state.store.stats().await?))
}

/// Store a client-signed payload
async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> SnoozeResult<(StatusCode, Json<TransactionView>)> {
    let tx = store_payload(
        &state,
        &request.signed_tx_hex,
        request.gwei_threshold,
        "signed",
    )
    .await?;
    Ok((StatusCode::CREATED, Json(TransactionView::from(&tx))))
}

/// Sign a transfer intent with the service wallet and store it
async fn register_intent(
    State(state): State<AppState>,
    Json(intent): Json<TransferIntent>,
) -> SnoozeResult<(StatusCode, Json<TransactionView>)> {
    let signer = state
        .signer
        .as_ref()
        .ok_or_else(|| SnoozeError::Wallet("no signing wallet configured".to_string()))?;

    let raw = signer.sign_intent(&intent).await?;
    info!("Signed transfer intent to {}", intent.beneficiary);

    let tx = store_payload(&state, &raw, intent.fee_threshold, "intent").await?;
    Ok((StatusCode::CREATED, Json(TransactionView::from(&tx))))
}

async fn store_payload(
    state: &AppState,
    raw_payload: &str,
    fee_threshold: u64,
    source: &str,
) -> SnoozeResult<PendingTransaction> {
    let new = NewPendingTransaction::new(raw_payload, fee_threshold)?;
    let tx = state.store.create(new).await?;

    info!(
        "Registered transaction {} ({}) with threshold {}",
        tx.id,
        tx.short_hash(),
        tx.fee_threshold
    );
    crate::metrics::record_registered(source);
    state.events.publish(EngineEvent::TransactionRegistered {
        id: tx.id,
        fee_threshold: tx.fee_threshold,
    });

    Ok(tx)
}

async fn list_unsent(
    State(state): State<AppState>,
) -> SnoozeResult<Json<DataResponse<TransactionView>>> {
    let unsent = state.store.list_unsent().await?;
    DataResponse::non_empty(unsent)
}

async fn list_all(
    State(state): State<AppState>,
) -> SnoozeResult<Json<DataResponse<TransactionView>>> {
    let all = state.store.list_all().await?;
    DataResponse::non_empty(all)
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> SnoozeResult<Json<TransactionView>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| SnoozeError::InvalidRequest(format!("Invalid transaction id: {}", id)))?;
    let tx = state.store.get(id).await?;
    Ok(Json(TransactionView::from(&tx)))
}

/// Run one evaluation cycle now
async fn evaluate_now(State(state): State<AppState>) -> SnoozeResult<Json<CycleResponse>> {
    match state.evaluator.run_detached(state.shutdown.clone()).await? {
        CycleOutcome::NoPendingWork => Err(SnoozeError::NotFound(NO_PENDING.to_string())),
        CycleOutcome::Evaluated(report) => Ok(Json(CycleResponse {
            fee: report.fee,
            data: report.records,
        })),
    }
}

// Request and response types

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(alias = "raw_payload")]
    signed_tx_hex: String,
    #[serde(alias = "fee_threshold")]
    gwei_threshold: u64,
}

/// Wire form of a stored record
#[derive(Debug, Serialize)]
struct TransactionView {
    id: Uuid,
    signed_tx_hex: String,
    payload_hash: String,
    gwei_threshold: u64,
    status: String,
    is_sent: bool,
    is_confirmed_success: bool,
    tx_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&PendingTransaction> for TransactionView {
    fn from(tx: &PendingTransaction) -> Self {
        Self {
            id: tx.id,
            signed_tx_hex: tx.raw_payload.clone(),
            payload_hash: tx.payload_hash.clone(),
            gwei_threshold: tx.fee_threshold,
            status: tx.status.to_string(),
            is_sent: tx.is_sent(),
            is_confirmed_success: tx.is_confirmed_success(),
            tx_hash: tx.tx_hash.clone(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct DataResponse<T> {
    data: Vec<T>,
}

impl DataResponse<TransactionView> {
    /// An empty listing is reported as not found
    fn non_empty(records: Vec<PendingTransaction>) -> SnoozeResult<Json<Self>> {
        if records.is_empty() {
            return Err(SnoozeError::NotFound(NO_PENDING.to_string()));
        }
        Ok(Json(Self {
            data: records.iter().map(TransactionView::from).collect(),
        }))
    }
}

#[derive(Debug, Serialize)]
struct CycleResponse {
    fee: u64,
    data: Vec<RecordReport>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    oracle: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        MockFeeOracle, MockTransactionSubmitter, Receipt, SubmissionHandle, TransactionSubmitter,
    };
    use crate::state::InMemoryStore;
    use crate::tx::{MockTransactionSigner, RetryPolicy, SubmissionResolver};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        store: Arc<InMemoryStore>,
        state: AppState,
    }

    /// `fee: None` makes the oracle fail
    fn harness(
        fee: Option<u64>,
        submitter: Arc<dyn TransactionSubmitter>,
        signer: Option<MockTransactionSigner>,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let mut oracle = MockFeeOracle::new();
        oracle.expect_current_fee().returning(move || {
            fee.ok_or_else(|| SnoozeError::OracleUnavailable {
                chain_id: 1,
                message: "connection refused".to_string(),
            })
        });
        let oracle: Arc<dyn FeeOracle> = Arc::new(oracle);
        let events = EventBus::new();

        let resolver = SubmissionResolver::new(
            submitter,
            store.clone(),
            events.clone(),
            RetryPolicy::fixed(5, Duration::from_secs(5)),
        );
        let evaluator = Arc::new(BroadcastEvaluator::new(
            store.clone(),
            oracle.clone(),
            resolver,
            1,
            1,
        ));

        let state = AppState {
            store: store.clone(),
            oracle,
            evaluator,
            signer: signer.map(|s| Arc::new(s) as Arc<dyn TransactionSigner>),
            events,
            shutdown: CancellationToken::new(),
        };
        Harness { store, state }
    }

    fn idle_harness() -> Harness {
        let mut submitter = MockTransactionSubmitter::new();
        submitter.expect_submit().never();
        harness(Some(100), Arc::new(submitter), None)
    }

    async fn call(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_ping() {
        let h = idle_harness();
        let (status, body) = call(&h.state, Method::GET, "/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "Server alive."}));
    }

    #[tokio::test]
    async fn test_register_then_duplicate() {
        let h = idle_harness();
        let mut events = h.state.events.subscribe();

        let (status, body) = call(
            &h.state,
            Method::POST,
            "/tx",
            Some(json!({"signed_tx_hex": "0xaa", "gwei_threshold": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["signed_tx_hex"], "0xaa");
        assert_eq!(body["gwei_threshold"], 10);
        assert_eq!(body["is_sent"], false);
        assert_eq!(body["is_confirmed_success"], false);
        assert_eq!(events.try_recv().unwrap().name(), "transaction_registered");

        // same payload, different spelling and alias field names
        let (status, body) = call(
            &h.state,
            Method::POST,
            "/tx",
            Some(json!({"raw_payload": "AA", "fee_threshold": 99})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let h = idle_harness();
        let (status, _) = call(
            &h.state,
            Method::POST,
            "/tx",
            Some(json!({"signed_tx_hex": "0xzz", "gwei_threshold": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &h.state,
            Method::POST,
            "/tx",
            Some(json!({"signed_tx_hex": "0xaa", "gwei_threshold": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_listings_are_not_found() {
        let h = idle_harness();
        for uri in ["/tx", "/tx/all"] {
            let (status, body) = call(&h.state, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], NO_PENDING);
        }
    }

    #[tokio::test]
    async fn test_listings_and_lookup() {
        let h = idle_harness();
        let tx = h
            .store
            .create(NewPendingTransaction::new("0xaa", 10).unwrap())
            .await
            .unwrap();

        let (status, body) = call(&h.state, Method::GET, "/tx", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) = call(&h.state, Method::GET, &format!("/tx/{}", tx.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], tx.id.to_string());

        let (status, _) = call(
            &h.state,
            Method::GET,
            &format!("/tx/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&h.state, Method::GET, "/tx/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_evaluate_without_pending_work() {
        let h = idle_harness();
        let (status, _) = call(&h.state, Method::GET, "/tx/pending", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_evaluate_reports_decisions() {
        let h = idle_harness();
        let tx = h
            .store
            .create(NewPendingTransaction::new("0xaa", 10).unwrap())
            .await
            .unwrap();

        let (status, body) = call(&h.state, Method::GET, "/tx/pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fee"], 100);
        assert_eq!(body["data"][0]["id"], tx.id.to_string());
        assert_eq!(body["data"][0]["decision"], "not_yet_eligible");
        assert_eq!(body["data"][0]["is_sent"], false);
    }

    #[tokio::test]
    async fn test_evaluate_with_oracle_down() {
        let mut submitter = MockTransactionSubmitter::new();
        submitter.expect_submit().never();
        let h = harness(None, Arc::new(submitter), None);
        h.store
            .create(NewPendingTransaction::new("0xaa", 10).unwrap())
            .await
            .unwrap();

        let (status, _) = call(&h.state, Method::GET, "/tx/pending", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(&h.state, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["database"], true);
        assert_eq!(body["oracle"], false);
    }

    /// Node that accepts the broadcast, then answers slowly
    struct SlowNode {
        accepted: AtomicUsize,
    }

    #[async_trait]
    impl TransactionSubmitter for SlowNode {
        async fn submit(&self, _raw_payload: &str) -> SnoozeResult<SubmissionHandle> {
            self.accepted.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(SubmissionHandle("0xslow".to_string()))
        }

        async fn get_receipt(&self, handle: &SubmissionHandle) -> SnoozeResult<Option<Receipt>> {
            Ok(Some(Receipt {
                tx_hash: handle.to_string(),
                status: Some(1),
                block_number: Some(7),
                gas_used: Some(21_000),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_still_records_broadcast() {
        let node = Arc::new(SlowNode {
            accepted: AtomicUsize::new(0),
        });
        let h = harness(Some(100), node.clone(), None);
        let tx = h
            .store
            .create(NewPendingTransaction::new("0xaa", 100).unwrap())
            .await
            .unwrap();

        // client gives up while the node is still answering
        let request = Request::builder()
            .uri("/tx/pending")
            .body(Body::empty())
            .unwrap();
        let dropped =
            tokio::time::timeout(Duration::from_secs(1), router(h.state.clone()).oneshot(request))
                .await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        h.state.evaluator.drain().await;

        assert_eq!(node.accepted.load(Ordering::SeqCst), 1);
        let stored = h.store.get(tx.id).await.unwrap();
        assert!(stored.is_sent());
        assert!(stored.is_confirmed_success());
        assert_eq!(stored.tx_hash.as_deref(), Some("0xslow"));

        // later cycles have nothing left to broadcast
        let (status, _) = call(&h.state, Method::GET, "/tx/pending", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(node.accepted.load(Ordering::SeqCst), 1);
    }

    fn intent_body() -> Value {
        json!({
            "recipient": "0x00000000000000000000000000000000000000aa",
            "beneficiary": "0x00000000000000000000000000000000000000bb",
            "gwei_threshold": 30,
            "transfer_amount": 0.1
        })
    }

    #[tokio::test]
    async fn test_intent_without_wallet() {
        let h = idle_harness();
        let (status, _) = call(&h.state, Method::POST, "/tx/pending", Some(intent_body())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_intent_is_signed_and_stored() {
        let mut signer = MockTransactionSigner::new();
        signer
            .expect_sign_intent()
            .withf(|intent| intent.fee_threshold == 30)
            .times(1)
            .returning(|_| Ok("0xf86b01".to_string()));
        let mut submitter = MockTransactionSubmitter::new();
        submitter.expect_submit().never();
        let h = harness(Some(100), Arc::new(submitter), Some(signer));

        let (status, body) = call(&h.state, Method::POST, "/tx/pending", Some(intent_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["signed_tx_hex"], "0xf86b01");
        assert_eq!(body["gwei_threshold"], 30);

        let stats = h.store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let h = idle_harness();
        let (status, body) = call(&h.state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&h.state, Method::GET, "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], 0);
    }
}
