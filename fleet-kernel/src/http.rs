/*!
API REST FLEET - Serveur HTTP du point de contrôle

RÔLE :
Surface unique entre la couche de présentation et le moteur de dispatch.

ROUTES :
- GET  /health                 (libre)
- GET  /system/health          compteurs et mémoire
- GET  /config/dispatch        politique courante
- POST /config/dispatch        mise à jour partielle, validée puis persistée
- GET  /targets | PUT /targets roster
- POST /batch                  lot agrégé (JSON) ou en flux (NDJSON)
- POST /batch/{id}/cancel      annulation d'un lot en cours
- POST /remote_api/save        tableau de résultats en CSV (dossier des journaux)
- GET  /reachability           état en ligne / hors ligne recalculé à la lecture

SÉCURITÉ :
Header x-api-key obligatoire sur toutes les routes sauf /health.
*/

use crate::batch::{self, BatchError, BatchRequest};
use crate::config;
use crate::csv_export;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_dispatch::{DeliveryMode, DispatchPolicy, ProgressReceiver, ReachabilityView, Target};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use time::OffsetDateTime;
use tokio_util::sync::DropGuard;
use tracing::{error, warn};
use uuid::Uuid;

pub const BATCH_ID_HEADER: &str = "x-batch-id";

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("FLEET_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("SECURITY: FLEET_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/config/dispatch", get(get_dispatch_config).post(update_dispatch_config))
        .route("/targets", get(list_targets).put(replace_targets))
        .route("/batch", post(run_batch))
        .route("/batch/{id}/cancel", post(cancel_batch))
        .route("/remote_api/save", post(save_remote_api_table))
        .route("/reachability", get(get_reachability))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

fn error_body(code: StatusCode, msg: impl ToString) -> Response {
    (code, Json(json!({ "error": msg.to_string() }))).into_response()
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        let code = if self.is_client_error() { StatusCode::BAD_REQUEST } else { StatusCode::INTERNAL_SERVER_ERROR };
        if code.is_server_error() {
            error!("[batch] {self}");
        }
        error_body(code, self)
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<crate::stats::KernelHealth> {
    let roster_size = app.roster.len().await;
    Json(app.stats.get_health(roster_size, app.reachability.len(), app.batches.active()))
}

// GET /config/dispatch
async fn get_dispatch_config(State(app): State<AppState>) -> Json<DispatchPolicy> {
    Json(app.dispatch_policy())
}

// POST /config/dispatch (champs absents = valeur courante)
async fn update_dispatch_config(State(app): State<AppState>, Json(patch): Json<Value>) -> Response {
    let Value::Object(patch) = patch else {
        return error_body(StatusCode::BAD_REQUEST, "expected a JSON object");
    };
    let mut merged = match serde_json::to_value(app.dispatch_policy()) {
        Ok(Value::Object(map)) => map,
        _ => return error_body(StatusCode::INTERNAL_SERVER_ERROR, "cannot serialize current policy"),
    };
    merged.extend(patch);
    let policy: DispatchPolicy = match serde_json::from_value(Value::Object(merged)) {
        Ok(p) => p,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e),
    };
    if let Err(e) = config::validate_dispatch(&policy) {
        return error_body(StatusCode::BAD_REQUEST, e);
    }

    let snapshot = {
        let mut cfg = app.cfg.lock();
        cfg.dispatch = policy.clone();
        cfg.clone()
    };
    if let Err(e) = config::save_config(&app.config_path, &snapshot).await {
        error!("[kernel] failed to persist config: {e}");
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    Json(policy).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
struct TargetsBody {
    targets: Vec<Target>,
}

// GET /targets
async fn list_targets(State(app): State<AppState>) -> Json<TargetsBody> {
    Json(TargetsBody { targets: app.roster.list().await })
}

// PUT /targets (remplacement complet)
async fn replace_targets(State(app): State<AppState>, Json(body): Json<TargetsBody>) -> Response {
    match app.roster.replace(body.targets).await {
        Ok(count) => Json(json!({ "ok": true, "count": count })).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// POST /batch
async fn run_batch(State(app): State<AppState>, Json(req): Json<BatchRequest>) -> Result<Response, BatchError> {
    let prepared = batch::prepare(&app, req).await?;
    let id = prepared.ticket.id;
    let batch_id = (HeaderName::from_static(BATCH_ID_HEADER), id.to_string());

    match prepared.mode {
        DeliveryMode::Aggregate => {
            // client parti => lot annulé
            let guard = prepared.ticket.cancel.clone().drop_guard();
            let result = prepared.run(&app).await;
            guard.disarm();
            Ok(([batch_id], Json(result?)).into_response())
        }
        DeliveryMode::Streaming => {
            let guard = prepared.ticket.cancel.clone().drop_guard();
            let events = prepared.spawn_streaming(app.clone());
            let headers = [(header::CONTENT_TYPE, "application/x-ndjson".to_string()), batch_id];
            Ok((headers, Body::from_stream(ndjson_lines(events, guard))).into_response())
        }
    }
}

/// Une ligne NDJSON par événement; la fin du flux désarme l'annulation
fn ndjson_lines(events: ProgressReceiver, guard: DropGuard) -> impl Stream<Item = Result<String, Infallible>> {
    stream::unfold((events, Some(guard)), |(mut events, mut guard)| async move {
        match events.recv().await {
            Some(event) => {
                let line = event.to_ndjson().unwrap_or_else(|e| {
                    error!("[batch] cannot encode progress event: {e}");
                    String::new()
                });
                Some((Ok(line), (events, guard)))
            }
            None => {
                if let Some(guard) = guard.take() {
                    guard.disarm();
                }
                None
            }
        }
    })
}

// POST /batch/{id}/cancel
async fn cancel_batch(State(app): State<AppState>, Path(id): Path<Uuid>) -> Response {
    if app.batches.cancel(&id) {
        (StatusCode::ACCEPTED, Json(json!({ "ok": true, "batch_id": id }))).into_response()
    } else {
        error_body(StatusCode::NOT_FOUND, format!("no running batch {id}"))
    }
}

#[derive(Debug, Deserialize)]
struct SaveTableBody {
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
    #[serde(default)]
    filename: Option<String>,
}

// POST /remote_api/save
async fn save_remote_api_table(State(app): State<AppState>, Json(body): Json<SaveTableBody>) -> Response {
    let logs_dir = app.cfg.lock().logs_dir.clone();
    match csv_export::save(&logs_dir, body.filename.as_deref(), &body.headers, &body.rows).await {
        Ok(saved) => Json(json!({ "ok": true, "saved": saved })).into_response(),
        Err(e) if e.is_client_error() => error_body(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            error!("[kernel] {e}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

// GET /reachability
async fn get_reachability(State(app): State<AppState>) -> Json<BTreeMap<String, ReachabilityView>> {
    Json(app.reachability.snapshot(OffsetDateTime::now_utc()))
}
