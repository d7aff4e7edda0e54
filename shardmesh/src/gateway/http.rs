//! Raw HTTP surface for the Gateway (spec §6).
//!
//! Grounded on the teacher's `stats/http_server.rs`: a bare `hyper` 1.x
//! `TcpListener` accept loop, one task per connection, `service_fn` doing
//! the routing by hand rather than pulling in a router crate the teacher
//! doesn't use. Two listeners run side by side, matching `General`'s
//! `listen_port` (SQL + admin) and `metrics_port` (`/health`, `/metrics`).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::{Error, ErrorEnvelope, Result};
use crate::policy::{RoutingPolicy, TablePolicy};

use super::admin::{
    Command, DriveSplit, ListSplits, PlanSplit, PlanSplitRequest, SplitAction, UpdateRoutingPolicy, UpdateTablePolicy,
};
use super::{Gateway, SqlBatchRequest, SqlRequest, TxnRequest};

type Body = Full<Bytes>;

/// Serves `/sql`, `/sql/batch`, `/sql/txn`, and `/admin/*`.
pub async fn serve(gateway: Arc<Gateway>, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gateway HTTP listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| route(gateway.clone(), req));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(%err, "gateway connection error");
            }
        });
    }
}

/// Serves `/health` and `/metrics`, isolated from the request path so a
/// saturated SQL listener never starves liveness checks.
pub async fn serve_metrics(gateway: Arc<Gateway>, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gateway metrics listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| route_metrics(gateway.clone(), req));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(%err, "gateway metrics connection error");
            }
        });
    }
}

fn json_response(status: StatusCode, value: &impl Serialize) -> Response<Body> {
    let bytes = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{}"))))
}

fn ok_response(value: &impl Serialize) -> Response<Body> {
    json_response(StatusCode::OK, value)
}

fn error_response(err: Error) -> Response<Body> {
    let status = match err.code() {
        crate::error::ErrorCode::InvalidQuery
        | crate::error::ErrorCode::SqlSyntaxError
        | crate::error::ErrorCode::InvalidPolicy
        | crate::error::ErrorCode::InvalidPhase => StatusCode::BAD_REQUEST,
        crate::error::ErrorCode::AuthInvalidToken | crate::error::ErrorCode::AuthTokenExpired => StatusCode::UNAUTHORIZED,
        crate::error::ErrorCode::TenantAccessDenied => StatusCode::FORBIDDEN,
        crate::error::ErrorCode::TransactionNotFound | crate::error::ErrorCode::SplitNotFound => StatusCode::NOT_FOUND,
        crate::error::ErrorCode::ConflictUnique => StatusCode::CONFLICT,
        crate::error::ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        crate::error::ErrorCode::CircuitOpen | crate::error::ErrorCode::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        crate::error::ErrorCode::ShardCapacity => StatusCode::INSUFFICIENT_STORAGE,
        crate::error::ErrorCode::Retryable | crate::error::ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_response(status, &ErrorEnvelope::from(&err))
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes> {
    req.into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| Error::InvalidQuery(format!("reading request body: {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::InvalidQuery(format!("invalid JSON body: {e}")))
}

fn bearer_token(req: &Request<Incoming>) -> Option<String> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

fn query_param<'a>(req: &'a Request<Incoming>, name: &str) -> Option<&'a str> {
    req.uri().query().and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    })
}

async fn route(gateway: Arc<Gateway>, req: Request<Incoming>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let result = dispatch(&gateway, &method, &segments, req).await;
    Ok(match result {
        Ok(response) => response,
        Err(err) => {
            error!(code = ?err.code(), "request failed");
            error_response(err)
        }
    })
}

async fn dispatch(
    gateway: &Arc<Gateway>,
    method: &Method,
    segments: &[&str],
    req: Request<Incoming>,
) -> Result<Response<Body>> {
    let token = bearer_token(&req);

    match (method, segments) {
        (&Method::POST, ["sql"]) => {
            let auth = gateway.authenticate(token.as_deref())?;
            let session_id = req
                .headers()
                .get("x-session-id")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());
            let body = read_body(req).await?;
            let sql_req: SqlRequest = parse_json(&body)?;
            let response = gateway.execute_sql(&auth, sql_req, session_id.as_deref()).await?;
            Ok(ok_response(&response))
        }
        (&Method::POST, ["sql", "batch"]) => {
            let auth = gateway.authenticate(token.as_deref())?;
            let body = read_body(req).await?;
            let batch_req: SqlBatchRequest = parse_json(&body)?;
            let response = gateway.execute_batch(&auth, batch_req).await?;
            Ok(ok_response(&response))
        }
        (&Method::POST, ["sql", "txn"]) => {
            let auth = gateway.authenticate(token.as_deref())?;
            let body = read_body(req).await?;
            let txn_req: TxnRequest = parse_json(&body)?;
            let response = gateway.execute_txn(&auth, txn_req).await?;
            Ok(ok_response(&response))
        }
        (&Method::POST, ["admin", "shards", "split"]) => {
            gateway.authenticate(token.as_deref())?;
            let body = read_body(req).await?;
            let request: PlanSplitRequest = parse_json(&body)?;
            let cmd = PlanSplit { orchestrator: gateway.orchestrator.clone(), request };
            Ok(ok_response(&cmd.execute().await?))
        }
        (&Method::POST, ["admin", "shards", "split", plan_id, action]) => {
            gateway.authenticate(token.as_deref())?;
            let action = SplitAction::parse(action)?;
            let cmd = DriveSplit {
                orchestrator: gateway.orchestrator.clone(),
                plan_id: plan_id.to_string(),
                action,
                backfill_page_size: gateway.split_backfill_page_size,
                tail_replay_limit: gateway.split_tail_replay_limit,
            };
            Ok(ok_response(&cmd.execute().await?))
        }
        (&Method::GET, ["admin", "shards", "splits"]) => {
            gateway.authenticate(token.as_deref())?;
            let cmd = ListSplits { orchestrator: gateway.orchestrator.clone() };
            Ok(ok_response(&cmd.execute().await?))
        }
        (&Method::POST, ["admin", "policy", "routing"]) => {
            gateway.authenticate(token.as_deref())?;
            let body = read_body(req).await?;
            #[derive(serde::Deserialize)]
            struct Body {
                policy: RoutingPolicy,
                #[serde(default)]
                description: Option<String>,
            }
            let body: Body = parse_json(&body)?;
            let cmd = UpdateRoutingPolicy {
                store: gateway.routing.clone(),
                policy: body.policy,
                description: body.description,
            };
            Ok(ok_response(&cmd.execute().await?))
        }
        (&Method::GET, ["admin", "policy", "routing", "versions"]) => {
            gateway.authenticate(token.as_deref())?;
            Ok(ok_response(&gateway.routing.list_versions()))
        }
        (&Method::GET, ["admin", "policy", "routing", "diff"]) => {
            gateway.authenticate(token.as_deref())?;
            let from_v: u64 = query_param(&req, "from")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::InvalidQuery("missing or invalid `from` query param".into()))?;
            let to_v: u64 = query_param(&req, "to")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::InvalidQuery("missing or invalid `to` query param".into()))?;
            Ok(ok_response(&gateway.routing.get_policy_diff(from_v, to_v)?))
        }
        (&Method::POST, ["admin", "policy", "table", table]) => {
            gateway.authenticate(token.as_deref())?;
            let body = read_body(req).await?;
            let policy: TablePolicy = parse_json(&body)?;
            let cmd = UpdateTablePolicy { store: gateway.tables.clone(), table: table.to_string(), policy };
            cmd.execute().await?;
            Ok(ok_response(&serde_json::json!({"updated": true})))
        }
        _ => Err(Error::InvalidQuery(format!("no route for {method} {}", segments.join("/")))),
    }
}

async fn route_metrics(gateway: Arc<Gateway>, req: Request<Incoming>) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path();
    Ok(match (req.method(), path) {
        (&Method::GET, "/health") => {
            let shards: Vec<_> = gateway
                .storage
                .known_shard_ids()
                .iter()
                .filter_map(|id| gateway.storage.get_or_create(id).ok())
                .map(|engine| engine.health())
                .collect();
            ok_response(&serde_json::json!({"ok": true, "shards": shards}))
        }
        (&Method::GET, "/metrics") => {
            let shards: Vec<_> = gateway
                .storage
                .known_shard_ids()
                .iter()
                .filter_map(|id| gateway.storage.get_or_create(id).ok())
                .map(|engine| engine.metrics())
                .collect();
            ok_response(&serde_json::json!({"shards": shards}))
        }
        (method, path) => error_response(Error::InvalidQuery(format!("no route for {method} {path}"))),
    })
}
