use std::sync::Arc;
use std::time::Duration;

use greenwave_authority::{AuthorityError, AuthorityStore, ClaimOutcome, Clock, EventBus};
use greenwave_corridor::{DetectError, SignalRegistry};
use greenwave_ir::types::{LockdownId, Position, SignalId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::auth::{AuthError, Authenticator, Principal};
use crate::config::ServiceConfig;
use crate::coordinator::{PreemptionCoordinator, SignalOutcome, SignalRequest};
use crate::lockdown::{LockdownError, LockdownManager};
use crate::override_desk::OverrideDesk;
use crate::persist::StateSnapshot;
use crate::route::RouteProvider;
use crate::scheduler::ExpiryScheduler;

pub const INVALID_PARAMS: i32 = -32602;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const UNAUTHENTICATED: i32 = -32001;
pub const UNAUTHORIZED: i32 = -32003;
pub const NOT_FOUND: i32 = -32004;
pub const NOT_HOLDER: i32 = -32005;
pub const ROUTE_UNAVAILABLE: i32 = -32010;
pub const ROUTE_INVALID: i32 = -32011;

/// Everything a request handler can reach. Owned by the process entry
/// point and passed down by reference.
pub struct ServiceState {
    pub config: ServiceConfig,
    pub store: Arc<AuthorityStore>,
    pub coordinator: PreemptionCoordinator,
    pub lockdowns: Arc<LockdownManager>,
    pub overrides: OverrideDesk,
    auth: Arc<dyn Authenticator>,
}

impl ServiceState {
    pub fn new(
        config: ServiceConfig,
        registry: Arc<SignalRegistry>,
        clock: Arc<dyn Clock>,
        routes: Arc<dyn RouteProvider>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let store = Arc::new(AuthorityStore::new(registry, clock, EventBus::new()));
        let coordinator = PreemptionCoordinator::new(store.clone(), routes.clone(), &config);
        let lockdowns = Arc::new(LockdownManager::new(
            store.clone(),
            routes,
            config.detection.lockdown_threshold_meters,
        ));
        Self {
            overrides: OverrideDesk::new(store.clone()),
            store,
            coordinator,
            lockdowns,
            auth,
            config,
        }
    }

    pub fn bus(&self) -> &EventBus {
        self.store.bus()
    }

    pub fn scheduler(&self) -> ExpiryScheduler {
        ExpiryScheduler::new(
            self.store.clone(),
            self.lockdowns.clone(),
            self.config.scheduler.tick(),
        )
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(&self.store, &self.lockdowns)
    }

    fn authenticate(&self, token: Option<&str>) -> Result<Principal, RpcError> {
        self.auth.authenticate(token).map_err(|e| {
            warn!(error = %e, "request rejected");
            RpcError::from(e)
        })
    }
}

#[derive(Debug)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<AuthError> for RpcError {
    fn from(e: AuthError) -> Self {
        let code = match e {
            AuthError::Unauthenticated => UNAUTHENTICATED,
            AuthError::Unauthorized(_) => UNAUTHORIZED,
        };
        Self::new(code, e.to_string())
    }
}

impl From<AuthorityError> for RpcError {
    fn from(e: AuthorityError) -> Self {
        let code = match e {
            AuthorityError::SignalNotFound { .. } => NOT_FOUND,
            AuthorityError::NotHolder { .. } => NOT_HOLDER,
        };
        Self::new(code, e.to_string())
    }
}

impl From<DetectError> for RpcError {
    fn from(e: DetectError) -> Self {
        Self::new(ROUTE_INVALID, e.to_string())
    }
}

impl From<LockdownError> for RpcError {
    fn from(e: LockdownError) -> Self {
        let code = match e {
            LockdownError::RouteUnavailable(_) => ROUTE_UNAVAILABLE,
            LockdownError::RouteInvalid(_) => ROUTE_INVALID,
            LockdownError::NotFound(_) => NOT_FOUND,
            LockdownError::InvalidDuration => INVALID_PARAMS,
        };
        Self::new(code, e.to_string())
    }
}

type RpcResult = Result<Value, RpcError>;

/// Handle a single JSON-RPC request and return a JSON-RPC response.
pub async fn handle_request(req: &Value, state: &ServiceState) -> Value {
    let id = req.get("id").cloned().unwrap_or(Value::Null);
    let method = req.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = match req.get("params") {
        None | Some(Value::Null) => json!({}),
        Some(params) => params.clone(),
    };

    let result = match method {
        "initialize" => Ok(handle_initialize()),
        "corridor.plan" => corridor_plan(params, state).await,
        "corridor.claim" => corridor_claim(params, state),
        "corridor.release" => corridor_release(params, state),
        "lockdown.create" => lockdown_create(params, state).await,
        "lockdown.release" => lockdown_release(params, state),
        "lockdown.list" => Ok(json!({ "lockdowns": state.lockdowns.list_active() })),
        "signal.list" => Ok(json!({ "signals": state.store.list_signals() })),
        "signal.get" => signal_get(params, state),
        "signal.override" => signal_override(params, state),
        "signal.clear_override" => signal_clear_override(params, state),
        "audit.tail" => audit_tail(params, state),
        _ => Err(RpcError::new(METHOD_NOT_FOUND, "Method not found")),
    };

    match result {
        Ok(value) => json_rpc_result(id, value),
        Err(e) => json_rpc_error(id, e.code, &e.message),
    }
}

fn handle_initialize() -> Value {
    json!({
        "serverInfo": {
            "name": "greenwave",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "methods": [
            "corridor.plan", "corridor.claim", "corridor.release",
            "lockdown.create", "lockdown.release", "lockdown.list",
            "signal.list", "signal.get", "signal.override", "signal.clear_override",
            "audit.tail", "feed.subscribe", "feed.unsubscribe",
        ]
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanParams {
    token: Option<String>,
    origin: Position,
    destination: Position,
}

async fn corridor_plan(params: Value, state: &ServiceState) -> RpcResult {
    let p: PlanParams = parse_params(params)?;
    state.authenticate(p.token.as_deref())?;
    let plan = state.coordinator.plan(p.origin, p.destination).await?;
    Ok(json!(plan))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimParams {
    token: Option<String>,
    vehicle_id: String,
    signals: Vec<SignalRequest>,
    #[serde(default)]
    priority: Option<u32>,
}

fn corridor_claim(params: Value, state: &ServiceState) -> RpcResult {
    let p: ClaimParams = parse_params(params)?;
    state
        .authenticate(p.token.as_deref())?
        .require_vehicle(&p.vehicle_id)?;

    let outcomes = state
        .coordinator
        .claim_signals(&p.vehicle_id, &p.signals, p.priority);
    Ok(claim_report(&outcomes))
}

/// Split outcomes into the broadcast endpoint's `{accepted, rejected}`.
fn claim_report(outcomes: &[SignalOutcome]) -> Value {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for o in outcomes {
        match &o.result {
            Ok(outcome @ (ClaimOutcome::Accepted | ClaimOutcome::Displaced { .. })) => {
                accepted.push(json!({
                    "signalId": o.signal_id,
                    "eta": o.eta_seconds,
                    "result": outcome,
                }));
            }
            Ok(ClaimOutcome::Rejected { current }) => rejected.push(json!({
                "signalId": o.signal_id,
                "reason": "outranked",
                "currentHolder": current.holder_id,
            })),
            Err(e) => rejected.push(json!({
                "signalId": o.signal_id,
                "reason": "not_found",
                "message": e.to_string(),
            })),
        }
    }
    json!({ "accepted": accepted, "rejected": rejected })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseParams {
    token: Option<String>,
    vehicle_id: String,
    #[serde(default)]
    signals: Vec<SignalId>,
}

fn corridor_release(params: Value, state: &ServiceState) -> RpcResult {
    let p: ReleaseParams = parse_params(params)?;
    state
        .authenticate(p.token.as_deref())?
        .require_vehicle(&p.vehicle_id)?;
    let released = state.coordinator.release_corridor(&p.vehicle_id, &p.signals);
    Ok(json!({ "released": released }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockdownCreateParams {
    token: Option<String>,
    point_a: Position,
    point_b: Position,
    duration_minutes: u64,
}

async fn lockdown_create(params: Value, state: &ServiceState) -> RpcResult {
    let p: LockdownCreateParams = parse_params(params)?;
    state.authenticate(p.token.as_deref())?.require_operator()?;

    let created = state
        .lockdowns
        .create(p.point_a, p.point_b, p.duration_minutes)
        .await?;
    let outcomes: Vec<Value> = created
        .outcomes
        .iter()
        .map(|(signal_id, result)| match result {
            Ok(outcome) => json!({ "signalId": signal_id, "result": outcome }),
            Err(e) => json!({ "signalId": signal_id, "error": e.to_string() }),
        })
        .collect();
    Ok(json!({ "lockdown": created.lockdown, "outcomes": outcomes }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockdownIdParams {
    token: Option<String>,
    lockdown_id: LockdownId,
}

fn lockdown_release(params: Value, state: &ServiceState) -> RpcResult {
    let p: LockdownIdParams = parse_params(params)?;
    state.authenticate(p.token.as_deref())?.require_operator()?;
    let lockdown = state.lockdowns.release(&p.lockdown_id)?;
    Ok(json!({ "lockdown": lockdown }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalIdParams {
    signal_id: SignalId,
}

fn signal_get(params: Value, state: &ServiceState) -> RpcResult {
    let p: SignalIdParams = parse_params(params)?;
    Ok(json!(state.store.current_state(&p.signal_id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideParams {
    token: Option<String>,
    signal_id: SignalId,
    #[serde(default)]
    ttl_secs: Option<u64>,
}

fn signal_override(params: Value, state: &ServiceState) -> RpcResult {
    let p: OverrideParams = parse_params(params)?;
    state.authenticate(p.token.as_deref())?.require_operator()?;
    let outcome = state
        .overrides
        .force(&p.signal_id, p.ttl_secs.map(Duration::from_secs))?;
    Ok(json!({
        "result": outcome,
        "signal": state.store.current_state(&p.signal_id)?,
    }))
}

fn signal_clear_override(params: Value, state: &ServiceState) -> RpcResult {
    let p: OverrideParams = parse_params(params)?;
    state.authenticate(p.token.as_deref())?.require_operator()?;
    state.overrides.clear(&p.signal_id)?;
    Ok(json!({ "signal": state.store.current_state(&p.signal_id)? }))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AuditParams {
    limit: Option<usize>,
    since: Option<u64>,
}

fn audit_tail(params: Value, state: &ServiceState) -> RpcResult {
    let p: AuditParams = parse_params(params)?;
    let events = match (p.since, p.limit) {
        (Some(after), Some(limit)) => {
            let mut events = state.store.audit_since(after);
            events.truncate(limit);
            events
        }
        (Some(after), None) => state.store.audit_since(after),
        (None, limit) => state.store.audit_tail(limit.unwrap_or(50)),
    };
    Ok(json!({ "events": events }))
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))
}

pub fn json_rpc_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn json_rpc_error(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

/// A server-initiated message with no `id`.
pub fn json_rpc_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}
