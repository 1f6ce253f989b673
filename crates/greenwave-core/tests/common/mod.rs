#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use greenwave_authority::ManualClock;
use greenwave_core::auth::{Principal, StaticTokenAuthenticator};
use greenwave_core::route::{RouteError, RouteProvider};
use greenwave_core::{ServiceConfig, ServiceState};
use greenwave_corridor::SignalRegistry;
use greenwave_ir::parse::{parse_catalog, parse_osrm_route};
use greenwave_ir::types::{Position, Route, Timestamp};

pub const T0: Timestamp = Timestamp(1_700_000_000_000);

pub const OPERATOR_TOKEN: &str = "t-operator";
pub const AMB1_TOKEN: &str = "t-amb-1";
pub const AMB2_TOKEN: &str = "t-amb-2";

pub fn fixture_registry() -> Arc<SignalRegistry> {
    let json = include_str!("../../../greenwave-ir/tests/fixtures/signal_catalog.json");
    Arc::new(SignalRegistry::from_sites(parse_catalog(json).unwrap()).unwrap())
}

/// OSRM route running SIG_01 -> SIG_02 -> SIG_03.
pub fn fixture_route() -> Route {
    parse_osrm_route(include_str!("../../../greenwave-ir/tests/fixtures/osrm_route.json")).unwrap()
}

pub fn point_a() -> Position {
    Position::new(23.0210, 72.5700)
}

pub fn point_b() -> Position {
    Position::new(23.0260, 72.5750)
}

/// Route provider returning a fixed answer and counting calls.
pub struct MockRoutes {
    answer: Mutex<Result<Route, RouteError>>,
    calls: AtomicUsize,
}

impl MockRoutes {
    pub fn ok(route: Route) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(route)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Err(RouteError::Unavailable("connection refused".into()))),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, answer: Result<Route, RouteError>) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for MockRoutes {
    async fn route(&self, _origin: Position, _destination: Position) -> Result<Route, RouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.lock().unwrap().clone()
    }
}

pub fn make_state(routes: Arc<MockRoutes>) -> (ServiceState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let auth = StaticTokenAuthenticator::default()
        .with_token(OPERATOR_TOKEN, Principal::Operator)
        .with_token(AMB1_TOKEN, Principal::Vehicle("AMB-1".into()))
        .with_token(AMB2_TOKEN, Principal::Vehicle("AMB-2".into()));
    let state = ServiceState::new(
        ServiceConfig::default(),
        fixture_registry(),
        clock.clone(),
        routes,
        Arc::new(auth),
    );
    (state, clock)
}
