pub mod auth;
pub mod config;
pub mod coordinator;
pub mod lockdown;
pub mod override_desk;
pub mod persist;
pub mod route;
pub mod rpc;
pub mod scheduler;

pub use auth::{AuthError, Authenticator, Principal, StaticTokenAuthenticator};
pub use config::{ConfigError, ServiceConfig};
pub use coordinator::{CorridorPlan, PreemptionCoordinator, SignalOutcome, SignalRequest};
pub use lockdown::{LockdownCreated, LockdownError, LockdownManager};
pub use override_desk::OverrideDesk;
pub use persist::{PersistError, StateSnapshot};
pub use route::{OsrmRouteProvider, RouteError, RouteProvider};
pub use rpc::{handle_request, ServiceState};
pub use scheduler::ExpiryScheduler;
