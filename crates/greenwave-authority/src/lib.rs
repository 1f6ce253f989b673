pub mod audit;
pub mod clock;
pub mod events;
pub mod expiry;
pub mod invariant;
pub mod store;

pub use audit::{AuditEvent, AuditLog, TransitionReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventBus, FeedEvent, Subscription, Topic};
pub use expiry::ExpiryQueue;
pub use invariant::{check_exclusive, ExclusivityViolation};
pub use store::{AuthorityError, AuthorityStore, ClaimOutcome, ExpiredClaim, ReleaseOutcome};
