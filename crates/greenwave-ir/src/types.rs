use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Holder id used for operator-issued manual overrides.
pub const ADMIN_HOLDER: &str = "ADMIN";

// ── Time ─────────────────────────────────────────────────────────────

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Offset by a (possibly fractional) number of seconds. Negative or NaN
    /// offsets are treated as zero.
    pub fn plus_secs(self, secs: f64) -> Self {
        let millis = if secs.is_finite() && secs > 0.0 {
            (secs * 1000.0).round() as u64
        } else {
            0
        };
        Self(self.0.saturating_add(millis))
    }

    pub fn plus_minutes(self, minutes: u64) -> Self {
        Self(self.0.saturating_add(minutes.saturating_mul(60_000)))
    }

    pub fn secs_until(self, later: Timestamp) -> f64 {
        later.0.saturating_sub(self.0) as f64 / 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ── Geometry ─────────────────────────────────────────────────────────

/// WGS-84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A path returned by the route provider. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub geometry: Vec<Position>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

// ── Signals ──────────────────────────────────────────────────────────

pub type SignalId = String;
pub type HolderId = String;
pub type LockdownId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    #[default]
    NormalRed,
    NormalGreen,
    NormalYellow,
    Preempted,
    Locked,
}

impl SignalStatus {
    pub fn is_normal(self) -> bool {
        matches!(
            self,
            SignalStatus::NormalRed | SignalStatus::NormalGreen | SignalStatus::NormalYellow
        )
    }
}

/// A catalog entry: what the registry knows about a physical signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSite {
    pub id: SignalId,
    pub position: Position,
    pub name: String,
    /// Status shown while no claim is held.
    #[serde(default)]
    pub base_status: SignalStatus,
}

/// Live view of a signal: the catalog entry plus its authority state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: SignalId,
    pub position: Position,
    pub name: String,
    pub status: SignalStatus,
    pub current_claim: Option<Claim>,
}

impl Signal {
    pub fn from_site(site: &SignalSite, current_claim: Option<Claim>) -> Self {
        let status = match &current_claim {
            Some(claim) => claim.kind.held_status(),
            None => site.base_status,
        };
        Self {
            id: site.id.clone(),
            position: site.position,
            name: site.name.clone(),
            status,
            current_claim,
        }
    }

    pub fn holder(&self) -> Option<&str> {
        self.current_claim.as_ref().map(|c| c.holder_id.as_str())
    }
}

// ── Claims ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimKind {
    VehiclePreemption,
    Lockdown,
    ManualOverride,
}

impl ClaimKind {
    /// Kind precedence: manual override > vehicle preemption > lockdown.
    pub fn rank(self) -> u8 {
        match self {
            ClaimKind::Lockdown => 0,
            ClaimKind::VehiclePreemption => 1,
            ClaimKind::ManualOverride => 2,
        }
    }

    /// Status a signal shows while a claim of this kind is held.
    pub fn held_status(self) -> SignalStatus {
        match self {
            ClaimKind::VehiclePreemption => SignalStatus::Preempted,
            ClaimKind::Lockdown | ClaimKind::ManualOverride => SignalStatus::Locked,
        }
    }
}

/// A time-bounded grant of control over one signal to one holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub holder_id: HolderId,
    pub kind: ClaimKind,
    pub priority: u32,
    /// Seconds until arrival; only meaningful for vehicle preemption.
    #[serde(default)]
    pub eta_secs: Option<f64>,
    #[serde(default)]
    pub direction: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    /// Creation time of the latest renewal folded into this claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewed_at: Option<Timestamp>,
}

impl Claim {
    pub fn vehicle(
        vehicle_id: impl Into<HolderId>,
        priority: u32,
        eta_secs: f64,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            holder_id: vehicle_id.into(),
            kind: ClaimKind::VehiclePreemption,
            priority,
            eta_secs: Some(eta_secs),
            direction: None,
            created_at,
            expires_at: Some(expires_at),
            renewed_at: None,
        }
    }

    pub fn lockdown(
        lockdown_id: impl Into<HolderId>,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            holder_id: lockdown_id.into(),
            kind: ClaimKind::Lockdown,
            priority: 0,
            eta_secs: None,
            direction: None,
            created_at,
            expires_at: Some(expires_at),
            renewed_at: None,
        }
    }

    pub fn manual_override(created_at: Timestamp, expires_at: Option<Timestamp>) -> Self {
        Self {
            holder_id: ADMIN_HOLDER.to_string(),
            kind: ClaimKind::ManualOverride,
            priority: u32::MAX,
            eta_secs: None,
            direction: None,
            created_at,
            expires_at,
            renewed_at: None,
        }
    }

    pub fn with_direction(mut self, direction: Option<String>) -> Self {
        self.direction = direction;
        self
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Total arbitration order. `Greater` means `self` wins the signal.
    ///
    /// Kind rank, then numeric priority, then the earlier `created_at`,
    /// then the lexicographically smaller holder id.
    pub fn precedence(&self, other: &Claim) -> Ordering {
        self.kind
            .rank()
            .cmp(&other.kind.rank())
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.holder_id.cmp(&self.holder_id))
    }

    pub fn outranks(&self, other: &Claim) -> bool {
        self.precedence(other) == Ordering::Greater
    }

    /// Fold a renewal from the same holder into this claim.
    ///
    /// Priority and `created_at` come from whichever of the two ranks
    /// higher, so renewing never costs the holder its place. Timing fields
    /// come from the fresher claim: later submission, then later deadline.
    pub fn renewed_by(&self, next: Claim) -> Claim {
        let fresher = match next.submitted_at().cmp(&self.submitted_at()) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => deadline_key(&next) >= deadline_key(self),
        };
        let latest = self.submitted_at().max(next.submitted_at());
        let strongest = if next.outranks(self) { &next } else { self };
        let mut merged = if fresher { next.clone() } else { self.clone() };
        merged.priority = strongest.priority;
        merged.created_at = strongest.created_at;
        merged.renewed_at = Some(latest);
        merged
    }

    /// When the most recent submission behind this claim was made.
    pub fn submitted_at(&self) -> Timestamp {
        self.renewed_at.unwrap_or(self.created_at)
    }
}

/// Orders deadlines with "never" last.
fn deadline_key(claim: &Claim) -> (bool, Timestamp) {
    (claim.expires_at.is_none(), claim.expires_at.unwrap_or_default())
}

// ── Detection ────────────────────────────────────────────────────────

/// A signal matched against a route. Transient, produced per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedSignal {
    pub signal_id: SignalId,
    pub eta_seconds: f64,
    pub distance_to_route_meters: f64,
}

// ── Lockdowns ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Expired,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockdownState {
    Active,
    Ended { reason: EndReason, at: Timestamp },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockdown {
    pub id: LockdownId,
    pub point_a: Position,
    pub point_b: Position,
    pub route: Route,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub affected_signal_ids: BTreeSet<SignalId>,
    pub state: LockdownState,
}

impl Lockdown {
    pub fn is_active(&self) -> bool {
        self.state == LockdownState::Active
    }
}
