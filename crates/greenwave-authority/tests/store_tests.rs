use std::sync::Arc;
use std::time::Duration;

use greenwave_authority::{
    check_exclusive, AuthorityError, AuthorityStore, ClaimOutcome, Clock, EventBus, FeedEvent,
    ManualClock, ReleaseOutcome, Topic, TransitionReason,
};
use greenwave_corridor::SignalRegistry;
use greenwave_ir::parse::parse_catalog;
use greenwave_ir::types::{Claim, ClaimKind, SignalStatus, Timestamp};

const T0: Timestamp = Timestamp(1_700_000_000_000);

fn make_store() -> (AuthorityStore, Arc<ManualClock>) {
    let json = include_str!("../../greenwave-ir/tests/fixtures/signal_catalog.json");
    let registry = Arc::new(SignalRegistry::from_sites(parse_catalog(json).unwrap()).unwrap());
    let clock = Arc::new(ManualClock::new(T0));
    let store = AuthorityStore::new(registry, clock.clone(), EventBus::new());
    (store, clock)
}

fn vehicle(id: &str, priority: u32, ttl_secs: f64) -> Claim {
    Claim::vehicle(id, priority, 30.0, T0, T0.plus_secs(ttl_secs))
}

#[test]
fn test_claim_on_normal_signal_is_accepted() {
    let (store, _) = make_store();
    let outcome = store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    assert_eq!(outcome, ClaimOutcome::Accepted);

    let signal = store.current_state("SIG_01").unwrap();
    assert_eq!(signal.status, SignalStatus::Preempted);
    assert_eq!(signal.holder(), Some("V1"));
}

#[test]
fn test_higher_priority_vehicle_displaces_lower() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();

    let outcome = store.request_claim("SIG_01", vehicle("V2", 10, 120.0)).unwrap();
    match outcome {
        ClaimOutcome::Displaced { previous } => assert_eq!(previous.holder_id, "V1"),
        other => panic!("expected displacement, got {other:?}"),
    }

    let signal = store.current_state("SIG_01").unwrap();
    assert_eq!(signal.status, SignalStatus::Preempted);
    assert_eq!(signal.holder(), Some("V2"));

    let log = store.audit_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].reason, TransitionReason::Displaced);
    assert_eq!(log[1].previous_claim.as_ref().unwrap().holder_id, "V1");
    assert_eq!(log[1].new_claim.as_ref().unwrap().holder_id, "V2");
}

#[test]
fn test_lower_priority_vehicle_is_rejected() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V2", 10, 120.0)).unwrap();

    let outcome = store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    assert!(!outcome.is_granted());
    assert!(matches!(outcome, ClaimOutcome::Rejected { current } if current.holder_id == "V2"));
    assert_eq!(store.audit_log().len(), 1);
}

#[test]
fn test_equal_priority_keeps_earlier_claim() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    let later = Claim::vehicle("V0", 5, 30.0, T0.plus_secs(1.0), T0.plus_secs(120.0));
    let outcome = store.request_claim("SIG_01", later).unwrap();
    assert!(!outcome.is_granted());
}

#[test]
fn test_lockdown_yields_to_vehicle_and_override_beats_both() {
    let (store, _) = make_store();
    let lockdown = Claim::lockdown("lockdown-0001", T0, T0.plus_minutes(30));
    store.request_claim("SIG_01", lockdown).unwrap();
    assert_eq!(store.current_state("SIG_01").unwrap().status, SignalStatus::Locked);

    let outcome = store.request_claim("SIG_01", vehicle("V1", 1, 120.0)).unwrap();
    assert!(matches!(outcome, ClaimOutcome::Displaced { .. }));

    let admin = Claim::manual_override(T0, None);
    let outcome = store.request_claim("SIG_01", admin).unwrap();
    assert!(matches!(outcome, ClaimOutcome::Displaced { .. }));

    let signal = store.current_state("SIG_01").unwrap();
    assert_eq!(signal.status, SignalStatus::Locked);
    assert_eq!(signal.current_claim.unwrap().kind, ClaimKind::ManualOverride);
}

#[test]
fn test_same_holder_renews() {
    let (store, clock) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    clock.advance(Duration::from_secs(60));

    let renewal = Claim::vehicle("V1", 3, 20.0, clock.now(), clock.now().plus_secs(120.0));
    assert_eq!(store.request_claim("SIG_01", renewal).unwrap(), ClaimOutcome::Accepted);

    let log = store.audit_log();
    assert_eq!(log.last().unwrap().reason, TransitionReason::Renewed);

    // Timing follows the renewal; standing does not drop.
    let held = store.current_state("SIG_01").unwrap().current_claim.unwrap();
    assert_eq!(held.eta_secs, Some(20.0));
    assert_eq!(held.priority, 5);
    assert_eq!(held.created_at, T0);

    // The first deadline no longer applies.
    assert!(store.expire_due(T0.plus_secs(130.0)).is_empty());
    assert_eq!(store.current_state("SIG_01").unwrap().holder(), Some("V1"));
    assert_eq!(store.expire_due(T0.plus_secs(180.0)).len(), 1);
}

#[test]
fn test_renewal_keeps_seniority_against_pending_rival() {
    let first = Claim::vehicle("V1", 5, 30.0, T0, T0.plus_secs(600.0));
    let rival = Claim::vehicle("V2", 5, 30.0, T0.plus_secs(5.0), T0.plus_secs(600.0));
    let renewal = Claim::vehicle("V1", 5, 25.0, T0.plus_secs(10.0), T0.plus_secs(600.0));

    for order in [[rival.clone(), renewal.clone()], [renewal, rival]] {
        let (store, _) = make_store();
        store.request_claim("SIG_01", first.clone()).unwrap();
        for claim in order {
            let outcome = store.request_claim("SIG_01", claim.clone()).unwrap();
            if claim.holder_id == "V2" {
                assert!(matches!(outcome, ClaimOutcome::Rejected { .. }));
            }
        }
        let held = store.current_state("SIG_01").unwrap().current_claim.unwrap();
        assert_eq!(held.holder_id, "V1");
        assert_eq!(held.created_at, T0);
    }
}

#[test]
fn test_renewal_cannot_lower_priority() {
    let (store, clock) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 9, 120.0)).unwrap();
    clock.advance(Duration::from_secs(10));

    let weaker = Claim::vehicle("V1", 1, 20.0, clock.now(), clock.now().plus_secs(120.0));
    store.request_claim("SIG_01", weaker).unwrap();
    assert_eq!(
        store.current_state("SIG_01").unwrap().current_claim.unwrap().priority,
        9
    );

    let rival = Claim::vehicle("V2", 5, 20.0, clock.now(), clock.now().plus_secs(120.0));
    let outcome = store.request_claim("SIG_01", rival).unwrap();
    assert!(matches!(outcome, ClaimOutcome::Rejected { current } if current.holder_id == "V1"));
}

#[test]
fn test_release_returns_signal_to_base_status() {
    let (store, _) = make_store();
    store.request_claim("SIG_02", vehicle("V1", 5, 120.0)).unwrap();

    let outcome = store.release("SIG_02", "V1").unwrap();
    assert!(matches!(outcome, ReleaseOutcome::Released(c) if c.holder_id == "V1"));

    let signal = store.current_state("SIG_02").unwrap();
    assert_eq!(signal.status, SignalStatus::NormalGreen);
    assert!(signal.current_claim.is_none());
}

#[test]
fn test_release_is_idempotent() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    store.release("SIG_01", "V1").unwrap();
    let before = store.audit_log().len();

    assert_eq!(store.release("SIG_01", "V1").unwrap(), ReleaseOutcome::AlreadyNormal);
    assert_eq!(store.release("SIG_01", "V9").unwrap(), ReleaseOutcome::AlreadyNormal);
    assert_eq!(store.audit_log().len(), before);
}

#[test]
fn test_release_by_non_holder_fails() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();

    let err = store.release("SIG_01", "V2").unwrap_err();
    assert_eq!(
        err,
        AuthorityError::NotHolder {
            signal_id: "SIG_01".into(),
            holder_id: "V2".into(),
            current_holder: "V1".into(),
        }
    );
    assert_eq!(store.current_state("SIG_01").unwrap().holder(), Some("V1"));
}

#[test]
fn test_unknown_signal() {
    let (store, _) = make_store();
    let err = store.request_claim("SIG_99", vehicle("V1", 5, 120.0)).unwrap_err();
    assert!(matches!(err, AuthorityError::SignalNotFound { ref signal_id } if signal_id == "SIG_99"));
    assert!(store.current_state("SIG_99").is_err());
    assert!(store.release("SIG_99", "V1").is_err());
    assert!(store.audit_log().is_empty());
}

#[test]
fn test_expire_due_reverts_claim() {
    let (store, clock) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    assert_eq!(store.next_deadline(), Some(T0.plus_secs(120.0)));

    assert!(store.expire_due(clock.advance(Duration::from_secs(119))).is_empty());
    let expired = store.expire_due(clock.advance(Duration::from_secs(1)));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].signal_id, "SIG_01");
    assert_eq!(expired[0].claim.holder_id, "V1");

    assert!(store.current_state("SIG_01").unwrap().status.is_normal());
    assert_eq!(store.audit_log().last().unwrap().reason, TransitionReason::Expired);
    assert_eq!(store.next_deadline(), None);
}

#[test]
fn test_release_cancels_expiry() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    store.release("SIG_01", "V1").unwrap();
    assert_eq!(store.next_deadline(), None);
    assert!(store.expire_due(T0.plus_minutes(10)).is_empty());
}

#[test]
fn test_stale_claim_expires_before_new_request() {
    let (store, clock) = make_store();
    store.request_claim("SIG_01", vehicle("V2", 10, 60.0)).unwrap();
    clock.advance(Duration::from_secs(90));

    // The scheduler has not run yet; the expired claim must not block.
    let late = Claim::vehicle("V1", 1, 30.0, clock.now(), clock.now().plus_secs(60.0));
    assert_eq!(store.request_claim("SIG_01", late).unwrap(), ClaimOutcome::Accepted);

    let reasons: Vec<_> = store.audit_log().iter().map(|e| e.reason).collect();
    assert_eq!(
        reasons,
        vec![TransitionReason::Accepted, TransitionReason::Expired, TransitionReason::Accepted]
    );
}

#[test]
fn test_displacement_replaces_deadline() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 30.0)).unwrap();
    store.request_claim("SIG_01", vehicle("V2", 10, 300.0)).unwrap();

    // V1's deadline passes without touching V2.
    assert!(store.expire_due(T0.plus_secs(60.0)).is_empty());
    assert_eq!(store.current_state("SIG_01").unwrap().holder(), Some("V2"));
}

#[test]
fn test_override_without_expiry_never_expires() {
    let (store, _) = make_store();
    store.request_claim("SIG_03", Claim::manual_override(T0, None)).unwrap();
    assert_eq!(store.next_deadline(), None);
    assert!(store.expire_due(T0.plus_minutes(60 * 24)).is_empty());
    assert_eq!(store.current_state("SIG_03").unwrap().status, SignalStatus::Locked);
}

#[test]
fn test_list_and_held_by() {
    let (store, _) = make_store();
    store.request_claim("SIG_03", vehicle("V1", 5, 120.0)).unwrap();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    store.request_claim("SIG_02", vehicle("V2", 5, 120.0)).unwrap();

    let ids: Vec<_> = store.list_signals().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["SIG_01", "SIG_02", "SIG_03"]);
    assert_eq!(store.held_by("V1"), vec!["SIG_01", "SIG_03"]);
    assert_eq!(store.held_by("V3"), Vec::<String>::new());
    assert_eq!(store.active_claims().len(), 3);
}

#[test]
fn test_every_transition_is_published() {
    let (store, _) = make_store();
    let signals = store.bus().subscribe(Topic::Signal("SIG_01".into()));
    let holder = store.bus().subscribe(Topic::Holder("V1".into()));

    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    store.request_claim("SIG_01", vehicle("V2", 10, 120.0)).unwrap();
    store.request_claim("SIG_01", vehicle("V1", 1, 120.0)).unwrap(); // rejected

    let events = signals.drain();
    // Two transitions, each a snapshot plus an audit event.
    assert_eq!(events.len(), 4);
    match &events[2] {
        FeedEvent::Signal(s) => assert_eq!(s.holder(), Some("V2")),
        other => panic!("expected snapshot, got {other:?}"),
    }

    // V1 sees both its grant and its displacement.
    let audits: Vec<_> = holder
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            FeedEvent::Audit(a) => Some(a.reason),
            FeedEvent::Signal(_) => None,
        })
        .collect();
    assert_eq!(audits, vec![TransitionReason::Accepted, TransitionReason::Displaced]);
}

#[test]
fn test_restore_reinstalls_claims_and_deadlines() {
    let (store, _) = make_store();
    store.request_claim("SIG_01", vehicle("V1", 5, 120.0)).unwrap();
    store.request_claim("SIG_02", Claim::manual_override(T0, None)).unwrap();
    let claims = store.active_claims();
    let audit = store.audit_log();

    let (restored, _) = make_store();
    let mut with_unknown = claims.clone();
    with_unknown.push(("SIG_99".into(), vehicle("V3", 5, 120.0)));
    let skipped = restored.restore(with_unknown, audit.clone());

    assert_eq!(skipped, vec!["SIG_99"]);
    assert_eq!(restored.active_claims(), claims);
    assert_eq!(restored.audit_log(), audit);
    assert_eq!(restored.next_deadline(), Some(T0.plus_secs(120.0)));

    restored.release("SIG_01", "V1").unwrap();
    let log = restored.audit_log();
    assert_eq!(log.last().unwrap().seq, 3);
    assert!(check_exclusive(&log).is_empty());
}
