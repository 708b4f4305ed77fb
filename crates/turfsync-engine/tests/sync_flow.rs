//! End-to-end sync flow tests: scenarios from the field-dashboard access
//! model, plus the engine's concurrency and failure guarantees.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use turfsync_core::model::{
    Area, AreaId, County, CountyId, Group, GroupId, Precinct, PrecinctId, ReferenceCatalog,
};
use turfsync_core::scope::{RawAccess, RawScopeResponse};
use turfsync_engine::{
    Identity, LocalMirror, ProfileResolver, SessionHandle, StaticCatalogSource, SyncError,
    SyncOrchestrator, SyncOutcome, SyncStatus, SyncTrigger,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Two counties, two areas each, four precincts, one group.
fn fixture_catalog() -> ReferenceCatalog {
    let county = |id: &str| County {
        id: CountyId::from(id),
        name: format!("County {id}"),
    };
    let area = |id: &str, county: &str| Area {
        id: AreaId::from(id),
        county_id: CountyId::from(county),
        name: format!("Area {id}"),
    };
    let precinct = |id: &str, area: &str| Precinct {
        id: PrecinctId::from(id),
        area_id: AreaId::from(area),
        name: format!("Precinct {id}"),
    };
    ReferenceCatalog::new(
        vec![county("C-15"), county("C-16")],
        vec![
            area("A-1", "C-15"),
            area("A-2", "C-15"),
            area("A-3", "C-16"),
        ],
        vec![
            precinct("P-001", "A-1"),
            precinct("P-002", "A-1"),
            precinct("P-003", "A-2"),
            precinct("P-004", "A-3"),
        ],
        vec![Group {
            id: GroupId::from("G-1"),
            name: "Volunteers".to_string(),
        }],
    )
    .unwrap()
}

fn raw_scope(role: &str, counties: &[&str], areas: &[&str], precincts: &[&str]) -> RawScopeResponse {
    let to_vec = |ids: &[&str]| ids.iter().map(ToString::to_string).collect();
    RawScopeResponse {
        role: role.to_string(),
        access: RawAccess {
            counties: to_vec(counties),
            areas: to_vec(areas),
            precincts: to_vec(precincts),
        },
    }
}

/// A resolver that replays a script of responses, optionally blocking on a
/// semaphore gate, and records call/concurrency counters.
struct ScriptedResolver {
    script: Mutex<VecDeque<Result<RawScopeResponse, SyncError>>>,
    last: Mutex<Option<Result<RawScopeResponse, SyncError>>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedResolver {
    fn new(script: Vec<Result<RawScopeResponse, SyncError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn gated(
        script: Vec<Result<RawScopeResponse, SyncError>>,
        gate: Arc<Semaphore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn wait_until_blocked(&self) {
        for _ in 0..200 {
            if self.in_flight.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("resolver never entered a call");
    }

    fn next_response(&self) -> Result<RawScopeResponse, SyncError> {
        let mut script = self.script.lock().unwrap();
        if let Some(response) = script.pop_front() {
            *self.last.lock().unwrap() = Some(response.clone());
            return response;
        }
        self.last
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(SyncError::Transport {
                detail: "script exhausted".to_string(),
            }))
    }
}

#[async_trait]
impl ProfileResolver for ScriptedResolver {
    async fn resolve(&self, _identity: &Identity) -> Result<RawScopeResponse, SyncError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(SyncError::Transport {
                        detail: "gate closed".to_string(),
                    });
                }
            }
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

fn build(resolver: Arc<ScriptedResolver>) -> (Arc<SyncOrchestrator>, SessionHandle) {
    build_with_timeout(resolver, Duration::from_secs(15))
}

fn build_with_timeout(
    resolver: Arc<ScriptedResolver>,
    timeout: Duration,
) -> (Arc<SyncOrchestrator>, SessionHandle) {
    init_tracing();
    let session = SessionHandle::new();
    let orchestrator = SyncOrchestrator::new(
        session.clone(),
        resolver,
        Arc::new(StaticCatalogSource::new(fixture_catalog())),
        Arc::new(LocalMirror::open_in_memory().unwrap()),
        timeout,
    );
    (Arc::new(orchestrator), session)
}

fn signed_in(resolver: Arc<ScriptedResolver>) -> (Arc<SyncOrchestrator>, SessionHandle) {
    let (orchestrator, session) = build(resolver);
    session.sign_in(Identity::new("vol-1", "token-abc"));
    (orchestrator, session)
}

#[tokio::test]
async fn scenario_a_committeeperson_single_precinct() {
    let resolver = ScriptedResolver::new(vec![Ok(raw_scope(
        "committeeperson",
        &[],
        &[],
        &["P-001"],
    ))]);
    let (orchestrator, _session) = signed_in(resolver);
    let mut listener = orchestrator.subscribe();

    let outcome = orchestrator.sync(SyncTrigger::SessionStart).await;
    assert_eq!(outcome, SyncOutcome::Completed { generation: 1 });

    let mirror = orchestrator.mirror();
    let counties = mirror.get_counties().unwrap();
    assert_eq!(counties.len(), 1);
    assert_eq!(counties[0].id, CountyId::from("C-15"));

    let areas = mirror.get_areas_by_county(&CountyId::from("C-15")).unwrap();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].id, AreaId::from("A-1"));

    // Exactly the granted precinct; no siblings leak through completion.
    let precincts = mirror.get_precincts_by_area(&AreaId::from("A-1")).unwrap();
    assert_eq!(precincts.len(), 1);
    assert_eq!(precincts[0].id, PrecinctId::from("P-001"));

    let signal = listener.changed().await.unwrap();
    assert_eq!(signal.generation, 1);
    assert_eq!(signal.status, SyncStatus::Idle);
}

#[tokio::test]
async fn scenario_b_county_chair_full_subtree() {
    let resolver =
        ScriptedResolver::new(vec![Ok(raw_scope("county_chair", &["C-15"], &[], &[]))]);
    let (orchestrator, _session) = signed_in(resolver);

    let outcome = orchestrator.sync(SyncTrigger::SessionStart).await;
    assert!(matches!(outcome, SyncOutcome::Completed { .. }));

    let mirror = orchestrator.mirror();
    let snapshot = mirror.snapshot().unwrap();
    let county_ids: Vec<_> = snapshot.counties.iter().map(|c| c.id.as_str()).collect();
    let area_ids: Vec<_> = snapshot.areas.iter().map(|a| a.id.as_str()).collect();
    let precinct_ids: Vec<_> = snapshot.precincts.iter().map(|p| p.id.as_str()).collect();

    assert_eq!(county_ids, vec!["C-15"]);
    assert_eq!(area_ids, vec!["A-1", "A-2"]);
    assert_eq!(precinct_ids, vec!["P-001", "P-002", "P-003"]);
}

#[tokio::test]
async fn scenario_c_malformed_response_preserves_mirror() {
    let resolver = ScriptedResolver::new(vec![
        Ok(raw_scope("committeeperson", &[], &[], &["P-001"])),
        Ok(raw_scope("warlord", &[], &[], &["P-001", "P-002", "P-003"])),
    ]);
    let (orchestrator, _session) = signed_in(resolver);
    let mut listener = orchestrator.subscribe();

    assert!(matches!(
        orchestrator.sync(SyncTrigger::SessionStart).await,
        SyncOutcome::Completed { .. }
    ));
    let before = orchestrator.mirror().snapshot().unwrap();
    listener.changed().await.unwrap();

    let outcome = orchestrator.sync(SyncTrigger::Manual).await;
    assert!(matches!(
        outcome,
        SyncOutcome::Failed {
            error: SyncError::MalformedResponse { .. }
        }
    ));

    // Prior mirror intact, metadata records the failure.
    assert_eq!(orchestrator.mirror().snapshot().unwrap(), before);
    let metadata = orchestrator.mirror().metadata().unwrap();
    assert_eq!(metadata.status, SyncStatus::Error);
    assert!(metadata.last_error.unwrap().contains("unknown role"));

    // Failure signal published with the unchanged data generation.
    let signal = listener.changed().await.unwrap();
    assert_eq!(signal.status, SyncStatus::Error);
    assert_eq!(signal.generation, 1);
}

#[tokio::test]
async fn scenario_d_sign_out_discards_in_flight_sync() {
    let gate = Arc::new(Semaphore::new(0));
    let resolver = ScriptedResolver::gated(
        vec![Ok(raw_scope("county_chair", &["C-15"], &[], &[]))],
        Arc::clone(&gate),
    );
    let (orchestrator, _session) = signed_in(Arc::clone(&resolver));

    let in_flight = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.sync(SyncTrigger::SessionStart).await })
    };
    resolver.wait_until_blocked().await;

    // Sign-out bumps the epoch immediately, then waits for the pass.
    let signing_out = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.sign_out().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.add_permits(1);

    let outcome = in_flight.await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Failed {
            error: SyncError::Cancelled
        }
    );
    signing_out.await.unwrap().unwrap();

    // The departed user's data never landed.
    let snapshot = orchestrator.mirror().snapshot().unwrap();
    assert!(snapshot.counties.is_empty());
    assert!(snapshot.precincts.is_empty());
    assert_eq!(orchestrator.mirror().sync_status().unwrap(), SyncStatus::Idle);
}

#[tokio::test]
async fn identity_switch_mid_sync_discards_pass_and_resets_status() {
    let gate = Arc::new(Semaphore::new(0));
    let resolver = ScriptedResolver::gated(
        vec![Ok(raw_scope("county_chair", &["C-15"], &[], &[]))],
        Arc::clone(&gate),
    );
    let (orchestrator, session) = signed_in(Arc::clone(&resolver));

    let in_flight = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.sync(SyncTrigger::SessionStart).await })
    };
    resolver.wait_until_blocked().await;

    // A new identity arrives while the first pass is mid-resolve.
    session.sign_in(Identity::new("vol-2", "token-def"));
    gate.add_permits(1);

    let outcome = in_flight.await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Failed {
            error: SyncError::Cancelled
        }
    );

    // The stale result never landed, and the mirror is not stuck in a
    // syncing state waiting for a trigger that may never come.
    assert!(orchestrator.mirror().snapshot().unwrap().counties.is_empty());
    assert_eq!(orchestrator.mirror().sync_status().unwrap(), SyncStatus::Idle);
}

#[tokio::test]
async fn single_flight_coalesces_concurrent_triggers() {
    let gate = Arc::new(Semaphore::new(0));
    let resolver = ScriptedResolver::gated(
        vec![
            Ok(raw_scope("committeeperson", &[], &[], &["P-001"])),
            Ok(raw_scope("committeeperson", &[], &[], &["P-001"])),
        ],
        Arc::clone(&gate),
    );
    let (orchestrator, _session) = signed_in(Arc::clone(&resolver));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.sync(SyncTrigger::SessionStart).await })
    };
    resolver.wait_until_blocked().await;

    // Second trigger while the first pass is mid-resolve.
    let second = orchestrator.sync(SyncTrigger::ClaimsChanged).await;
    assert_eq!(second, SyncOutcome::Coalesced);

    gate.add_permits(2);
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed { .. }));

    // The coalesced trigger ran exactly one follow-up pass, serialized.
    assert_eq!(resolver.calls(), 2);
    assert_eq!(resolver.max_in_flight(), 1);
    assert_eq!(orchestrator.mirror().generation().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn resolver_timeout_is_a_transport_failure() {
    let gate = Arc::new(Semaphore::new(0));
    let resolver = ScriptedResolver::gated(
        vec![Ok(raw_scope("committeeperson", &[], &[], &["P-001"]))],
        gate,
    );
    let (orchestrator, session) = build_with_timeout(resolver, Duration::from_secs(15));
    session.sign_in(Identity::new("vol-1", "token-abc"));

    let outcome = orchestrator.sync(SyncTrigger::SessionStart).await;
    match outcome {
        SyncOutcome::Failed {
            error: SyncError::Transport { detail },
        } => assert!(detail.contains("timed out")),
        other => panic!("expected transport failure, got {other:?}"),
    }
    assert_eq!(orchestrator.mirror().sync_status().unwrap(), SyncStatus::Error);
}

#[tokio::test]
async fn stale_claims_never_widen_the_mirror() {
    use turfsync_core::scope::{ClaimsBundle, ScopeHint};

    // The token claims the world; the resolver grants one precinct.
    let inflated = ClaimsBundle {
        role: "admin".to_string(),
        scope_hint: ScopeHint {
            counties: vec!["ALL".to_string()],
            areas: vec!["ALL".to_string()],
            precincts: vec!["ALL".to_string()],
        },
    };
    let resolver = ScriptedResolver::new(vec![Ok(raw_scope(
        "committeeperson",
        &[],
        &[],
        &["P-001"],
    ))]);
    let (orchestrator, _session) = signed_in(Arc::clone(&resolver));

    let outcome = orchestrator.on_claims_changed(&inflated).await;
    assert!(matches!(outcome, Some(SyncOutcome::Completed { .. })));

    // Authorization is server-derived: the hint bought nothing.
    let snapshot = orchestrator.mirror().snapshot().unwrap();
    assert_eq!(snapshot.counties.len(), 1);
    assert_eq!(snapshot.areas.len(), 1);
    assert_eq!(snapshot.precincts.len(), 1);

    // An unchanged bundle does not trigger another pass.
    assert!(orchestrator.on_claims_changed(&inflated).await.is_none());
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn idempotent_syncs_produce_identical_mirrors() {
    let resolver = ScriptedResolver::new(vec![
        Ok(raw_scope("county_chair", &["C-15"], &[], &[])),
        Ok(raw_scope("county_chair", &["C-15"], &[], &[])),
    ]);
    let (orchestrator, _session) = signed_in(resolver);

    assert_eq!(
        orchestrator.sync(SyncTrigger::SessionStart).await,
        SyncOutcome::Completed { generation: 1 }
    );
    let first = orchestrator.mirror().snapshot().unwrap();

    assert_eq!(
        orchestrator.sync(SyncTrigger::Manual).await,
        SyncOutcome::Completed { generation: 2 }
    );
    let second = orchestrator.mirror().snapshot().unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn unauthenticated_sync_refuses_to_start() {
    let resolver = ScriptedResolver::new(vec![Ok(raw_scope("admin", &["ALL"], &[], &[]))]);
    let (orchestrator, _session) = build(Arc::clone(&resolver));

    let outcome = orchestrator.sync(SyncTrigger::SessionStart).await;
    assert_eq!(
        outcome,
        SyncOutcome::Failed {
            error: SyncError::Unauthenticated
        }
    );
    // The resolver was never consulted.
    assert_eq!(resolver.calls(), 0);
    assert_eq!(orchestrator.mirror().sync_status().unwrap(), SyncStatus::Error);
}

#[tokio::test]
async fn expired_identity_is_unauthenticated() {
    let resolver = ScriptedResolver::new(vec![Ok(raw_scope("admin", &["ALL"], &[], &[]))]);
    let (orchestrator, session) = build(Arc::clone(&resolver));
    session.sign_in(
        Identity::new("vol-1", "token-abc").with_expiry(Utc::now() - chrono::Duration::minutes(1)),
    );

    let outcome = orchestrator.sync(SyncTrigger::SessionStart).await;
    assert_eq!(
        outcome,
        SyncOutcome::Failed {
            error: SyncError::Unauthenticated
        }
    );
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn identity_switch_syncs_fresh_scope() {
    let resolver = ScriptedResolver::new(vec![
        Ok(raw_scope("committeeperson", &[], &[], &["P-001"])),
        Ok(raw_scope("county_chair", &["C-16"], &[], &[])),
    ]);
    let (orchestrator, session) = signed_in(resolver);

    orchestrator.sync(SyncTrigger::SessionStart).await;
    assert!(orchestrator
        .mirror()
        .get_county(&CountyId::from("C-15"))
        .unwrap()
        .is_some());

    session.sign_in(Identity::new("chair-2", "token-def"));
    let outcome = orchestrator.sync(SyncTrigger::IdentityChanged).await;
    assert!(matches!(outcome, SyncOutcome::Completed { .. }));

    // Wholesale replace: the previous identity's rows are gone.
    let mirror = orchestrator.mirror();
    assert!(mirror.get_county(&CountyId::from("C-15")).unwrap().is_none());
    assert!(mirror.get_county(&CountyId::from("C-16")).unwrap().is_some());
    assert_eq!(
        mirror
            .get_precincts_by_area(&AreaId::from("A-3"))
            .unwrap()
            .len(),
        1
    );
}
