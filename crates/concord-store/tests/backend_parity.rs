//! Every backend must answer identically for the same call sequence.

use chrono::{Duration, TimeZone, Utc};
use concord_contract::{
    canonical_graph_hash, Constraint, Evidence, Intent, InterfaceKind, InterfaceSpec,
};
use concord_store::{GraphBackend, MemoryBackend, SqliteBackend};
use pretty_assertions::assert_eq;

fn workload() -> Vec<Intent> {
    let t0 = Utc.with_ymd_and_hms(2031, 3, 1, 8, 0, 0).unwrap();
    let auth = Intent::new("agent-a", "authentication")
        .with_id("a1")
        .with_timestamp(t0)
        .providing(
            InterfaceSpec::new("UserAuth", InterfaceKind::Function)
                .with_signature("user_id: UUID, token: str")
                .with_tags(["auth", "security"]),
        )
        .with_evidence(Evidence::test_pass("login").at(t0))
        .with_stability(0.35);
    let profile = Intent::new("agent-b", "profiles")
        .with_id("b1")
        .with_timestamp(t0 + Duration::seconds(5))
        .providing(InterfaceSpec::new("Profile", InterfaceKind::Model))
        .requiring(InterfaceSpec::new("UserAuthHandler", InterfaceKind::Function))
        .constrained_by(Constraint::required("profile", "owner only").affecting(["profile"]))
        .with_stability(0.3);
    let mut auth_v2 = auth.supersede();
    auth_v2.id = "a2".into();
    auth_v2.timestamp = t0 + Duration::seconds(9);
    auth_v2.stability = 0.55;
    let billing = Intent::new("agent-c", "billing")
        .with_id("c1")
        .with_timestamp(t0 + Duration::seconds(12))
        .providing(InterfaceSpec::new("Invoice", InterfaceKind::Model).with_tags(["billing"]))
        .with_stability(0.8);
    vec![auth, profile, auth_v2, billing]
}

fn load(backend: &dyn GraphBackend) {
    let intents = workload();
    backend.publish(&intents[0]).unwrap();
    backend.publish(&intents[1]).unwrap();
    backend.publish_batch(&intents[2..]).unwrap();
}

fn ids(intents: Vec<Intent>) -> Vec<String> {
    intents.into_iter().map(|i| i.id).collect()
}

#[test]
fn memory_and_sqlite_agree() {
    let memory = MemoryBackend::new();
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteBackend::open(&dir.path().join("graph.db")).unwrap();
    let backends: [&dyn GraphBackend; 2] = [&memory, &sqlite];
    for backend in backends {
        load(backend);
    }

    let wanted = [InterfaceSpec::new("UserAuth", InterfaceKind::Function)];
    for backend in backends {
        assert_eq!(backend.count().unwrap(), 4, "{}", backend.name());
        assert_eq!(ids(backend.query_all(None).unwrap()), ["a1", "b1", "a2", "c1"]);
        assert_eq!(ids(backend.query_all(Some(0.5)).unwrap()), ["a2", "c1"]);
        assert_eq!(ids(backend.query_live(None).unwrap()), ["b1", "a2", "c1"]);
        assert_eq!(ids(backend.query_by_agent("agent-a").unwrap()), ["a1", "a2"]);
        assert_eq!(ids(backend.find_overlapping(&wanted, "agent-c", 0.3).unwrap()), ["b1", "a2"]);
        assert_eq!(ids(backend.find_overlapping(&wanted, "agent-b", 0.5).unwrap()), ["a2"]);
    }

    let memory_hash = canonical_graph_hash(&memory.query_all(None).unwrap());
    let sqlite_hash = canonical_graph_hash(&sqlite.query_all(None).unwrap());
    assert_eq!(memory_hash, sqlite_hash);
    assert_eq!(memory.query_all(None).unwrap(), sqlite.query_all(None).unwrap());
}

#[test]
fn sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    {
        let backend = SqliteBackend::open(&path).unwrap();
        load(&backend);
        backend.close().unwrap();
    }
    let reopened = SqliteBackend::open(&path).unwrap();
    assert_eq!(reopened.query_all(None).unwrap(), workload());
}
