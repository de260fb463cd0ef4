//! Testing utilities for the Concord workspace
//!
//! Shared fixtures for intents on a fixed clock, and tracing setup for tests.

#![allow(missing_docs)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use concord_contract::{Constraint, Evidence, Intent, InterfaceKind, InterfaceSpec};
use concord_store::{MemoryBackend, SqliteBackend};
use std::path::Path;

/// Route `tracing` output to the test harness; honours `RUST_LOG`
///
/// Safe to call from every test, only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Fixed epoch for deterministic timestamps
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 1, 1, 9, 0, 0).unwrap()
}

/// `epoch() + secs`
pub fn at(secs: i64) -> DateTime<Utc> {
    epoch() + Duration::seconds(secs)
}

pub fn function(name: &str) -> InterfaceSpec {
    InterfaceSpec::new(name, InterfaceKind::Function)
}

pub fn function_with(name: &str, signature: &str) -> InterfaceSpec {
    function(name).with_signature(signature)
}

/// Bare intent with a fixed id and timestamp
pub fn intent(agent: &str, id: &str, secs: i64) -> Intent {
    Intent::new(agent, format!("{agent} work"))
        .with_id(id)
        .with_timestamp(at(secs))
}

pub fn providing(agent: &str, id: &str, name: &str, secs: i64) -> Intent {
    intent(agent, id, secs).providing(function(name))
}

pub fn requiring(agent: &str, id: &str, name: &str, secs: i64) -> Intent {
    intent(agent, id, secs).requiring(function(name))
}

/// Y from the auth scenario: an auth handler no one may duplicate
pub fn sole_auth_handler(agent: &str, id: &str, secs: i64) -> Intent {
    providing(agent, id, "UserAuthHandler", secs)
        .constrained_by(Constraint::required("UserAuthHandler", "no duplicate auth handlers"))
}

/// Committed, type-checked and tested once: stability 0.65 under default weights
pub fn with_solid_evidence(intent: Intent) -> Intent {
    let ts = intent.timestamp;
    intent
        .with_evidence(Evidence::code_committed("commit").at(ts))
        .with_evidence(Evidence::type_checked("typecheck").at(ts))
        .with_evidence(Evidence::test_pass("unit").at(ts))
}

pub fn memory_backend() -> MemoryBackend {
    MemoryBackend::new()
}

pub fn sqlite_backend(dir: &Path) -> SqliteBackend {
    SqliteBackend::open(&dir.join("graph.db")).unwrap()
}
