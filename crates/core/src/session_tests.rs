// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Utc;
use yare::parameterized;

fn session(deps: Vec<String>) -> Session {
    Session::new_creating(
        SessionId::new(),
        TemplateId::new(),
        RuntimeKind::Docker,
        "/var/lib/sbx/workspaces/sess-x",
        ResourceLimits::default(),
        BTreeMap::new(),
        300,
        deps,
        Utc::now(),
    )
}

#[parameterized(
    creating = { SessionStatus::Creating, true },
    running = { SessionStatus::Running, true },
    completed = { SessionStatus::Completed, false },
    failed = { SessionStatus::Failed, false },
    timeout = { SessionStatus::Timeout, false },
    terminated = { SessionStatus::Terminated, false },
)]
fn active_statuses(status: SessionStatus, expect: bool) {
    assert_eq!(status.is_active(), expect);
    assert_eq!(status.is_terminal(), !expect);
}

#[parameterized(
    create_ready = { SessionStatus::Creating, SessionStatus::Running, true },
    create_fail = { SessionStatus::Creating, SessionStatus::Failed, true },
    create_terminate = { SessionStatus::Creating, SessionStatus::Terminated, true },
    container_lost = { SessionStatus::Running, SessionStatus::Creating, true },
    terminate = { SessionStatus::Running, SessionStatus::Terminated, true },
    run_fail = { SessionStatus::Running, SessionStatus::Failed, true },
    resurrect_terminated = { SessionStatus::Terminated, SessionStatus::Running, false },
    resurrect_failed = { SessionStatus::Failed, SessionStatus::Creating, false },
    self_loop = { SessionStatus::Running, SessionStatus::Running, false },
    into_completed = { SessionStatus::Running, SessionStatus::Completed, false },
)]
fn lifecycle_edges(from: SessionStatus, to: SessionStatus, legal: bool) {
    assert_eq!(from.can_transition_to(to), legal);
}

#[test]
fn status_round_trips_through_text() {
    for s in [
        SessionStatus::Creating,
        SessionStatus::Running,
        SessionStatus::Completed,
        SessionStatus::Failed,
        SessionStatus::Timeout,
        SessionStatus::Terminated,
    ] {
        assert_eq!(SessionStatus::parse(s.as_str()), Some(s));
    }
    assert_eq!(SessionStatus::parse("nonsense"), None);
}

#[test]
fn new_session_without_deps_is_dependency_none() {
    let s = session(vec![]);
    assert_eq!(s.status, SessionStatus::Creating);
    assert_eq!(s.dependency_status, DependencyStatus::None);
    assert!(s.container_handle.is_none());
    assert!(s.runtime_node_id.is_none());
}

#[test]
fn new_session_with_deps_starts_installing() {
    let s = session(vec!["numpy==2.0".into()]);
    assert_eq!(s.dependency_status, DependencyStatus::Installing);
}

#[test]
fn accepts_executions_requires_running_and_deps_ready() {
    let mut s = session(vec!["numpy==2.0".into()]);
    assert!(!s.accepts_executions());

    s.status = SessionStatus::Running;
    assert!(!s.accepts_executions()); // still installing

    s.dependency_status = DependencyStatus::Ready;
    assert!(s.accepts_executions());

    s.dependency_status = DependencyStatus::Failed;
    assert!(!s.accepts_executions());
}
