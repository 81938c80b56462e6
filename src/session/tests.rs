//! Tests for session-facing lock management.

use super::*;
use crate::access::AllowAll;
use crate::context::ProcessId;
use crate::test_support::{MemoryStore, MemoryTree, node};
use chrono::Duration;

struct Fixture {
    store: Arc<MemoryStore>,
    registry: Arc<LockRegistry>,
}

impl Fixture {
    /// Tree: `/a` (a), `/a/b` (b), `/a/b/c` (c), `/x` (x).
    fn new() -> Self {
        let tree = Arc::new(MemoryTree::new());
        tree.add("root", "a", "a");
        tree.add("a", "b", "b");
        tree.add("b", "c", "c");
        tree.add("root", "x", "x");
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(LockRegistry::new(
            store.clone(),
            tree,
            ProcessId::new("p1"),
            "system",
            Duration::minutes(60),
        ));
        Self { store, registry }
    }

    fn session(&self, user: &str) -> SessionLocks {
        SessionLocks::new(
            SessionContext::new(user, "default"),
            Arc::clone(&self.registry),
            Arc::new(AllowAll),
        )
    }
}

struct DenyAll;

impl AccessControl for DenyAll {
    fn has_permission(&self, _: &SessionContext, _: &NodeId, _: Permission) -> bool {
        false
    }
}

fn open_lock(session: &SessionLocks, id: &str, deep: bool) -> Result<LockView> {
    session.lock(&node(id), deep, false, LockTimeout::Unspecified, None)
}

fn scoped_lock(session: &SessionLocks, id: &str) -> Result<LockView> {
    session.lock(&node(id), false, true, LockTimeout::Unspecified, None)
}

#[test]
fn test_alice_locks_and_releases_a_b() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    open_lock(&s1, "b", false).unwrap();

    let covering = fx.registry.find_lock_covering(&node("b")).unwrap();
    assert_eq!(covering.owner(), "alice");
    assert!(!covering.is_deep());

    let err = open_lock(&s2, "b", false).unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked(ref at) if at == "/a/b"));

    s1.unlock(&node("b")).unwrap();

    let view = open_lock(&s2, "b", false).unwrap();
    assert_eq!(view.owner(), "bob");
}

#[test]
fn test_deep_lock_covers_descendants() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    open_lock(&s1, "a", true).unwrap();

    let err = open_lock(&s2, "c", false).unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked(ref at) if at == "/a"));
    // Covered for the owner too
    assert!(open_lock(&s1, "c", false).is_err());

    assert!(s2.is_locked(&node("c")));
    assert!(!s2.holds_lock(&node("c")));
    assert!(s2.holds_lock(&node("a")));
    assert_eq!(s2.get_lock(&node("c")).unwrap().node(), &node("a"));

    open_lock(&s2, "x", false).unwrap();
}

#[test]
fn test_deep_lock_refused_over_locked_descendant() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    open_lock(&s1, "c", false).unwrap();

    let err = open_lock(&s2, "a", true).unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked(ref at) if at == "/a/b/c"));
    assert!(!s2.holds_lock(&node("a")));
}

#[test]
fn test_lock_remembers_token_and_marks_it_held() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");

    let view = open_lock(&s1, "b", false).unwrap();
    let token = view.token().unwrap().to_string();

    assert_eq!(s1.lock_tokens(), HashSet::from([token.clone()]));
    assert!(fx.store.is_held("lock-b"));
    assert_eq!(view.node_path().unwrap().to_string(), "/a/b");
    assert!(view.expires_at().is_some());
}

#[test]
fn test_token_visible_only_to_owning_session() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    let mine = open_lock(&s1, "b", false).unwrap();
    assert!(mine.token().is_some());
    assert!(mine.is_lock_owning_session());
    assert_eq!(mine.seconds_remaining(), i64::MAX);

    let theirs = s2.get_lock(&node("b")).unwrap();
    assert_eq!(theirs.token(), None);
    assert!(!theirs.is_lock_owning_session());
    assert_eq!(theirs.seconds_remaining(), i64::MIN);
    assert!(matches!(theirs.refresh(), Err(LockError::NotLocked(_))));
    assert_eq!(theirs.owner(), "alice");
}

#[test]
fn test_session_scoped_token_is_withheld_even_from_owner() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");

    let view = scoped_lock(&s1, "b").unwrap();
    assert!(view.is_session_scoped());
    assert!(view.is_lock_owning_session());
    assert_eq!(view.token(), None);
    assert_eq!(s1.lock_tokens().len(), 1);
}

#[test]
fn test_view_tracks_liveness_and_refresh() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");

    let view = open_lock(&s1, "b", false).unwrap();
    assert!(view.is_live());
    view.refresh().unwrap();

    s1.unlock(&node("b")).unwrap();
    assert!(!view.is_live());
    assert!(matches!(view.refresh(), Err(LockError::NotLocked(_))));
    assert!(s1.lock_tokens().is_empty());
}

#[test]
fn test_view_stays_live_while_node_is_locked_by_anyone() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    let stale = open_lock(&s1, "b", false).unwrap();
    s1.unlock(&node("b")).unwrap();
    assert!(!stale.is_live());

    let current = open_lock(&s2, "b", false).unwrap();
    assert!(stale.is_live());
    assert!(current.is_live());
    // Liveness says nothing about who holds the token
    assert!(!stale.is_lock_owning_session());
}

#[test]
fn test_unlock_requires_token() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    open_lock(&s1, "b", false).unwrap();

    let err = s2.unlock(&node("b")).unwrap_err();
    assert!(matches!(err, LockError::InvalidToken(_)));
    assert!(s1.holds_lock(&node("b")));

    let err = s2.unlock(&node("x")).unwrap_err();
    assert!(matches!(err, LockError::NotLocked(_)));
}

#[test]
fn test_unlock_needs_lock_on_exact_node() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    open_lock(&s1, "a", true).unwrap();

    let err = s1.unlock(&node("c")).unwrap_err();
    assert!(matches!(err, LockError::NotLocked(_)));
}

#[test]
fn test_token_transfer_between_sessions() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    let token = open_lock(&s1, "b", false)
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    s1.remove_lock_token(&token).unwrap();
    assert!(!fx.store.is_held("lock-b"));
    assert!(s1.lock_tokens().is_empty());

    s2.add_lock_token(&token).unwrap();
    assert!(fx.store.is_held("lock-b"));
    // Remembering twice is a no-op
    s2.add_lock_token(&token).unwrap();

    s2.unlock(&node("b")).unwrap();
    assert!(!s1.is_locked(&node("b")));
}

#[test]
fn test_forget_requires_remembered_token() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    let token = open_lock(&s1, "b", false)
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let err = s2.remove_lock_token(&token).unwrap_err();
    assert!(matches!(err, LockError::InvalidToken(_)));
    // The owner's hold is untouched
    assert!(fx.store.is_held("lock-b"));
    assert!(s1.ledger().owns(&token));
}

#[test]
fn test_remember_unknown_token_fails() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");

    let err = s1.add_lock_token("no-such-token").unwrap_err();
    assert!(matches!(err, LockError::InvalidToken(_)));
    assert!(s1.lock_tokens().is_empty());
}

#[test]
fn test_check_can_modify() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    open_lock(&s1, "a", true).unwrap();

    s1.check_can_modify(&node("c")).unwrap();
    let err = s2.check_can_modify(&node("c")).unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked(ref at) if at == "/a"));
    s2.check_can_modify(&node("x")).unwrap();
}

#[test]
fn test_logout_releases_session_scoped_locks_only() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    let scoped = scoped_lock(&s1, "a").unwrap();
    let scoped_token = scoped.descriptor().token().to_string();
    open_lock(&s1, "x", false).unwrap();

    let cleaned = s1.logout().unwrap();

    assert_eq!(cleaned, HashSet::from([scoped_token]));
    assert!(!s2.is_locked(&node("a")));
    assert!(!fx.store.contains("lock-a"));

    // The open-scoped lock survives, unheld
    assert!(s2.holds_lock(&node("x")));
    assert!(!fx.store.is_held("lock-x"));
    assert!(s1.lock_tokens().is_empty());
}

#[test]
fn test_logout_leaves_other_sessions_locks() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let s2 = fx.session("bob");

    scoped_lock(&s2, "x").unwrap();
    scoped_lock(&s1, "b").unwrap();

    let cleaned = s1.logout().unwrap();
    assert_eq!(cleaned.len(), 1);
    assert!(s2.holds_lock(&node("x")));
    assert!(!s2.holds_lock(&node("b")));
}

#[test]
fn test_access_denied_blocks_lock_and_unlock() {
    let fx = Fixture::new();
    let denied = SessionLocks::new(
        SessionContext::new("eve", "default"),
        Arc::clone(&fx.registry),
        Arc::new(DenyAll),
    );

    let err = open_lock(&denied, "b", false).unwrap_err();
    assert!(matches!(err, LockError::AccessDenied(_)));
    assert!(!denied.is_locked(&node("b")));

    let s1 = fx.session("alice");
    open_lock(&s1, "b", false).unwrap();
    let err = denied.unlock(&node("b")).unwrap_err();
    assert!(matches!(err, LockError::AccessDenied(_)));
}

#[test]
fn test_get_lock_on_unlocked_node_fails() {
    let fx = Fixture::new();
    let s1 = fx.session("alice");
    let err = s1.get_lock(&node("c")).err().unwrap();
    assert!(matches!(err, LockError::NotLocked(ref at) if at == "/a/b/c"));
}
