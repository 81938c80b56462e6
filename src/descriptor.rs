//! The immutable lock descriptor and its persisted property form.
//!
//! A descriptor is never mutated once built. Anything that changes a lock
//! (for example a new expiry) produces a new descriptor that replaces the old
//! one wholesale in the registry.
//!
//! # Persisted properties
//!
//! Lock records are stored (and carried by the change feed) as a flat JSON
//! property map:
//! - `workspace`: workspace containing the locked node
//! - `lock_owner`: owner string
//! - `lock_token`: the lock token
//! - `lock_is_deep`: whether the lock covers the subtree
//! - `is_session_scoped`: whether the lock dies with its session
//! - `locking_session`: id of the session that created the lock (optional)
//! - `expiration_date`: RFC3339 expiry (optional, advisory)
//! - `is_held_by_session`: whether some session currently holds the token
//!
//! The lock id is the record's key and the locked node is derived from it, so
//! neither is stored as a property.

use crate::context::SessionContext;
use crate::error::{LockError, Result};
use crate::node::{LockId, NodeId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Property map of a persisted lock record.
pub type LockProperties = Map<String, Value>;

pub const PROP_WORKSPACE: &str = "workspace";
pub const PROP_OWNER: &str = "lock_owner";
pub const PROP_TOKEN: &str = "lock_token";
pub const PROP_DEEP: &str = "lock_is_deep";
pub const PROP_SESSION_SCOPED: &str = "is_session_scoped";
pub const PROP_LOCKING_SESSION: &str = "locking_session";
pub const PROP_EXPIRATION: &str = "expiration_date";
pub const PROP_HELD_BY_SESSION: &str = "is_held_by_session";

/// Immutable description of one active lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDescriptor {
    locked_node: NodeId,
    lock_id: LockId,
    workspace: String,
    owner: String,
    token: String,
    deep: bool,
    session_scoped: bool,
    locking_session: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl LockDescriptor {
    /// Build a descriptor for a brand new lock with a fresh random token.
    pub fn new(
        session: &SessionContext,
        locked_node: &NodeId,
        owner: &str,
        deep: bool,
        session_scoped: bool,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lock_id: locked_node.lock_id(),
            locked_node: locked_node.clone(),
            workspace: session.workspace.clone(),
            owner: owner.to_string(),
            token: generate_token(),
            deep,
            session_scoped,
            locking_session: Some(session.session_id.clone()),
            expires_at: Some(expires_at),
        }
    }

    /// Materialize a descriptor from a persisted record.
    ///
    /// Missing flags read as `false` and a missing owner reads as empty; a
    /// missing token makes the record unusable.
    pub fn from_properties(lock_id: &LockId, props: &LockProperties) -> Result<Self> {
        let token = string_prop(props, PROP_TOKEN).ok_or_else(|| {
            LockError::PersistenceFailure(format!("lock record '{}' has no token", lock_id))
        })?;

        let expires_at = match string_prop(props, PROP_EXPIRATION) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| {
                        LockError::PersistenceFailure(format!(
                            "lock record '{}' has invalid expiration '{}': {}",
                            lock_id, raw, e
                        ))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            locked_node: lock_id.locked_node(),
            lock_id: lock_id.clone(),
            workspace: string_prop(props, PROP_WORKSPACE).unwrap_or_default(),
            owner: string_prop(props, PROP_OWNER).unwrap_or_default(),
            token,
            deep: bool_prop(props, PROP_DEEP),
            session_scoped: bool_prop(props, PROP_SESSION_SCOPED),
            locking_session: string_prop(props, PROP_LOCKING_SESSION),
            expires_at,
        })
    }

    /// The persisted property map for this lock (without the held flag).
    pub fn to_properties(&self) -> LockProperties {
        let mut props = Map::new();
        props.insert(PROP_WORKSPACE.into(), Value::from(self.workspace.clone()));
        props.insert(PROP_OWNER.into(), Value::from(self.owner.clone()));
        props.insert(PROP_TOKEN.into(), Value::from(self.token.clone()));
        props.insert(PROP_DEEP.into(), Value::from(self.deep));
        props.insert(PROP_SESSION_SCOPED.into(), Value::from(self.session_scoped));
        if let Some(session) = &self.locking_session {
            props.insert(PROP_LOCKING_SESSION.into(), Value::from(session.clone()));
        }
        if let Some(expires_at) = self.expires_at {
            props.insert(PROP_EXPIRATION.into(), Value::from(expires_at.to_rfc3339()));
        }
        props
    }

    pub fn locked_node(&self) -> &NodeId {
        &self.locked_node
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_deep(&self) -> bool {
        self.deep
    }

    pub fn is_session_scoped(&self) -> bool {
        self.session_scoped
    }

    pub fn locking_session(&self) -> Option<&str> {
        self.locking_session.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the recorded expiry lies before `now`. Advisory only.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

impl fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lock {} for {} in '{}' ({}, {}, owner: {})",
            self.lock_id,
            self.locked_node,
            self.workspace,
            if self.deep { "deep" } else { "shallow" },
            if self.session_scoped {
                "session"
            } else {
                "open"
            },
            self.owner
        )
    }
}

/// Fresh, unguessable lock token.
fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

fn string_prop(props: &LockProperties, name: &str) -> Option<String> {
    match props.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn bool_prop(props: &LockProperties, name: &str) -> bool {
    match props.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample() -> LockDescriptor {
        let session = SessionContext::new("alice", "default");
        let node = NodeId::parse("n1").unwrap();
        LockDescriptor::new(
            &session,
            &node,
            "alice",
            true,
            false,
            Utc::now() + Duration::hours(1),
        )
    }

    #[test]
    fn new_descriptor_derives_lock_id_and_token() {
        let lock = sample();
        assert_eq!(lock.lock_id().as_str(), "lock-n1");
        assert_eq!(lock.locked_node().canonical_form(), "n1");
        assert_eq!(lock.workspace(), "default");
        assert!(!lock.token().is_empty());
        assert_ne!(lock.token(), sample().token());
    }

    #[test]
    fn properties_materialize_back_to_same_descriptor() {
        let lock = sample();
        let props = lock.to_properties();
        let parsed = LockDescriptor::from_properties(lock.lock_id(), &props).unwrap();
        assert_eq!(parsed.token(), lock.token());
        assert_eq!(parsed.locked_node(), lock.locked_node());
        assert!(parsed.is_deep());
        assert!(!parsed.is_session_scoped());
        // RFC3339 keeps sub-second precision.
        assert_eq!(parsed.expires_at(), lock.expires_at());
    }

    #[test]
    fn missing_flags_default_to_false() {
        let id = LockId::parse("lock-n2").unwrap();
        let props = json!({"lock_token": "t-1", "lock_owner": "bob"});
        let lock = LockDescriptor::from_properties(&id, props.as_object().unwrap()).unwrap();
        assert!(!lock.is_deep());
        assert!(!lock.is_session_scoped());
        assert_eq!(lock.owner(), "bob");
        assert!(lock.expires_at().is_none());
        assert!(!lock.is_expired(Utc::now()));
    }

    #[test]
    fn record_without_token_is_rejected() {
        let id = LockId::parse("lock-n3").unwrap();
        let props = json!({"lock_owner": "bob"});
        let err = LockDescriptor::from_properties(&id, props.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, LockError::PersistenceFailure(_)));
    }
}
