//! Node identifiers, lock identifiers and content paths.
//!
//! A lock record lives at its own node in the system area. Its identifier is
//! derived from the locked node's identifier (`lock-` + canonical form), so the
//! locked node can always be recovered from a lock id without a side table.

use crate::error::{LockError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Prefix prepended to a node id to form the id of its lock record.
pub const LOCK_ID_PREFIX: &str = "lock-";

/// Canonical node ids double as file names in the durable store, so they are
/// restricted to a portable character set.
static CANONICAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]*$").expect("Invalid node id regex"));

/// Opaque, workspace-scoped key addressing one node in the content tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parse a node id from its canonical form.
    pub fn parse(raw: &str) -> Result<Self> {
        if !CANONICAL_ID.is_match(raw) {
            return Err(LockError::UserError(format!(
                "invalid node id '{}': expected letters, digits, '_', '.', ':' or '-'",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// The canonical string form of this id.
    pub fn canonical_form(&self) -> &str {
        &self.0
    }

    /// Derive the id of the lock record for this node.
    pub fn lock_id(&self) -> LockId {
        LockId(format!("{}{}", LOCK_ID_PREFIX, self.0))
    }
}

impl TryFrom<String> for NodeId {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a persisted lock record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LockId(String);

impl LockId {
    /// Parse a lock id, checking that it embeds a valid node id.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some(node) = raw.strip_prefix(LOCK_ID_PREFIX) else {
            return Err(LockError::UserError(format!(
                "invalid lock id '{}': missing '{}' prefix",
                raw, LOCK_ID_PREFIX
            )));
        };
        NodeId::parse(node)?;
        Ok(Self(raw.to_string()))
    }

    /// Recover the id of the node this lock record belongs to.
    pub fn locked_node(&self) -> NodeId {
        NodeId(self.0[LOCK_ID_PREFIX.len()..].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LockId {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<LockId> for String {
    fn from(id: LockId) -> Self {
        id.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute path of a node in the content tree (e.g. `/a/b`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse an absolute path. Empty segments (`//`) are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(LockError::UserError(format!(
                "invalid path '{}': paths must be absolute",
                raw
            )));
        }
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { segments })
    }

    /// Append one segment.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True if `self` is `other` or lies anywhere beneath it.
    pub fn is_at_or_below(&self, other: &NodePath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// True if `other` lies strictly beneath `self`.
    pub fn is_ancestor_of(&self, other: &NodePath) -> bool {
        other.depth() > self.depth() && other.is_at_or_below(self)
    }
}

impl TryFrom<String> for NodePath {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}
