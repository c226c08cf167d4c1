//! Identity types for TaskMesh
//!
//! All identities are strongly typed wrappers around an opaque 32-byte
//! value to prevent accidental mixing of different ID types. Ids are
//! content-derived: hashing the material that creates an entity (owner,
//! name, time) yields its id, so a collision means the entity already
//! exists and creation fails closed.

use serde::{Deserialize, Serialize};
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error parsing a prefixed id string
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdParseError {
    /// The expected type prefix was missing
    #[error("missing '{expected}_' prefix")]
    MissingPrefix { expected: &'static str },

    /// The hex payload did not decode
    #[error("invalid hex payload: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The payload was not 32 bytes
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                let bytes = hex::decode(s)?;
                let len = bytes.len();
                let arr: [u8; 32] =
                    bytes.try_into().map_err(|_| IdParseError::WrongLength(len))?;
                Ok(Self(arr))
            }

            /// Convert to prefixed string
            pub fn to_prefixed_string(&self) -> String {
                format!("{}_{}", $prefix, hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short form: prefix plus the first 8 hex chars
                write!(f, "{}({}_{})", stringify!($name), $prefix, &hex::encode(self.0)[..8])
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

define_id_type!(AccountId, "acct", "Account on the external asset ledger");
define_id_type!(AgentId, "agent", "Unique identifier for a registered agent");
define_id_type!(WorkflowId, "wf", "Unique identifier for a workflow");
define_id_type!(StepId, "step", "Unique identifier for a step, scoped to its workflow");

/// Hash a list of byte slices into a 32-byte id payload
fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

impl AccountId {
    /// Create a random account id (test and demo seeding)
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl AgentId {
    /// Derive an agent id from its registration material
    pub fn derive(owner: &AccountId, name: &str, at: DateTime<Utc>) -> Self {
        Self(digest(&[
            b"taskmesh.agent",
            owner.as_bytes(),
            name.as_bytes(),
            &at.timestamp_micros().to_be_bytes(),
        ]))
    }
}

impl WorkflowId {
    /// Derive a workflow id from its creation material
    pub fn derive(creator: &AccountId, name: &str, at: DateTime<Utc>) -> Self {
        Self(digest(&[
            b"taskmesh.workflow",
            creator.as_bytes(),
            name.as_bytes(),
            &at.timestamp_micros().to_be_bytes(),
        ]))
    }
}

impl StepId {
    /// Derive a step id from its workflow and insertion index
    pub fn derive(workflow: &WorkflowId, index: u32) -> Self {
        Self(digest(&[
            b"taskmesh.step",
            workflow.as_bytes(),
            &index.to_be_bytes(),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_display_has_prefix() {
        let id = AccountId::random();
        assert!(id.to_string().starts_with("acct_"));
    }

    #[test]
    fn id_parsing_round_trips() {
        let id = AccountId::random();
        let parsed = AccountId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_short_payload() {
        assert!(matches!(
            AgentId::parse("agent_abcdef"),
            Err(IdParseError::WrongLength(3))
        ));
    }

    #[test]
    fn derivation_is_deterministic() {
        let owner = AccountId::from_bytes([7u8; 32]);
        let at = Utc::now();
        let a = AgentId::derive(&owner, "indexer", at);
        let b = AgentId::derive(&owner, "indexer", at);
        assert_eq!(a, b);
    }

    #[test]
    fn derivation_separates_names() {
        let owner = AccountId::from_bytes([7u8; 32]);
        let at = Utc::now();
        assert_ne!(
            AgentId::derive(&owner, "indexer", at),
            AgentId::derive(&owner, "scraper", at)
        );
    }

    #[test]
    fn step_ids_differ_by_index() {
        let wf = WorkflowId::derive(&AccountId::random(), "pipeline", Utc::now());
        assert_ne!(StepId::derive(&wf, 0), StepId::derive(&wf, 1));
    }
}
