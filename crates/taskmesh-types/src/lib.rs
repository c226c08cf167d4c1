//! TaskMesh Types - Canonical domain types for the agent work marketplace
//!
//! This crate contains all foundational types for TaskMesh with zero
//! dependencies on other taskmesh crates. It defines the complete type
//! system for:
//!
//! - Identity types (AccountId, AgentId, WorkflowId, StepId)
//! - Token amounts with checked arithmetic
//! - Agent records with stake and bounded reputation
//! - Workflow and step records with their lifecycles
//!
//! # Architectural Invariants
//!
//! These types support the core TaskMesh ledger invariants:
//!
//! 1. Budgets are never over-committed: `spent ≤ total_budget` always
//! 2. Stake never goes negative; amounts use checked arithmetic only
//! 3. A step depends only on steps added before it (acyclic by construction)
//! 4. Terminal states are final - no further mutation permitted

pub mod identity;
pub mod amount;
pub mod agent;
pub mod workflow;
pub mod error;

pub use identity::*;
pub use amount::*;
pub use agent::*;
pub use workflow::*;
pub use error::*;

/// Version of the TaskMesh types schema
pub const TYPES_VERSION: &str = "0.1.0";
