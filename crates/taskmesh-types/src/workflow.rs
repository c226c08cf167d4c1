//! Workflow and step records for the settlement engine
//!
//! A workflow escrows a budget at creation and exclusively owns its steps.
//! Steps live in an append-only arena inside the workflow record; a step
//! may only depend on steps added before it, so the dependency graph is
//! acyclic by construction and insertion order is a valid topological
//! order.

use crate::{AccountId, AgentId, StepId, TokenAmount, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a workflow
///
/// `Draft → Active → {Completed | Cancelled | Failed}`; terminal states
/// permit no further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// Steps may be added; not yet accepting work
    Draft,
    /// Accepting and settling work
    Active,
    /// Every step completed; budget fully settled
    Completed,
    /// Cancelled by the creator; unspent escrow refunded
    Cancelled,
    /// Expired past its deadline; unspent escrow refunded
    Failed,
}

impl WorkflowStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "Draft",
            Self::Active => "Active",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a step
///
/// `Pending → Running → {Completed | Failed}`; `Skipped` is reachable only
/// for steps still pending when their workflow is cancelled or expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// Waiting for an agent to accept
    Pending,
    /// Accepted by an agent; work in flight
    Running,
    /// Output submitted and reward settled
    Completed,
    /// Reported failed; reward returned to the unallocated budget
    Failed,
    /// Workflow ended while the step was still pending
    Skipped,
}

impl StepStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        };
        write!(f, "{s}")
    }
}

/// How dependency satisfaction is interpreted for a step
///
/// Kind never affects escrow accounting - every kind gates on all direct
/// dependencies being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// One-after-another pipeline stage
    Sequential,
    /// Independent of sibling ordering
    Parallel,
    /// Runs only when its dependencies resolved a condition
    Conditional,
    /// Joins the outputs of its dependencies
    Aggregator,
}

/// A unit of work inside a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step id, scoped to the owning workflow
    pub id: StepId,
    /// Display name
    pub name: String,
    /// Capability an accepting agent must declare
    pub capability: String,
    /// Reward taken from the workflow's unallocated budget at add time
    pub reward: TokenAmount,
    /// Dependency interpretation
    pub kind: StepKind,
    /// Direct dependencies; each references an earlier step
    pub dependencies: Vec<StepId>,
    /// Agent that accepted the step, if any
    pub assigned_agent: Option<AgentId>,
    /// Opaque input content reference
    pub input_ref: Option<String>,
    /// Opaque output content reference, set on completion
    pub output_ref: Option<String>,
    /// Current lifecycle state
    pub status: StepStatus,
    /// When the step was added
    pub created_at: DateTime<Utc>,
    /// When the step was accepted
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal state
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A workflow with its escrowed budget and step arena
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Unique workflow id (derived from creator + name + creation time)
    pub id: WorkflowId,
    /// Creating account; the only principal allowed to manage the workflow
    pub creator: AccountId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Budget escrowed at creation; fixed for the workflow's lifetime
    pub total_budget: TokenAmount,
    /// Sum of rewards of all added steps; never exceeds the budget
    pub allocated: TokenAmount,
    /// Sum of rewards of completed steps; only ever increases
    pub spent: TokenAmount,
    /// Deadline after which the workflow may be expired
    pub deadline: DateTime<Utc>,
    /// Current lifecycle state
    pub status: WorkflowStatus,
    /// Steps in insertion order (the canonical topological seed)
    pub steps: Vec<StepRecord>,
    /// When the workflow was created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Budget not yet reserved by any step
    pub fn unallocated(&self) -> TokenAmount {
        self.total_budget.saturating_sub(self.allocated)
    }

    /// Escrow not yet paid out
    pub fn unspent(&self) -> TokenAmount {
        self.total_budget.saturating_sub(self.spent)
    }

    /// Look up a step by id
    pub fn step(&self, step_id: &StepId) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.id == *step_id)
    }

    /// Look up a step by id, mutably
    pub fn step_mut(&mut self, step_id: &StepId) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.id == *step_id)
    }

    /// Whether every step has settled successfully
    pub fn all_steps_completed(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    /// Number of steps currently running
    pub fn running_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(budget: u128) -> WorkflowRecord {
        let creator = AccountId::from_bytes([1u8; 32]);
        let now = Utc::now();
        WorkflowRecord {
            id: WorkflowId::derive(&creator, "wf", now),
            creator,
            name: "wf".to_string(),
            description: String::new(),
            total_budget: TokenAmount::new(budget),
            allocated: TokenAmount::zero(),
            spent: TokenAmount::zero(),
            deadline: now + chrono::Duration::days(1),
            status: WorkflowStatus::Draft,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!WorkflowStatus::Draft.is_terminal());
        assert!(!WorkflowStatus::Active.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());

        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
    }

    #[test]
    fn budget_helpers() {
        let mut wf = record(1_000);
        wf.allocated = TokenAmount::new(800);
        wf.spent = TokenAmount::new(400);
        assert_eq!(wf.unallocated(), TokenAmount::new(200));
        assert_eq!(wf.unspent(), TokenAmount::new(600));
    }

    #[test]
    fn empty_workflow_has_all_steps_completed() {
        // Vacuously true; the engine guards with its own no-steps check
        assert!(record(10).all_steps_completed());
    }

    #[test]
    fn records_survive_the_persisted_shape() {
        let mut wf = record(1_000);
        wf.steps.push(StepRecord {
            id: StepId::derive(&wf.id, 0),
            name: "index".to_string(),
            capability: "index".to_string(),
            reward: TokenAmount::new(400),
            kind: StepKind::Sequential,
            dependencies: vec![],
            assigned_agent: None,
            input_ref: Some("blake3:corpus".to_string()),
            output_ref: None,
            status: StepStatus::Pending,
            created_at: wf.created_at,
            started_at: None,
            resolved_at: None,
        });

        let json = serde_json::to_string(&wf).unwrap();
        let back: WorkflowRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(wf, back);
    }
}
