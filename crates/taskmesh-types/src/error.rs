//! Error types for TaskMesh
//!
//! Every rejected operation names the precondition that failed, and no
//! operation leaves the ledgers in an intermediate state. Errors fall into
//! four categories with different caller contracts - see [`ErrorCategory`].

use thiserror::Error;

/// Result type for TaskMesh operations
pub type Result<T> = std::result::Result<T, TaskMeshError>;

/// How a caller should treat a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected before any mutation; recoverable by retry with corrected input
    Validation,
    /// Wrong lifecycle state; caller must re-read current state
    State,
    /// Caller lacks the required identity; never retried automatically
    Authorization,
    /// Would break a ledger invariant; indicates a bug, logged loudly
    Invariant,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::State => write!(f, "state"),
            Self::Authorization => write!(f, "authorization"),
            Self::Invariant => write!(f, "invariant"),
        }
    }
}

/// TaskMesh error types
#[derive(Debug, Clone, Error)]
pub enum TaskMeshError {
    // ========================================================================
    // Validation Errors
    // ========================================================================

    /// Name must not be empty
    #[error("Name must not be empty")]
    EmptyName,

    /// Capability set must not be empty
    #[error("Capability set must not be empty")]
    EmptyCapabilities,

    /// Capability tag must not be empty
    #[error("Capability tag must not be empty")]
    EmptyCapability,

    /// Deadline is not strictly in the future
    #[error("Deadline {deadline} is not in the future")]
    DeadlineNotFuture { deadline: String },

    /// Amount must be greater than zero
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    /// Stake below the configured minimum
    #[error("Stake below minimum: required {required}, provided {provided}")]
    StakeBelowMinimum { required: u128, provided: u128 },

    /// Reward exceeds the workflow's unallocated budget
    #[error("Reward {requested} exceeds unallocated budget {remaining}")]
    RewardExceedsBudget { requested: u128, remaining: u128 },

    /// Dependency id does not exist in this workflow
    #[error("Dependency {dependency} not found in workflow {workflow_id}")]
    DependencyNotFound {
        workflow_id: String,
        dependency: String,
    },

    /// Derived id is already taken (creation fails closed)
    #[error("Identifier {id} is already taken")]
    IdCollision { id: String },

    /// Slash percentage above the hard ceiling
    #[error("Slash percentage {bps} bps exceeds ceiling {ceiling} bps")]
    SlashAboveCeiling { bps: u32, ceiling: u32 },

    /// Agent not found
    #[error("Agent {agent_id} not found")]
    AgentNotFound { agent_id: String },

    /// Workflow not found
    #[error("Workflow {workflow_id} not found")]
    WorkflowNotFound { workflow_id: String },

    /// Step not found in the workflow
    #[error("Step {step_id} not found in workflow {workflow_id}")]
    StepNotFound {
        workflow_id: String,
        step_id: String,
    },

    /// Insufficient funds on the asset ledger
    #[error("Insufficient funds for {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u128,
        available: u128,
    },

    /// Agent does not declare the required capability
    #[error("Agent {agent_id} does not declare capability {capability}")]
    MissingCapability {
        agent_id: String,
        capability: String,
    },

    // ========================================================================
    // State Errors
    // ========================================================================

    /// Workflow is not in Draft
    #[error("Workflow {workflow_id} is {status}, expected Draft")]
    WorkflowNotDraft {
        workflow_id: String,
        status: String,
    },

    /// Workflow is not Active
    #[error("Workflow {workflow_id} is {status}, expected Active")]
    WorkflowNotActive {
        workflow_id: String,
        status: String,
    },

    /// Workflow already reached a terminal state
    #[error("Workflow {workflow_id} is already terminal ({status})")]
    WorkflowTerminal {
        workflow_id: String,
        status: String,
    },

    /// Workflow has no steps
    #[error("Workflow {workflow_id} has no steps")]
    NoSteps { workflow_id: String },

    /// Step is not Pending
    #[error("Step {step_id} is {status}, expected Pending")]
    StepNotPending { step_id: String, status: String },

    /// Step is not Running
    #[error("Step {step_id} is {status}, expected Running")]
    StepNotRunning { step_id: String, status: String },

    /// Step is not Failed
    #[error("Step {step_id} is {status}, expected Failed")]
    StepNotFailed { step_id: String, status: String },

    /// A declared dependency has not completed
    #[error("Dependency {dependency} of step {step_id} is not completed")]
    DependencyNotCompleted {
        step_id: String,
        dependency: String,
    },

    /// Running steps block the attempted transition
    #[error("Workflow {workflow_id} still has {count} running step(s)")]
    StepsStillRunning { workflow_id: String, count: usize },

    /// Agent is not active
    #[error("Agent {agent_id} is not active")]
    AgentInactive { agent_id: String },

    /// Agent is already active
    #[error("Agent {agent_id} is already active")]
    AgentAlreadyActive { agent_id: String },

    /// Deadline has not passed yet
    #[error("Deadline {deadline} has not passed yet")]
    DeadlineNotReached { deadline: String },

    // ========================================================================
    // Authorization Errors
    // ========================================================================

    /// Caller is not the agent's owner
    #[error("Caller {caller} is not the owner of agent {agent_id}")]
    NotAgentOwner { caller: String, agent_id: String },

    /// Caller is not the workflow's creator
    #[error("Caller {caller} is not the creator of workflow {workflow_id}")]
    NotWorkflowCreator {
        caller: String,
        workflow_id: String,
    },

    /// Caller is not on the settlement allow-list
    #[error("Caller {caller} is not an authorized settlement caller")]
    NotAuthorizedCaller { caller: String },

    /// Caller may not settle this step
    #[error("Caller {caller} may not settle step {step_id}")]
    NotAssignedAgent { caller: String, step_id: String },

    /// Caller is not the governance principal
    #[error("Caller {caller} is not the governance principal")]
    NotGovernance { caller: String },

    // ========================================================================
    // Invariant Violations
    // ========================================================================

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Amount underflow during arithmetic
    #[error("Amount underflow during arithmetic operation")]
    AmountUnderflow,

    /// Spending would exceed the escrowed budget
    #[error("Escrow overcommitted for workflow {workflow_id}: spent {spent} over budget {budget}")]
    BudgetOvercommitted {
        workflow_id: String,
        spent: u128,
        budget: u128,
    },

    /// A running step lost its assignment
    #[error("Running step {step_id} has no assigned agent")]
    MissingAssignment { step_id: String },
}

impl TaskMeshError {
    /// Which caller contract applies to this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EmptyName
            | Self::EmptyCapabilities
            | Self::EmptyCapability
            | Self::DeadlineNotFuture { .. }
            | Self::ZeroAmount
            | Self::StakeBelowMinimum { .. }
            | Self::RewardExceedsBudget { .. }
            | Self::DependencyNotFound { .. }
            | Self::IdCollision { .. }
            | Self::SlashAboveCeiling { .. }
            | Self::AgentNotFound { .. }
            | Self::WorkflowNotFound { .. }
            | Self::StepNotFound { .. }
            | Self::InsufficientFunds { .. }
            | Self::MissingCapability { .. } => ErrorCategory::Validation,

            Self::WorkflowNotDraft { .. }
            | Self::WorkflowNotActive { .. }
            | Self::WorkflowTerminal { .. }
            | Self::NoSteps { .. }
            | Self::StepNotPending { .. }
            | Self::StepNotRunning { .. }
            | Self::StepNotFailed { .. }
            | Self::DependencyNotCompleted { .. }
            | Self::StepsStillRunning { .. }
            | Self::AgentInactive { .. }
            | Self::AgentAlreadyActive { .. }
            | Self::DeadlineNotReached { .. } => ErrorCategory::State,

            Self::NotAgentOwner { .. }
            | Self::NotWorkflowCreator { .. }
            | Self::NotAuthorizedCaller { .. }
            | Self::NotAssignedAgent { .. }
            | Self::NotGovernance { .. } => ErrorCategory::Authorization,

            Self::AmountOverflow
            | Self::AmountUnderflow
            | Self::BudgetOvercommitted { .. }
            | Self::MissingAssignment { .. } => ErrorCategory::Invariant,
        }
    }

    /// Whether the caller may retry after correcting the input
    pub fn is_retriable(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyName => "EMPTY_NAME",
            Self::EmptyCapabilities => "EMPTY_CAPABILITIES",
            Self::EmptyCapability => "EMPTY_CAPABILITY",
            Self::DeadlineNotFuture { .. } => "DEADLINE_NOT_FUTURE",
            Self::ZeroAmount => "ZERO_AMOUNT",
            Self::StakeBelowMinimum { .. } => "STAKE_BELOW_MINIMUM",
            Self::RewardExceedsBudget { .. } => "REWARD_EXCEEDS_BUDGET",
            Self::DependencyNotFound { .. } => "DEPENDENCY_NOT_FOUND",
            Self::IdCollision { .. } => "ID_COLLISION",
            Self::SlashAboveCeiling { .. } => "SLASH_ABOVE_CEILING",
            Self::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            Self::WorkflowNotFound { .. } => "WORKFLOW_NOT_FOUND",
            Self::StepNotFound { .. } => "STEP_NOT_FOUND",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::MissingCapability { .. } => "MISSING_CAPABILITY",
            Self::WorkflowNotDraft { .. } => "WORKFLOW_NOT_DRAFT",
            Self::WorkflowNotActive { .. } => "WORKFLOW_NOT_ACTIVE",
            Self::WorkflowTerminal { .. } => "WORKFLOW_TERMINAL",
            Self::NoSteps { .. } => "NO_STEPS",
            Self::StepNotPending { .. } => "STEP_NOT_PENDING",
            Self::StepNotRunning { .. } => "STEP_NOT_RUNNING",
            Self::StepNotFailed { .. } => "STEP_NOT_FAILED",
            Self::DependencyNotCompleted { .. } => "DEPENDENCY_NOT_COMPLETED",
            Self::StepsStillRunning { .. } => "STEPS_STILL_RUNNING",
            Self::AgentInactive { .. } => "AGENT_INACTIVE",
            Self::AgentAlreadyActive { .. } => "AGENT_ALREADY_ACTIVE",
            Self::DeadlineNotReached { .. } => "DEADLINE_NOT_REACHED",
            Self::NotAgentOwner { .. } => "NOT_AGENT_OWNER",
            Self::NotWorkflowCreator { .. } => "NOT_WORKFLOW_CREATOR",
            Self::NotAuthorizedCaller { .. } => "NOT_AUTHORIZED_CALLER",
            Self::NotAssignedAgent { .. } => "NOT_ASSIGNED_AGENT",
            Self::NotGovernance { .. } => "NOT_GOVERNANCE",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::AmountUnderflow => "AMOUNT_UNDERFLOW",
            Self::BudgetOvercommitted { .. } => "BUDGET_OVERCOMMITTED",
            Self::MissingAssignment { .. } => "MISSING_ASSIGNMENT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = TaskMeshError::RewardExceedsBudget {
            requested: 300,
            remaining: 200,
        };
        assert_eq!(err.error_code(), "REWARD_EXCEEDS_BUDGET");
    }

    #[test]
    fn categories_follow_the_taxonomy() {
        assert_eq!(
            TaskMeshError::EmptyName.category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            TaskMeshError::StepNotPending {
                step_id: "s".into(),
                status: "Running".into()
            }
            .category(),
            ErrorCategory::State
        );
        assert_eq!(
            TaskMeshError::NotGovernance { caller: "c".into() }.category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            TaskMeshError::AmountOverflow.category(),
            ErrorCategory::Invariant
        );
    }

    #[test]
    fn only_validation_errors_are_retriable() {
        assert!(TaskMeshError::ZeroAmount.is_retriable());
        assert!(!TaskMeshError::NotAuthorizedCaller { caller: "c".into() }.is_retriable());
    }
}
