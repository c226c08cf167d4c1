//! TaskMesh Engine - the workflow settlement engine
//!
//! Owns workflow and step lifecycles and the escrow backing them. A
//! workflow pulls its whole budget into custody at creation; steps reserve
//! slices of that budget at add time and release them one by one as work
//! settles. On settlement the engine instructs the asset ledger to pay and
//! the trust ledger to record the outcome - both sequenced before the
//! engine's own state commits, so a failed external call leaves nothing
//! half-applied.
//!
//! # Invariants
//!
//! 1. `spent ≤ total_budget` at all times; `spent` only grows, by exactly
//!    a completed step's reward
//! 2. `allocated ≤ total_budget`, enforced incrementally at add time
//! 3. A step runs only when its workflow is Active and every direct
//!    dependency is Completed
//! 4. Terminal workflow states are final

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use taskmesh_assets::AssetLedger;
use taskmesh_trust::TrustLedger;
use taskmesh_types::{
    AccountId, AgentId, Result, StepId, StepKind, StepRecord, StepStatus, TaskMeshError,
    TokenAmount, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// The workflow settlement engine
///
/// Presents `settlement_account` to the trust ledger; governance must put
/// that account on the trust ledger's allow-list for settlements to land.
pub struct WorkflowEngine {
    settlement_account: AccountId,
    assets: Arc<dyn AssetLedger>,
    trust: Arc<TrustLedger>,
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowRecord>>>,
    by_creator: Arc<RwLock<HashMap<AccountId, Vec<WorkflowId>>>>,
    oracles: Arc<RwLock<HashSet<AccountId>>>,
}

impl WorkflowEngine {
    pub fn new(
        settlement_account: AccountId,
        assets: Arc<dyn AssetLedger>,
        trust: Arc<TrustLedger>,
    ) -> Self {
        Self {
            settlement_account,
            assets,
            trust,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            by_creator: Arc::new(RwLock::new(HashMap::new())),
            oracles: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// The identity this engine presents to the trust ledger
    pub fn settlement_account(&self) -> AccountId {
        self.settlement_account
    }

    /// Allow an oracle account to submit results on behalf of agents
    ///
    /// Managed by the engine's own settlement identity.
    pub async fn authorize_oracle(&self, caller: &AccountId, oracle: AccountId) -> Result<()> {
        if *caller != self.settlement_account {
            return Err(TaskMeshError::NotGovernance {
                caller: caller.to_string(),
            });
        }
        self.oracles.write().await.insert(oracle);
        info!(%oracle, "oracle authorized");
        Ok(())
    }

    // ========================================================================
    // Workflow lifecycle
    // ========================================================================

    /// Create a workflow, pulling its budget into escrow atomically
    pub async fn create_workflow(
        &self,
        creator: &AccountId,
        name: &str,
        description: &str,
        budget: TokenAmount,
        deadline: chrono::DateTime<Utc>,
    ) -> Result<WorkflowId> {
        if name.trim().is_empty() {
            return Err(TaskMeshError::EmptyName);
        }
        let now = Utc::now();
        if deadline <= now {
            return Err(TaskMeshError::DeadlineNotFuture {
                deadline: deadline.to_rfc3339(),
            });
        }
        if budget.is_zero() {
            return Err(TaskMeshError::ZeroAmount);
        }

        let id = WorkflowId::derive(creator, name, now);

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&id) {
            // Fails closed before any funds move
            return Err(TaskMeshError::IdCollision { id: id.to_string() });
        }

        self.assets.transfer_in(creator, budget).await?;

        workflows.insert(
            id,
            WorkflowRecord {
                id,
                creator: *creator,
                name: name.to_string(),
                description: description.to_string(),
                total_budget: budget,
                allocated: TokenAmount::zero(),
                spent: TokenAmount::zero(),
                deadline,
                status: WorkflowStatus::Draft,
                steps: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        self.by_creator.write().await.entry(*creator).or_default().push(id);

        info!(workflow = %id, %creator, %budget, "workflow created");
        Ok(id)
    }

    /// Add a step to a Draft workflow, reserving its reward
    #[allow(clippy::too_many_arguments)]
    pub async fn add_step(
        &self,
        caller: &AccountId,
        workflow_id: &WorkflowId,
        name: &str,
        capability: &str,
        reward: TokenAmount,
        kind: StepKind,
        dependencies: Vec<StepId>,
        input_ref: Option<String>,
    ) -> Result<StepId> {
        let mut workflows = self.workflows.write().await;
        let wf = Self::get_mut(&mut workflows, workflow_id)?;
        Self::require_creator(caller, wf)?;

        if wf.status != WorkflowStatus::Draft {
            return Err(TaskMeshError::WorkflowNotDraft {
                workflow_id: workflow_id.to_string(),
                status: wf.status.to_string(),
            });
        }
        if name.trim().is_empty() {
            return Err(TaskMeshError::EmptyName);
        }
        if capability.trim().is_empty() {
            return Err(TaskMeshError::EmptyCapability);
        }
        if reward.is_zero() {
            return Err(TaskMeshError::ZeroAmount);
        }

        let unallocated = wf.unallocated();
        if reward > unallocated {
            return Err(TaskMeshError::RewardExceedsBudget {
                requested: reward.raw(),
                remaining: unallocated.raw(),
            });
        }
        let allocated = wf.allocated.checked_add(reward)?;

        // Dependencies must already exist in this workflow: no forward
        // references, no self-reference, and therefore no cycles.
        let mut deps = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if wf.step(&dep).is_none() {
                return Err(TaskMeshError::DependencyNotFound {
                    workflow_id: workflow_id.to_string(),
                    dependency: dep.to_string(),
                });
            }
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        let now = Utc::now();
        let id = StepId::derive(workflow_id, wf.steps.len() as u32);
        wf.steps.push(StepRecord {
            id,
            name: name.to_string(),
            capability: capability.to_string(),
            reward,
            kind,
            dependencies: deps,
            assigned_agent: None,
            input_ref,
            output_ref: None,
            status: StepStatus::Pending,
            created_at: now,
            started_at: None,
            resolved_at: None,
        });
        wf.allocated = allocated;
        wf.updated_at = now;

        info!(workflow = %workflow_id, step = %id, %reward, "step added");
        Ok(id)
    }

    /// Move a Draft workflow with at least one step to Active
    pub async fn start_workflow(&self, caller: &AccountId, workflow_id: &WorkflowId) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let wf = Self::get_mut(&mut workflows, workflow_id)?;
        Self::require_creator(caller, wf)?;

        if wf.status != WorkflowStatus::Draft {
            return Err(TaskMeshError::WorkflowNotDraft {
                workflow_id: workflow_id.to_string(),
                status: wf.status.to_string(),
            });
        }
        if wf.steps.is_empty() {
            return Err(TaskMeshError::NoSteps {
                workflow_id: workflow_id.to_string(),
            });
        }

        wf.status = WorkflowStatus::Active;
        wf.updated_at = Utc::now();
        info!(workflow = %workflow_id, steps = wf.steps.len(), "workflow started");
        Ok(())
    }

    /// Cancel a non-terminal workflow and refund the unspent escrow
    ///
    /// Rejected while any step is Running; in-flight steps must resolve
    /// first. Pending steps become Skipped. Returns the refunded amount;
    /// a second cancel attempt fails with a state error, so the refund
    /// can never double-pay.
    pub async fn cancel_workflow(
        &self,
        caller: &AccountId,
        workflow_id: &WorkflowId,
    ) -> Result<TokenAmount> {
        let mut workflows = self.workflows.write().await;
        let wf = Self::get_mut(&mut workflows, workflow_id)?;
        Self::require_creator(caller, wf)?;

        if wf.status.is_terminal() {
            return Err(TaskMeshError::WorkflowTerminal {
                workflow_id: workflow_id.to_string(),
                status: wf.status.to_string(),
            });
        }
        let running = wf.running_steps();
        if running > 0 {
            return Err(TaskMeshError::StepsStillRunning {
                workflow_id: workflow_id.to_string(),
                count: running,
            });
        }

        let refund = wf.total_budget.checked_sub(wf.spent).map_err(|_| {
            error!(workflow = %workflow_id, "spent exceeds budget");
            TaskMeshError::BudgetOvercommitted {
                workflow_id: workflow_id.to_string(),
                spent: wf.spent.raw(),
                budget: wf.total_budget.raw(),
            }
        })?;

        if !refund.is_zero() {
            self.assets.transfer_out(&wf.creator, refund).await?;
        }

        let now = Utc::now();
        for step in wf.steps.iter_mut() {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
                step.resolved_at = Some(now);
            }
        }
        wf.status = WorkflowStatus::Cancelled;
        wf.updated_at = now;

        info!(workflow = %workflow_id, %refund, "workflow cancelled");
        Ok(refund)
    }

    /// Expire an Active workflow whose deadline has passed
    ///
    /// Callable by anyone - timeout preemption is caller-triggered. Same
    /// resolution rules as cancellation; the workflow lands in Failed.
    pub async fn expire_workflow(&self, workflow_id: &WorkflowId) -> Result<TokenAmount> {
        let mut workflows = self.workflows.write().await;
        let wf = Self::get_mut(&mut workflows, workflow_id)?;

        if wf.status != WorkflowStatus::Active {
            return Err(TaskMeshError::WorkflowNotActive {
                workflow_id: workflow_id.to_string(),
                status: wf.status.to_string(),
            });
        }
        let now = Utc::now();
        if now <= wf.deadline {
            return Err(TaskMeshError::DeadlineNotReached {
                deadline: wf.deadline.to_rfc3339(),
            });
        }
        let running = wf.running_steps();
        if running > 0 {
            return Err(TaskMeshError::StepsStillRunning {
                workflow_id: workflow_id.to_string(),
                count: running,
            });
        }

        let refund = wf.unspent();
        if !refund.is_zero() {
            self.assets.transfer_out(&wf.creator, refund).await?;
        }

        for step in wf.steps.iter_mut() {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
                step.resolved_at = Some(now);
            }
        }
        wf.status = WorkflowStatus::Failed;
        wf.updated_at = now;

        warn!(workflow = %workflow_id, %refund, "workflow expired");
        Ok(refund)
    }

    // ========================================================================
    // Step lifecycle
    // ========================================================================

    /// Accept a Pending step on behalf of an agent
    ///
    /// The Pending check doubles as the mutual-exclusion gate: of any
    /// number of concurrent accept calls, exactly one sees Pending.
    pub async fn accept_step(
        &self,
        caller: &AccountId,
        workflow_id: &WorkflowId,
        step_id: &StepId,
        agent_id: &AgentId,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let wf = Self::get_mut(&mut workflows, workflow_id)?;

        if wf.status != WorkflowStatus::Active {
            return Err(TaskMeshError::WorkflowNotActive {
                workflow_id: workflow_id.to_string(),
                status: wf.status.to_string(),
            });
        }

        let step = Self::get_step_ref(wf, workflow_id, step_id)?;
        if step.status != StepStatus::Pending {
            return Err(TaskMeshError::StepNotPending {
                step_id: step_id.to_string(),
                status: step.status.to_string(),
            });
        }
        let capability = step.capability.clone();

        // Dependency gating: a flat AND over direct dependencies. The
        // add-time earlier-steps-only rule makes transitive satisfaction
        // hold by induction, so no traversal is needed.
        for dep in step.dependencies.clone() {
            let dep_status = wf
                .step(&dep)
                .map(|s| s.status)
                .ok_or_else(|| TaskMeshError::DependencyNotFound {
                    workflow_id: workflow_id.to_string(),
                    dependency: dep.to_string(),
                })?;
            if dep_status != StepStatus::Completed {
                return Err(TaskMeshError::DependencyNotCompleted {
                    step_id: step_id.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }

        let agent = self.trust.get_agent(agent_id).await?;
        if agent.owner != *caller {
            return Err(TaskMeshError::NotAgentOwner {
                caller: caller.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        if !agent.active {
            return Err(TaskMeshError::AgentInactive {
                agent_id: agent_id.to_string(),
            });
        }
        if !agent.has_capability(&capability) {
            return Err(TaskMeshError::MissingCapability {
                agent_id: agent_id.to_string(),
                capability,
            });
        }

        let now = Utc::now();
        let step = Self::get_step_mut(wf, workflow_id, step_id)?;
        step.assigned_agent = Some(*agent_id);
        step.status = StepStatus::Running;
        step.started_at = Some(now);
        wf.updated_at = now;

        info!(workflow = %workflow_id, step = %step_id, agent = %agent_id, "step accepted");
        Ok(())
    }

    /// Settle a Running step: pay the reward and record a success
    ///
    /// Callable by the assigned agent's owner or an authorized oracle.
    /// The payout and the trust update are sequenced before the engine's
    /// own commit; if the trust update fails the payout is rolled back and
    /// the step stays Running.
    pub async fn complete_step(
        &self,
        caller: &AccountId,
        workflow_id: &WorkflowId,
        step_id: &StepId,
        output_ref: &str,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let wf = Self::get_mut(&mut workflows, workflow_id)?;

        if wf.status != WorkflowStatus::Active {
            return Err(TaskMeshError::WorkflowNotActive {
                workflow_id: workflow_id.to_string(),
                status: wf.status.to_string(),
            });
        }

        let step = Self::get_step_ref(wf, workflow_id, step_id)?;
        if step.status != StepStatus::Running {
            return Err(TaskMeshError::StepNotRunning {
                step_id: step_id.to_string(),
                status: step.status.to_string(),
            });
        }
        let reward = step.reward;
        let agent_id = step.assigned_agent.ok_or_else(|| {
            error!(workflow = %workflow_id, step = %step_id, "running step lost its assignment");
            TaskMeshError::MissingAssignment {
                step_id: step_id.to_string(),
            }
        })?;

        let agent = self.trust.get_agent(&agent_id).await?;
        if agent.owner != *caller && !self.oracles.read().await.contains(caller) {
            return Err(TaskMeshError::NotAssignedAgent {
                caller: caller.to_string(),
                step_id: step_id.to_string(),
            });
        }

        let spent = wf.spent.checked_add(reward)?;
        if spent > wf.total_budget {
            error!(
                workflow = %workflow_id,
                step = %step_id,
                spent = spent.raw(),
                budget = wf.total_budget.raw(),
                "settlement would overcommit escrow"
            );
            return Err(TaskMeshError::BudgetOvercommitted {
                workflow_id: workflow_id.to_string(),
                spent: spent.raw(),
                budget: wf.total_budget.raw(),
            });
        }

        // External calls first: payout, then trust. Either failure leaves
        // the step Running and the escrow untouched.
        self.assets.transfer_out(&agent.owner, reward).await?;
        if let Err(e) = self
            .trust
            .record_outcome(&self.settlement_account, &agent_id, true, reward)
            .await
        {
            if let Err(rollback) = self.assets.transfer_in(&agent.owner, reward).await {
                error!(
                    workflow = %workflow_id,
                    step = %step_id,
                    %rollback,
                    "payout rollback failed after trust rejection"
                );
            }
            return Err(e);
        }

        let now = Utc::now();
        wf.spent = spent;
        let step = Self::get_step_mut(wf, workflow_id, step_id)?;
        step.status = StepStatus::Completed;
        step.output_ref = Some(output_ref.to_string());
        step.resolved_at = Some(now);
        wf.updated_at = now;

        info!(workflow = %workflow_id, step = %step_id, %reward, "step completed");

        // Completion is a derived transition: the instant every step has
        // settled, the workflow is done.
        if wf.all_steps_completed() {
            wf.status = WorkflowStatus::Completed;
            info!(workflow = %workflow_id, spent = %wf.spent, "workflow completed");
        }
        Ok(())
    }

    /// Report a Running step as failed
    ///
    /// Callable by the assigned agent's owner, the workflow creator
    /// (overdue work), or an authorized oracle. Returns the reward to the
    /// unallocated budget and records a failure outcome; no funds move.
    pub async fn fail_step(
        &self,
        caller: &AccountId,
        workflow_id: &WorkflowId,
        step_id: &StepId,
        reason: &str,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let wf = Self::get_mut(&mut workflows, workflow_id)?;

        if wf.status != WorkflowStatus::Active {
            return Err(TaskMeshError::WorkflowNotActive {
                workflow_id: workflow_id.to_string(),
                status: wf.status.to_string(),
            });
        }

        let step = Self::get_step_ref(wf, workflow_id, step_id)?;
        if step.status != StepStatus::Running {
            return Err(TaskMeshError::StepNotRunning {
                step_id: step_id.to_string(),
                status: step.status.to_string(),
            });
        }
        let reward = step.reward;
        let agent_id = step.assigned_agent.ok_or_else(|| {
            error!(workflow = %workflow_id, step = %step_id, "running step lost its assignment");
            TaskMeshError::MissingAssignment {
                step_id: step_id.to_string(),
            }
        })?;

        let agent = self.trust.get_agent(&agent_id).await?;
        let authorized = agent.owner == *caller
            || wf.creator == *caller
            || self.oracles.read().await.contains(caller);
        if !authorized {
            return Err(TaskMeshError::NotAssignedAgent {
                caller: caller.to_string(),
                step_id: step_id.to_string(),
            });
        }

        let allocated = wf.allocated.checked_sub(reward)?;

        // Trust update sequenced before the engine commit
        self.trust
            .record_outcome(&self.settlement_account, &agent_id, false, TokenAmount::zero())
            .await?;

        let now = Utc::now();
        wf.allocated = allocated;
        let step = Self::get_step_mut(wf, workflow_id, step_id)?;
        step.status = StepStatus::Failed;
        step.resolved_at = Some(now);
        wf.updated_at = now;

        warn!(workflow = %workflow_id, step = %step_id, agent = %agent_id, reason, "step failed");
        Ok(())
    }

    /// Escalate a Failed step to a stake slash (creator only)
    ///
    /// Failure alone never slashes; this is the creator asserting provable
    /// misbehavior. Returns the amount slashed.
    pub async fn penalize_agent(
        &self,
        caller: &AccountId,
        workflow_id: &WorkflowId,
        step_id: &StepId,
        reason: &str,
    ) -> Result<TokenAmount> {
        let workflows = self.workflows.read().await;
        let wf = workflows
            .get(workflow_id)
            .ok_or_else(|| TaskMeshError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        Self::require_creator(caller, wf)?;

        let step = Self::get_step_ref(wf, workflow_id, step_id)?;
        if step.status != StepStatus::Failed {
            return Err(TaskMeshError::StepNotFailed {
                step_id: step_id.to_string(),
                status: step.status.to_string(),
            });
        }
        let agent_id = step.assigned_agent.ok_or_else(|| TaskMeshError::MissingAssignment {
            step_id: step_id.to_string(),
        })?;

        self.trust
            .slash(&self.settlement_account, &agent_id, reason)
            .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch a workflow record
    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<WorkflowRecord> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| TaskMeshError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    /// Fetch a single step record
    pub async fn get_step(&self, workflow_id: &WorkflowId, step_id: &StepId) -> Result<StepRecord> {
        let workflows = self.workflows.read().await;
        let wf = workflows
            .get(workflow_id)
            .ok_or_else(|| TaskMeshError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        Self::get_step_ref(wf, workflow_id, step_id).cloned()
    }

    /// Steps of a workflow in insertion order (the canonical topological seed)
    pub async fn get_workflow_steps(&self, workflow_id: &WorkflowId) -> Result<Vec<StepRecord>> {
        Ok(self.get_workflow(workflow_id).await?.steps)
    }

    /// Workflows created by an account
    pub async fn workflows_by_creator(&self, creator: &AccountId) -> Vec<WorkflowId> {
        self.by_creator
            .read()
            .await
            .get(creator)
            .cloned()
            .unwrap_or_default()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn get_mut<'a>(
        workflows: &'a mut HashMap<WorkflowId, WorkflowRecord>,
        workflow_id: &WorkflowId,
    ) -> Result<&'a mut WorkflowRecord> {
        workflows
            .get_mut(workflow_id)
            .ok_or_else(|| TaskMeshError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    fn get_step_ref<'a>(
        wf: &'a WorkflowRecord,
        workflow_id: &WorkflowId,
        step_id: &StepId,
    ) -> Result<&'a StepRecord> {
        wf.step(step_id).ok_or_else(|| TaskMeshError::StepNotFound {
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
        })
    }

    fn get_step_mut<'a>(
        wf: &'a mut WorkflowRecord,
        workflow_id: &WorkflowId,
        step_id: &StepId,
    ) -> Result<&'a mut StepRecord> {
        wf.step_mut(step_id).ok_or_else(|| TaskMeshError::StepNotFound {
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
        })
    }

    fn require_creator(caller: &AccountId, wf: &WorkflowRecord) -> Result<()> {
        if *caller != wf.creator {
            return Err(TaskMeshError::NotWorkflowCreator {
                caller: caller.to_string(),
                workflow_id: wf.id.to_string(),
            });
        }
        Ok(())
    }
}
