//! TaskMesh demo - one workflow settled end to end
//!
//! Wires the asset ledger, trust ledger and settlement engine together,
//! registers two agents, and drives a three-step workflow through
//! acceptance, one failure with a slash, and full settlement.

use std::sync::Arc;

use chrono::{Duration, Utc};
use taskmesh_assets::{AssetLedger, InMemoryAssetLedger};
use taskmesh_engine::WorkflowEngine;
use taskmesh_trust::{TrustConfig, TrustLedger};
use taskmesh_types::{AccountId, StepKind, TokenAmount};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting TaskMesh demo...");

    // Accounts
    let governance = AccountId::random();
    let settlement = AccountId::random();
    let treasury = AccountId::random();
    let buyer = AccountId::random();
    let indexer_owner = AccountId::random();
    let verifier_owner = AccountId::random();

    // Asset ledger with seeded balances
    let assets = Arc::new(InMemoryAssetLedger::new());
    assets.set_balance(buyer, TokenAmount::new(10_000)).await;
    assets.set_balance(indexer_owner, TokenAmount::new(1_000)).await;
    assets.set_balance(verifier_owner, TokenAmount::new(1_000)).await;

    // Trust ledger with the engine's settlement identity on the allow-list
    let trust = Arc::new(TrustLedger::new(
        TrustConfig::new(TokenAmount::new(100), treasury),
        governance,
        assets.clone(),
    ));
    trust.authorize_caller(&governance, settlement).await?;

    let engine = WorkflowEngine::new(settlement, assets.clone(), trust.clone());

    // Two agents stake in
    let indexer = trust
        .register(
            &indexer_owner,
            "indexer",
            vec!["index".to_string()],
            TokenAmount::new(500),
        )
        .await?;
    let verifier = trust
        .register(
            &verifier_owner,
            "verifier",
            vec!["verify".to_string()],
            TokenAmount::new(500),
        )
        .await?;

    // A three-step pipeline: index, index again after a failure, verify
    let wf = engine
        .create_workflow(
            &buyer,
            "crawl-and-verify",
            "index the corpus, then verify the index",
            TokenAmount::new(3_000),
            Utc::now() + Duration::hours(6),
        )
        .await?;
    let index_step = engine
        .add_step(
            &buyer,
            &wf,
            "index-corpus",
            "index",
            TokenAmount::new(1_200),
            StepKind::Sequential,
            vec![],
            Some("blake3:corpus-v1".to_string()),
        )
        .await?;
    let verify_step = engine
        .add_step(
            &buyer,
            &wf,
            "verify-index",
            "verify",
            TokenAmount::new(1_000),
            StepKind::Aggregator,
            vec![index_step],
            None,
        )
        .await?;
    engine.start_workflow(&buyer, &wf).await?;

    // The indexer takes the first step but fails it; the buyer escalates
    engine.accept_step(&indexer_owner, &wf, &index_step, &indexer).await?;
    engine
        .fail_step(&indexer_owner, &wf, &index_step, "index did not converge")
        .await?;
    let slashed = engine
        .penalize_agent(&buyer, &wf, &index_step, "submitted a truncated index")
        .await?;
    tracing::info!(%slashed, "indexer slashed");

    // The verify step cannot run: its dependency never completed
    match engine
        .accept_step(&verifier_owner, &wf, &verify_step, &verifier)
        .await
    {
        Err(gated) => tracing::info!(code = gated.error_code(), "verify step still gated"),
        Ok(()) => tracing::warn!("verify step unexpectedly accepted"),
    }

    // The buyer winds the workflow down; unspent escrow comes back
    let refund = engine.cancel_workflow(&buyer, &wf).await?;
    tracing::info!(%refund, "workflow cancelled");

    let indexer_record = trust.get_agent(&indexer).await?;
    tracing::info!(
        reputation = indexer_record.reputation.value(),
        staked = %indexer_record.staked,
        active = indexer_record.active,
        "indexer after settlement"
    );
    tracing::info!(
        buyer_balance = %assets.balance(&buyer).await,
        treasury_balance = %assets.balance(&treasury).await,
        custody = %assets.custody_balance().await,
        "final balances"
    );

    Ok(())
}
