//! Conditional claim writes against a real database.

use crate::postgres::helpers::{StoreContext, insert_pending, store_context};
use chrono::Utc;
use eyre::ensure;
use hueforge::generation::{
    domain::{OwnerId, TaskStatus},
    ports::{ClaimConstraints, ClaimOutcome, TaskStore},
};
use rstest::rstest;
use std::sync::Arc;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_claims_yield_exactly_one_winner(
    #[future] store_context: eyre::Result<StoreContext>,
) -> eyre::Result<()> {
    let context = store_context.await?;
    let task = insert_pending(&context.store).await?;
    let store = Arc::new(context.store.clone());

    let racers = (0..8)
        .map(|_| {
            let racer = Arc::clone(&store);
            let task_id = task.id();
            tokio::spawn(async move {
                racer.claim(task_id, ClaimConstraints::none(), Utc::now()).await
            })
        })
        .collect::<Vec<_>>();
    let mut claimed = 0;
    let mut lost = 0;
    for racer in racers {
        match racer.await?? {
            ClaimOutcome::Claimed(winner) => {
                ensure!(winner.status() == TaskStatus::Processing);
                claimed += 1;
            }
            ClaimOutcome::NotPending => lost += 1,
        }
    }

    ensure!((claimed, lost) == (1, 7), "claimed {claimed}, lost {lost}");
    let stored = context.store.find_by_id(task.id()).await?;
    ensure!(stored.map(|t| t.status()) == Some(TaskStatus::Processing));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn claim_for_another_owner_is_not_pending(
    #[future] store_context: eyre::Result<StoreContext>,
) -> eyre::Result<()> {
    let context = store_context.await?;
    let task = insert_pending(&context.store).await?;

    let stranger = context
        .store
        .claim(task.id(), ClaimConstraints::for_owner(OwnerId::new()), Utc::now())
        .await?;
    let stored = context.store.find_by_id(task.id()).await?;
    let owner = context
        .store
        .claim(task.id(), ClaimConstraints::for_owner(task.owner_id()), Utc::now())
        .await?;

    ensure!(stranger == ClaimOutcome::NotPending);
    ensure!(stored.map(|t| t.status()) == Some(TaskStatus::Pending));
    ensure!(matches!(owner, ClaimOutcome::Claimed(_)));
    Ok(())
}
