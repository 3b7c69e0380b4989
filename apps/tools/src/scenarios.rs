//! Scripted runs of the engine against the simulated remote.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use reconcile_core::{
    transform, CollectionController, EntityEvent, OrderEvent, ReorderOutcome, SubmitOutcome,
    ToggleController,
};
use shared::{
    domain::{Post, PostId, PostPatch, UserId},
    protocol::{EntitySnapshot, OrderSnapshot, ReportEntry, ScenarioReport},
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::info;

use crate::{
    config::Settings,
    remote::{LikeConfirmation, SimulatedRemote},
};

pub fn seed_posts() -> Vec<Post> {
    vec![
        Post::new(PostId(1), UserId(10), "Release notes"),
        Post::new(PostId(2), UserId(10), "Roadmap"),
        Post::new(PostId(3), UserId(11), "Incident review"),
    ]
}

/// Rapid like toggles on one post.
pub async fn toggle_likes(settings: &Settings, post_id: PostId, times: u32) -> Result<ScenarioReport> {
    let remote = Arc::new(SimulatedRemote::new(seed_posts(), settings));
    run_toggles(remote, settings, post_id, times, "toggle").await
}

/// Two rapid toggles where the first confirmation fails.
pub async fn failed_double_toggle(settings: &Settings) -> Result<ScenarioReport> {
    let remote = Arc::new(SimulatedRemote::new(seed_posts(), settings).with_failing_calls([1]));
    run_toggles(remote, settings, PostId(1), 2, "failed_double_toggle").await
}

async fn run_toggles(
    remote: Arc<SimulatedRemote>,
    settings: &Settings,
    post_id: PostId,
    times: u32,
    name: &str,
) -> Result<ScenarioReport> {
    let post = remote
        .posts()
        .await
        .into_iter()
        .find(|post| post.post_id == post_id)
        .with_context(|| format!("post {post_id} does not exist"))?;

    let toggle = ToggleController::new_with_settings(
        post_id,
        post.liked,
        Arc::new(LikeConfirmation::new(Arc::clone(&remote), post_id)),
        settings.engine_settings(),
    );
    let mut events = toggle.subscribe();

    let submissions: Vec<_> = (0..times).map(|_| toggle.toggle()).collect();
    info!(post_id = %post_id, times, "toggles submitted");
    let outcomes = join_all(submissions).await;

    let mut report = ScenarioReport::new(name);
    drain(&mut events, &mut report, |event: EntityEvent<PostId, bool>| {
        ReportEntry::Entity(EntitySnapshot {
            post: Post {
                liked: event.state,
                ..post.clone()
            },
            pending: event.pending,
            error: event.error.map(|error| error.message()),
        })
    });
    note_failures(&mut report, "toggle", &outcomes);
    report.note(format!("displayed liked = {}", toggle.value()));
    report.final_posts = Some(remote.posts().await);
    Ok(report)
}

/// Rapid successive title edits on one post.
pub async fn rename(settings: &Settings, post_id: PostId, titles: Vec<String>) -> Result<ScenarioReport> {
    let remote = Arc::new(SimulatedRemote::new(seed_posts(), settings));
    let posts = collection(&remote, settings).await?;
    let mut events = posts.subscribe();

    let mut submissions = Vec::with_capacity(titles.len());
    for title in titles {
        submissions.push(posts.update_one(&post_id, PostPatch::title(post_id, title))?);
    }
    let outcomes = join_all(submissions).await;

    let mut report = ScenarioReport::new("rename");
    drain(&mut events, &mut report, |event: EntityEvent<PostId, Post>| {
        ReportEntry::Entity(EntitySnapshot {
            post: event.state,
            pending: event.pending,
            error: event.error.map(|error| error.message()),
        })
    });
    note_failures(&mut report, "edit", &outcomes);
    if let Some(post) = posts.get(&post_id) {
        report.note(format!("displayed title = {:?}", post.title));
    }
    report.final_posts = Some(remote.posts().await);
    Ok(report)
}

/// Rapid successive reorders; only the last one may settle.
pub async fn reorder(settings: &Settings, orders: Vec<Vec<PostId>>) -> Result<ScenarioReport> {
    let remote = Arc::new(SimulatedRemote::new(seed_posts(), settings));
    let posts = collection(&remote, settings).await?;
    let mut events = posts.subscribe_order();

    let mut submissions = Vec::with_capacity(orders.len());
    for order in orders {
        submissions.push(posts.reorder(order)?);
    }
    let outcomes = join_all(submissions).await;

    let mut report = ScenarioReport::new("reorder");
    drain(&mut events, &mut report, |event: OrderEvent<PostId>| {
        ReportEntry::Order(OrderSnapshot {
            order: event.order,
            pending: event.pending,
        })
    });
    for (index, outcome) in outcomes.iter().enumerate() {
        match outcome {
            ReorderOutcome::Succeeded(_) => {}
            ReorderOutcome::Failed(error) => {
                report.note(format!("reorder {} failed: {error}", index + 1))
            }
            ReorderOutcome::Superseded => {
                report.note(format!("reorder {} superseded", index + 1))
            }
        }
    }
    report.note(format!("displayed order = {:?}", posts.order()));
    report.final_order = Some(remote.order().await);
    Ok(report)
}

async fn collection(
    remote: &Arc<SimulatedRemote>,
    settings: &Settings,
) -> Result<CollectionController<PostId, Post, PostPatch>> {
    let items = remote
        .posts()
        .await
        .into_iter()
        .map(|post| (post.post_id, post))
        .collect();
    let posts = CollectionController::new_with_settings(
        items,
        transform(|post: &Post, patch: &PostPatch| post.patched(patch)),
        Arc::clone(remote) as Arc<_>,
        Arc::clone(remote) as Arc<_>,
        settings.engine_settings(),
    )?;
    Ok(posts)
}

fn drain<T: Clone>(
    events: &mut broadcast::Receiver<T>,
    report: &mut ScenarioReport,
    mut entry: impl FnMut(T) -> ReportEntry,
) {
    loop {
        match events.try_recv() {
            Ok(event) => report.push(entry(event)),
            Err(TryRecvError::Lagged(skipped)) => report.note(format!("skipped {skipped} events")),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn note_failures<S>(report: &mut ScenarioReport, what: &str, outcomes: &[SubmitOutcome<S>]) {
    for (index, outcome) in outcomes.iter().enumerate() {
        if let Some(error) = outcome.error() {
            report.note(format!("{what} {} failed: {error}", index + 1));
        }
    }
}

#[cfg(test)]
#[path = "tests/scenario_tests.rs"]
mod tests;
