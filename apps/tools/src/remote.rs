//! In-memory stand-in for the remote system of record.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use reconcile_core::{Confirmation, OrderConfirmation};
use shared::{
    domain::{Post, PostId, PostPatch},
    error::{ApiException, ErrorCode},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Settings;

pub struct SimulatedRemote {
    posts: Mutex<HashMap<PostId, Post>>,
    order: Mutex<Vec<PostId>>,
    calls: AtomicU64,
    latency: Duration,
    stagger: Duration,
    fail_every: Option<u64>,
    failing_calls: HashSet<u64>,
}

impl SimulatedRemote {
    pub fn new(posts: Vec<Post>, settings: &Settings) -> Self {
        let order = posts.iter().map(|post| post.post_id).collect();
        Self {
            posts: Mutex::new(posts.into_iter().map(|post| (post.post_id, post)).collect()),
            order: Mutex::new(order),
            calls: AtomicU64::new(0),
            latency: settings.latency(),
            stagger: settings.stagger(),
            fail_every: settings.fail_every,
            failing_calls: HashSet::new(),
        }
    }

    /// Forces the given 1-based call numbers to fail.
    pub fn with_failing_calls(mut self, calls: impl IntoIterator<Item = u64>) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn posts(&self) -> Vec<Post> {
        let order = self.order.lock().await.clone();
        let posts = self.posts.lock().await;
        order
            .iter()
            .filter_map(|post_id| posts.get(post_id).cloned())
            .collect()
    }

    pub async fn order(&self) -> Vec<PostId> {
        self.order.lock().await.clone()
    }

    pub async fn patch_post(&self, patch: PostPatch) -> Result<Post> {
        let call = self.round_trip().await?;
        let mut posts = self.posts.lock().await;
        let post = posts.get_mut(&patch.post_id).ok_or_else(|| {
            ApiException::new(
                ErrorCode::NotFound,
                format!("post {} does not exist", patch.post_id),
            )
        })?;
        *post = post.patched(&patch);
        info!(call, post_id = %patch.post_id, "remote applied patch");
        Ok(post.clone())
    }

    pub async fn set_liked(&self, post_id: PostId, liked: bool) -> Result<bool> {
        let post = self.patch_post(PostPatch::liked(post_id, liked)).await?;
        Ok(post.liked)
    }

    pub async fn reorder(&self, ids: Vec<PostId>) -> Result<Vec<PostId>> {
        let call = self.round_trip().await?;
        let mut order = self.order.lock().await;
        let current: HashSet<&PostId> = order.iter().collect();
        let proposed: HashSet<&PostId> = ids.iter().collect();
        if current != proposed || ids.len() != order.len() {
            return Err(ApiException::new(
                ErrorCode::Validation,
                "proposed order does not match the current posts",
            )
            .into());
        }
        *order = ids;
        info!(call, "remote applied reorder");
        Ok(order.clone())
    }

    /// Sleeps for this call's latency, then decides whether it fails.
    async fn round_trip(&self) -> Result<u64, ApiException> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let steps = u32::try_from(call - 1).unwrap_or(u32::MAX);
        let delay = self
            .latency
            .saturating_sub(self.stagger.saturating_mul(steps));
        debug!(call, delay_ms = delay.as_millis() as u64, "remote call in flight");
        tokio::time::sleep(delay).await;

        let injected = self.fail_every.is_some_and(|n| call % n == 0);
        if injected || self.failing_calls.contains(&call) {
            return Err(ApiException::new(
                ErrorCode::Unavailable,
                format!("simulated failure on call {call}"),
            ));
        }
        Ok(call)
    }
}

#[async_trait]
impl Confirmation<PostPatch, Post> for SimulatedRemote {
    async fn confirm(&self, payload: PostPatch) -> Result<Post> {
        self.patch_post(payload).await
    }
}

#[async_trait]
impl OrderConfirmation<PostId> for SimulatedRemote {
    async fn confirm_order(&self, ids: Vec<PostId>) -> Result<Vec<PostId>> {
        self.reorder(ids).await
    }
}

/// Confirms like toggles for one post.
pub struct LikeConfirmation {
    remote: Arc<SimulatedRemote>,
    post_id: PostId,
}

impl LikeConfirmation {
    pub fn new(remote: Arc<SimulatedRemote>, post_id: PostId) -> Self {
        Self { remote, post_id }
    }
}

#[async_trait]
impl Confirmation<bool, bool> for LikeConfirmation {
    async fn confirm(&self, liked: bool) -> Result<bool> {
        self.remote.set_liked(self.post_id, liked).await
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
