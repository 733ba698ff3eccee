//! explicit owner for detached background work.
//!
//! supply top-ups and indexing workers must outlive the request that
//! triggered them, but unsupervised `tokio::spawn` calls make leaks and
//! shutdown behavior invisible. everything detached goes through a
//! [`Spawner`] handed out at assembly time instead.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use futures::future::join_all;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct Spawner {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Spawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// spawns a detached task. the task runs to completion regardless of
    /// what happens to the caller; cancelling the request that spawned it
    /// does not cancel the task.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.push(tokio::spawn(task));
    }

    /// waits for every task spawned so far. tests use this to observe
    /// background effects deterministically.
    pub async fn join(&self) {
        let drained: Vec<JoinHandle<()>> = self.lock().drain(..).collect();
        for result in join_all(drained).await {
            if let Err(error) = result {
                tracing::warn!(%error, "background task did not finish cleanly");
            }
        }
    }

    /// aborts everything still running. shutdown hook.
    pub fn shutdown(&self) {
        for handle in self.lock().drain(..) {
            handle.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
