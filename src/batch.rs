//! Bounded concurrent execution across hosts.
//!
//! One task is spawned per host on a [`JoinSet`]; a [`Semaphore`] sized to
//! the worker count limits how many run at once. Results are collected in
//! completion order. A task that panics still yields exactly one
//! [`OperationResult`], keyed back to its host through the task id.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::RunConfig;
use crate::probe::Probe;
use crate::protocol::{DeviceRunner, Operation};
use crate::report::OperationResult;
use crate::session::Connector;

/// Runs one task per host with at most `max_workers` in flight.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    max_workers: usize,
}

impl BatchExecutor {
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.max_workers)
    }

    /// `min(max_workers, hosts)`, never below one.
    pub fn worker_count(&self, hosts: usize) -> usize {
        self.max_workers.min(hosts).max(1)
    }

    /// Runs `task` for every host and waits for all of them.
    ///
    /// The returned vector holds one result per host, in completion order.
    pub async fn run<F, Fut>(&self, hosts: Vec<Ipv4Addr>, task: F) -> Vec<OperationResult>
    where
        F: Fn(Ipv4Addr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        let workers = self.worker_count(hosts.len());
        info!("Processing {} hosts with {} workers", hosts.len(), workers);

        let semaphore = Arc::new(Semaphore::new(workers));
        let task = Arc::new(task);
        let mut set = JoinSet::new();
        let mut owners = HashMap::with_capacity(hosts.len());

        for host in hosts {
            let semaphore = Arc::clone(&semaphore);
            let task = Arc::clone(&task);
            let handle = set.spawn(async move {
                // The semaphore is never closed; a failed acquire only drops the bound.
                let _permit = semaphore.acquire_owned().await.ok();
                task(host).await
            });
            owners.insert(handle.id(), host);
        }

        let mut results = Vec::with_capacity(owners.len());
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    owners.remove(&id);
                    debug!("[{}] finished: {}", result.host, result.detail);
                    results.push(result);
                }
                Err(e) => {
                    let Some(host) = owners.remove(&e.id()) else {
                        error!("Task {} failed with no owning host: {}", e.id(), e);
                        continue;
                    };
                    let detail = if e.is_panic() {
                        format!("task panicked: {}", panic_message(e.into_panic()))
                    } else {
                        format!("task failed: {e}")
                    };
                    error!("[{}] {}", host, detail);
                    results.push(OperationResult::error(host, detail));
                }
            }
        }
        results
    }

    /// Runs `operation` on every host through a shared [`DeviceRunner`].
    pub async fn run_operation<C, P>(
        &self,
        runner: Arc<DeviceRunner<C, P>>,
        hosts: Vec<Ipv4Addr>,
        operation: Operation,
    ) -> Vec<OperationResult>
    where
        C: Connector + 'static,
        P: Probe + 'static,
    {
        let operation = Arc::new(operation);
        self.run(hosts, move |host| {
            let runner = Arc::clone(&runner);
            let operation = Arc::clone(&operation);
            async move { runner.run(host, &operation).await }
        })
        .await
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}
