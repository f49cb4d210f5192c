// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Background task scheduling.
//!
//! Tasks are registered by name in a [`TaskRegistry`] and looked up each
//! time they run. [`SyncScheduler`] owns the timers:
//! - At most one live task per identity; registering an identity that is
//!   still scheduled is a no-op
//! - Device constraints (network, battery) are checked before every run
//! - A run that asks for a retry is re-attempted with exponential backoff
//!   plus jitter, up to a fixed number of attempts
//! - A panicking handler fails that run only; the task keeps its schedule

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use rand::Rng;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What a task run reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// Transient failure; run again after a backoff delay.
    Retry,
    /// Permanent failure; wait for the next period (or give up if one-off).
    Failure,
}

/// Passed to a handler on every run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub identity: String,
    pub task_name: String,
    /// 1 for the first attempt of a run.
    pub attempt: u32,
}

pub type TaskHandler = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, TaskOutcome> + Send + Sync>;

/// Dispatch table from task name to handler.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: DashMap<String, TaskHandler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `name`.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<TaskHandler> {
        self.handlers.get(name).map(|h| Arc::clone(h.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run the handler registered for `ctx.task_name`, if any.
    pub async fn dispatch(&self, ctx: TaskContext) -> Option<TaskOutcome> {
        let handler = self.get(&ctx.task_name)?;
        Some(handler(ctx).await)
    }
}

/// Device state consulted before each run.
pub trait DeviceConditions: Send + Sync {
    fn network_available(&self) -> bool;
    fn battery_low(&self) -> bool;
}

/// Conditions for hosts without battery or network reporting.
pub struct AlwaysAvailable;

impl DeviceConditions for AlwaysAvailable {
    fn network_available(&self) -> bool {
        true
    }

    fn battery_low(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConstraints {
    pub requires_network: bool,
    pub requires_battery_not_low: bool,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            requires_network: true,
            requires_battery_not_low: true,
        }
    }
}

impl TaskConstraints {
    pub fn none() -> Self {
        Self {
            requires_network: false,
            requires_battery_not_low: false,
        }
    }

    fn satisfied_by(&self, conditions: &dyn DeviceConditions) -> bool {
        (!self.requires_network || conditions.network_available())
            && (!self.requires_battery_not_low || !conditions.battery_low())
    }
}

/// Exponential backoff with jitter between retries of one run.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Total attempts per run, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(60 * 60),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following attempt number `attempt`.
    ///
    /// The base is `initial * 2^(attempt-1)` capped at `max`; the result is
    /// drawn uniformly from `[base/2, base]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self
            .initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        let half_ms = (base.as_millis() / 2) as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=half_ms);
        Duration::from_millis(half_ms + jitter_ms)
    }
}

/// Describes a task to schedule.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Stable identity; duplicate registrations collapse on it.
    pub identity: String,
    /// Registry name of the handler to run.
    pub task_name: String,
    pub constraints: TaskConstraints,
    pub initial_delay: Duration,
}

impl TaskRequest {
    pub fn new(identity: &str, task_name: &str) -> Self {
        Self {
            identity: identity.to_string(),
            task_name: task_name.to_string(),
            constraints: TaskConstraints::default(),
            initial_delay: Duration::ZERO,
        }
    }

    pub fn with_constraints(mut self, constraints: TaskConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum TaskKind {
    OneOff,
    Periodic(Duration),
}

struct ScheduledTask {
    kind: TaskKind,
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

/// Owns scheduled tasks; must be used inside a Tokio runtime.
///
/// Cancelling a task stops future runs and pending retries. A run that is
/// already executing is never interrupted.
pub struct SyncScheduler {
    registry: Arc<TaskRegistry>,
    conditions: Arc<dyn DeviceConditions>,
    backoff: BackoffPolicy,
    tasks: DashMap<String, ScheduledTask>,
}

impl SyncScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        conditions: Arc<dyn DeviceConditions>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            registry,
            conditions,
            backoff,
            tasks: DashMap::new(),
        }
    }

    /// Run `request` every `period`, first after `initial_delay`.
    ///
    /// Returns `false` (and changes nothing) if the identity is already live
    /// or `period` is zero.
    pub fn register_periodic(&self, request: TaskRequest, period: Duration) -> bool {
        if period.is_zero() {
            tracing::error!(identity = %request.identity, "Refusing periodic task with zero period");
            return false;
        }
        self.schedule(request, TaskKind::Periodic(period))
    }

    /// Run `request` once after `initial_delay`.
    ///
    /// Returns `false` if the identity is already live.
    pub fn register_one_off(&self, request: TaskRequest) -> bool {
        self.schedule(request, TaskKind::OneOff)
    }

    /// Stop the task registered under `identity`. A run in progress is
    /// allowed to finish; no further runs or retries start.
    pub fn cancel(&self, identity: &str) -> bool {
        match self.tasks.remove(identity) {
            Some((_, task)) => {
                task.stop.cancel();
                tracing::info!(identity, "Cancelled scheduled task");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for identity in self.identities() {
            self.cancel(&identity);
        }
    }

    /// Cancel every task and wait for runs in progress to finish.
    pub async fn shutdown(&self) {
        let mut stopping = Vec::new();
        for identity in self.identities() {
            if let Some((_, task)) = self.tasks.remove(&identity) {
                task.stop.cancel();
                stopping.push((identity, task.handle));
            }
        }

        for (identity, handle) in stopping {
            if let Err(e) = handle.await {
                tracing::error!(identity = %identity, error = %e, "Scheduled task ended abnormally");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    /// Whether `identity` has a task that has not finished.
    pub fn is_scheduled(&self, identity: &str) -> bool {
        self.tasks.get(identity).is_some_and(|task| task.is_live())
    }

    /// Number of live tasks.
    pub fn scheduled_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.is_live()).count()
    }

    fn identities(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.key().clone()).collect()
    }

    fn schedule(&self, request: TaskRequest, kind: TaskKind) -> bool {
        if !self.registry.contains(&request.task_name) {
            tracing::warn!(
                identity = %request.identity,
                task = %request.task_name,
                "No handler registered yet; it must be registered before the task runs"
            );
        }

        match self.tasks.entry(request.identity.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    tracing::debug!(
                        identity = %request.identity,
                        kind = ?entry.get().kind,
                        "Task already scheduled, keeping existing registration"
                    );
                    return false;
                }
                entry.insert(self.spawn(request, kind));
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn(request, kind));
            }
        }
        true
    }

    fn spawn(&self, request: TaskRequest, kind: TaskKind) -> ScheduledTask {
        tracing::info!(
            identity = %request.identity,
            task = %request.task_name,
            kind = ?kind,
            "Scheduling task"
        );

        let stop = CancellationToken::new();
        let runner = TaskRunner {
            registry: Arc::clone(&self.registry),
            conditions: Arc::clone(&self.conditions),
            backoff: self.backoff,
            request,
            stop: stop.clone(),
        };

        ScheduledTask {
            kind,
            handle: tokio::spawn(runner.drive(kind)),
            stop,
        }
    }
}

impl ScheduledTask {
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && !self.stop.is_cancelled()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        for task in self.tasks.iter() {
            task.stop.cancel();
        }
    }
}

/// Everything a spawned task needs, detached from the scheduler.
struct TaskRunner {
    registry: Arc<TaskRegistry>,
    conditions: Arc<dyn DeviceConditions>,
    backoff: BackoffPolicy,
    request: TaskRequest,
    stop: CancellationToken,
}

impl TaskRunner {
    async fn drive(self, kind: TaskKind) {
        let identity = self.request.identity.clone();

        if self.request.initial_delay.is_zero() || self.pause(self.request.initial_delay).await {
            match kind {
                TaskKind::OneOff => {
                    self.execute().await;
                }
                TaskKind::Periodic(period) => {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        // First tick completes immediately.
                        tokio::select! {
                            biased;
                            _ = self.stop.cancelled() => break,
                            _ = ticker.tick() => {}
                        }
                        self.execute().await;
                    }
                }
            }
        }

        tracing::debug!(identity = %identity, "Task runner exited");
    }

    /// Sleep for `delay`; `false` if the task was cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// One run, including backoff retries.
    async fn execute(&self) -> TaskOutcome {
        let identity = &self.request.identity;
        let mut attempt = 1;

        loop {
            if self.stop.is_cancelled() {
                return TaskOutcome::Retry;
            }

            let outcome = if self.request.constraints.satisfied_by(self.conditions.as_ref()) {
                let ctx = TaskContext {
                    identity: identity.clone(),
                    task_name: self.request.task_name.clone(),
                    attempt,
                };
                match AssertUnwindSafe(self.registry.dispatch(ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => {
                        tracing::error!(
                            identity = %identity,
                            task = %self.request.task_name,
                            "No handler registered for task"
                        );
                        return TaskOutcome::Failure;
                    }
                    Err(panic) => {
                        tracing::error!(
                            identity = %identity,
                            task = %self.request.task_name,
                            attempt,
                            panic = %panic_message(panic.as_ref()),
                            "Task handler panicked"
                        );
                        return TaskOutcome::Failure;
                    }
                }
            } else {
                tracing::info!(identity = %identity, "Task constraints not met, deferring");
                TaskOutcome::Retry
            };

            match outcome {
                TaskOutcome::Retry if attempt < self.backoff.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(
                        identity = %identity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Task asked for retry, backing off"
                    );
                    if !self.pause(delay).await {
                        tracing::debug!(identity = %identity, "Task cancelled during backoff");
                        return TaskOutcome::Retry;
                    }
                    attempt += 1;
                }
                TaskOutcome::Retry => {
                    tracing::warn!(identity = %identity, attempt, "Task retries exhausted");
                    return TaskOutcome::Retry;
                }
                other => {
                    tracing::debug!(identity = %identity, attempt, outcome = ?other, "Task run finished");
                    return other;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
