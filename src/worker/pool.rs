//! Worker pool with deadline-triggered recycling.
//!
//! A pool owns a fixed number of worker slots. Calls run on tokio's blocking
//! thread pool because worker I/O is plain blocking pipe traffic; the
//! deadline is enforced on the async side with `tokio::time::timeout`.
//!
//! There is no per-call cancellation. When a deadline passes, the whole pool
//! is recycled: every worker process group is SIGKILLed, the blocking task
//! that was waiting on it observes EOF, and its result is thrown away.

use super::proc::{Proc, kill_group};
use super::protocol::{WorkRequest, WorkResponse};
use super::signals::{TerminationReason, analyze_wait_status};
use super::spawn::{WorkerCommand, spawn_worker};
use crate::error::{BridgeError, Result};
use nix::unistd::Pid;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

/// Grace period for workers to honour an exit request on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one pool incarnation. Changes on every recycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker processes to spawn.
    pub worker_count: usize,
    /// How to launch each worker.
    pub command: WorkerCommand,
}

/// Result of waiting on a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The operation returned a value.
    Completed(Value),
    /// The operation (or its worker) failed; carries the diagnostic.
    Failed(String),
    /// The deadline elapsed first.
    TimedOut,
}

/// Handle to one in-flight call.
#[must_use = "a submission does nothing unless it is waited on"]
pub struct PendingSubmission {
    handle: JoinHandle<Result<Value>>,
    method: String,
    submitted_at: Instant,
}

/// A single worker in the pool.
struct Worker {
    /// Process handle (None if the worker needs a respawn).
    proc: Option<Proc>,
    /// Whether the startup Ready signal has been consumed.
    ready: bool,
    command: WorkerCommand,
    id: usize,
    /// Current pid, readable without taking the worker lock.
    pid: Arc<AtomicI32>,
    /// Set once the owning pool has been recycled or dropped.
    retired: Arc<AtomicBool>,
    jobs_completed: usize,
    respawns: usize,
}

impl Worker {
    fn vacant(
        id: usize,
        command: WorkerCommand,
        pid: Arc<AtomicI32>,
        retired: Arc<AtomicBool>,
    ) -> Self {
        Self {
            proc: None,
            ready: false,
            command,
            id,
            pid,
            retired,
            jobs_completed: 0,
            respawns: 0,
        }
    }

    /// Spawn the subprocess without waiting for it to become ready.
    fn spawn(&mut self) -> Result<()> {
        let proc = spawn_worker(&self.command)?;
        self.pid.store(proc.pid().as_raw(), Ordering::Release);
        trace!(worker_id = self.id, pid = proc.pid().as_raw(), "Spawned worker");
        self.proc = Some(proc);
        self.ready = false;
        Ok(())
    }

    /// Ensure the worker is spawned and has announced itself.
    fn ensure_ready(&mut self) -> Result<()> {
        if self.proc.is_none() {
            self.respawns += 1;
            self.spawn()?;
        }
        if self.ready {
            return Ok(());
        }

        let proc = self
            .proc
            .as_mut()
            .ok_or_else(|| BridgeError::Worker(format!("Worker {} not spawned", self.id)))?;
        match proc.recv()? {
            Some(WorkResponse::Ready) => {
                self.ready = true;
                Ok(())
            }
            Some(other) => {
                self.discard();
                Err(BridgeError::Worker(format!(
                    "Worker {} sent unexpected response instead of Ready: {:?}",
                    self.id, other
                )))
            }
            None => Err(self.handle_death("starting up")),
        }
    }

    /// Run one operation and wait for its response.
    fn call(&mut self, method: &str, params: Map<String, Value>) -> Result<Value> {
        let request_start = Instant::now();
        self.deliver(&WorkRequest::call(method, params), method)?;

        let proc = self
            .proc
            .as_mut()
            .ok_or_else(|| BridgeError::Worker(format!("Worker {} not available", self.id)))?;
        let response = proc.recv();

        trace!(
            worker_id = self.id,
            method,
            total_ipc_time_ms = request_start.elapsed().as_millis(),
            "Worker IPC request/response"
        );

        match response {
            Ok(Some(WorkResponse::Result { value })) => {
                self.jobs_completed += 1;
                Ok(value)
            }
            Ok(Some(WorkResponse::Error { message })) => {
                self.jobs_completed += 1;
                Err(BridgeError::Operation(message))
            }
            Ok(Some(WorkResponse::Ready)) => {
                self.discard();
                Err(BridgeError::Worker(format!(
                    "Worker {} sent Ready instead of a result",
                    self.id
                )))
            }
            Ok(None) => Err(self.handle_death(&format!("running '{}'", method))),
            Err(e) => Err(self.death_or(e, &format!("running '{}'", method))),
        }
    }

    /// Hand `request` to a live worker.
    ///
    /// A worker that died while idle is replaced first. A failed send means
    /// the request never ran, so it is retried once on a fresh worker.
    fn deliver(&mut self, request: &WorkRequest, method: &str) -> Result<()> {
        let context = format!("receiving '{}'", method);
        let mut attempt = 1;
        loop {
            if self.retired.load(Ordering::Acquire) {
                return Err(BridgeError::Worker(format!(
                    "Worker {} belongs to a recycled pool",
                    self.id
                )));
            }
            self.vacate_if_exited();
            self.ensure_ready()?;

            let proc = self
                .proc
                .as_mut()
                .ok_or_else(|| BridgeError::Worker(format!("Worker {} not available", self.id)))?;
            let Err(e) = proc.send(request) else {
                return Ok(());
            };

            let err = self.death_or(e, &context);
            if attempt == 2 {
                return Err(err);
            }
            debug!(worker_id = self.id, error = %err, "Request not delivered, retrying on a fresh worker");
            attempt += 1;
        }
    }

    /// Leave the slot vacant if its worker exited between calls.
    fn vacate_if_exited(&mut self) {
        if self.proc.as_mut().is_some_and(|proc| !proc.is_running()) {
            let _ = self.handle_death("idle");
        }
    }

    /// Prefer a death report over a raw I/O error when the worker has exited.
    fn death_or(&mut self, err: BridgeError, context: &str) -> BridgeError {
        let exited = self.proc.as_mut().is_some_and(|proc| !proc.is_running());
        if exited {
            self.handle_death(context)
        } else {
            self.discard();
            err
        }
    }

    /// Record the death of the worker and leave the slot vacant.
    ///
    /// The slot is respawned on its next call.
    fn handle_death(&mut self, context: &str) -> BridgeError {
        // Clear the pid before reaping so a concurrent kill cannot hit a reused pid.
        self.pid.store(0, Ordering::Release);
        let reason = match self.proc.take() {
            Some(mut proc) => match proc.wait_timeout(Duration::from_millis(200)) {
                Some(status) => analyze_wait_status(status),
                None => TerminationReason::Unknown,
            },
            None => TerminationReason::Unknown,
        };
        self.ready = false;

        if self.retired.load(Ordering::Acquire) {
            debug!(worker_id = self.id, reason = %reason, "Retired worker exited");
        } else {
            warn!(
                worker_id = self.id,
                reason = %reason,
                context,
                crash = reason.is_crash(),
                "Worker died unexpectedly"
            );
        }

        BridgeError::WorkerDied {
            worker: self.id,
            reason,
            context: context.to_string(),
        }
    }

    /// Drop the process handle, killing the worker.
    fn discard(&mut self) {
        self.pid.store(0, Ordering::Release);
        self.ready = false;
        self.proc = None;
    }

    /// Shutdown the worker gracefully.
    fn shutdown(&mut self) {
        self.pid.store(0, Ordering::Release);
        if let Some(mut proc) = self.proc.take() {
            let _ = proc.stop(SHUTDOWN_GRACE);
        }
    }
}

/// One worker plus the lock-free view of its pid used for killing.
struct Slot {
    pid: Arc<AtomicI32>,
    worker: Mutex<Worker>,
}

impl Slot {
    fn new(id: usize, command: &WorkerCommand, retired: &Arc<AtomicBool>) -> Self {
        let pid = Arc::new(AtomicI32::new(0));
        let worker = Worker::vacant(id, command.clone(), Arc::clone(&pid), Arc::clone(retired));
        Self {
            pid,
            worker: Mutex::new(worker),
        }
    }

    /// SIGKILL this slot's process group, if it has a live worker.
    fn kill(&self) {
        let raw = self.pid.swap(0, Ordering::AcqRel);
        if raw > 0 {
            kill_group(Pid::from_raw(raw));
        }
    }
}

/// The live worker processes of one pool incarnation.
struct Generation {
    id: PoolId,
    slots: Arc<Vec<Slot>>,
    retired: Arc<AtomicBool>,
    /// Round-robin counter for worker selection when all are busy.
    next_worker: Arc<AtomicUsize>,
}

impl Generation {
    /// Build slots and spawn a process into each.
    ///
    /// With `strict`, the first spawn failure aborts; otherwise the slot is
    /// left vacant and spawned again on first use.
    fn spawn(config: &WorkerPoolConfig, strict: bool) -> Result<Self> {
        let retired = Arc::new(AtomicBool::new(false));
        let slots: Vec<Slot> = (0..config.worker_count)
            .map(|id| Slot::new(id, &config.command, &retired))
            .collect();

        for slot in &slots {
            let mut worker = slot.worker.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = worker.spawn() {
                if strict {
                    return Err(e);
                }
                warn!(worker_id = worker.id, error = %e, "Worker failed to spawn; will retry on first use");
            }
        }

        Ok(Self {
            id: PoolId::next(),
            slots: Arc::new(slots),
            retired,
            next_worker: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Mark every worker retired and SIGKILL them all, busy or not.
    fn terminate(&self) {
        self.retired.store(true, Ordering::Release);
        for slot in self.slots.iter() {
            slot.kill();
        }
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// A pool of worker subprocesses.
pub struct WorkerPool {
    current: Generation,
    config: WorkerPoolConfig,
    recycles: usize,
}

impl WorkerPool {
    /// Create a new worker pool and spawn its worker processes.
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(BridgeError::Config(
                "worker pool needs at least one worker".into(),
            ));
        }

        let current = Generation::spawn(&config, true)?;
        info!(
            pool = %current.id,
            workers = config.worker_count,
            "Worker pool started"
        );

        Ok(Self {
            current,
            config,
            recycles: 0,
        })
    }

    /// Identity of the current pool incarnation.
    pub fn id(&self) -> PoolId {
        self.current.id
    }

    /// Get the number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.current.slots.len()
    }

    /// Hand a call to a worker. The call starts running immediately.
    ///
    /// The first idle worker is used; when all are busy the call queues on
    /// one of them in round-robin order.
    pub fn submit(&self, method: impl Into<String>, params: Map<String, Value>) -> PendingSubmission {
        let method = method.into();
        let slots = Arc::clone(&self.current.slots);
        let next_worker = Arc::clone(&self.current.next_worker);
        let call_method = method.clone();

        let handle = tokio::task::spawn_blocking(move || {
            for slot in slots.iter() {
                if let Ok(mut worker) = slot.worker.try_lock() {
                    return worker.call(&call_method, params);
                }
            }

            let idx = next_worker.fetch_add(1, Ordering::Relaxed) % slots.len();
            let mut worker = slots[idx]
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            worker.call(&call_method, params)
        });

        PendingSubmission {
            handle,
            method,
            submitted_at: Instant::now(),
        }
    }

    /// Wait for a submission to resolve, or for `deadline` to elapse.
    ///
    /// A timed-out submission is abandoned, not joined. Callers are expected
    /// to [`recycle`](Self::recycle) the pool, which is what stops it.
    #[instrument(level = "debug", skip(self, pending), fields(method = %pending.method, pool = %self.id()))]
    pub async fn wait(&self, pending: PendingSubmission, deadline: Duration) -> Outcome {
        let PendingSubmission {
            handle,
            submitted_at,
            ..
        } = pending;

        let outcome = match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(Ok(value))) => Outcome::Completed(value),
            Ok(Ok(Err(e))) => Outcome::Failed(e.to_string()),
            Ok(Err(e)) => Outcome::Failed(format!("Worker task failed: {}", e)),
            Err(_) => Outcome::TimedOut,
        };

        trace!(
            elapsed_ms = submitted_at.elapsed().as_millis(),
            timed_out = matches!(outcome, Outcome::TimedOut),
            "Submission settled"
        );
        outcome
    }

    /// Kill every worker immediately and replace the pool with fresh ones.
    ///
    /// Work in flight on the old workers is discarded.
    pub fn recycle(&mut self) {
        let fresh = match Generation::spawn(&self.config, false) {
            Ok(generation) => generation,
            Err(e) => {
                // Non-strict spawning only fails on internal errors.
                warn!(error = %e, "Failed to prepare replacement workers");
                return;
            }
        };

        let old = std::mem::replace(&mut self.current, fresh);
        old.terminate();
        self.recycles += 1;

        info!(
            old_pool = %old.id,
            new_pool = %self.current.id,
            recycles = self.recycles,
            "Worker pool recycled"
        );

        // Reaping the killed processes blocks briefly; keep it off the runtime.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || drop(old));
            }
            Err(_) => drop(old),
        }
    }

    /// Shutdown all idle workers gracefully and kill the rest.
    pub fn shutdown(&self) {
        for slot in self.current.slots.iter() {
            match slot.worker.try_lock() {
                Ok(mut worker) => worker.shutdown(),
                Err(_) => slot.kill(),
            }
        }
    }

    /// Get statistics about the worker pool.
    pub fn stats(&self) -> WorkerPoolStats {
        let mut total_jobs = 0;
        let mut total_respawns = 0;

        for slot in self.current.slots.iter() {
            if let Ok(worker) = slot.worker.try_lock() {
                total_jobs += worker.jobs_completed;
                total_respawns += worker.respawns;
            }
        }

        WorkerPoolStats {
            pool: self.current.id,
            worker_count: self.worker_count(),
            total_jobs_completed: total_jobs,
            total_respawns,
            recycles: self.recycles,
        }
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    /// Current pool incarnation.
    pub pool: PoolId,
    /// Number of workers in the pool.
    pub worker_count: usize,
    /// Jobs completed by idle workers of the current incarnation.
    pub total_jobs_completed: usize,
    /// Workers respawned after dying, in the current incarnation.
    pub total_respawns: usize,
    /// Number of recycles over the pool's lifetime.
    pub recycles: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// A "worker" that announces itself and then echoes a canned result per line.
    fn shell_worker(script: &str) -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: 2,
            command: WorkerCommand {
                program: PathBuf::from("sh"),
                args: vec!["-c".into(), script.into()],
            },
        }
    }

    const ECHO_WORKER: &str = r#"echo '{"type":"ready"}'; while read -r line; do echo '{"type":"result","value":42}'; done"#;

    /// Block until `pid` has exited but is not yet reaped.
    fn wait_until_zombie(pid: i32) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
            let state = stat.rsplit_once(')').and_then(|(_, rest)| rest.trim_start().chars().next());
            if state == Some('Z') {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("process {} did not exit", pid);
    }

    #[test]
    fn test_pool_ids_are_unique() {
        let a = PoolId::next();
        let b = PoolId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("pool-"));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let mut config = shell_worker(ECHO_WORKER);
        config.worker_count = 0;
        assert!(matches!(WorkerPool::new(config), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_spawn_failure_is_reported_at_startup() {
        let config = WorkerPoolConfig {
            worker_count: 1,
            command: WorkerCommand {
                program: PathBuf::from("/nonexistent/worker"),
                args: Vec::new(),
            },
        };
        assert!(WorkerPool::new(config).is_err());
    }

    #[tokio::test]
    async fn test_completed_call() {
        let pool = WorkerPool::new(shell_worker(ECHO_WORKER)).unwrap();
        let pending = pool.submit("anything", Map::new());
        let outcome = pool.wait(pending, Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::Completed(Value::from(42)));
        assert_eq!(pool.stats().recycles, 0);
    }

    #[tokio::test]
    async fn test_error_response_is_failed() {
        let script = r#"echo '{"type":"ready"}'; while read -r line; do echo '{"type":"error","message":"bad input"}'; done"#;
        let pool = WorkerPool::new(shell_worker(script)).unwrap();
        let id = pool.id();
        let outcome = pool.wait(pool.submit("convert", Map::new()), Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::Failed("bad input".to_string()));
        assert_eq!(pool.id(), id);
    }

    #[tokio::test]
    async fn test_hang_times_out_and_recycle_replaces_pool() {
        let script = r#"echo '{"type":"ready"}'; read -r line; sleep 30"#;
        let mut pool = WorkerPool::new(shell_worker(script)).unwrap();
        let before = pool.id();

        let outcome = pool
            .wait(pool.submit("slow", Map::new()), Duration::from_millis(300))
            .await;
        assert_eq!(outcome, Outcome::TimedOut);

        pool.recycle();
        assert_ne!(pool.id(), before);
        assert_eq!(pool.worker_count(), 2);
        assert_eq!(pool.stats().recycles, 1);
    }

    #[tokio::test]
    async fn test_worker_death_is_failed_and_slot_respawns() {
        // First incarnation of each worker dies on its first call.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("died");
        let script = format!(
            r#"echo '{{"type":"ready"}}'; read -r line; if [ ! -e {m} ]; then touch {m}; kill -SEGV $$; fi; echo '{{"type":"result","value":"ok"}}'; while read -r line; do echo '{{"type":"result","value":"ok"}}'; done"#,
            m = marker.display()
        );
        let mut config = shell_worker(&script);
        config.worker_count = 1;
        let pool = WorkerPool::new(config).unwrap();
        let id = pool.id();

        let outcome = pool.wait(pool.submit("convert", Map::new()), Duration::from_secs(5)).await;
        match outcome {
            Outcome::Failed(message) => assert!(message.contains("SIGSEGV"), "{message}"),
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert_eq!(pool.id(), id);

        let outcome = pool.wait(pool.submit("convert", Map::new()), Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::Completed(Value::from("ok")));
    }

    #[test]
    fn test_death_found_on_send_path_names_signal() {
        let mut worker = Worker::vacant(
            0,
            shell_worker(ECHO_WORKER).command,
            Arc::new(AtomicI32::new(0)),
            Arc::new(AtomicBool::new(false)),
        );
        worker.spawn().unwrap();
        worker.ensure_ready().unwrap();

        let pid = worker.pid.load(Ordering::Acquire);
        kill_group(Pid::from_raw(pid));
        wait_until_zombie(pid);

        let err = worker.death_or(
            BridgeError::Worker("Failed to send to worker: Broken pipe".into()),
            "receiving 'convert'",
        );
        let message = err.to_string();
        assert!(message.contains("SIGKILL"), "{message}");
        assert!(worker.proc.is_none());
        assert_eq!(worker.pid.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_worker_killed_while_idle_is_replaced_before_the_call() {
        let mut config = shell_worker(ECHO_WORKER);
        config.worker_count = 1;
        let pool = WorkerPool::new(config).unwrap();
        let id = pool.id();

        let outcome = pool.wait(pool.submit("convert", Map::new()), Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::Completed(Value::from(42)));

        let pid = pool.current.slots[0].pid.load(Ordering::Acquire);
        kill_group(Pid::from_raw(pid));
        wait_until_zombie(pid);

        let outcome = pool.wait(pool.submit("convert", Map::new()), Duration::from_secs(5)).await;
        assert_eq!(outcome, Outcome::Completed(Value::from(42)));
        assert_eq!(pool.id(), id);
        assert_eq!(pool.stats().total_respawns, 1);
        assert_ne!(pool.current.slots[0].pid.load(Ordering::Acquire), pid);
    }
}
