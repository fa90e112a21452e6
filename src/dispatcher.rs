//! Per-connection request dispatcher.
//!
//! A dispatcher owns one worker pool. Every request is submitted to the
//! pool, awaited against the configured deadline, and answered with exactly
//! one response envelope. A deadline miss recycles the whole pool before the
//! reply goes out.

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::{BridgeError, Result};
use crate::worker::{Outcome, PoolId, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Diagnostic sent back when an operation misses its deadline.
pub const TIMEOUT_MESSAGE: &str = "File format conversion timed out! This is due either to a large input file or a segmentation fault in the underlying open babel library.";

/// Settings shared by every dispatcher of a server.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deadline for a single operation.
    pub timeout: Duration,
    pub pool: WorkerPoolConfig,
}

/// Serves the requests of one connection, one at a time.
pub struct Dispatcher {
    timeout: Duration,
    pool: WorkerPool,
}

impl Dispatcher {
    /// Create a dispatcher and start its workers.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.pool)?;
        Ok(Self {
            timeout: config.timeout,
            pool,
        })
    }

    /// Like [`new`](Self::new), but spawns the workers off the async runtime.
    pub async fn start(config: DispatcherConfig) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::new(config))
            .await
            .map_err(|e| BridgeError::Worker(format!("Worker startup task failed: {}", e)))?
    }

    /// Identity of the pool currently serving requests.
    pub fn pool_id(&self) -> PoolId {
        self.pool.id()
    }

    pub fn stats(&self) -> WorkerPoolStats {
        self.pool.stats()
    }

    /// Run one request and build its response.
    pub async fn handle(&mut self, request: RequestEnvelope) -> ResponseEnvelope {
        let RequestEnvelope { id, method, params } = request;
        debug!(id = %id, method = %method, params = ?params, "Dispatching request");

        let pending = self.pool.submit(method.as_str(), params);
        let response = match self.pool.wait(pending, self.timeout).await {
            Outcome::Completed(value) => ResponseEnvelope::success(id, value),
            Outcome::Failed(diagnostic) => {
                debug!(method = %method, diagnostic = %diagnostic, "Operation failed");
                ResponseEnvelope::failure(id, diagnostic)
            }
            Outcome::TimedOut => {
                warn!(
                    method = %method,
                    timeout_secs = self.timeout.as_secs_f64(),
                    pool = %self.pool.id(),
                    "Operation timed out, recycling worker pool"
                );
                self.pool.recycle();
                ResponseEnvelope::failure(id, TIMEOUT_MESSAGE)
            }
        };

        debug!(id = %response.id, error = response.error, result = %response.result, "Sending response");
        response
    }

    /// Parse a raw frame and run it. Malformed frames never reach the pool.
    pub async fn handle_frame(&mut self, frame: &str) -> ResponseEnvelope {
        debug!(frame = %frame, "Received frame");
        match RequestEnvelope::parse(frame) {
            Ok(request) => self.handle(request).await,
            Err(malformed) => {
                debug!(reason = %malformed.reason, "Rejecting malformed frame");
                ResponseEnvelope::from(malformed)
            }
        }
    }

    /// Stop the workers. Idle ones are asked to exit, busy ones are killed.
    pub async fn close(self) {
        let pool = self.pool;
        let stats = pool.stats();
        let closed = tokio::task::spawn_blocking(move || {
            pool.shutdown();
            drop(pool);
        })
        .await;
        if let Err(e) = closed {
            warn!(error = %e, "Worker pool shutdown task failed");
        }
        info!(
            pool = %stats.pool,
            jobs = stats.total_jobs_completed,
            recycles = stats.recycles,
            "Dispatcher closed"
        );
    }
}

/// The dispatcher of one transport connection, started on demand.
///
/// If the workers cannot be started, each frame is answered with a failure
/// naming the startup error and startup is tried again on the next frame.
pub struct Session {
    config: DispatcherConfig,
    dispatcher: Option<Dispatcher>,
}

impl Session {
    /// Start the connection's workers, keeping the session open on failure.
    pub async fn open(config: DispatcherConfig) -> Self {
        let dispatcher = match Dispatcher::start(config.clone()).await {
            Ok(dispatcher) => Some(dispatcher),
            Err(e) => {
                error!(error = %e, "Failed to start workers for connection");
                None
            }
        };
        Self { config, dispatcher }
    }

    /// Pool serving the connection, if its workers are running.
    pub fn pool_id(&self) -> Option<PoolId> {
        self.dispatcher.as_ref().map(Dispatcher::pool_id)
    }

    pub async fn handle_frame(&mut self, frame: &str) -> ResponseEnvelope {
        let dispatcher = match self.dispatcher.take() {
            Some(dispatcher) => dispatcher,
            None => match Dispatcher::start(self.config.clone()).await {
                Ok(dispatcher) => {
                    info!(pool = %dispatcher.pool_id(), "Workers started on retry");
                    dispatcher
                }
                Err(e) => {
                    warn!(error = %e, "Workers still unavailable");
                    return unavailable(frame, &e);
                }
            },
        };
        self.dispatcher.insert(dispatcher).handle_frame(frame).await
    }

    pub async fn close(self) {
        if let Some(dispatcher) = self.dispatcher {
            dispatcher.close().await;
        }
    }
}

/// Answer a frame that no dispatcher is available to run.
fn unavailable(frame: &str, cause: &BridgeError) -> ResponseEnvelope {
    match RequestEnvelope::parse(frame) {
        Ok(request) => ResponseEnvelope::failure(request.id, format!("Workers unavailable: {}", cause)),
        Err(malformed) => ResponseEnvelope::from(malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerCommand;
    use serde_json::{Value, json};
    use std::path::PathBuf;

    /// Fake worker speaking the worker protocol from `sh`.
    ///
    /// Calls to `slow` hang, calls to `broken` fail, anything else echoes 1.
    const FAKE_WORKER: &str = r#"
echo '{"type":"ready"}'
while read -r line; do
  case "$line" in
    *'"method":"slow"'*) sleep 30 ;;
    *'"method":"broken"'*) echo '{"type":"error","message":"broken input"}' ;;
    *) echo '{"type":"result","value":1}' ;;
  esac
done
"#;

    fn dispatcher_pool() -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: 2,
            command: WorkerCommand {
                program: PathBuf::from("sh"),
                args: vec!["-c".into(), FAKE_WORKER.into()],
            },
        }
    }

    fn dispatcher(timeout: Duration) -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            timeout,
            pool: dispatcher_pool(),
        })
        .unwrap()
    }

    fn unreachable_workers() -> DispatcherConfig {
        DispatcherConfig {
            timeout: Duration::from_secs(1),
            pool: WorkerPoolConfig {
                worker_count: 1,
                command: WorkerCommand {
                    program: PathBuf::from("/nonexistent/molbridge"),
                    args: Vec::new(),
                },
            },
        }
    }

    fn request(id: Value, method: &str) -> RequestEnvelope {
        RequestEnvelope::new(id, method, Default::default())
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        assert!(Dispatcher::start(unreachable_workers()).await.is_err());
    }

    #[tokio::test]
    async fn test_success_echoes_id() {
        let mut d = dispatcher(Duration::from_secs(5));
        let response = d.handle(request(json!("abc"), "convert")).await;
        assert_eq!(response, ResponseEnvelope::success(json!("abc"), json!(1)));
        d.close().await;
    }

    #[tokio::test]
    async fn test_failure_keeps_pool() {
        let mut d = dispatcher(Duration::from_secs(5));
        let before = d.pool_id();
        let response = d.handle(request(json!(2), "broken")).await;
        assert!(response.error);
        assert_eq!(response.result, json!("broken input"));
        assert_eq!(d.pool_id(), before);
        d.close().await;
    }

    #[tokio::test]
    async fn test_timeout_recycles_and_recovers() {
        let mut d = dispatcher(Duration::from_millis(500));
        let before = d.pool_id();

        let response = d.handle(request(json!(3), "slow")).await;
        assert_eq!(response, ResponseEnvelope::failure(json!(3), TIMEOUT_MESSAGE));
        assert_ne!(d.pool_id(), before);
        assert_eq!(d.stats().recycles, 1);

        let response = d.handle(request(json!(4), "convert")).await;
        assert_eq!(response, ResponseEnvelope::success(json!(4), json!(1)));
        d.close().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_skips_pool() {
        let mut d = dispatcher(Duration::from_secs(5));
        let before = d.pool_id();

        let response = d.handle_frame(r#"{"id": 5, "method": 7}"#).await;
        assert_eq!(response.id, json!(5));
        assert!(response.error);

        let response = d.handle_frame("garbage").await;
        assert_eq!(response.id, Value::Null);
        assert!(response.error);

        let response = d.handle_frame(r#"{"id": 6, "method": "convert"}"#).await;
        assert_eq!(response, ResponseEnvelope::success(json!(6), json!(1)));
        assert_eq!(d.pool_id(), before);
        d.close().await;
    }

    #[test]
    fn test_timeout_message_names_both_causes() {
        assert!(TIMEOUT_MESSAGE.contains("large input file"));
        assert!(TIMEOUT_MESSAGE.contains("segmentation fault"));
    }

    #[tokio::test]
    async fn test_session_without_workers_answers_every_frame() {
        let mut session = Session::open(unreachable_workers()).await;
        assert!(session.pool_id().is_none());

        let response = session.handle_frame(r#"{"id": 11, "method": "version"}"#).await;
        assert_eq!(response.id, json!(11));
        assert!(response.error);
        assert!(response.result.as_str().unwrap().starts_with("Workers unavailable"));

        let response = session.handle_frame("garbage").await;
        assert_eq!(response.id, Value::Null);
        assert!(response.error);
        session.close().await;
    }

    #[tokio::test]
    async fn test_session_serves_through_dispatcher() {
        let mut session = Session::open(DispatcherConfig {
            timeout: Duration::from_secs(5),
            pool: dispatcher_pool(),
        })
        .await;
        assert!(session.pool_id().is_some());

        let response = session.handle_frame(r#"{"id": 12, "method": "convert"}"#).await;
        assert_eq!(response, ResponseEnvelope::success(json!(12), json!(1)));
        session.close().await;
    }
}
