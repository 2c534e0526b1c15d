//! Connection lifecycle state machine.
//!
//! `Closed → Opening → Open(t0) → Open(t0, now > t0 + T ⇒ Recycle) →
//! Closed`. The Stream Loop owns this; primitives only ever receive a
//! borrowed, already-open handle.

use std::time::{Duration, Instant};

use tracing::info;

use crate::backend::StorageBackend;
use crate::environment::Environment;
use crate::errors::ExecutorResult;

pub struct Connection {
    backend: Box<dyn StorageBackend>,
    opened_at: Instant,
}

/// Owns the single logical connection used by the stream loop. Lazily
/// opens on first use, force-recycles once `max_connect_time` has
/// elapsed, and closes on request or at end of stream.
pub struct ConnectionManager {
    current: Option<Connection>,
    max_connect_time: Duration,
}

impl ConnectionManager {
    pub fn new(max_connect_time: Duration) -> Self {
        ConnectionManager {
            current: None,
            max_connect_time,
        }
    }

    /// Returns a handle to the open connection, logging in first if
    /// none is currently open. A login failure here is fatal: the
    /// caller is expected to terminate the stream loop.
    pub async fn ensure_open(
        &mut self,
        env: &Environment,
        mut new_backend: impl FnMut() -> Box<dyn StorageBackend>,
    ) -> ExecutorResult<&mut (dyn StorageBackend + 'static)> {
        if self.current.is_none() {
            let mut backend = new_backend();
            backend.login(&env.host, env.port, &env.zone, &env.username).await?;
            info!(host = %env.host, zone = %env.zone, "opened backend connection");
            self.current = Some(Connection {
                backend,
                opened_at: Instant::now(),
            });
        }
        Ok(self.current.as_mut().unwrap().backend.as_mut())
    }

    /// Closes and forgets the connection if `max_connect_time` has
    /// elapsed since it was opened. `max_connect_time == 0` disables
    /// recycling entirely.
    pub async fn recycle_if_stale(&mut self) -> ExecutorResult<()> {
        if self.max_connect_time.is_zero() {
            return Ok(());
        }
        let stale = self
            .current
            .as_ref()
            .map(|c| c.opened_at.elapsed() > self.max_connect_time)
            .unwrap_or(false);
        if stale {
            info!("connection open-duration exceeded max_connect_time, recycling");
            self.close().await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> ExecutorResult<()> {
        if let Some(mut conn) = self.current.take() {
            conn.backend.disconnect().await?;
            info!("closed backend connection");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }
}
