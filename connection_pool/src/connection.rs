use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::pool::ConnectionPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Acquired,
    Poisoned,
}

/// A database connection owned by the pool
pub struct PooledConnection {
    id: Uuid,
    state: ConnectionState,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    handle: Option<Connection>,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

impl PooledConnection {
    pub(crate) fn new(handle: Connection) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: ConnectionState::Idle,
            created_at: now,
            last_used_at: now,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    /// Healthy connections go back to the idle set on release
    pub fn is_reusable(&self) -> bool {
        self.state != ConnectionState::Poisoned && self.handle.is_some()
    }

    pub(crate) fn mark_acquired(&mut self) {
        self.state = ConnectionState::Acquired;
        self.last_used_at = Utc::now();
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used_at = Utc::now();
    }
}

/// Scoped ownership of one pooled connection.
///
/// Dropping the guard releases the connection exactly once, whichever way the
/// holder exits. The capacity permit is returned after the release so the
/// next waiter finds the connection already idle.
pub struct PoolGuard {
    pool: Arc<ConnectionPool>,
    connection: Option<PooledConnection>,
    wait: Duration,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolGuard")
            .field("connection", &self.connection)
            .field("wait", &self.wait)
            .finish()
    }
}

impl PoolGuard {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        connection: PooledConnection,
        wait: Duration,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            connection: Some(connection),
            wait,
            _permit: permit,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.connection.as_ref().map(PooledConnection::id)
    }

    /// How long `acquire` waited for this connection
    pub fn wait_time(&self) -> Duration {
        self.wait
    }

    /// Borrow the underlying connection
    pub fn handle(&self) -> Option<&Connection> {
        self.connection.as_ref().and_then(|c| c.handle.as_ref())
    }

    /// Move the handle out, e.g. onto a blocking worker. A handle that is
    /// never restored makes the connection unusable and it is replaced on
    /// release.
    pub fn take_handle(&mut self) -> Option<Connection> {
        self.connection.as_mut().and_then(|c| c.handle.take())
    }

    pub fn restore_handle(&mut self, handle: Connection) {
        if let Some(connection) = self.connection.as_mut() {
            connection.handle = Some(handle);
        }
    }

    /// Mark the connection unusable; it is closed and replaced on release
    pub fn poison(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.state = ConnectionState::Poisoned;
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.state == ConnectionState::Poisoned)
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}
