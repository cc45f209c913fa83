//! Redis-backed connection providers.
//!
//! - [`SharedConnection`]: a single connection dialed at construction; the
//!   mutex serializes callers so request/response order holds per connection.
//! - [`ConnectionPool`]: connections dialed on demand and kept on an idle
//!   stack between operations. Connections that hit an unrecoverable error
//!   are dropped instead of returned.

use parking_lot::{Mutex, MutexGuard};
use redis::{Client, Connection, ConnectionInfo, RedisResult, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{ConnectionProvider, ListCommand, ListConnection, ListScript, Reply};
use crate::error::{AdapterError, AdapterResult};

// ================================================================================================
// WIRE HELPERS
// ================================================================================================

fn to_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Int(n),
        Value::BulkString(bytes) => Reply::Data(bytes),
        Value::SimpleString(text) => Reply::Status(text),
        Value::Okay => Reply::Status("OK".to_string()),
        Value::Boolean(flag) => Reply::Int(i64::from(flag)),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(to_reply).collect())
        }
        other => Reply::Status(format!("{:?}", other)),
    }
}

fn run_command(conn: &mut Connection, command: ListCommand<'_>) -> RedisResult<Reply> {
    let mut cmd = redis::cmd(command.name());
    match command {
        ListCommand::Delete { key } | ListCommand::Length { key } => {
            cmd.arg(key);
        }
        ListCommand::Range { key, start, stop } => {
            cmd.arg(key).arg(start).arg(stop);
        }
        ListCommand::Push { key, values } => {
            cmd.arg(key);
            for value in values {
                cmd.arg(value.as_slice());
            }
        }
        ListCommand::Remove { key, count, value } => {
            cmd.arg(key).arg(count).arg(value);
        }
    }
    let value: Value = cmd.query(conn)?;
    Ok(to_reply(value))
}

fn run_script(
    conn: &mut Connection,
    script: ListScript,
    key: &str,
    args: &[Vec<u8>],
) -> RedisResult<Reply> {
    let lua = redis::Script::new(script.body());
    let mut invocation = lua.prepare_invoke();
    invocation.key(key);
    for arg in args {
        invocation.arg(arg.as_slice());
    }
    let value: Value = invocation.invoke(conn)?;
    Ok(to_reply(value))
}

fn dial(client: &Client, timeout: Option<Duration>) -> AdapterResult<Connection> {
    let conn = match timeout {
        Some(timeout) => client.get_connection_with_timeout(timeout)?,
        None => client.get_connection()?,
    };
    Ok(conn)
}

// ================================================================================================
// SHARED CONNECTION
// ================================================================================================

/// One long-lived connection shared by every operation.
pub struct SharedConnection {
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl SharedConnection {
    /// Dial Redis now; fails if the server is unreachable.
    pub fn open(info: ConnectionInfo, timeout: Option<Duration>) -> AdapterResult<Self> {
        let client = Client::open(info)?;
        let conn = dial(&client, timeout)?;
        tracing::debug!("opened shared redis connection");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        }
    }
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionProvider for SharedConnection {
    fn acquire(&self) -> AdapterResult<Box<dyn ListConnection + '_>> {
        let guard = self.conn.lock();
        if guard.is_none() {
            return Err(AdapterError::transport("redis connection is closed"));
        }
        Ok(Box::new(SharedGuard { guard }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.conn.lock().take();
            tracing::debug!("closed shared redis connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct SharedGuard<'a> {
    guard: MutexGuard<'a, Option<Connection>>,
}

impl SharedGuard<'_> {
    fn connection(&mut self) -> AdapterResult<&mut Connection> {
        self.guard
            .as_mut()
            .ok_or_else(|| AdapterError::transport("redis connection is closed"))
    }
}

impl ListConnection for SharedGuard<'_> {
    fn execute(&mut self, command: ListCommand<'_>) -> AdapterResult<Reply> {
        Ok(run_command(self.connection()?, command)?)
    }

    fn eval(&mut self, script: ListScript, key: &str, args: &[Vec<u8>]) -> AdapterResult<Reply> {
        Ok(run_script(self.connection()?, script, key, args)?)
    }
}

// ================================================================================================
// CONNECTION POOL
// ================================================================================================

/// Connections checked out per operation.
pub struct ConnectionPool {
    client: Client,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    timeout: Option<Duration>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool. No connection is dialed until the first operation.
    pub fn new(
        info: ConnectionInfo,
        max_idle: usize,
        timeout: Option<Duration>,
    ) -> AdapterResult<Self> {
        Ok(Self {
            client: Client::open(info)?,
            idle: Mutex::new(Vec::new()),
            max_idle,
            timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Number of connections waiting on the idle stack.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, conn: Connection) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle_count())
            .field("max_idle", &self.max_idle)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionProvider for ConnectionPool {
    fn acquire(&self) -> AdapterResult<Box<dyn ListConnection + '_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::transport("redis pool is closed"));
        }
        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => dial(&self.client, self.timeout)?,
        };
        Ok(Box::new(PooledConnection {
            pool: self,
            conn: Some(conn),
            broken: false,
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let dropped = std::mem::take(&mut *self.idle.lock());
            tracing::debug!(connections = dropped.len(), "closed redis pool");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
    broken: bool,
}

impl PooledConnection<'_> {
    fn track(&mut self, result: RedisResult<Reply>) -> AdapterResult<Reply> {
        result.map_err(|err| {
            if err.is_unrecoverable_error() {
                self.broken = true;
            }
            AdapterError::from(err)
        })
    }

    fn connection(&mut self) -> AdapterResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| AdapterError::transport("pooled connection already released"))
    }
}

impl ListConnection for PooledConnection<'_> {
    fn execute(&mut self, command: ListCommand<'_>) -> AdapterResult<Reply> {
        let result = run_command(self.connection()?, command);
        self.track(result)
    }

    fn eval(&mut self, script: ListScript, key: &str, args: &[Vec<u8>]) -> AdapterResult<Reply> {
        let result = run_script(self.connection()?, script, key, args);
        self.track(result)
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.broken {
                self.pool.release(conn);
            }
        }
    }
}
