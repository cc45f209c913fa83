//! # Storage Module
//!
//! Connection providers for the rule list.
//!
//! The adapter talks to storage through two small traits:
//! - [`ConnectionProvider`] hands out one connection per operation
//! - [`ListConnection`] runs list commands and the mutation scripts
//!
//! Implementations:
//! - [`SharedConnection`]: one long-lived Redis connection behind a mutex
//! - [`ConnectionPool`]: Redis connections checked out per operation
//! - [`MemoryStore`]: in-process lists with the same script semantics

pub mod memory;
pub mod redis_conn;

use std::fmt;

use crate::error::{AdapterError, AdapterResult};

pub use memory::MemoryStore;
pub use redis_conn::{ConnectionPool, SharedConnection};

/// Placeholder written over entries a script is about to remove.
///
/// Stored records always start with `{`, so adapter-written data never
/// collides with it. A foreign entry equal to it would be removed as well.
pub const DELETED_SENTINEL: &str = "__CASBIN_DELETED__";

// ================================================================================================
// REPLIES
// ================================================================================================

/// Opaque reply from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Data(Vec<u8>),
    Status(String),
    Array(Vec<Reply>),
}

impl Reply {
    /// Interpret as a list of entries. A nil reply is an empty list.
    ///
    /// Status strings are accepted as entries: some Redis-compatible services
    /// return them instead of bulk bytes.
    pub fn into_entries(self) -> AdapterResult<Vec<Vec<u8>>> {
        match self {
            Reply::Nil => Ok(Vec::new()),
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Data(bytes) => Ok(bytes),
                    Reply::Status(text) => Ok(text.into_bytes()),
                    other => Err(AdapterError::decode(
                        format!("{:?}", other).as_bytes(),
                        "list entry is not a string",
                    )),
                })
                .collect(),
            other => Err(AdapterError::decode(
                format!("{:?}", other).as_bytes(),
                "expected a list reply",
            )),
        }
    }

    /// Interpret as an integer. A nil reply counts as zero.
    pub fn into_int(self) -> AdapterResult<i64> {
        match self {
            Reply::Nil => Ok(0),
            Reply::Int(n) => Ok(n),
            other => Err(AdapterError::decode(
                format!("{:?}", other).as_bytes(),
                "expected an integer reply",
            )),
        }
    }
}

// ================================================================================================
// COMMANDS
// ================================================================================================

/// The list commands the adapter issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListCommand<'a> {
    /// `DEL key`
    Delete { key: &'a str },
    /// `LLEN key`
    Length { key: &'a str },
    /// `LRANGE key start stop`, inclusive, negative indexes count from the end
    Range {
        key: &'a str,
        start: isize,
        stop: isize,
    },
    /// `RPUSH key value [value ...]`
    Push { key: &'a str, values: &'a [Vec<u8>] },
    /// `LREM key count value`
    Remove {
        key: &'a str,
        count: isize,
        value: &'a [u8],
    },
}

impl ListCommand<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            ListCommand::Delete { .. } => "DEL",
            ListCommand::Length { .. } => "LLEN",
            ListCommand::Range { .. } => "LRANGE",
            ListCommand::Push { .. } => "RPUSH",
            ListCommand::Remove { .. } => "LREM",
        }
    }
}

// ================================================================================================
// SCRIPTS
// ================================================================================================

/// Server-side mutations. Each runs as one `EVAL` with the list as `KEYS[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListScript {
    /// `ARGV[1]` old record, `ARGV[2]` new record. Replaces the first exact match.
    UpdateFirst,
    /// `ARGV[1..n]` old records, `ARGV[n+1..2n]` new records. Replaces every match.
    UpdateMapped,
    /// `ARGV[1]` Lua pattern. Removes every match.
    RemoveMatching,
    /// `ARGV[1]` Lua pattern, `ARGV[2..]` records to append. Returns removed entries.
    ReplaceMatching,
}

impl ListScript {
    pub fn name(&self) -> &'static str {
        match self {
            ListScript::UpdateFirst => "update_first",
            ListScript::UpdateMapped => "update_mapped",
            ListScript::RemoveMatching => "remove_matching",
            ListScript::ReplaceMatching => "replace_matching",
        }
    }

    /// Lua source executed by Redis.
    pub fn body(&self) -> &'static str {
        match self {
            ListScript::UpdateFirst => UPDATE_FIRST_LUA,
            ListScript::UpdateMapped => UPDATE_MAPPED_LUA,
            ListScript::RemoveMatching => REMOVE_MATCHING_LUA,
            ListScript::ReplaceMatching => REPLACE_MATCHING_LUA,
        }
    }
}

const UPDATE_FIRST_LUA: &str = r#"
local key = KEYS[1]
local old = ARGV[1]
local new = ARGV[2]

local entries = redis.call('lrange', key, 0, -1)
for i = 1, #entries do
    if entries[i] == old then
        redis.call('lset', key, i - 1, new)
        return 1
    end
end
return 0
"#;

const UPDATE_MAPPED_LUA: &str = r#"
local key = KEYS[1]
local len = #ARGV / 2

local replacements = {}
for i = 1, len do
    replacements[ARGV[i]] = ARGV[i + len]
end

local updated = 0
local entries = redis.call('lrange', key, 0, -1)
for i = 1, #entries do
    local new = replacements[entries[i]]
    if new ~= nil then
        redis.call('lset', key, i - 1, new)
        updated = updated + 1
    end
end
return updated
"#;

const REMOVE_MATCHING_LUA: &str = r#"
local key = KEYS[1]
local pattern = ARGV[1]

local entries = redis.call('lrange', key, 0, -1)
for i = 1, #entries do
    if string.find(entries[i], pattern) then
        redis.call('lset', key, i - 1, '__CASBIN_DELETED__')
    end
end
return redis.call('lrem', key, 0, '__CASBIN_DELETED__')
"#;

const REPLACE_MATCHING_LUA: &str = r#"
local key = KEYS[1]
local pattern = ARGV[1]

local removed = {}
local entries = redis.call('lrange', key, 0, -1)
for i = 1, #entries do
    if string.find(entries[i], pattern) then
        table.insert(removed, entries[i])
        redis.call('lset', key, i - 1, '__CASBIN_DELETED__')
    end
end
redis.call('lrem', key, 0, '__CASBIN_DELETED__')

for i = 2, #ARGV do
    redis.call('rpush', key, ARGV[i])
end
return removed
"#;

// ================================================================================================
// CONNECTION TRAITS
// ================================================================================================

/// One checked-out connection. Dropping it releases it to its provider.
pub trait ListConnection {
    fn execute(&mut self, command: ListCommand<'_>) -> AdapterResult<Reply>;

    fn eval(&mut self, script: ListScript, key: &str, args: &[Vec<u8>]) -> AdapterResult<Reply>;
}

/// Source of connections for adapter operations.
///
/// Each operation acquires exactly one connection and drops it before
/// returning, on success and on error alike.
pub trait ConnectionProvider: Send + Sync + fmt::Debug {
    fn acquire(&self) -> AdapterResult<Box<dyn ListConnection + '_>>;

    /// Release underlying resources. Calling it more than once is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
