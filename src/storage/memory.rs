//! In-process list store.
//!
//! Keeps named lists in memory and runs the adapter's Lua scripts on an
//! embedded Lua 5.1 interpreter, the version Redis ships, with `redis.call`
//! bound to the in-memory lists. Every command and every script runs under
//! one lock, so scripts are atomic against concurrent callers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use mlua::{Lua, Value as LuaValue, Variadic};

use super::{ConnectionProvider, ListCommand, ListConnection, ListScript, Reply};
use crate::error::{AdapterError, AdapterResult};

/// Map of list name → entries.
type Lists = HashMap<String, Vec<Vec<u8>>>;

/// In-memory store implementing the provider contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: Mutex<Lists>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a list's entries. Missing lists are empty.
    pub fn entries(&self, key: &str) -> Vec<Vec<u8>> {
        self.lists.lock().get(key).cloned().unwrap_or_default()
    }

    /// Replace a list's raw entries, bypassing the adapter.
    pub fn set_entries(&self, key: &str, entries: Vec<Vec<u8>>) {
        let mut lists = self.lists.lock();
        if entries.is_empty() {
            lists.remove(key);
        } else {
            lists.insert(key.to_string(), entries);
        }
    }

    fn ensure_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::transport("memory store is closed"));
        }
        Ok(())
    }
}

impl ConnectionProvider for MemoryStore {
    fn acquire(&self) -> AdapterResult<Box<dyn ListConnection + '_>> {
        self.ensure_open()?;
        Ok(Box::new(MemoryConnection { store: self }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Connection handle onto a [`MemoryStore`].
#[derive(Debug)]
struct MemoryConnection<'a> {
    store: &'a MemoryStore,
}

impl ListConnection for MemoryConnection<'_> {
    fn execute(&mut self, command: ListCommand<'_>) -> AdapterResult<Reply> {
        self.store.ensure_open()?;
        let mut lists = self.store.lists.lock();
        Ok(run_command(&mut lists, command))
    }

    fn eval(&mut self, script: ListScript, key: &str, args: &[Vec<u8>]) -> AdapterResult<Reply> {
        self.store.ensure_open()?;
        let mut lists = self.store.lists.lock();
        run_script(&mut lists, script, key, args)
    }
}

fn run_command(lists: &mut Lists, command: ListCommand<'_>) -> Reply {
    match command {
        ListCommand::Delete { key } => Reply::Int(i64::from(lists.remove(key).is_some())),
        ListCommand::Length { key } => Reply::Int(lists.get(key).map_or(0, |l| l.len()) as i64),
        ListCommand::Range { key, start, stop } => {
            let list = lists.get(key).map(|l| l.as_slice()).unwrap_or(&[]);
            Reply::Array(
                range(list, start, stop)
                    .iter()
                    .cloned()
                    .map(Reply::Data)
                    .collect(),
            )
        }
        ListCommand::Push { key, values } => {
            let list = lists.entry(key.to_string()).or_default();
            list.extend(values.iter().cloned());
            Reply::Int(list.len() as i64)
        }
        ListCommand::Remove { key, count, value } => {
            let removed = match lists.get_mut(key) {
                Some(list) => remove_entries(list, count, value),
                None => 0,
            };
            drop_if_empty(lists, key);
            Reply::Int(removed as i64)
        }
    }
}

fn run_script(
    lists: &mut Lists,
    script: ListScript,
    key: &str,
    args: &[Vec<u8>],
) -> AdapterResult<Reply> {
    let lua = Lua::new();
    let reply = lua
        .scope(|scope| {
            let call = scope.create_function_mut(|lua, argv: Variadic<LuaValue>| {
                redis_call(lua, lists, argv)
            })?;
            let redis = lua.create_table()?;
            redis.set("call", call)?;

            let globals = lua.globals();
            globals.set("redis", redis)?;
            globals.set("KEYS", lua.create_sequence_from([lua.create_string(key)?])?)?;
            let argv = args
                .iter()
                .map(|arg| lua.create_string(arg))
                .collect::<mlua::Result<Vec<_>>>()?;
            globals.set("ARGV", lua.create_sequence_from(argv)?)?;

            let value: LuaValue = lua.load(script.body()).eval()?;
            to_reply(value)
        })
        .map_err(|e| script_error(script, e))?;

    drop_if_empty(lists, key);
    Ok(reply)
}

// ================================================================================================
// SCRIPT BRIDGE
// ================================================================================================

/// `redis.call` for the list commands the scripts use.
fn redis_call<'lua>(
    lua: &'lua Lua,
    lists: &mut Lists,
    argv: Variadic<LuaValue<'lua>>,
) -> mlua::Result<LuaValue<'lua>> {
    let argv = argv
        .iter()
        .map(call_arg)
        .collect::<mlua::Result<Vec<Vec<u8>>>>()?;
    let (name, args) = argv
        .split_first()
        .ok_or_else(|| call_error("wrong number of arguments"))?;

    match (String::from_utf8_lossy(name).to_ascii_lowercase().as_str(), args) {
        ("lrange", [key, start, stop]) => {
            let list = lists.get(&key_str(key)?).map(|l| l.as_slice()).unwrap_or(&[]);
            let entries = range(list, int_arg(start)? as isize, int_arg(stop)? as isize)
                .iter()
                .map(|entry| lua.create_string(entry))
                .collect::<mlua::Result<Vec<_>>>()?;
            Ok(LuaValue::Table(lua.create_sequence_from(entries)?))
        }
        ("lset", [key, index, value]) => {
            let list = lists
                .get_mut(&key_str(key)?)
                .ok_or_else(|| call_error("no such key"))?;
            let len = list.len() as i64;
            let index = int_arg(index)?;
            let index = if index < 0 { len + index } else { index };
            if index < 0 || index >= len {
                return Err(call_error("index out of range"));
            }
            list[index as usize] = value.clone();
            let status = lua.create_table()?;
            status.set("ok", "OK")?;
            Ok(LuaValue::Table(status))
        }
        ("lrem", [key, count, value]) => {
            let key = key_str(key)?;
            let count = int_arg(count)? as isize;
            let removed = match lists.get_mut(&key) {
                Some(list) => remove_entries(list, count, value),
                None => 0,
            };
            drop_if_empty(lists, &key);
            Ok(LuaValue::Integer(removed as i64))
        }
        ("rpush", [key, values @ ..]) if !values.is_empty() => {
            let list = lists.entry(key_str(key)?).or_default();
            list.extend(values.iter().cloned());
            Ok(LuaValue::Integer(list.len() as i64))
        }
        (other, _) => Err(call_error(&format!(
            "unsupported command or arity: {}",
            other
        ))),
    }
}

/// Redis stringifies numbers passed to `redis.call`.
fn call_arg(value: &LuaValue) -> mlua::Result<Vec<u8>> {
    match value {
        LuaValue::String(s) => Ok(s.as_bytes().to_vec()),
        LuaValue::Integer(n) => Ok(n.to_string().into_bytes()),
        LuaValue::Number(n) => Ok(n.to_string().into_bytes()),
        other => Err(call_error(&format!(
            "unsupported argument type {}",
            other.type_name()
        ))),
    }
}

fn int_arg(arg: &[u8]) -> mlua::Result<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| call_error("value is not an integer or out of range"))
}

fn key_str(arg: &[u8]) -> mlua::Result<String> {
    String::from_utf8(arg.to_vec()).map_err(|_| call_error("key is not valid UTF-8"))
}

fn call_error(message: &str) -> mlua::Error {
    mlua::Error::RuntimeError(format!("ERR {}", message))
}

/// Lua to reply conversion, following Redis: numbers truncate to integers,
/// `false` is nil, and an array stops at its first nil.
fn to_reply(value: LuaValue) -> mlua::Result<Reply> {
    let reply = match value {
        LuaValue::Nil | LuaValue::Boolean(false) => Reply::Nil,
        LuaValue::Boolean(true) => Reply::Int(1),
        LuaValue::Integer(n) => Reply::Int(n),
        LuaValue::Number(n) => Reply::Int(n as i64),
        LuaValue::String(s) => Reply::Data(s.as_bytes().to_vec()),
        LuaValue::Table(table) => {
            if let Some(err) = table.get::<_, Option<String>>("err")? {
                return Err(mlua::Error::RuntimeError(err));
            }
            if let Some(ok) = table.get::<_, Option<String>>("ok")? {
                return Ok(Reply::Status(ok));
            }
            let items = table
                .sequence_values::<LuaValue>()
                .map(|item| item.and_then(to_reply))
                .collect::<mlua::Result<Vec<_>>>()?;
            Reply::Array(items)
        }
        _ => Reply::Nil,
    };
    Ok(reply)
}

/// `LREM` semantics: count > 0 from the head, count < 0 from the tail, 0 for all.
fn remove_entries(list: &mut Vec<Vec<u8>>, count: isize, value: &[u8]) -> usize {
    let limit = if count == 0 {
        usize::MAX
    } else {
        count.unsigned_abs()
    };

    let mut positions: Vec<usize> = list
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.as_slice() == value)
        .map(|(i, _)| i)
        .collect();
    if count < 0 {
        positions.reverse();
    }
    positions.truncate(limit);
    positions.sort_unstable();

    for (removed, position) in positions.iter().enumerate() {
        list.remove(position - removed);
    }
    positions.len()
}

/// `LRANGE` index resolution.
fn range(list: &[Vec<u8>], start: isize, stop: isize) -> &[Vec<u8>] {
    let len = list.len() as isize;
    let resolve = |i: isize| if i < 0 { len + i } else { i };
    let start = resolve(start).max(0);
    let stop = resolve(stop).min(len - 1);
    if start > stop || start >= len {
        return &[];
    }
    &list[start as usize..=stop as usize]
}

fn drop_if_empty(lists: &mut Lists, key: &str) {
    if lists.get(key).is_some_and(|list| list.is_empty()) {
        lists.remove(key);
    }
}

fn script_error(script: ListScript, err: mlua::Error) -> AdapterError {
    AdapterError::transport(format!("script {} failed: {}", script.name(), err))
}
