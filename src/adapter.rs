use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::model::{PolicyModel, PolicySink};
use crate::pattern::{field_range_pattern, SelectMatcher};
use crate::rule_converter::{encode_rule, RuleRecord};
use crate::storage::{
    ConnectionPool, ConnectionProvider, ListCommand, ListConnection, ListScript, SharedConnection,
};
use crate::types::{PolicyFilter, Section};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ================================================================================================
// ADAPTER STRUCTURE
// ================================================================================================

/// Stores rules in one Redis list and loads them back into a policy model.
///
/// The list is the only source of truth; nothing is cached between calls.
/// `update_*`, `remove_filtered_policy` and `update_filtered_policies` each
/// run as one server-side script. `save_policy` (delete, then push) and the
/// bulk removal loop are not atomic.
pub struct RedisAdapter {
    key: String,
    provider: Arc<dyn ConnectionProvider>,
    filtered: AtomicBool,
}

impl RedisAdapter {
    /// Creates an adapter from its configuration.
    ///
    /// Without a pool or provider this dials Redis immediately.
    pub fn new(config: AdapterConfig) -> AdapterResult<Self> {
        let key = config.resolved_key().to_string();

        let provider: Arc<dyn ConnectionProvider> = match &config.provider {
            Some(provider) => Arc::clone(provider),
            None => {
                let info = config.connection_info()?;
                let timeout = config.connect_timeout();
                match &config.pool {
                    Some(pool) => Arc::new(ConnectionPool::new(info, pool.max_idle, timeout)?),
                    None => Arc::new(SharedConnection::open(info, timeout)?),
                }
            }
        };

        tracing::debug!(key = %key, provider = ?provider, "created redis adapter");
        Ok(Self {
            key,
            provider,
            filtered: AtomicBool::new(false),
        })
    }

    // ============================================================================================
    // ACCESSORS
    // ============================================================================================

    /// The list key rules are stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True iff the most recent load applied a filter.
    pub fn is_filtered(&self) -> bool {
        self.filtered.load(Ordering::Acquire)
    }

    /// Number of stored rules.
    pub fn rule_count(&self) -> AdapterResult<usize> {
        let mut conn = self.connection()?;
        let len = conn.execute(ListCommand::Length { key: &self.key })?.into_int()?;
        Ok(len.max(0) as usize)
    }

    /// Closes the underlying connection or pool.
    ///
    /// Safe to call more than once. Operations after closing fail with a
    /// transport error.
    pub fn close(&self) {
        self.provider.close();
    }

    pub fn is_closed(&self) -> bool {
        self.provider.is_closed()
    }

    fn connection(&self) -> AdapterResult<Box<dyn ListConnection + '_>> {
        self.provider.acquire()
    }

    fn fetch_entries(&self) -> AdapterResult<Vec<Vec<u8>>> {
        let mut conn = self.connection()?;
        conn.execute(ListCommand::Range {
            key: &self.key,
            start: 0,
            stop: -1,
        })?
        .into_entries()
    }

    // ============================================================================================
    // LOADING
    // ============================================================================================

    /// Replaces the sink's rules with every stored rule.
    ///
    /// A malformed entry stops the load with a decode error; rules decoded
    /// before it stay in the sink.
    pub fn load_policy(&self, sink: &mut dyn PolicySink) -> AdapterResult<()> {
        let entries = self.fetch_entries()?;
        sink.clear_policy();
        let loaded = load_entries(sink, &entries, None)?;

        self.filtered.store(false, Ordering::Release);
        tracing::debug!(key = %self.key, loaded, "loaded policy");
        Ok(())
    }

    /// Replaces the sink's rules with the stored rules selected by `filter`.
    ///
    /// `None` is a full load. Any `Some` filter marks the adapter as
    /// filtered, including one that accepts everything.
    pub fn load_filtered_policy(
        &self,
        sink: &mut dyn PolicySink,
        filter: Option<&PolicyFilter>,
    ) -> AdapterResult<()> {
        let Some(filter) = filter else {
            return self.load_policy(sink);
        };

        let matcher = SelectMatcher::new(filter)?;
        let entries = self.fetch_entries()?;
        sink.clear_policy();
        let loaded = load_entries(sink, &entries, Some(&matcher))?;

        self.filtered.store(true, Ordering::Release);
        tracing::debug!(key = %self.key, loaded, total = entries.len(), "loaded filtered policy");
        Ok(())
    }

    /// Filtered load for callers holding an untyped filter.
    ///
    /// Accepts `null` (no filter) or an object with `pType`/`V0`..`V5`
    /// string arrays. Anything else fails before any request is made.
    pub fn load_filtered_policy_value(
        &self,
        sink: &mut dyn PolicySink,
        filter: &serde_json::Value,
    ) -> AdapterResult<()> {
        match filter {
            serde_json::Value::Null => self.load_filtered_policy(sink, None),
            serde_json::Value::Object(_) => {
                let filter: PolicyFilter = serde_json::from_value(filter.clone())
                    .map_err(|e| AdapterError::FilterType(e.to_string()))?;
                self.load_filtered_policy(sink, Some(&filter))
            }
            other => Err(AdapterError::FilterType(format!(
                "expected a filter object, got {}",
                json_kind(other)
            ))),
        }
    }

    // ============================================================================================
    // SAVING
    // ============================================================================================

    /// Overwrites the stored list with every rule in `model`.
    ///
    /// Policies are written before groupings. The delete and the push are
    /// separate requests: a failure between them leaves the list empty.
    pub fn save_policy(&self, model: &PolicyModel) -> AdapterResult<()> {
        let mut records = Vec::with_capacity(model.len());
        for section in Section::ALL {
            for (ptype, rule) in model.section_rules(section) {
                records.push(encode_rule(ptype, rule)?);
            }
        }

        let mut conn = self.connection()?;
        conn.execute(ListCommand::Delete { key: &self.key })?;
        if !records.is_empty() {
            conn.execute(ListCommand::Push {
                key: &self.key,
                values: &records,
            })?;
        }

        tracing::debug!(key = %self.key, saved = records.len(), "saved policy");
        Ok(())
    }

    /// Appends one rule.
    pub fn add_policy<S: AsRef<str>>(&self, ptype: &str, rule: &[S]) -> AdapterResult<()> {
        let record = encode_rule(ptype, rule)?;
        let mut conn = self.connection()?;
        conn.execute(ListCommand::Push {
            key: &self.key,
            values: std::slice::from_ref(&record),
        })?;
        Ok(())
    }

    /// Appends rules in order with a single push.
    pub fn add_policies<R, S>(&self, ptype: &str, rules: &[R]) -> AdapterResult<()>
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let records = encode_rules(ptype, rules)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        conn.execute(ListCommand::Push {
            key: &self.key,
            values: &records,
        })?;
        tracing::debug!(key = %self.key, added = records.len(), "added policies");
        Ok(())
    }

    // ============================================================================================
    // REMOVAL
    // ============================================================================================

    /// Removes the first stored copy of a rule. Missing rules are ignored.
    pub fn remove_policy<S: AsRef<str>>(&self, ptype: &str, rule: &[S]) -> AdapterResult<()> {
        let record = encode_rule(ptype, rule)?;
        let mut conn = self.connection()?;
        remove_first(conn.as_mut(), &self.key, &record)
    }

    /// Removes rules one at a time, in order.
    ///
    /// Stops at the first error; earlier removals are kept.
    pub fn remove_policies<R, S>(&self, ptype: &str, rules: &[R]) -> AdapterResult<()>
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let mut conn = self.connection()?;
        for rule in rules {
            let record = encode_rule(ptype, rule.as_ref())?;
            remove_first(conn.as_mut(), &self.key, &record)?;
        }
        Ok(())
    }

    /// Removes every rule of `ptype` whose fields starting at `field_index`
    /// equal `field_values`. Empty values match anything.
    pub fn remove_filtered_policy<S: AsRef<str>>(
        &self,
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> AdapterResult<()> {
        let pattern = field_range_pattern(ptype, field_index, field_values);
        let mut conn = self.connection()?;
        let removed = conn
            .eval(ListScript::RemoveMatching, &self.key, &[pattern.into_bytes()])?
            .into_int()?;

        tracing::debug!(key = %self.key, ptype, field_index, removed, "removed filtered policy");
        Ok(())
    }

    // ============================================================================================
    // UPDATES
    // ============================================================================================

    /// Replaces the first stored copy of `old_rule` with `new_rule`, in place.
    /// No match leaves the list unchanged.
    pub fn update_policy<S: AsRef<str>, T: AsRef<str>>(
        &self,
        ptype: &str,
        old_rule: &[S],
        new_rule: &[T],
    ) -> AdapterResult<()> {
        let old = encode_rule(ptype, old_rule)?;
        let new = encode_rule(ptype, new_rule)?;

        let mut conn = self.connection()?;
        conn.eval(ListScript::UpdateFirst, &self.key, &[old, new])?;
        Ok(())
    }

    /// Replaces every stored copy of each old rule with its paired new rule.
    ///
    /// The lists must have equal length. If an old rule appears twice, its
    /// last pairing wins.
    pub fn update_policies<R, S, U, T>(
        &self,
        ptype: &str,
        old_rules: &[R],
        new_rules: &[U],
    ) -> AdapterResult<()>
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
        U: AsRef<[T]>,
        T: AsRef<str>,
    {
        if old_rules.len() != new_rules.len() {
            return Err(AdapterError::Arity {
                old: old_rules.len(),
                new: new_rules.len(),
            });
        }
        if old_rules.is_empty() {
            return Ok(());
        }

        let mut args = encode_rules(ptype, old_rules)?;
        args.extend(encode_rules(ptype, new_rules)?);

        let mut conn = self.connection()?;
        let updated = conn
            .eval(ListScript::UpdateMapped, &self.key, &args)?
            .into_int()?;

        tracing::debug!(key = %self.key, ptype, updated, "updated policies");
        Ok(())
    }

    /// Removes the rules selected as in [`remove_filtered_policy`], appends
    /// `new_rules`, and returns the removed rules as positional fields.
    ///
    /// The remaining rules keep their order and the new rules follow them.
    ///
    /// [`remove_filtered_policy`]: Self::remove_filtered_policy
    pub fn update_filtered_policies<R, S, T>(
        &self,
        ptype: &str,
        new_rules: &[R],
        field_index: usize,
        field_values: &[T],
    ) -> AdapterResult<Vec<Vec<String>>>
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let pattern = field_range_pattern(ptype, field_index, field_values);
        let mut args = Vec::with_capacity(new_rules.len() + 1);
        args.push(pattern.into_bytes());
        args.extend(encode_rules(ptype, new_rules)?);

        let mut conn = self.connection()?;
        let removed = conn
            .eval(ListScript::ReplaceMatching, &self.key, &args)?
            .into_entries()?;
        drop(conn);

        let removed = removed
            .iter()
            .map(|entry| RuleRecord::decode(entry).map(|record| record.to_positional()))
            .collect::<AdapterResult<Vec<_>>>()?;

        tracing::debug!(
            key = %self.key,
            ptype,
            removed = removed.len(),
            added = new_rules.len(),
            "replaced filtered policies"
        );
        Ok(removed)
    }
}

impl fmt::Debug for RedisAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisAdapter")
            .field("key", &self.key)
            .field("provider", &self.provider)
            .field("filtered", &self.is_filtered())
            .finish()
    }
}

// ================================================================================================
// HELPERS
// ================================================================================================

/// Decode entries into the sink, skipping those the matcher rejects.
fn load_entries(
    sink: &mut dyn PolicySink,
    entries: &[Vec<u8>],
    matcher: Option<&SelectMatcher>,
) -> AdapterResult<usize> {
    let mut loaded = 0;
    for entry in entries {
        if matcher.is_some_and(|m| !m.matches(entry)) {
            continue;
        }
        sink.load_policy_line(RuleRecord::decode(entry)?.into_rule());
        loaded += 1;
    }
    Ok(loaded)
}

fn encode_rules<R, S>(ptype: &str, rules: &[R]) -> AdapterResult<Vec<Vec<u8>>>
where
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    rules
        .iter()
        .map(|rule| encode_rule(ptype, rule.as_ref()))
        .collect()
}

fn remove_first(
    conn: &mut (dyn ListConnection + '_),
    key: &str,
    record: &[u8],
) -> AdapterResult<()> {
    conn.execute(ListCommand::Remove {
        key,
        count: 1,
        value: record,
    })?;
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
