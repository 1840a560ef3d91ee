//! Correlates tool calls with the identifiers announced in the message stream.
//!
//! The message source assigns an identifier to every `tool_use` block it
//! emits, but the tool-execution layer asks for permission with only a tool
//! name and its input. The index bridges the two: announcements are queued per
//! `(name, input)` key in arrival order, and each permission request consumes
//! the oldest matching announcement.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{PermissionError, Result};
use crate::types::Message;

/// Default bound on unmatched records held by the index.
pub const DEFAULT_INDEX_CAPACITY: usize = 1024;

/// Matching half of an [`InvocationKey`].
///
/// The announcement in the message stream and the later permission request
/// decode the same arguments independently, so object key order can differ.
/// Both sides hash the sorted form and meet on the digest.
pub fn hash_input(input: &Value) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    if let Ok(bytes) = serde_json::to_vec(&sorted_keys(input)) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}

fn sorted_keys(input: &Value) -> Value {
    match input {
        Value::Object(fields) => {
            let ordered: BTreeMap<&String, Value> = fields
                .iter()
                .map(|(name, field)| (name, sorted_keys(field)))
                .collect();
            Value::Object(
                ordered
                    .into_iter()
                    .map(|(name, field)| (name.clone(), field))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        scalar => scalar.clone(),
    }
}

/// Lookup key for an invocation: tool name plus the hash of its input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    pub name: String,
    pub input_hash: String,
}

impl InvocationKey {
    pub fn new(name: impl Into<String>, input: &Value) -> Self {
        Self {
            name: name.into(),
            input_hash: hash_input(input),
        }
    }
}

/// A tool-use announcement waiting to be matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRecord {
    /// Identifier assigned by the message source
    pub id: String,
    pub name: String,
    pub input: Value,
    /// Global arrival order
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    queues: HashMap<InvocationKey, VecDeque<ToolInvocationRecord>>,
    /// Live records by arrival sequence, oldest first
    arrival: BTreeMap<u64, InvocationKey>,
    live_ids: HashSet<String>,
    next_sequence: u64,
}

impl IndexState {
    fn pop_front(&mut self, key: &InvocationKey) -> Option<ToolInvocationRecord> {
        let queue = self.queues.get_mut(key)?;
        let record = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(key);
        }
        self.arrival.remove(&record.sequence);
        self.live_ids.remove(&record.id);
        Some(record)
    }

    fn evict_oldest(&mut self) -> Option<ToolInvocationRecord> {
        let (_, key) = self.arrival.first_key_value()?;
        let key = key.clone();
        // The globally oldest record is always at the front of its own queue.
        self.pop_front(&key)
    }

    fn evict_over(&mut self, capacity: usize) {
        while self.arrival.len() > capacity {
            let Some(evicted) = self.evict_oldest() else {
                break;
            };
            log::debug!(
                "evicted unmatched invocation {} ({}) at capacity {}",
                evicted.id,
                evicted.name,
                capacity
            );
        }
    }
}

/// FIFO index of announced tool invocations keyed by structural `(name, input)`.
#[derive(Debug)]
pub struct ToolInvocationIndex {
    state: Mutex<IndexState>,
    capacity: usize,
    ingested: watch::Sender<u64>,
}

impl Default for ToolInvocationIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolInvocationIndex {
    /// Create an index bounded at [`DEFAULT_INDEX_CAPACITY`] records.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INDEX_CAPACITY)
    }

    /// Create an index holding at most `capacity` unmatched records (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let (ingested, _) = watch::channel(0);
        Self {
            state: Mutex::new(IndexState::default()),
            capacity: capacity.max(1),
            ingested,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record every tool-use announcement in `message`.
    ///
    /// Returns the records that were added. Announcements whose identifier is
    /// already waiting in the index are skipped.
    pub fn ingest(&self, message: &Message) -> Vec<ToolInvocationRecord> {
        let mut added = Vec::new();
        {
            let mut state = self.state.lock();
            for tool_use in message.tool_uses() {
                if state.live_ids.contains(&tool_use.id) {
                    log::debug!("skipping repeated announcement of {}", tool_use.id);
                    continue;
                }

                let sequence = state.next_sequence;
                state.next_sequence += 1;

                let key = InvocationKey::new(&tool_use.name, &tool_use.input);
                let record = ToolInvocationRecord {
                    id: tool_use.id.clone(),
                    name: tool_use.name.clone(),
                    input: tool_use.input.clone(),
                    sequence,
                };

                state.live_ids.insert(record.id.clone());
                state.arrival.insert(sequence, key.clone());
                state
                    .queues
                    .entry(key)
                    .or_default()
                    .push_back(record.clone());
                added.push(record);
                state.evict_over(self.capacity);
            }
        }

        if !added.is_empty() {
            self.ingested.send_modify(|count| *count += added.len() as u64);
        }
        added
    }

    /// Consume the oldest unmatched record for `(name, input)` and return its identifier.
    pub fn resolve(&self, name: &str, input: &Value) -> Result<String> {
        self.take(name, input).map(|record| record.id)
    }

    /// Like [`Self::resolve`], but hands back the whole record so it can be
    /// returned with [`Self::requeue`].
    pub fn take(&self, name: &str, input: &Value) -> Result<ToolInvocationRecord> {
        let key = InvocationKey::new(name, input);
        self.state
            .lock()
            .pop_front(&key)
            .ok_or_else(|| PermissionError::UnresolvedInvocation {
                tool_name: name.to_string(),
            })
    }

    /// Put a taken record back at its original arrival position.
    ///
    /// Returns false if its identifier was announced again in the meantime.
    /// The capacity bound still applies, so a record older than everything
    /// else in a full index is evicted straight away.
    pub fn requeue(&self, record: ToolInvocationRecord) -> bool {
        {
            let mut state = self.state.lock();
            if state.live_ids.contains(&record.id) {
                return false;
            }

            let key = InvocationKey::new(&record.name, &record.input);
            state.live_ids.insert(record.id.clone());
            state.arrival.insert(record.sequence, key.clone());
            let queue = state.queues.entry(key).or_default();
            let at = queue
                .iter()
                .position(|queued| queued.sequence > record.sequence)
                .unwrap_or(queue.len());
            queue.insert(at, record);
            state.evict_over(self.capacity);
        }

        self.ingested.send_modify(|count| *count += 1);
        true
    }

    /// Number of unmatched records.
    pub fn len(&self) -> usize {
        self.state.lock().arrival.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every unmatched record.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queues.clear();
        state.arrival.clear();
        state.live_ids.clear();
    }

    /// Watch the running count of ingested records.
    ///
    /// The value changes whenever an ingest adds at least one record, which
    /// is the moment an `UnresolvedInvocation` is worth retrying.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.ingested.subscribe()
    }
}
