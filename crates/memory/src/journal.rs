//! Hash-chained append-only journal.
//!
//! Every record commits to its predecessor:
//!
//! ```text
//! hash = first 16 hex chars of SHA-256(prev || canonical_json(record_without_hash))
//! ```
//!
//! where `prev` is the previous record's hash (the literal `"GENESIS"` for
//! record 0) and canonical JSON is `serde_json`'s serialization of the
//! record object — key order is sorted because `serde_json::Map` is
//! BTreeMap-backed, so the writer and any later verifier agree byte for
//! byte. The `preserve_order` feature must stay off.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use blackroad_core::JournalError;

/// Predecessor hash of the very first record.
pub const GENESIS: &str = "GENESIS";

/// Hex characters kept from the full SHA-256 digest.
const HASH_LEN: usize = 16;

struct JournalState {
    last_hash: String,
    entries: u64,
    session_counts: HashMap<String, u64>,
}

/// The append-only journal.
///
/// All of hash computation, `last_hash` advance, and the file append happen
/// inside one critical section, so record *n+1* always reads record *n*'s
/// hash and line order matches hash order.
pub struct MemoryJournal {
    path: PathBuf,
    state: Mutex<JournalState>,
}

/// Summary counters for the introspection endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalStats {
    pub entries: u64,
    pub last_hash: String,
    pub session_counts: HashMap<String, u64>,
}

impl MemoryJournal {
    /// Open (or start) a journal at `path`.
    ///
    /// When the file exists, the last line's `hash` seeds the chain so the
    /// journal survives restarts; session counts start fresh per process.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| JournalError::Storage(e.to_string()))?;
        }

        let (last_hash, entries) = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let mut count = 0u64;
                let mut tail = GENESIS.to_string();
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    count += 1;
                    if let Ok(Value::Object(record)) = serde_json::from_str::<Value>(line) {
                        if let Some(Value::String(hash)) = record.get("hash") {
                            tail = hash.clone();
                        }
                    }
                }
                (tail, count)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (GENESIS.to_string(), 0),
            Err(e) => return Err(JournalError::Storage(e.to_string())),
        };

        Ok(Self {
            path,
            state: Mutex::new(JournalState {
                last_hash,
                entries,
                session_counts: HashMap::new(),
            }),
        })
    }

    /// Append a record and return its hash.
    ///
    /// `fields` is everything beyond the chain bookkeeping — `type`,
    /// `agent`, `provider`, `intent`, `status`/`verdict`, and whatever else
    /// the caller wants audited. `ts`, `prev`, and `hash` are filled here.
    pub fn record(&self, fields: Map<String, Value>) -> Result<String, JournalError> {
        let mut state = self.state.lock().unwrap();

        let mut record = Map::new();
        record.insert(
            "ts".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        record.insert("prev".into(), Value::String(state.last_hash.clone()));
        for (key, value) in fields {
            record.insert(key, value);
        }

        let canonical = serde_json::to_string(&Value::Object(record.clone()))?;
        let hash = chain_hash(&state.last_hash, &canonical);
        record.insert("hash".into(), Value::String(hash.clone()));

        let line = serde_json::to_string(&Value::Object(record.clone()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| JournalError::Storage(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| JournalError::Storage(e.to_string()))?;

        state.last_hash = hash.clone();
        state.entries += 1;
        if let Some(Value::String(agent)) = record.get("agent") {
            *state.session_counts.entry(agent.clone()).or_default() += 1;
        }

        Ok(hash)
    }

    /// The last `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Value>, JournalError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::Storage(e.to_string())),
        };

        let mut records: Vec<Value> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();

        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
        records.reverse();
        Ok(records)
    }

    /// Current counters.
    pub fn stats(&self) -> JournalStats {
        let state = self.state.lock().unwrap();
        JournalStats {
            entries: state.entries,
            last_hash: state.last_hash.clone(),
            session_counts: state.session_counts.clone(),
        }
    }

    /// The hash the next record will carry as `prev`.
    pub fn last_hash(&self) -> String {
        self.state.lock().unwrap().last_hash.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Compute one chain hash.
fn chain_hash(prev: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..HASH_LEN].to_string()
}

/// Walk a journal file and verify the whole chain.
///
/// Checks both rules: each record's `prev` equals its predecessor's `hash`
/// (GENESIS for record 0), and each `hash` matches the value recomputed
/// from the record's own fields. Returns the number of records verified;
/// an empty or absent file is a valid chain of length 0.
pub fn verify_journal(path: &Path) -> Result<usize, JournalError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(JournalError::Storage(e.to_string())),
    };

    let mut expected_prev = GENESIS.to_string();
    let mut verified = 0usize;

    for (idx, line) in content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
    {
        let lineno = idx + 1;
        let Value::Object(mut record) = serde_json::from_str::<Value>(line).map_err(|e| {
            JournalError::ChainBroken {
                line: lineno,
                reason: format!("unparseable record: {e}"),
            }
        })?
        else {
            return Err(JournalError::ChainBroken {
                line: lineno,
                reason: "record is not a JSON object".into(),
            });
        };

        let prev = match record.get("prev") {
            Some(Value::String(s)) => s.clone(),
            _ => {
                return Err(JournalError::ChainBroken {
                    line: lineno,
                    reason: "missing prev".into(),
                })
            }
        };
        let stored_hash = match record.remove("hash") {
            Some(Value::String(s)) => s,
            _ => {
                return Err(JournalError::ChainBroken {
                    line: lineno,
                    reason: "missing hash".into(),
                })
            }
        };

        if prev != expected_prev {
            return Err(JournalError::ChainBroken {
                line: lineno,
                reason: format!("prev is {prev}, expected {expected_prev}"),
            });
        }

        let canonical = serde_json::to_string(&Value::Object(record))?;
        let recomputed = chain_hash(&prev, &canonical);
        if recomputed != stored_hash {
            return Err(JournalError::ChainBroken {
                line: lineno,
                reason: format!("hash is {stored_hash}, recomputed {recomputed}"),
            });
        }

        expected_prev = stored_hash;
        verified += 1;
    }

    Ok(verified)
}
