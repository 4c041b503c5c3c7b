// SPDX-License-Identifier: Apache-2.0

//! Per-process CPU state and its persistence.
//!
//! The state file is a JSON-lines document, one record per process. Writes
//! go through a temp file in the same directory followed by an atomic
//! rename; loads tolerate a truncated trailing record by ignoring it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Identity of one observed process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// Executable name, or a stable fallback derived from the resource.
    pub executable: String,
    /// Process id; zero for fallback identities.
    pub pid: i64,
}

impl ProcessIdentity {
    /// Wire form used as the state-file key.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.executable, self.pid)
    }
}

/// Last observed cumulative CPU reading of one process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuState {
    /// Last cumulative CPU seconds.
    pub last_cpu_seconds: f64,
    /// Timestamp of that reading, nanoseconds since the Unix epoch.
    pub last_time_unix_nano: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    identity: String,
    last_cpu_seconds: f64,
    last_time_unix_nano: u64,
}

/// In-memory per-process state map with an LRU bound.
#[derive(Debug, Default)]
pub struct StateStore {
    states: HashMap<ProcessIdentity, CpuState>,
}

impl StateStore {
    /// Number of tracked processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when no process is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Last state of `identity`, if observed before.
    #[must_use]
    pub fn get(&self, identity: &ProcessIdentity) -> Option<CpuState> {
        self.states.get(identity).copied()
    }

    /// Records the latest reading for `identity`.
    pub fn update(&mut self, identity: ProcessIdentity, state: CpuState) {
        let _ = self.states.insert(identity, state);
    }

    /// Evicts oldest-by-last-timestamp entries until at most `max` remain.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_to(&mut self, max: usize) -> usize {
        if self.states.len() <= max {
            return 0;
        }
        let excess = self.states.len() - max;
        let mut by_age: Vec<(ProcessIdentity, u64)> = self
            .states
            .iter()
            .map(|(id, st)| (id.clone(), st.last_time_unix_nano))
            .collect();
        by_age.sort_by_key(|(_, ts)| *ts);
        for (identity, _) in by_age.into_iter().take(excess) {
            let _ = self.states.remove(&identity);
        }
        excess
    }

    /// A snapshot copy for background flushing.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ProcessIdentity, CpuState)> {
        self.states
            .iter()
            .map(|(id, st)| (id.clone(), *st))
            .collect()
    }

    /// Loads a state file, tolerating absence and trailing truncation.
    ///
    /// Any other read problem is logged and yields an empty store (the warn
    /// path of the transient-state-IO taxonomy).
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no previous cpu state file");
                return Self::default();
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cpu state load failed, starting empty");
                return Self::default();
            }
        };
        let mut states = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StateRecord>(line) {
                Ok(record) => {
                    if let Some(identity) = decode_identity(&record.identity) {
                        let _ = states.insert(
                            identity,
                            CpuState {
                                last_cpu_seconds: record.last_cpu_seconds,
                                last_time_unix_nano: record.last_time_unix_nano,
                            },
                        );
                    }
                }
                Err(err) => {
                    // A torn final record is expected after a crash.
                    debug!(line = lineno + 1, error = %err, "ignoring unreadable state record");
                }
            }
        }
        Self { states }
    }

    /// Atomically writes `snapshot` to `path` (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an IO error when the temp file cannot be created, written,
    /// synced or renamed; the in-memory state stays authoritative.
    pub fn persist(
        path: &Path,
        snapshot: &[(ProcessIdentity, CpuState)],
    ) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        for (identity, state) in snapshot {
            let record = StateRecord {
                identity: identity.encode(),
                last_cpu_seconds: state.last_cpu_seconds,
                last_time_unix_nano: state.last_time_unix_nano,
            };
            serde_json::to_writer(&mut tmp, &record)?;
            tmp.write_all(b"\n")?;
        }
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        let _ = tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

fn decode_identity(encoded: &str) -> Option<ProcessIdentity> {
    let (executable, pid) = encoded.rsplit_once(':')?;
    Some(ProcessIdentity {
        executable: executable.to_owned(),
        pid: pid.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, pid: i64) -> ProcessIdentity {
        ProcessIdentity {
            executable: name.to_owned(),
            pid,
        }
    }

    #[test]
    fn round_trips_through_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu_state.jsonl");

        let mut store = StateStore::default();
        store.update(
            identity("nginx", 12),
            CpuState {
                last_cpu_seconds: 10.5,
                last_time_unix_nano: 1_000,
            },
        );
        store.update(
            identity("redis:server", 7),
            CpuState {
                last_cpu_seconds: 2.0,
                last_time_unix_nano: 2_000,
            },
        );
        StateStore::persist(&path, &store.snapshot()).unwrap();

        let loaded = StateStore::load(&path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get(&identity("nginx", 12)).unwrap().last_cpu_seconds,
            10.5
        );
        // Colons in the executable survive via rsplit.
        assert!(loaded.get(&identity("redis:server", 7)).is_some());
    }

    #[test]
    fn truncated_trailing_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu_state.jsonl");
        std::fs::write(
            &path,
            "{\"identity\":\"a:1\",\"last_cpu_seconds\":1.0,\"last_time_unix_nano\":5}\n{\"identity\":\"b:2\",\"last_cpu_s",
        )
        .unwrap();

        let loaded = StateStore::load(&path);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get(&identity("a", 1)).is_some());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StateStore::load(&dir.path().join("absent.jsonl"));
        assert!(loaded.is_empty());
    }

    #[test]
    fn eviction_removes_oldest_by_timestamp() {
        let mut store = StateStore::default();
        for i in 0..10i64 {
            store.update(
                identity("p", i),
                CpuState {
                    last_cpu_seconds: 0.0,
                    last_time_unix_nano: i as u64,
                },
            );
        }
        let evicted = store.evict_to(4);
        assert_eq!(evicted, 6);
        assert_eq!(store.len(), 4);
        // The newest survive.
        for i in 6..10 {
            assert!(store.get(&identity("p", i)).is_some());
        }
    }
}
