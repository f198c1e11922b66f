//! services/api/src/session/store.rs
//!
//! Durable, crash-recoverable storage of driver session tokens.
//!
//! Tokens live in a mutex-guarded in-memory map and are mirrored to a JSON
//! file so sessions survive process restarts. Every mutation rewrites the
//! full non-expired subset through a write-temp-then-rename, so a crash
//! mid-write never leaves a half-written file in place; session volume is
//! single-digit drivers per day, which makes the write amplification a
//! non-issue. The store is always injected through `AppState`, never a
//! process-wide global.

use chrono::Utc;
use pickup_route_core::domain::{SessionRecord, SessionState};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

pub struct TokenStore {
    path: PathBuf,
    tokens: Mutex<HashMap<String, SessionRecord>>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Generates a fresh 32-character alphanumeric token from the OS RNG.
    /// The space is large enough that collisions are treated as negligible.
    pub fn generate_token() -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    /// Reads the durable file, discards entries already expired, and
    /// populates the in-memory map. A missing file is not an error: the
    /// store simply starts empty. An unparseable file is logged and
    /// treated as empty rather than crashing startup.
    pub fn load_on_start(&self) {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no token storage file found, starting with empty store");
                return;
            }
            Err(e) => {
                warn!("could not read token storage file: {e}");
                return;
            }
        };

        let parsed: HashMap<String, SessionRecord> = match serde_json::from_slice(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("token storage file is not valid JSON, ignoring it: {e}");
                return;
            }
        };

        let now = Utc::now();
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        let total = parsed.len();
        for (token, record) in parsed {
            if !record.is_expired_at(now) {
                tokens.insert(token, record);
            }
        }
        info!(
            "loaded {} valid session tokens from file (skipped {} expired)",
            tokens.len(),
            total - tokens.len()
        );
    }

    /// Inserts or replaces a record and persists the store.
    pub fn put(&self, token: String, record: SessionRecord) {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        tokens.insert(token, record);
        Self::persist(&self.path, &tokens);
    }

    pub fn get(&self, token: &str) -> Option<SessionRecord> {
        let tokens = self.tokens.lock().expect("token store mutex poisoned");
        tokens.get(token).cloned()
    }

    /// Removes a token; persists only when something was actually removed.
    pub fn delete(&self, token: &str) -> bool {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        let removed = tokens.remove(token).is_some();
        if removed {
            Self::persist(&self.path, &tokens);
        }
        removed
    }

    /// Removes all entries whose expiry has passed. Returns the number
    /// removed; persists only when that number is non-zero.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        let before = tokens.len();
        tokens.retain(|_, record| !record.is_expired_at(now));
        let removed = before - tokens.len();
        if removed > 0 {
            Self::persist(&self.path, &tokens);
            info!("swept {removed} expired session tokens");
        }
        removed
    }

    /// Bumps the record's last-activity timestamp. Persisting on every
    /// validation would multiply file I/O for no recovery benefit, so the
    /// caller decides (probabilistically) whether this bump hits the disk;
    /// the periodic sweep is the consistency backstop.
    pub fn touch(&self, token: &str, persist: bool) {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        if let Some(record) = tokens.get_mut(token) {
            record.state.touch(Utc::now());
            if persist {
                Self::persist(&self.path, &tokens);
            }
        }
    }

    /// Applies a closure to the record's mutable app state, bumps
    /// last-activity, persists, and returns the updated record.
    pub fn update_state<F>(&self, token: &str, f: F) -> Option<SessionRecord>
    where
        F: FnOnce(&mut SessionState),
    {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        let record = tokens.get_mut(token)?;
        f(&mut record.state);
        record.state.touch(Utc::now());
        let updated = record.clone();
        Self::persist(&self.path, &tokens);
        Some(updated)
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().expect("token store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the full non-expired subset to a sibling temp file and
    /// renames it into place. Failures are logged and swallowed: the
    /// in-memory map stays authoritative and the next mutation or sweep
    /// retries the write.
    fn persist(path: &Path, tokens: &HashMap<String, SessionRecord>) {
        let now = Utc::now();
        let live: HashMap<&String, &SessionRecord> = tokens
            .iter()
            .filter(|(_, record)| !record.is_expired_at(now))
            .collect();

        let json = match serde_json::to_vec_pretty(&live) {
            Ok(json) => json,
            Err(e) => {
                warn!("could not serialize session tokens: {e}");
                return;
            }
        };

        let tmp = path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp, &json) {
            warn!("could not write token temp file {}: {e}", tmp.display());
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            warn!("could not move token file into place: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_in(dir: &tempfile::TempDir) -> TokenStore {
        TokenStore::new(dir.path().join("tokens.json"))
    }

    fn multi_record(route_id: i64, ttl_hours: i64) -> SessionRecord {
        SessionRecord::new_multi_pickup(
            "KA01AB1234".to_string(),
            "DL-042".to_string(),
            route_id,
            Duration::hours(ttl_hours),
        )
    }

    #[test]
    fn generated_tokens_are_32_alphanumeric_chars() {
        let token = TokenStore::generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, TokenStore::generate_token());
    }

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.put("tok1".to_string(), multi_record(42, 20));
        let record = store.get("tok1").expect("record stored");
        assert_eq!(record.route_id(), Some(42));

        assert!(store.delete("tok1"));
        assert!(store.get("tok1").is_none());
        assert!(!store.delete("tok1"));
    }

    #[test]
    fn records_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::new(&path);
        store.put("tok1".to_string(), multi_record(7, 20));

        let reloaded = TokenStore::new(&path);
        reloaded.load_on_start();
        let record = reloaded.get("tok1").expect("record reloaded");
        assert_eq!(record.route_id(), Some(7));
        assert_eq!(record.vehicle_no, "KA01AB1234");
    }

    #[test]
    fn load_skips_entries_expired_before_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::new(&path);
        store.put("live".to_string(), multi_record(1, 20));
        store.put("dead".to_string(), multi_record(2, -1));

        let reloaded = TokenStore::new(&path);
        reloaded.load_on_start();
        assert!(reloaded.get("live").is_some());
        assert!(reloaded.get("dead").is_none());
    }

    #[test]
    fn missing_file_means_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.load_on_start();
        assert!(store.is_empty());
    }

    #[test]
    fn partial_temp_file_never_corrupts_the_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::new(&path);
        store.put("tok1".to_string(), multi_record(3, 20));

        // A crash mid-write leaves a truncated temp file behind; the
        // committed file must still load intact.
        std::fs::write(path.with_extension("tmp"), b"{\"trunc").unwrap();

        let reloaded = TokenStore::new(&path);
        reloaded.load_on_start();
        assert!(reloaded.get("tok1").is_some());
    }

    #[test]
    fn corrupt_committed_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let store = TokenStore::new(&path);
        store.load_on_start();
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.put("live".to_string(), multi_record(1, 20));
        store.put("dead".to_string(), multi_record(2, -1));

        assert_eq!(store.sweep_expired(), 1);
        assert!(store.get("live").is_some());
        assert!(store.get("dead").is_none());
        assert_eq!(store.sweep_expired(), 0);
    }

    #[test]
    fn update_state_mutates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::new(&path);
        store.put("tok1".to_string(), multi_record(9, 20));

        let updated = store
            .update_state("tok1", |state| {
                if let SessionState::MultiPickup { trip_started, .. } = state {
                    *trip_started = true;
                }
            })
            .expect("record exists");
        match updated.state {
            SessionState::MultiPickup { trip_started, .. } => assert!(trip_started),
            _ => panic!("kind changed"),
        }

        let reloaded = TokenStore::new(&path);
        reloaded.load_on_start();
        match reloaded.get("tok1").unwrap().state {
            SessionState::MultiPickup { trip_started, .. } => assert!(trip_started),
            _ => panic!("kind changed"),
        }
    }
}
