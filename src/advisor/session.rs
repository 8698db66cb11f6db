use crate::features::PreferenceVector;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MAX_SESSIONS: usize = 10_000;

struct Entry {
    vector: PreferenceVector,
    updated: Instant,
    /// Write order, the stalest entry has the lowest.
    seq: u64,
}

/// Preference vectors keyed by session id.
///
/// Sessions expire `ttl` after their last update; past `capacity` the stalest one is evicted.
#[derive(Clone)]
pub struct Sessions {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    next_id: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
    epoch: u64,
    ttl: Duration,
    capacity: usize,
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new()
    }
}

impl Sessions {
    pub fn new() -> Self {
        Self::with_limits(SESSION_TTL, MAX_SESSIONS)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Sessions {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            writes: Arc::new(AtomicU64::new(0)),
            epoch,
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn issue_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{:x}-{}", self.epoch, n)
    }

    /// Stores `vector` under `id`, issuing a fresh id when none is given.
    pub async fn store(&self, id: Option<String>, vector: PreferenceVector) -> String {
        let id = match id {
            Some(id) if !id.trim().is_empty() => id,
            _ => self.issue_id(),
        };
        let now = Instant::now();
        let mut write = self.entries.write().await;

        let before = write.len();
        write.retain(|_, entry| now.duration_since(entry.updated) < self.ttl);
        let expired = before - write.len();

        if !write.contains_key(&id) && write.len() >= self.capacity {
            let stalest = write
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());
            if let Some(stalest) = stalest {
                write.remove(&stalest);
                debug!("session store full, evicted {}", stalest);
            }
        }

        write.insert(
            id.clone(),
            Entry {
                vector,
                updated: now,
                seq: self.writes.fetch_add(1, Ordering::Relaxed),
            },
        );
        debug!(
            "session {} updated, {} sessions, {} expired",
            id,
            write.len(),
            expired
        );
        id
    }

    pub async fn get(&self, id: &str) -> Option<PreferenceVector> {
        let read = self.entries.read().await;
        read.get(id)
            .filter(|entry| entry.updated.elapsed() < self.ttl)
            .map(|entry| entry.vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(v: f64) -> PreferenceVector {
        PreferenceVector::from_slice(&[v; 11]).unwrap()
    }

    async fn stored(sessions: &Sessions) -> usize {
        sessions.entries.read().await.len()
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let sessions = Sessions::new();
        let a = sessions.store(None, vector(0.1)).await;
        let b = sessions.store(None, vector(0.9)).await;
        assert_ne!(a, b);
        assert_eq!(sessions.get(&a).await, Some(vector(0.1)));
        assert_eq!(sessions.get(&b).await, Some(vector(0.9)));

        sessions.store(Some(a.clone()), vector(0.5)).await;
        assert_eq!(sessions.get(&a).await, Some(vector(0.5)));
        assert_eq!(sessions.get(&b).await, Some(vector(0.9)));
        assert_eq!(sessions.get("nope").await, None);
    }

    #[tokio::test]
    async fn blank_id_gets_a_fresh_one() {
        let sessions = Sessions::new();
        let id = sessions.store(Some("  ".to_string()), vector(0.2)).await;
        assert!(!id.trim().is_empty());
        assert_eq!(sessions.get(&id).await, Some(vector(0.2)));
    }

    #[tokio::test]
    async fn store_stays_bounded() {
        let sessions = Sessions::with_limits(SESSION_TTL, 3);
        let first = sessions.store(None, vector(0.1)).await;
        for _ in 0..50 {
            sessions.store(None, vector(0.3)).await;
        }
        assert_eq!(stored(&sessions).await, 3);
        assert_eq!(sessions.get(&first).await, None);

        // updating a known session never evicts another
        let last = sessions.store(None, vector(0.4)).await;
        sessions.store(Some(last.clone()), vector(0.6)).await;
        assert_eq!(stored(&sessions).await, 3);
        assert_eq!(sessions.get(&last).await, Some(vector(0.6)));
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped() {
        let sessions = Sessions::with_limits(Duration::from_millis(20), MAX_SESSIONS);
        let old = sessions.store(None, vector(0.1)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sessions.get(&old).await, None);

        let fresh = sessions.store(None, vector(0.2)).await;
        assert_eq!(stored(&sessions).await, 1);
        assert_eq!(sessions.get(&fresh).await, Some(vector(0.2)));
    }
}
