//! Session & SessionCache (§4.10). A `Session` is everything needed to
//! resume a connection without a full handshake; `SessionCache` is the one
//! piece of state shared across every `Connection` in a process.

use crate::protocol::{CipherSuite, ProtocolVersion};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A TLS 1.3 `NewSessionTicket`: opaque ticket bytes plus the metadata
/// needed to use it for 0-RTT rejection/acceptance decisions and PSK
/// binder computation.
#[derive(Clone)]
pub struct Ticket {
    pub ticket: Vec<u8>,
    pub ticket_lifetime: Duration,
    pub ticket_age_add: u32,
    pub ticket_nonce: Vec<u8>,
    pub resumption_master_secret: Vec<u8>,
    pub issued_at: Instant,
}

impl Ticket {
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() > self.ticket_lifetime
    }
}

/// Everything a resumed handshake needs: either a TLS ≤1.2 session_id
/// entry (master secret + negotiated parameters) or a TLS 1.3 PSK derived
/// from a `Ticket`.
#[derive(Clone)]
pub struct Session {
    pub id: Vec<u8>,
    pub protocol_version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub master_secret: Vec<u8>,
    pub extended_master_secret: bool,
    pub peer_certificate_chain: Vec<Vec<u8>>,
    pub tickets: Vec<Ticket>,
    created_at: Instant,
}

impl Session {
    pub fn new(
        id: Vec<u8>,
        protocol_version: ProtocolVersion,
        cipher_suite: CipherSuite,
        master_secret: Vec<u8>,
        extended_master_secret: bool,
    ) -> Session {
        Session {
            id,
            protocol_version,
            cipher_suite,
            master_secret,
            extended_master_secret,
            peer_certificate_chain: Vec::new(),
            tickets: Vec::new(),
            created_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

struct Entry {
    session: Session,
    inserted_at: Instant,
}

/// Process-wide cache keyed by session id, capacity- and age-bounded.
/// Locked with a plain blocking `Mutex` since every suspension point in
/// this engine is synchronous I/O, never an await (§5 [AMBIENT]).
pub struct SessionCache {
    capacity: usize,
    max_age: Duration,
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
    /// FIFO insertion order, used to choose an eviction victim when over
    /// capacity. A true LRU would also bump on `get`; FIFO is the floor
    /// §4.10 accepts and is what this implementation provides.
    order: Mutex<Vec<Vec<u8>>>,
}

impl SessionCache {
    pub fn new(capacity: usize, max_age: Duration) -> SessionCache {
        SessionCache {
            capacity,
            max_age,
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Look up a session by id. Expired entries are evicted on read and
    /// reported as a miss, matching §4.10's "if entry is older than T,
    /// remove it and report miss."
    pub fn get(&self, id: &[u8]) -> Option<Session> {
        let mut entries = self.entries.lock().unwrap();
        let expired = match entries.get(id) {
            Some(entry) => entry.inserted_at.elapsed() > self.max_age,
            None => return None,
        };
        if expired {
            entries.remove(id);
            drop(entries);
            self.order.lock().unwrap().retain(|k| k != id);
            return None;
        }
        entries.get(id).map(|e| e.session.clone())
    }

    /// Insert or replace a session. Evicts the oldest entry by insertion
    /// order when the cache is at capacity.
    pub fn put(&self, session: Session) {
        let id = session.id.clone();
        let mut entries = self.entries.lock().unwrap();
        let mut order = self.order.lock().unwrap();

        if !entries.contains_key(&id) {
            if entries.len() >= self.capacity {
                if let Some(oldest) = order.first().cloned() {
                    entries.remove(&oldest);
                    order.retain(|k| k != &oldest);
                }
            }
            order.push(id.clone());
        }
        entries.insert(
            id,
            Entry {
                session,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Attach a freshly issued ticket to an existing session, or create one
    /// if the session id isn't present yet.
    pub fn add_ticket(&self, id: &[u8], ticket: Ticket) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            entry.session.tickets.push(ticket);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CipherSuite as CS;

    fn dummy_session(id: &[u8]) -> Session {
        Session::new(
            id.to_vec(),
            ProtocolVersion::TLS1_3,
            CS::TLS_AES_128_GCM_SHA256,
            vec![0u8; 32],
            true,
        )
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = SessionCache::new(4, Duration::from_secs(3600));
        cache.put(dummy_session(b"session-a"));
        let got = cache.get(b"session-a").unwrap();
        assert_eq!(got.id, b"session-a");
    }

    #[test]
    fn miss_on_unknown_id() {
        let cache = SessionCache::new(4, Duration::from_secs(3600));
        assert!(cache.get(b"nope").is_none());
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let cache = SessionCache::new(2, Duration::from_secs(3600));
        cache.put(dummy_session(b"a"));
        cache.put(dummy_session(b"b"));
        cache.put(dummy_session(b"c"));
        assert!(cache.get(b"a").is_none());
        assert!(cache.get(b"b").is_some());
        assert!(cache.get(b"c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entry_is_removed_on_read() {
        let cache = SessionCache::new(4, Duration::from_millis(1));
        cache.put(dummy_session(b"a"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get(b"a").is_none());
        assert_eq!(cache.len(), 0);
    }
}
