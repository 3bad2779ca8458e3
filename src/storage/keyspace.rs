//! Sharded Keyspace
//!
//! The keyspace maps string keys to string values with an optional expiration
//! instant per key. Instead of one big lock it uses a fixed number of shards,
//! each its own `RwLock<HashMap>`, so readers and writers of different keys
//! rarely contend.
//!
//! ## Concurrency Model
//!
//! Every operation is atomic with respect to concurrent callers and
//! linearizable on the single key involved. `incr`/`decr` perform their
//! load-modify-store entirely under the shard's write lock, which is what
//! makes N parallel increments land on exactly +N.
//!
//! ## Expiry Model
//!
//! Expiry is lazy: `get`, `ttl` and `keys` treat an expired entry as absent
//! even if the background sweeper has not reclaimed it yet. `set` clears any
//! existing expiration; `incr`/`decr` leave it untouched.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Number of shards. More shards mean less lock contention at a small cost
/// in memory and full-scan overhead.
const NUM_SHARDS: usize = 16;

/// A stored value with optional expiration.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn with_ttl(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    #[inline]
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// Error returned by [`Keyspace::incr`]/[`Keyspace::decr`] when the stored
/// value cannot be stepped. Overflow is reported the same way as a
/// non-numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value is not an integer")]
pub struct NotAnInteger;

/// The in-memory keyspace shared by every connection and the sweeper.
///
/// Designed to be wrapped in an `Arc` and cloned across tasks. All
/// operations take `&self`.
pub struct Keyspace {
    shards: Vec<RwLock<HashMap<String, Entry>>>,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Stores `value` under `key`, clearing any existing expiration.
    pub fn set(&self, key: &str, value: &str) {
        let mut shard = self.shard(key).write().unwrap();
        shard.insert(key.to_owned(), Entry::new(value.to_owned()));
    }

    /// Stores `value` under `key` with an expiration `ttl` from now.
    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        let mut shard = self.shard(key).write().unwrap();
        shard.insert(key.to_owned(), Entry::with_ttl(value.to_owned(), ttl));
    }

    /// Sets an expiration on an existing key.
    ///
    /// Returns `true` if the key existed and was not expired; does not
    /// create a key.
    pub fn set_expire(&self, key: &str, ttl: Duration) -> bool {
        let mut shard = self.shard(key).write().unwrap();
        match shard.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            Some(_) => {
                shard.remove(key);
                false
            }
            None => false,
        }
    }

    /// Returns the value for `key`, or `None` if it is absent or expired.
    ///
    /// An expired entry found on this path is removed (lazy expiry).
    pub fn get(&self, key: &str) -> Option<String> {
        // Fast path: read lock only.
        {
            let shard = self.shard(key).read().unwrap();
            match shard.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // The entry was expired; upgrade to a write lock to remove it. The
        // key may have been rewritten in between, so re-check.
        let mut shard = self.shard(key).write().unwrap();
        match shard.get(key) {
            Some(entry) if entry.is_expired() => {
                shard.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes `key`. Returns `true` only if a live entry was removed.
    pub fn del(&self, key: &str) -> bool {
        let mut shard = self.shard(key).write().unwrap();
        match shard.remove(key) {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    /// Remaining lifetime of `key` in whole seconds.
    ///
    /// Returns `-2` if the key is absent or expired, `-1` if it has no
    /// expiration, otherwise the floor of the seconds remaining.
    pub fn ttl(&self, key: &str) -> i64 {
        let shard = self.shard(key).read().unwrap();
        match shard.get(key) {
            Some(entry) if entry.is_expired() => -2,
            Some(entry) => match entry.expires_at {
                Some(exp) => exp.saturating_duration_since(Instant::now()).as_secs() as i64,
                None => -1,
            },
            None => -2,
        }
    }

    /// Removes every entry and every expiration.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.write().unwrap().clear();
        }
    }

    /// Returns all live keys matching a shell-glob `pattern`.
    ///
    /// Supported syntax: `*`, `?`, `[...]` classes (with ranges and `^`
    /// negation) and `\` escapes. Order is unspecified; callers may
    /// truncate.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let mut matches = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().unwrap();
            for (key, entry) in shard.iter() {
                if !entry.is_expired() && glob_match(pattern, key) {
                    matches.push(key.clone());
                }
            }
        }
        matches
    }

    /// Atomically increments the integer stored at `key` by one and returns
    /// the new value. An absent key is created at `1` with no expiration;
    /// an existing key keeps its expiration.
    pub fn incr(&self, key: &str) -> Result<i64, NotAnInteger> {
        self.add(key, 1)
    }

    /// Atomically decrements the integer stored at `key` by one and returns
    /// the new value. An absent key is created at `-1` with no expiration.
    pub fn decr(&self, key: &str) -> Result<i64, NotAnInteger> {
        self.add(key, -1)
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, NotAnInteger> {
        let mut shard = self.shard(key).write().unwrap();

        // Load-modify-store under the write lock; an expired entry counts
        // as absent and loses its expiration.
        let (current, expires_at) = match shard.get(key) {
            Some(entry) if !entry.is_expired() => {
                let n = entry.value.parse::<i64>().map_err(|_| NotAnInteger)?;
                (n, entry.expires_at)
            }
            _ => (0, None),
        };

        let next = current.checked_add(delta).ok_or(NotAnInteger)?;
        shard.insert(
            key.to_owned(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    /// Removes every expired entry, one shard at a time.
    ///
    /// Called by the background sweeper; returns the number of entries
    /// reclaimed.
    pub fn remove_expired(&self) -> usize {
        let mut reclaimed = 0;
        for shard in &self.shards {
            let mut shard = shard.write().unwrap();
            let before = shard.len();
            shard.retain(|_, entry| !entry.is_expired());
            reclaimed += before - shard.len();
        }
        reclaimed
    }

    /// Approximate number of entries, expired included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }

    /// Returns `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shell-glob matcher for the KEYS command.
///
/// Iterative with single-star backtracking: on a mismatch we retry from the
/// most recent `*`, letting it swallow one more character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        let step = if pi < p.len() {
            match p[pi] {
                b'*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                b'?' => Some(1),
                b'[' => match class_end(p, pi) {
                    Some(end) => {
                        if class_match(&p[pi + 1..end], t[ti]) {
                            pi = end; // advanced past ']' below
                            Some(1)
                        } else {
                            None
                        }
                    }
                    // No closing bracket: treat '[' as a literal.
                    None => (t[ti] == b'[').then_some(1),
                },
                b'\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 1;
                        Some(1)
                    } else {
                        None
                    }
                }
                c => (c == t[ti]).then_some(1),
            }
        } else {
            None
        };

        match step {
            Some(n) => {
                pi += 1;
                ti += n;
            }
            None => match star {
                Some((star_pi, star_ti)) => {
                    pi = star_pi + 1;
                    ti = star_ti + 1;
                    star = Some((star_pi, star_ti + 1));
                }
                None => return false,
            },
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Index of the `]` closing the class that opens at `p[start]`.
fn class_end(p: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if i < p.len() && p[i] == b'^' {
        i += 1;
    }
    while i < p.len() {
        if p[i] == b']' && i > start + 1 {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Matches one byte against a class body (the part between the brackets).
fn class_match(body: &[u8], ch: u8) -> bool {
    let (negated, body) = match body.first() {
        Some(b'^') => (true, &body[1..]),
        _ => (false, body),
    };

    let mut matched = false;
    let mut i = 0;
    while i < body.len() {
        if i + 2 < body.len() && body[i + 1] == b'-' {
            if body[i] <= ch && ch <= body[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if body[i] == ch {
                matched = true;
            }
            i += 1;
        }
    }
    matched != negated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let ks = Keyspace::new();
        ks.set("key", "value");
        assert_eq!(ks.get("key"), Some("value".to_string()));
        assert_eq!(ks.get("missing"), None);
    }

    #[test]
    fn del_reports_liveness() {
        let ks = Keyspace::new();
        ks.set("key", "value");
        assert!(ks.del("key"));
        assert_eq!(ks.get("key"), None);
        assert!(!ks.del("key"));
    }

    #[test]
    fn set_clears_expiration() {
        let ks = Keyspace::new();
        ks.set_with_ttl("key", "v1", Duration::from_secs(100));
        assert!(ks.ttl("key") >= 0);
        ks.set("key", "v2");
        assert_eq!(ks.ttl("key"), -1);
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let ks = Keyspace::new();
        ks.set_with_ttl("key", "value", Duration::from_millis(30));
        assert_eq!(ks.get("key"), Some("value".to_string()));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(ks.get("key"), None);
        assert_eq!(ks.ttl("key"), -2);
    }

    #[test]
    fn ttl_values() {
        let ks = Keyspace::new();
        assert_eq!(ks.ttl("missing"), -2);
        ks.set("forever", "v");
        assert_eq!(ks.ttl("forever"), -1);
        ks.set_with_ttl("timed", "v", Duration::from_secs(60));
        let ttl = ks.ttl("timed");
        assert!((59..=60).contains(&ttl), "ttl was {ttl}");
    }

    #[test]
    fn set_expire_requires_live_key() {
        let ks = Keyspace::new();
        assert!(!ks.set_expire("missing", Duration::from_secs(10)));
        ks.set("key", "v");
        assert!(ks.set_expire("key", Duration::from_secs(10)));
        assert!(ks.ttl("key") >= 9);

        ks.set_with_ttl("gone", "v", Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!ks.set_expire("gone", Duration::from_secs(10)));
    }

    #[test]
    fn incr_and_decr() {
        let ks = Keyspace::new();
        assert_eq!(ks.incr("counter"), Ok(1));
        assert_eq!(ks.incr("counter"), Ok(2));
        assert_eq!(ks.decr("counter"), Ok(1));
        assert_eq!(ks.decr("fresh"), Ok(-1));

        ks.set("num", "41");
        assert_eq!(ks.incr("num"), Ok(42));
        assert_eq!(ks.get("num"), Some("42".to_string()));
    }

    #[test]
    fn incr_rejects_non_integers_and_overflow() {
        let ks = Keyspace::new();
        ks.set("text", "hello");
        assert_eq!(ks.incr("text"), Err(NotAnInteger));

        ks.set("max", &i64::MAX.to_string());
        assert_eq!(ks.incr("max"), Err(NotAnInteger));
        ks.set("min", &i64::MIN.to_string());
        assert_eq!(ks.decr("min"), Err(NotAnInteger));
    }

    #[test]
    fn incr_preserves_expiration() {
        let ks = Keyspace::new();
        ks.set_with_ttl("counter", "5", Duration::from_secs(100));
        assert_eq!(ks.incr("counter"), Ok(6));
        assert!(ks.ttl("counter") > 0);

        // A freshly created counter has no expiration.
        assert_eq!(ks.incr("fresh"), Ok(1));
        assert_eq!(ks.ttl("fresh"), -1);
    }

    #[test]
    fn parallel_increments_are_atomic() {
        use std::sync::Arc;
        use std::thread;

        let ks = Arc::new(Keyspace::new());
        ks.set("counter", "0");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ks = Arc::clone(&ks);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    ks.incr("counter").unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ks.get("counter"), Some("2000".to_string()));
    }

    #[test]
    fn keys_matches_globs_and_skips_expired() {
        let ks = Keyspace::new();
        ks.set("hello", "1");
        ks.set("hallo", "2");
        ks.set("world", "3");
        ks.set_with_ttl("help", "4", Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));

        let mut all = ks.keys("*");
        all.sort();
        assert_eq!(all, ["hallo", "hello", "world"]);

        assert_eq!(ks.keys("h?llo").len(), 2);
        assert_eq!(ks.keys("w*").len(), 1);
    }

    #[test]
    fn flush_removes_everything() {
        let ks = Keyspace::new();
        ks.set("a", "1");
        ks.set_with_ttl("b", "2", Duration::from_secs(60));
        ks.flush();
        assert!(ks.is_empty());
        assert_eq!(ks.get("a"), None);
        assert_eq!(ks.ttl("b"), -2);
    }

    #[test]
    fn remove_expired_reclaims_only_dead_entries() {
        let ks = Keyspace::new();
        ks.set_with_ttl("a", "1", Duration::from_millis(10));
        ks.set_with_ttl("b", "2", Duration::from_millis(10));
        ks.set("c", "3");
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(ks.remove_expired(), 2);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks.get("c"), Some("3".to_string()));
    }

    #[test]
    fn glob_star_and_question() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("h*llo", "hello"));
        assert!(glob_match("h*llo", "hllo"));
        assert!(glob_match("h*llo", "heeeello"));
        assert!(!glob_match("h*llo", "world"));
        assert!(glob_match("h?llo", "hallo"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("a*b*c", "a-x-b-y"));
    }

    #[test]
    fn glob_classes_and_escapes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("k[0-9]", "k7"));
        assert!(!glob_match("k[0-9]", "kx"));
        assert!(glob_match("h[^ae]llo", "hillo"));
        assert!(!glob_match("h[^ae]llo", "hallo"));
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
    }
}
