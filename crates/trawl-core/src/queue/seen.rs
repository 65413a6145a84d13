//! SeenStore: dedup of task fingerprints.

use dashmap::DashSet;

use crate::domain::Fingerprint;

/// Concurrent set of fingerprints observed during the run.
#[derive(Debug, Default)]
pub struct SeenStore {
    seen: DashSet<Fingerprint>,
}

impl SeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once per fingerprint.
    ///
    /// The check and the insert are a single shard-locked operation, so two
    /// racing callers with the same fingerprint cannot both win.
    pub fn check_and_mark(&self, fingerprint: Fingerprint) -> bool {
        self.seen.insert(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::of(&Url::parse(s).unwrap())
    }

    #[test]
    fn second_mark_returns_false() {
        let store = SeenStore::new();
        assert!(store.check_and_mark(fp("https://example.com/a")));
        assert!(!store.check_and_mark(fp("https://example.com/a")));
        assert!(store.check_and_mark(fp("https://example.com/b")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn exactly_one_concurrent_caller_wins() {
        let store = Arc::new(SeenStore::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        if store.check_and_mark(fp(&format!("https://example.com/{i}"))) {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::Relaxed), 100);
        assert!(store.contains(&fp("https://example.com/42")));
    }
}
