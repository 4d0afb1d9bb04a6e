//! Process-wide windowed counters gating how many retries a given key may
//! consume in a rolling time window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    start_ms: u64,
}

/// Shared, mutex-guarded windowed counter store. A single instance is
/// constructed once per process and handed to every Transport call that
/// configures a retry budget.
#[derive(Debug, Default)]
pub struct RetryBudgetStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl RetryBudgetStore {
    pub fn new() -> Self {
        RetryBudgetStore {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one unit of budget for `key`. Resets the window if absent or
    /// stale, denies once `limit` has been reached within `window_ms`.
    ///
    /// Holds the store's mutex for the full check-then-increment so
    /// concurrent callers for the same key see a linearizable view.
    pub fn consume(&self, key: &str, limit: u32, window_ms: u64) -> bool {
        let now = now_ms();
        let mut windows = self.windows.lock().expect("retry budget mutex poisoned");

        match windows.get_mut(key) {
            Some(window) if now.saturating_sub(window.start_ms) < window_ms => {
                if window.count >= limit {
                    false
                } else {
                    window.count += 1;
                    true
                }
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    Window {
                        count: 1,
                        start_ms: now,
                    },
                );
                true
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_allows_up_to_limit_then_denies() {
        let store = RetryBudgetStore::new();
        assert!(store.consume("k", 2, 60_000));
        assert!(store.consume("k", 2, 60_000));
        assert!(!store.consume("k", 2, 60_000));
    }

    #[test]
    fn consume_resets_after_window_elapses() {
        let store = RetryBudgetStore::new();
        assert!(store.consume("k", 1, 0));
        // window_ms of 0 means any elapsed time reopens the window.
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(store.consume("k", 1, 0));
    }

    #[test]
    fn distinct_keys_have_independent_budgets() {
        let store = RetryBudgetStore::new();
        assert!(store.consume("a", 1, 60_000));
        assert!(store.consume("b", 1, 60_000));
        assert!(!store.consume("a", 1, 60_000));
    }

    #[test]
    fn consume_is_linearizable_under_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(RetryBudgetStore::new());
        let limit = 10;
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || store.consume("shared", limit, 60_000)));
        }
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, limit as usize);
    }
}
