use parking_lot::RwLock;
use tracing::debug;

use crate::paging::CountSink;

/// Per-account values the server reports alongside listing pages.
#[derive(Debug, Default)]
pub struct AccountState {
    unread_notifications: RwLock<Option<u64>>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until a listing has reported a count.
    pub fn unread_notifications(&self) -> Option<u64> {
        *self.unread_notifications.read()
    }

    pub fn reset(&self) {
        *self.unread_notifications.write() = None;
    }
}

impl CountSink for AccountState {
    fn update(&self, count: u64) {
        let mut unread = self.unread_notifications.write();
        if *unread != Some(count) {
            debug!(count, "unread notifications changed");
        }
        *unread = Some(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn records_latest_count() {
        let state = AccountState::new();
        assert_eq!(state.unread_notifications(), None);
        state.update(3);
        state.update(0);
        assert_eq!(state.unread_notifications(), Some(0));
        state.reset();
        assert_eq!(state.unread_notifications(), None);
    }

    #[test]
    fn shared_between_threads() {
        let state = Arc::new(AccountState::new());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let sink = state.clone();
                thread::spawn(move || sink.update(n))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(matches!(state.unread_notifications(), Some(n) if n < 4));
    }
}
