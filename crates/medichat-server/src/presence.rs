use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use medichat_core::ids::UserId;

/// Set of currently-online users, tracked as per-user live-connection
/// counts so that multi-device users flip presence only on 0<->1
/// transitions. Process-lifetime state; empty after a restart.
pub struct PresenceTracker {
    counts: DashMap<UserId, usize>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Record one more live connection for the user. Returns true only
    /// when this brought the user online (first connection).
    pub fn mark_online(&self, user: UserId) -> bool {
        let mut count = self.counts.entry(user).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Record one connection closing. Returns true only when this was the
    /// user's last connection; a user with another live connection stays
    /// online.
    pub fn mark_offline(&self, user: UserId) -> bool {
        match self.counts.entry(user) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= 1 {
                    entry.remove();
                    true
                } else {
                    *entry.get_mut() -= 1;
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Full snapshot of online user ids, sorted for stable output.
    pub fn snapshot(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.counts.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.counts.contains_key(&user)
    }

    pub fn online_count(&self) -> usize {
        self.counts.len()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_connection_is_a_transition() {
        let presence = PresenceTracker::new();
        assert!(presence.mark_online(UserId::new(1)));
        assert!(presence.is_online(UserId::new(1)));
    }

    #[test]
    fn second_device_is_not_a_transition() {
        let presence = PresenceTracker::new();
        assert!(presence.mark_online(UserId::new(1)));
        assert!(!presence.mark_online(UserId::new(1)));
        assert_eq!(presence.online_count(), 1);
    }

    #[test]
    fn one_device_closing_keeps_user_online() {
        let presence = PresenceTracker::new();
        presence.mark_online(UserId::new(1));
        presence.mark_online(UserId::new(1));

        assert!(!presence.mark_offline(UserId::new(1)));
        assert!(presence.is_online(UserId::new(1)));

        assert!(presence.mark_offline(UserId::new(1)));
        assert!(!presence.is_online(UserId::new(1)));
    }

    #[test]
    fn offline_without_online_is_a_noop() {
        let presence = PresenceTracker::new();
        assert!(!presence.mark_offline(UserId::new(7)));
        assert_eq!(presence.online_count(), 0);
    }

    #[test]
    fn snapshot_is_sorted_and_complete() {
        let presence = PresenceTracker::new();
        presence.mark_online(UserId::new(5));
        presence.mark_online(UserId::new(1));
        presence.mark_online(UserId::new(3));

        let ids: Vec<i64> = presence.snapshot().iter().map(UserId::as_i64).collect();
        assert_eq!(ids, [1, 3, 5]);
    }

    #[test]
    fn snapshot_excludes_departed_users() {
        let presence = PresenceTracker::new();
        presence.mark_online(UserId::new(1));
        presence.mark_online(UserId::new(2));
        presence.mark_offline(UserId::new(1));

        let ids: Vec<i64> = presence.snapshot().iter().map(UserId::as_i64).collect();
        assert_eq!(ids, [2]);
    }
}
