//! Last-Write-Wins conflict resolution with tombstones.

use crate::models::RemoteSecret;
use chrono::{DateTime, Utc};

/// What the relay must do for one secret name during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Both sides already agree.
    Skip,
    /// The relay copy wins; send it to the client.
    SendToClient,
    /// The client copy wins; write it to the relay.
    Store,
    /// The client tombstone wins; delete on the relay.
    Delete,
    /// No rule matched. Indicates a broken invariant.
    Unknown,
}

/// Outcome of applying a pushed secret to a local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Accept the remote entry (remote is newer).
    AcceptRemote,
    /// Keep the local entry (local is newer or equal).
    KeepLocal,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Classify a (client, server) pair of the same secret name.
    ///
    /// Rules, first match wins:
    /// 1. Neither side holds a live copy (absent or tombstoned) → skip.
    /// 2. Equal timestamps → skip.
    /// 3. Client side absent → send the server copy to the client.
    /// 4. Server side absent → store the client copy.
    /// 5. Client newer → delete if the client copy is a tombstone, else store.
    /// 6. Server newer → send the server copy to the client.
    /// 7. Anything else → unknown.
    pub fn classify(client: Option<&RemoteSecret>, server: Option<&RemoteSecret>) -> SyncAction {
        let client_dead = client.map_or(true, RemoteSecret::is_deleted);
        let server_dead = server.map_or(true, RemoteSecret::is_deleted);
        if client_dead && server_dead {
            return SyncAction::Skip;
        }

        match (client, server) {
            (Some(c), Some(s)) if c.last_modified == s.last_modified => SyncAction::Skip,
            (None, Some(_)) => SyncAction::SendToClient,
            (Some(_), None) => SyncAction::Store,
            (Some(c), Some(s)) if c.last_modified > s.last_modified => {
                if c.is_deleted() {
                    SyncAction::Delete
                } else {
                    SyncAction::Store
                }
            }
            (Some(c), Some(s)) if s.last_modified > c.last_modified => SyncAction::SendToClient,
            _ => SyncAction::Unknown,
        }
    }

    /// Decide whether a pushed secret replaces the local copy.
    ///
    /// Only a strictly newer remote timestamp wins; ties keep local.
    pub fn resolve(local_modified: DateTime<Utc>, remote: &RemoteSecret) -> Resolution {
        if remote.last_modified > local_modified {
            Resolution::AcceptRemote
        } else {
            Resolution::KeepLocal
        }
    }

    /// Check if an incoming entry should be inserted when there is no local copy.
    pub fn accept_new(remote: &RemoteSecret) -> bool {
        !remote.is_deleted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn live(t: i64) -> RemoteSecret {
        RemoteSecret {
            name: "s".to_string(),
            data: vec![0u8; 41],
            hash: format!("h{t}"),
            last_modified: at(t),
            deleted: None,
        }
    }

    fn dead(t: i64) -> RemoteSecret {
        RemoteSecret::tombstone("s", at(t))
    }

    #[test]
    fn both_absent_or_deleted_skips() {
        assert_eq!(ConflictResolver::classify(None, Some(&dead(10))), SyncAction::Skip);
        assert_eq!(ConflictResolver::classify(Some(&dead(10)), None), SyncAction::Skip);
        assert_eq!(
            ConflictResolver::classify(Some(&dead(10)), Some(&dead(20))),
            SyncAction::Skip
        );
        assert_eq!(ConflictResolver::classify(None, None), SyncAction::Skip);
    }

    #[test]
    fn equal_timestamps_skip() {
        assert_eq!(
            ConflictResolver::classify(Some(&live(10)), Some(&live(10))),
            SyncAction::Skip
        );
        assert_eq!(
            ConflictResolver::classify(Some(&dead(10)), Some(&live(10))),
            SyncAction::Skip
        );
    }

    #[test]
    fn one_sided_secrets_propagate() {
        assert_eq!(
            ConflictResolver::classify(None, Some(&live(10))),
            SyncAction::SendToClient
        );
        assert_eq!(
            ConflictResolver::classify(Some(&live(10)), None),
            SyncAction::Store
        );
    }

    #[test]
    fn newer_client_wins() {
        assert_eq!(
            ConflictResolver::classify(Some(&live(20)), Some(&live(10))),
            SyncAction::Store
        );
        assert_eq!(
            ConflictResolver::classify(Some(&dead(20)), Some(&live(10))),
            SyncAction::Delete
        );
        // A live client copy newer than a server tombstone revives it.
        assert_eq!(
            ConflictResolver::classify(Some(&live(20)), Some(&dead(10))),
            SyncAction::Store
        );
    }

    #[test]
    fn newer_server_wins() {
        assert_eq!(
            ConflictResolver::classify(Some(&live(10)), Some(&live(20))),
            SyncAction::SendToClient
        );
        assert_eq!(
            ConflictResolver::classify(Some(&live(10)), Some(&dead(20))),
            SyncAction::SendToClient
        );
    }

    #[test]
    fn resolve_requires_strictly_newer_remote() {
        assert_eq!(
            ConflictResolver::resolve(at(10), &live(20)),
            Resolution::AcceptRemote
        );
        assert_eq!(
            ConflictResolver::resolve(at(10), &live(10)),
            Resolution::KeepLocal
        );
        assert_eq!(
            ConflictResolver::resolve(at(30), &live(20)),
            Resolution::KeepLocal
        );
    }

    #[test]
    fn accept_new_ignores_tombstones() {
        assert!(ConflictResolver::accept_new(&live(1)));
        assert!(!ConflictResolver::accept_new(&dead(1)));
    }
}
