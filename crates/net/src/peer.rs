use serde::{Deserialize, Serialize};
use worldnet_common::{PeerId, PeerIndex, UserId, UserIndex};

/// One connection endpoint admitted to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPeer {
    pub peer_id: PeerId,
    pub peer_index: PeerIndex,
    pub user_id: UserId,
    pub user_index: UserIndex,
}

/// Errors from direct peer registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("peer {0} is already a member of this network")]
    DuplicatePeer(PeerId),
    #[error("peer index {index:?} is held by peer {holder}")]
    PeerIndexInUse { index: PeerIndex, holder: PeerId },
    #[error("user index {index:?} is held by user {holder}")]
    UserIndexInUse { index: UserIndex, holder: UserId },
    #[error("user {user} already has user index {existing:?}")]
    UserIndexMismatch { user: UserId, existing: UserIndex },
    #[error("identifier `{0}` must not be empty")]
    EmptyIdentifier(&'static str),
}

/// Lowest index starting at 1 that `taken` does not report as used.
pub(crate) fn lowest_free(taken: impl Fn(u32) -> bool) -> u32 {
    (1..=u32::MAX).find(|i| !taken(*i)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_free_starts_at_one() {
        assert_eq!(lowest_free(|_| false), 1);
    }

    #[test]
    fn lowest_free_fills_gaps() {
        let used = [1, 2, 4];
        assert_eq!(lowest_free(|i| used.contains(&i)), 3);
    }
}
