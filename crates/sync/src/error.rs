use worldnet_common::{EntityUuid, NetworkId};
use worldnet_net::{ActionError, NetworkError, PeerError};

/// Errors surfaced to callers of [`Session`](crate::Session).
///
/// Action handlers never produce these; conditions met while applying
/// actions are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("world network is not ready")]
    NotReady,
    #[error("network {0} is not registered")]
    UnknownNetwork(NetworkId),
    #[error("entity {0} is not known locally")]
    UnknownEntity(EntityUuid),
}
