use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Identity reserved for entities derived from static scene data.
const SCENE_IDENTITY: &str = "scene";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Stable cross-peer identifier of a synchronized entity.
    EntityUuid
);

string_id!(
    /// Identifier of one live connection. A reconnecting user gets a new one.
    PeerId
);

string_id!(
    /// Durable identity of the user behind one or more peers.
    UserId
);

string_id!(
    /// Identifier of a registered network.
    NetworkId
);

impl EntityUuid {
    /// Generate a fresh random UUID for a user-spawned entity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derive the UUID of a scene node.
    ///
    /// Every peer loading the same source computes the same value, which is
    /// what lets scene entities converge without a host.
    pub fn from_scene(source_id: &str, node_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(node_id.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(bytes).to_string())
    }
}

impl PeerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Pseudo-peer that authors scene-sourced spawns.
    pub fn scene() -> Self {
        Self(SCENE_IDENTITY.to_owned())
    }

    pub fn is_scene(&self) -> bool {
        self.0 == SCENE_IDENTITY
    }
}

impl UserId {
    /// Owner of every scene-sourced entity.
    pub fn scene() -> Self {
        Self(SCENE_IDENTITY.to_owned())
    }

    pub fn is_scene(&self) -> bool {
        self.0 == SCENE_IDENTITY
    }
}

impl NetworkId {
    /// Network id used when a user hosts its own session (offline / p2p).
    pub fn for_user(user_id: &UserId) -> Self {
        Self(user_id.0.clone())
    }
}

/// Logical channel partitioning which peers receive which actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    World,
    Media,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::World, Topic::Media];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::World => "world",
            Topic::Media => "media",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dense per-network peer index used for compact wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIndex(pub u32);

/// Dense per-network user index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserIndex(pub u32);

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}
