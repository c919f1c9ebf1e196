//! group-core: decentralized peer discovery and group membership.
//!
//! Nodes on the same broadcast domains find each other with periodic PING
//! and INFO floods, advertise the groups they created, and agree on group
//! membership without any central server. This crate provides:
//! - The binary wire protocol (packets, message bodies, validation)
//! - A datagram transport with flooding, dedup and reliable unicast
//! - The membership engine (peers, four group kinds, peer searches)
//! - The stream channel used to join and leave managed groups
//!
//! Sockets and timers live in the embedding application; everything here is
//! synchronous and driven through [`GroupManager`].

pub mod channel;
pub mod clock;
pub mod crypto;
pub mod events;
pub mod membership;
pub mod node_id;
pub mod protocol;
pub mod settings;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventBus, GroupEvent, Subscription};
pub use membership::{
    EngineConfig, EngineView, GroupError, GroupManager, JoinMode, PeerGroupOptions, SearchOptions,
};
pub use node_id::{NodeId, NodeIdError, SearchId};
pub use protocol::{GroupKind, Nic};
pub use settings::{GroupSettings, NodeSettings, SettingsError};
pub use transport::{InterfaceId, InterfaceKind, NetworkInterface};
