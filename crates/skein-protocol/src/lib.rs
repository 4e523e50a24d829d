//! Skein protocol layer.
//!
//! Maintains a degree-bounded, self-healing peer-to-peer mesh with no
//! central coordinator and floods short command messages across it with
//! loop prevention and at-most-once delivery per node.
//!
//! The physical transport (advertise/discover/connect/send) lives outside
//! this crate behind the [`Transport`] trait; the runtime decides when to
//! use its primitives and what to send.
//!
//! Wire format: MessagePack (compact binary).

pub mod dedup;
pub mod error;
pub mod gossip;
pub mod message;
pub mod registry;
pub mod runtime;
pub mod topology;
pub mod types;

pub use dedup::DedupCache;
pub use error::SkeinError;
pub use gossip::GossipEngine;
pub use message::{Breadcrumb, NetworkMessage};
pub use registry::{Endpoint, EndpointRegistry};
pub use runtime::state::MeshState;
pub use runtime::{
    MeshChannels, MeshCommand, MeshConfig, MeshEffect, MeshEvent, MeshHandle, MeshService,
    MeshStatus, TransferOutcome, Transport, TransportEvent,
};
pub use topology::{DegreeBounds, TopologyAction, TopologyController};
pub use types::{now_ms, PeerId};
