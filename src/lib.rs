#![doc = include_str!("../README.md")]

pub mod address;
pub mod bootstrap;
pub mod config;
pub mod kv;
pub mod monitor;
pub mod orchestrator;
pub mod overlay;
pub mod readiness;
pub mod testnet;

pub use bytes::Bytes;

pub use crate::bootstrap::{BootstrapConnector, BootstrapTarget};
pub use crate::config::{Config, ConfigError, Mode, OverlayOptions, RetryPolicy};
pub use crate::kv::{KvClient, KvRecord, RetrieveError, StoreError, StoreReport};
pub use crate::orchestrator::{Orchestrator, RunSummary, State};
pub use crate::overlay::{
    BootstrapError, ConnectAck, ConnectError, ConnectionDetail, GetError, NodeIdentity, Overlay,
    PassthroughPolicy, PeerId, PeerSnapshot, PutError, RecordPolicy, RecordRejected,
};
pub use crate::readiness::WaitTimeout;
pub use crate::testnet::{Testnet, TestnetNode};
