//! Wires the auth, bridge and script subsystems into the hook pipeline a
//! broker library invokes at connect/disconnect/subscribe/publish time.
//!
//! This crate owns no wire protocol and no persistence; it only adapts
//! between the collaborator interfaces (`Broker`, the repository traits)
//! and the three subsystems' own public surfaces.

mod adapters;
mod broker;
mod hooks;
mod repository;
mod startup;

pub use adapters::{BridgeLocalPublisher, InlinePublishSink};
pub use broker::Broker;
pub use hooks::Hooks;
pub use repository::{BridgeRepository, ClientRepository, Error, Result};
pub use startup::start_bridges;
