// ewerelay Gateway - OAuth relay and push service
//
// HTTP surface for the vendor OAuth dance, the fetch triggers, and the
// per-session WebSocket push channel that fetched device state is routed to.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod server;

pub use error::GatewayError;
pub use orchestrator::{FetchOrchestrator, LatestEntry, LatestStore, TriggerOutcome, TriggerSource};
pub use poller::{Poller, PollerHandle};
pub use protocol::*;
pub use registry::{ConnectionRegistry, Delivery, PushConnection};
pub use server::{router, AppState, GatewayServer};
