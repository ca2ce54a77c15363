//! Video call signaling cell.
//!
//! Serves the `/ws/call/{user_id}` WebSocket. Connections negotiate calls
//! through a small lifecycle protocol (initiate, accept, reject, end) backed
//! by persisted call records, then exchange WebRTC offers, answers and ICE
//! candidates through a per-call signaling room. The cell never inspects
//! SDP or candidate payloads; it only relays them between the two peers.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::CallError;
pub use models::*;
pub use router::{call_ws_routes, CallState};
pub use services::{ActiveCallRegistry, CallSignaling, CallStore};
