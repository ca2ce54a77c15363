pub mod gateway;
pub mod registry;
pub mod rooms;
pub mod wire;

pub use registry::*;
pub use wire::InboundError;
