pub mod active_calls;
pub mod signaling;
pub mod store;

pub use active_calls::ActiveCallRegistry;
pub use signaling::CallSignaling;
pub use store::CallStore;
