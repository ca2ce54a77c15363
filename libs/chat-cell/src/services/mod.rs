pub mod presence;
pub mod relay;
pub mod store;

pub use presence::PresenceBroadcaster;
pub use relay::ChatRelay;
pub use store::ChatStore;
