pub mod applier;
pub mod commands;
pub mod events;
pub mod service;

pub use applier::StateApplier;
pub use commands::{Command, SessionData, StorageAction};
pub use events::SyncPublisher;
pub use service::SyncService;
