pub mod broadcaster;
pub mod cancel;
pub mod orchestrator;
pub mod ownership;
pub mod service;
pub mod store;
pub mod watch;

pub use broadcaster::{BroadcastMessage, EventBroadcaster, Subscription};
pub use cancel::CancellationSignal;
pub use orchestrator::{truncate_error, BatchOrchestrator};
pub use ownership::FileOwnershipGuard;
pub use service::{BatchProgress, BatchService};
pub use store::SqliteBatchStore;
pub use watch::{BatchWatcher, WatchUpdate};
