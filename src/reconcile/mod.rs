pub mod sync;
pub mod types;

pub use sync::SyncCoordinator;
pub use types::*;
