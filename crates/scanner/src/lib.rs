pub mod discovery;
pub mod filter;
pub mod walk;

pub use discovery::DiscoveryTracker;
pub use walk::{MediaEntry, WalkOptions, walk_media_dir};
