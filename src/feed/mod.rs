pub mod page;
pub mod platform;
pub mod watcher;

pub use watcher::FeedWatcher;
