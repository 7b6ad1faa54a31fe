pub mod loader;
pub mod tree;
pub mod watcher;
