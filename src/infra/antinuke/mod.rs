// Anti-nuke storage implementations.

#[cfg(test)]
pub mod in_memory;
pub mod sqlite_store;

#[cfg(test)]
pub use in_memory::InMemoryAntiNukeStore;
pub use sqlite_store::SqliteAntiNukeStore;
