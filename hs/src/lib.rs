//! HistStore - persistent list storage for task history
//!
//! Stores an ordered list of records as a single JSON file. The store is
//! deliberately small: the daemon keeps the authoritative history in memory
//! and treats the file as a crash-survivable snapshot, rewritten on every
//! save.
//!
//! # Example
//!
//! ```ignore
//! use histstore::JsonStore;
//!
//! let store: JsonStore<Entry> = JsonStore::new("history.json");
//! let mut entries = store.load()?;
//! entries.push(entry);
//! store.save(&entries)?;
//! ```

mod store;

pub use store::{JsonStore, StoreError};
