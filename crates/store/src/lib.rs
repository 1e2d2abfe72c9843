//! Durable, lock-protected result persistence.
//!
//! Results live in one JSON document per identifier, guarded by a
//! sidecar lock file so that multiple processes can merge into the
//! same document safely. Writes are atomic (temp file + rename) and
//! merges are commutative, so concurrent writers for different targets
//! can interleave in any order.

pub mod document;
pub mod lock;
pub mod store;

pub use document::{Record, ResultDocument};
pub use lock::{FileLock, LockConfig, LockError};
pub use store::{FlushStrategy, ResultStore, StoreConfig, StoreError};
