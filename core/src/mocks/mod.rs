//! Mock implementations for testing.
//!
//! In-memory versions of every contract the core depends on. They honour the same
//! guarded-transition semantics as the production stores so engine behaviour can be
//! tested at memory speed.

pub mod clock;
pub mod lock_store;
pub mod provider;
pub mod store;

pub use clock::TestClock;
pub use lock_store::InMemoryLockStore;
pub use provider::{MockPaymentProvider, VALID_SIGNATURE};
pub use store::InMemoryStore;
