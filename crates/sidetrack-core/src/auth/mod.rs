//! Authentication state and its persistence.
//!
//! This module provides:
//! - `Session`: the process-wide token holder shared by the gateway and the
//!   front end
//! - `SessionStore` backends: plain file, sealed file, OS keychain, memory
//!
//! The authenticated flag is never stored; it is "a token is present".

pub mod credentials;
pub mod session;
pub mod store;

pub use credentials::KeyringStore;
pub use session::{Session, SessionData};
pub use store::{FileStore, MemoryStore, SealedFileStore, SessionBackend, SessionStore};
