//! Authenticated session core: token inspection, credential persistence,
//! and the session manager that owns the refresh protocol.

pub mod claims;
pub mod session;
pub mod store;

pub use claims::Claims;
pub use session::{Session, SessionManager};
pub use store::{CredentialStore, StoredSession};
