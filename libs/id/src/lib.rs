//! # sched-id
//!
//! Identifier types shared by the scheduler repository and server.
//!
//! ## Kinds of identifiers
//!
//! - [`EntityId`]: numeric id of every repository object. All tables draw
//!   from one sequence, so an id names exactly one object regardless of
//!   which table holds it. A runnable-queue entry relies on this when it
//!   points at either a submitted entity or a kill job.
//! - Session-scoped ids ([`SessionId`], [`RequestId`]) use the prefixed
//!   format `{prefix}_{ulid}`, e.g. `sess_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
//! - [`AccessKey`]: the capability token a job process presents when it
//!   reconnects to its own entity record.

mod error;
#[doc(hidden)]
pub mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
