//! In-memory transactional repository with versioned history.
//!
//! A [`Database`] holds one [`Table`] per [`Record`] type. Each stored object
//! is a chain of immutable versions, each valid on a half-open interval of
//! commit numbers, so a [`Transaction`] reads a consistent snapshot while
//! later commits append new versions. Secondary indexes are declared on the
//! record type and versioned the same way.
//!
//! Writes are staged inside the transaction and can be grouped into nested
//! sub-transactions that commit into their parent or roll back on their own.
//! Nothing a transaction writes is visible to others until its outer commit.

mod chain;
mod clock;
mod database;
mod error;
mod index;
mod key;
mod load;
mod privilege;
mod record;
mod table;
mod transaction;
mod version;

pub use chain::{Version, VersionChain};
pub use database::{CompactionStats, Database};
pub use error::{RepoError, RepoResult};
pub use index::{IndexDef, IndexKind};
pub use key::{Key, KeyPart};
pub use load::{LoadStats, LoadedRow};
pub use privilege::{Action, AllowAll, Privilege, PrivilegeChecker};
pub use record::{Record, Row, RowMeta};
pub use table::Table;
pub use transaction::{Transaction, TxContext, TxMode, SYSTEM_PRINCIPAL};
pub use version::VersionNumber;
