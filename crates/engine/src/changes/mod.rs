//! The local change log model.
//!
//! Every local mutation is recorded as a [`LocalChange`]. Before upload the
//! changes of each resource are [`squash`]ed into one, carrying a
//! [`LocalChangeToken`] that names the rows to purge once the server has
//! accepted it.

mod local_change;
pub mod squash;

pub use local_change::{LocalChange, LocalChangeKind, LocalChangeToken};
pub use squash::{apply_change, diff, squash};
