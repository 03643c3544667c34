//! Ownership checks for memos and resources.
//!
//! A user may act on a resource they uploaded, or on any resource attached
//! to a memo they own. Memos themselves are only accessible to their
//! creator. Callers look the row up first (`NotFound`) and only then ask
//! the guard (`Forbidden`).

use tracing::warn;

use crate::error::{Error, Result};

/// Decide whether `actor` may act on a row owned by `owner`.
///
/// `memo_owner` is the creator of the memo the row is attached to, if any.
pub fn can_access(actor: i64, owner: i64, memo_owner: Option<i64>) -> bool {
    actor == owner || memo_owner == Some(actor)
}

/// Like [`can_access`], but yields `Error::Forbidden` on denial.
pub fn ensure_access(actor: i64, owner: i64, memo_owner: Option<i64>) -> Result<()> {
    if can_access(actor, owner, memo_owner) {
        Ok(())
    } else {
        warn!(actor, owner, ?memo_owner, "Access denied");
        Err(Error::Forbidden)
    }
}
