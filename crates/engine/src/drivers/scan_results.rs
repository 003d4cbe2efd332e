//! Replay a recorded action from the store

use crate::context::Action;
use crate::store::{Backend, OpenMode, ResultsIterator, StoreOptions};
use crate::Result;
use std::path::Path;
use tracing::debug;

/// Receivers of a replayed action
pub trait ScanHooks {
    /// The action being replayed, before any result
    fn got_action(&mut self, action_id: i64, action: &Action) -> Result<()>;

    /// One stored result; the iterator points at it
    fn got_result(&mut self, iter: &mut ResultsIterator<'_>) -> Result<()>;

    /// All results have been delivered
    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Feed the results of an action to `hooks`.
///
/// Without an `action_id` the most recent action is used. The store is only
/// read. Returns the id of the replayed action.
pub fn drive(
    store_path: &Path,
    store_options: &StoreOptions,
    action_id: Option<i64>,
    hooks: &mut dyn ScanHooks,
) -> Result<i64> {
    let mut backend = Backend::open(store_path, OpenMode::ReadOnly, store_options)?;
    let tx = backend.start()?;

    let (action_id, action) = match action_id {
        Some(id) => (id, tx.get_action(id)?),
        None => tx.get_latest_action()?,
    };
    debug!("Scanning results of action {}", action_id);
    hooks.got_action(action_id, &action)?;

    let mut iter = tx.get_action_results(action_id)?;
    while iter.is_valid() {
        hooks.got_result(&mut iter)?;
        iter.advance()?;
    }
    hooks.end()?;
    Ok(action_id)
}
