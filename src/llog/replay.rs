//! Ordered replay of every live record reachable from a catalog.
//!
//! Plain logs are visited in catalog slot order starting at the first live
//! slot and wrapping past the end of the bitmap when the tail has wrapped.
//! Within a plain log, records come in index order. No lock is held while
//! the callback runs, so a callback may cancel the record it was handed.

use tracing::{debug, warn};

use crate::base::Cookie;
use crate::env::Env;
use crate::error::Result;
use crate::llog::catalog::Catalog;
use crate::llog::record::Record;

/// Callback verdict: keep going or end the replay early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Process {
    Continue,
    Stop,
}

/// Catalog slots to visit, in replay order
pub(crate) fn slot_order(first: u32, last: u32, capacity: u32) -> Box<dyn Iterator<Item = u32>> {
    if first > last {
        Box::new((first..capacity).chain(0..=last))
    } else {
        Box::new(first..=last)
    }
}

/// Walk every live record of every live plain log of `catalog`.
///
/// Returns `Process::Stop` if the callback asked to stop, `Process::Continue`
/// once everything was visited. A callback error aborts the walk and is
/// returned as is.
pub fn process<F>(catalog: &Catalog, env: &mut Env, mut callback: F) -> Result<Process>
where
    F: FnMut(Cookie, &Record) -> Result<Process>,
{
    let (first, last, capacity, count) = catalog.bounds()?;
    if count == 0 {
        debug!(catalog = %catalog.id(), "nothing to replay");
        return Ok(Process::Continue);
    }
    if first > last {
        warn!(
            catalog = %catalog.id(),
            first,
            last,
            "catalog crosses index zero, replaying in two passes"
        );
    }

    for index in slot_order(first, last, capacity) {
        let Some(child) = catalog.child_at(env, index)? else {
            continue;
        };
        let mut cursor = 0;
        loop {
            let (log_id, rec) = {
                let log = child.read();
                (log.id(), log.read_next(env, cursor)?)
            };
            let Some(rec) = rec else {
                break;
            };
            cursor = rec.index();
            if callback(Cookie::new(log_id, cursor), &rec)? == Process::Stop {
                debug!(catalog = %catalog.id(), log = %log_id, index = cursor, "replay stopped");
                return Ok(Process::Stop);
            }
        }
    }
    Ok(Process::Continue)
}
