use anyhow::{Result, bail};
use tracing::debug;

/// Resolve records that collide on a uniqueness key.
///
/// `records` must already be sorted so that entries which should be
/// discarded appear before the entry to keep (for allocations that means
/// sorting by key with the commit timestamp as the final component). The
/// batch is walked in reverse; whenever consecutive records share the full
/// key, the earlier record is the duplicate.
///
/// With `on_duplicate` supplied, each duplicate is removed from `records`
/// and handed to the callback — the expected behavior is deletion of its
/// store record. Without a callback, any collision is a store-invariant
/// violation the caller did not anticipate, and resolves to an error.
///
/// A zero- or one-element batch never signals. Running twice over an
/// already-deduplicated batch performs zero deletions.
pub fn resolve_duplicates<T, K, F>(
    records: &mut Vec<T>,
    key: F,
    mut on_duplicate: Option<&mut dyn FnMut(&T) -> Result<()>>,
) -> Result<usize>
where
    F: Fn(&T) -> K,
    K: PartialEq,
{
    let mut duplicates = Vec::new();
    for i in (1..records.len()).rev() {
        if key(&records[i]) == key(&records[i - 1]) {
            duplicates.push(i - 1);
        }
    }

    if duplicates.is_empty() {
        return Ok(0);
    }

    let Some(handler) = on_duplicate.as_mut() else {
        bail!(
            "{} duplicate record(s) detected with no resolution handler",
            duplicates.len()
        );
    };

    let count = duplicates.len();
    debug!(count, "resolving duplicate records");
    // Indices were collected in descending order, so in-place removal is safe.
    for index in duplicates {
        let record = records.remove(index);
        handler(&record)?;
    }
    Ok(count)
}
