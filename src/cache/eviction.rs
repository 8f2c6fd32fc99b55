//! Size-bounded, oldest-first trimming of partitions.

use color_eyre::Result;
use tracing::debug;

use super::storage::CacheStorage;

/// Trim `partition` down to at most `max_entries`, deleting the oldest-inserted
/// entries one at a time. Reads never refresh an entry's position.
///
/// Returns the number of entries evicted.
pub fn enforce_limit<S>(storage: &S, partition: &str, max_entries: usize) -> Result<usize>
where
  S: CacheStorage + ?Sized,
{
  let mut evicted = 0;

  while storage.entry_count(partition)? > max_entries {
    match storage.evict_oldest(partition)? {
      Some(key) => {
        debug!(partition, url = key.url(), "evicted oldest entry");
        evicted += 1;
      }
      // Emptied concurrently
      None => break,
    }
  }

  Ok(evicted)
}
