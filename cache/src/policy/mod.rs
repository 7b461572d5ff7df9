pub mod clock;
pub mod lru;
mod lru_list;
#[cfg(feature = "random")]
pub mod random;

/// Decides which entries leave the cache when it grows past its capacity.
///
/// The cache tells the policy about every key it starts tracking, every hit,
/// and every key it stops tracking. Hits are buffered and arrive through
/// [`EvictionPolicy::on_access_batch`] before the next admission. When the store exceeds its capacity the
/// cache asks for victims. Every entry counts as one unit of capacity.
///
/// A key handed out by [`EvictionPolicy::evict`] is no longer tracked; the
/// cache re-admits it if the entry turns out to be busy loading.
pub trait EvictionPolicy<K>: Send + Sync {
  /// A key started occupying a slot in the store.
  fn on_admit(&self, key: &K);

  /// A readable value was handed out for `key`.
  fn on_access(&self, key: &K);

  /// Hits recorded on the read path, delivered in batches. Keys may repeat
  /// or no longer be tracked.
  fn on_access_batch(&self, keys: &[K]) {
    for key in keys {
      self.on_access(key);
    }
  }

  /// The entry for `key` was removed, expired or cleared.
  fn on_remove(&self, key: &K);

  /// Selects up to `count` victims and stops tracking them.
  fn evict(&self, count: usize) -> Vec<K>;

  /// Forgets every tracked key.
  fn clear(&self);
}
