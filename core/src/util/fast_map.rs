pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

pub type FastHashSet<K> = rustc_hash::FxHashSet<K>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}

#[inline]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::with_capacity_and_hasher(capacity, Default::default())
}

#[inline]
pub fn fast_hash_set_new<K>() -> FastHashSet<K> {
    rustc_hash::FxHashSet::default()
}

/// Builds a set from any iterator of keys.
#[inline]
pub fn fast_hash_set_from<K, I>(items: I) -> FastHashSet<K>
where
    K: std::hash::Hash + Eq,
    I: IntoIterator<Item = K>,
{
    items.into_iter().collect()
}
