use std::collections::HashMap;
use std::hash::{BuildHasher, BuildHasherDefault};

use rustc_hash::FxHasher;

use super::state::PipelineStateDescriptor;
use super::structs::TargetFormats;

/// Full identity of a cached pipeline object.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRecord {
    pub state: PipelineStateDescriptor,
    pub target: TargetFormats,
}

/// Pipeline objects deduplicated by [`PipelineRecord`].
///
/// Entries are bucketed by hash but a lookup only hits on full equality, so
/// colliding records never share an object. Nothing is evicted until
/// [`PipelineCache::drain`].
pub struct PipelineCache<P, S = BuildHasherDefault<FxHasher>> {
    hasher: S,
    buckets: HashMap<u64, Vec<(PipelineRecord, P)>, S>,
    len: usize,
}

impl<P: Copy> Default for PipelineCache<P> {
    fn default() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<P: Copy, S: BuildHasher + Clone> PipelineCache<P, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            buckets: HashMap::with_hasher(hasher.clone()),
            hasher,
            len: 0,
        }
    }

    fn key(&self, record: &PipelineRecord) -> u64 {
        self.hasher.hash_one(record)
    }

    pub fn get(&self, record: &PipelineRecord) -> Option<P> {
        self.buckets
            .get(&self.key(record))?
            .iter()
            .find(|(r, _)| r == record)
            .map(|(_, p)| *p)
    }

    /// Returns the cached object for `record`, building it with `build` on a
    /// miss. A failed build leaves the cache untouched.
    pub fn get_or_try_insert<E>(
        &mut self,
        record: PipelineRecord,
        build: impl FnOnce(&PipelineRecord) -> Result<P, E>,
    ) -> Result<P, E> {
        let key = self.key(&record);
        let bucket = self.buckets.entry(key).or_default();
        if let Some((_, p)) = bucket.iter().find(|(r, _)| *r == record) {
            return Ok(*p);
        }

        let p = build(&record)?;
        bucket.push((record, p));
        self.len += 1;
        Ok(p)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of hash buckets in use. Smaller than [`PipelineCache::len`]
    /// only when records collide.
    pub fn bucket_count(&self) -> usize {
        self.buckets.values().filter(|b| !b.is_empty()).count()
    }

    /// Empties the cache, handing every pipeline object to `func`.
    pub fn drain<F>(&mut self, mut func: F)
    where
        F: FnMut(P),
    {
        for (_, bucket) in self.buckets.drain() {
            for (_, p) in bucket {
                func(p);
            }
        }
        self.len = 0;
    }
}

impl<P, S> std::fmt::Debug for PipelineCache<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::state::{CullMode, ShaderId};
    use crate::gpu::structs::{Format, SampleCount};
    use std::hash::Hasher;

    /// Sends every record to the same bucket.
    #[derive(Default, Clone)]
    struct Colliding;

    struct ZeroHasher;

    impl Hasher for ZeroHasher {
        fn finish(&self) -> u64 {
            0
        }
        fn write(&mut self, _bytes: &[u8]) {}
    }

    impl BuildHasher for Colliding {
        type Hasher = ZeroHasher;
        fn build_hasher(&self) -> ZeroHasher {
            ZeroHasher
        }
    }

    fn record(culling: CullMode) -> PipelineRecord {
        let mut state = PipelineStateDescriptor::new(ShaderId(0), ShaderId(1));
        state.raster.culling = culling;
        PipelineRecord {
            state,
            target: TargetFormats {
                color: Format::BGRA8Unorm,
                depth: Some(Format::D24S8),
                samples: SampleCount::S1,
            },
        }
    }

    #[test]
    fn hit_skips_the_build() {
        let mut cache: PipelineCache<u32> = Default::default();
        let mut builds = 0;
        let a = cache
            .get_or_try_insert::<()>(record(CullMode::Back), |_| {
                builds += 1;
                Ok(7)
            })
            .unwrap();
        let b = cache
            .get_or_try_insert::<()>(record(CullMode::Back), |_| {
                builds += 1;
                Ok(8)
            })
            .unwrap();
        assert_eq!((a, b, builds), (7, 7, 1));
        assert_eq!(cache.get(&record(CullMode::Back)), Some(7));
    }

    #[test]
    fn collisions_resolve_by_equality() {
        let mut cache = PipelineCache::<u32, Colliding>::with_hasher(Colliding);
        let a = cache
            .get_or_try_insert::<()>(record(CullMode::Back), |_| Ok(1))
            .unwrap();
        let b = cache
            .get_or_try_insert::<()>(record(CullMode::None), |_| Ok(2))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.bucket_count(), 1);
        assert_eq!(cache.get(&record(CullMode::None)), Some(2));
    }

    #[test]
    fn failed_build_is_not_cached() {
        let mut cache: PipelineCache<u32> = Default::default();
        assert!(cache
            .get_or_try_insert(record(CullMode::Back), |_| Err("nope"))
            .is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn target_format_is_part_of_the_key() {
        let mut cache: PipelineCache<u32> = Default::default();
        let a = record(CullMode::Back);
        let mut b = a;
        b.target.samples = SampleCount::S4;
        cache.get_or_try_insert::<()>(a, |_| Ok(1)).unwrap();
        cache.get_or_try_insert::<()>(b, |_| Ok(2)).unwrap();
        assert_eq!(cache.len(), 2);

        let mut drained = Vec::new();
        cache.drain(|p| drained.push(p));
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(cache.is_empty());
    }
}
