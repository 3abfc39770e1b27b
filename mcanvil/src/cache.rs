use lru::LruCache;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::coords::CoordsXZ;
use crate::region::{CCoords, RCoords, REGION_SIZE};
use crate::registry::Registry;
use crate::world::DimensionInfo;

#[derive(Clone, Debug, Default)]
pub enum ChunkBounds {
    #[default]
    Unbounded,
    MinMax(CCoords, CCoords),
}

impl ChunkBounds {
    pub fn single_chunk(coords: CCoords) -> Self {
        ChunkBounds::MinMax(coords, coords + CCoords(CoordsXZ::new(1, 1)))
    }

    pub fn single_region(coords: RCoords) -> Self {
        let base = coords.to_chunk_coords();
        ChunkBounds::MinMax(
            base,
            base + CCoords(CoordsXZ::new(REGION_SIZE as i32, REGION_SIZE as i32)),
        )
    }

    pub fn contains(&self, coords: &CCoords) -> bool {
        match self {
            ChunkBounds::Unbounded => true,
            ChunkBounds::MinMax(min, max) => {
                (min.x..max.x).contains(&coords.x) && (min.z..max.z).contains(&coords.z)
            }
        }
    }
}

/// A bounded cache of decoded chunks over one dimension. Failed loads are
/// cached as absent, so repeated lookups of a bad chunk stay cheap.
pub struct ChunkCache<'i, 'r> {
    dim_info: &'i DimensionInfo,
    registry: &'r Registry,
    bounds: ChunkBounds,
    cache: LruCache<CCoords, Option<Arc<Chunk>>>,
}

impl<'i, 'r> ChunkCache<'i, 'r> {
    pub fn new(
        dim_info: &'i DimensionInfo,
        registry: &'r Registry,
        bounds: ChunkBounds,
        capacity: usize,
    ) -> Self {
        Self {
            dim_info,
            registry,
            bounds,
            cache: LruCache::new(capacity.try_into().unwrap()),
        }
    }

    pub fn get(&mut self, coords: CCoords) -> Option<Arc<Chunk>> {
        if !self.bounds.contains(&coords) {
            return None;
        }

        self.cache
            .get_or_insert(coords, || {
                self.dim_info
                    .get_raw_chunk(coords)
                    .ok()
                    .flatten()
                    .and_then(|raw_chunk| raw_chunk.parse(self.registry).ok())
                    .map(Arc::new)
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BCoords, BlockState};
    use crate::coords::{CoordsXZY, IndexXZ};
    use crate::region::CIndex;
    use crate::version::DataVersion;
    use crate::world::{RegionChunks, write_region};
    use std::fs::{self, File};

    #[test]
    fn test_cache_bounds_and_hits() {
        let registry = Registry::builtin().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let region_dir = dir.path().join("region");
        fs::create_dir_all(&region_dir).unwrap();

        let coords = RCoords(CoordsXZ::new(0, 0));
        let mut region = RegionChunks::new(coords);
        let mut chunk = Chunk::new(CCoords(CoordsXZ::new(3, 3)));
        chunk.set_block(
            BCoords(CoordsXZY::new(48, 48, 10)),
            BlockState::new(arcstr::literal!("minecraft:stone")),
        );
        region.put(CIndex(IndexXZ::new(3, 3)), chunk);
        let file = File::create(region_dir.join("r.0.0.mca")).unwrap();
        write_region(&region, DataVersion::V1_20, &registry, file).unwrap();

        let dim_info = DimensionInfo::try_from_path(dir.path().to_path_buf()).unwrap();
        let mut cache = ChunkCache::new(
            &dim_info,
            &registry,
            ChunkBounds::single_region(coords),
            16,
        );

        let first = cache.get(CCoords(CoordsXZ::new(3, 3))).unwrap();
        let second = cache.get(CCoords(CoordsXZ::new(3, 3))).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // absent chunk within bounds
        assert!(cache.get(CCoords(CoordsXZ::new(4, 4))).is_none());
        // outside the bounds nothing is even attempted
        assert!(cache.get(CCoords(CoordsXZ::new(64, 64))).is_none());
    }
}
