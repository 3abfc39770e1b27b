use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::chunk::Chunk;
use crate::codec;
use crate::error::{Error, Result};
use crate::nbt::{self, Compound, Tag};
use crate::region::{
    CCoords, CIndex, RCoords, REGION_CHUNK_COUNT, RawChunk, RegionBuilder, RegionInfo,
};
use crate::registry::Registry;
use crate::version::DataVersion;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum DimensionID {
    Overworld,
    Nether,
    TheEnd,
}

#[derive(Debug)]
pub struct WorldInfo {
    pub path: PathBuf,
    pub dimensions: HashMap<DimensionID, DimensionInfo>,
}

impl WorldInfo {
    pub fn try_from_path(path: PathBuf) -> Result<Self> {
        let mut dimensions = HashMap::new();
        if let Ok(dimension_info) = DimensionInfo::try_from_path(path.clone()) {
            dimensions.insert(DimensionID::Overworld, dimension_info);
        }
        if let Ok(dimension_info) = DimensionInfo::try_from_path(path.join("DIM-1")) {
            dimensions.insert(DimensionID::Nether, dimension_info);
        }
        if let Ok(dimension_info) = DimensionInfo::try_from_path(path.join("DIM1")) {
            dimensions.insert(DimensionID::TheEnd, dimension_info);
        }
        if dimensions.is_empty() {
            Err(Error::format("no dimensions found"))
        } else {
            Ok(Self { path, dimensions })
        }
    }

    pub fn get_dimension(&self, id: &DimensionID) -> Option<&DimensionInfo> {
        self.dimensions.get(id)
    }
}

#[derive(Debug)]
pub struct DimensionInfo {
    pub path: PathBuf,
    pub regions: BTreeMap<RCoords, RegionInfo>,
}

impl DimensionInfo {
    pub fn try_from_path(path: PathBuf) -> Result<Self> {
        log::debug!("DimensionInfo::try_from_path: {:?}", path);
        let regions_path = path.join("region");
        if !regions_path.is_dir() {
            return Err(Error::format("not a dimension directory"));
        }
        let mut regions = BTreeMap::new();
        for entry in fs::read_dir(regions_path)? {
            if let Ok(region) = RegionInfo::try_from_path(entry?.path()) {
                regions.insert(region.coords, region);
            }
        }
        if regions.is_empty() {
            return Err(Error::format("no regions found"));
        }
        Ok(Self { path, regions })
    }

    pub fn get_region(&self, region_coords: RCoords) -> Option<&RegionInfo> {
        self.regions.get(&region_coords)
    }

    /// Get the raw chunk at `chunk_coords`, if such a chunk has data.
    pub fn get_raw_chunk(&self, chunk_coords: CCoords) -> Result<Option<RawChunk>> {
        let (region_coords, chunk_index) = chunk_coords.to_region_coords();
        let Some(region_info) = self.regions.get(&region_coords) else {
            // No such region
            return Ok(None);
        };
        let mut region = region_info.open()?;
        region.get_raw_chunk(chunk_index)
    }

    /// Decode a whole region into a sparse chunk grid. Best-effort: slots
    /// with unreadable or undecodable payloads are skipped (and counted),
    /// never failing the region; only internal-consistency errors abort.
    #[tracing::instrument(level = "debug", skip_all, fields(coords = %coords))]
    pub fn load_region(
        &self,
        coords: RCoords,
        registry: &Registry,
    ) -> Result<Option<RegionChunks>> {
        let Some(region_info) = self.regions.get(&coords) else {
            return Ok(None);
        };
        let region = region_info.open()?;

        // Synchronous pass over the stream to pull out each present slot's
        // decompressed payload
        let mut raw: Vec<Option<RawChunk>> = (0..REGION_CHUNK_COUNT).map(|_| None).collect();
        let mut skipped = 0usize;
        for result in region.into_iter() {
            match result {
                Ok(raw_chunk) => {
                    let index = raw_chunk.index.to_flat_index();
                    raw[index] = Some(raw_chunk);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("region {coords}: skipping unreadable chunk: {e}");
                    skipped += 1;
                }
            }
        }

        // All slots are independent once read; decode fans out one task per
        // present slot, each writing a disjoint cell
        let decoded: Vec<Option<Result<Chunk>>> = raw
            .into_par_iter()
            .map(|slot| slot.map(|raw_chunk| raw_chunk.parse(registry)))
            .collect();

        let mut chunks = Vec::with_capacity(REGION_CHUNK_COUNT);
        for (index, slot) in decoded.into_iter().enumerate() {
            match slot {
                None => chunks.push(None),
                Some(Ok(chunk)) => chunks.push(Some(chunk)),
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    log::warn!(
                        "region {coords}: skipping chunk {}: {e}",
                        CIndex::from_flat_index(index)
                    );
                    skipped += 1;
                    chunks.push(None);
                }
            }
        }
        Ok(Some(RegionChunks {
            coords,
            chunks,
            skipped,
        }))
    }
}

/// The (sparse) decoded contents of one region: up to 1024 chunks plus a
/// count of slots skipped due to bad data.
#[derive(Debug)]
pub struct RegionChunks {
    pub coords: RCoords,
    chunks: Vec<Option<Chunk>>,
    pub skipped: usize,
}

impl RegionChunks {
    pub fn new(coords: RCoords) -> Self {
        Self {
            coords,
            chunks: (0..REGION_CHUNK_COUNT).map(|_| None).collect(),
            skipped: 0,
        }
    }

    pub fn get(&self, index: CIndex) -> Option<&Chunk> {
        self.chunks[index.to_flat_index()].as_ref()
    }

    pub fn put(&mut self, index: CIndex, chunk: Chunk) {
        self.chunks[index.to_flat_index()] = Some(chunk);
    }

    pub fn present_count(&self) -> usize {
        self.chunks.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn iter_present(&self) -> impl Iterator<Item = (CIndex, &Chunk)> {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|chunk| (CIndex::from_flat_index(i), chunk)))
    }
}

/// Encode a chunk set for `target` and write the sector-aligned region
/// container. Sequential per region: slots are appended in a fixed order so
/// the location table can be computed in one pass.
pub fn write_region<W: Write + Seek>(
    region: &RegionChunks,
    target: DataVersion,
    registry: &Registry,
    writer: W,
) -> Result<()> {
    let mut builder = RegionBuilder::new(region.coords);
    for (index, chunk) in region.iter_present() {
        let root = codec::encode_chunk(chunk, target, registry)?;
        builder.put_chunk(index, nbt::to_bytes(&Tag::Compound(root))?);
    }
    builder.write_to(writer)
}

/// A standalone gzip-wrapped tag file, conventionally a root compound with a
/// "Data" compound and a "DataVersion" int (e.g. `level.dat`).
#[derive(Debug)]
pub struct Level {
    pub data: Compound,
    pub data_version: Option<DataVersion>,
}

impl Level {
    pub fn load(path: &Path) -> Result<Level> {
        let file = File::open(path)?;
        let tag = nbt::from_gzip_reader(file)?;
        let root = tag
            .as_compound()
            .ok_or_else(|| Error::format("level file root is not a compound"))?;
        let data = match root.get_compound("Data") {
            Some(data) => data.clone(),
            None => root.clone(),
        };
        let data_version = data.get_int("DataVersion").map(|v| DataVersion(v as u32));
        Ok(Level { data, data_version })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut data = self.data.clone();
        if let Some(version) = self.data_version {
            data.insert("DataVersion", Tag::Int(version.0 as i32));
        }
        let mut root = Compound::new();
        root.insert("Data", Tag::Compound(data));
        nbt::to_gzip_writer(File::create(path)?, &Tag::Compound(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BCoords, BlockState};
    use crate::coords::{CoordsXZ, CoordsXZY, IndexXZ};

    fn test_registry() -> Registry {
        Registry::builtin().unwrap()
    }

    fn test_chunk(coords: CCoords, block: &str) -> Chunk {
        let mut chunk = Chunk::new(coords);
        chunk.set_block(
            BCoords(CoordsXZY::new(0, 0, 5)),
            BlockState::new(block.into()),
        );
        chunk
    }

    fn write_test_region(dir: &Path, registry: &Registry) -> PathBuf {
        let region_dir = dir.join("region");
        fs::create_dir_all(&region_dir).unwrap();
        let coords = RCoords(CoordsXZ::new(0, 0));
        let mut region = RegionChunks::new(coords);
        region.put(
            CIndex(IndexXZ::new(0, 0)),
            test_chunk(coords.to_chunk_coords(), "minecraft:stone"),
        );
        region.put(
            CIndex(IndexXZ::new(5, 9)),
            test_chunk(
                CIndex(IndexXZ::new(5, 9)).to_chunk_coords(coords),
                "minecraft:dirt",
            ),
        );
        let path = region_dir.join("r.0.0.mca");
        let file = File::create(&path).unwrap();
        write_region(&region, DataVersion::V1_20, registry, file).unwrap();
        path
    }

    #[test]
    fn test_region_write_load_roundtrip() {
        let registry = test_registry();
        let dir = tempfile::tempdir().unwrap();
        write_test_region(dir.path(), &registry);

        let dim_info = DimensionInfo::try_from_path(dir.path().to_path_buf()).unwrap();
        let loaded = dim_info
            .load_region(RCoords(CoordsXZ::new(0, 0)), &registry)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.present_count(), 2);
        assert_eq!(loaded.skipped, 0);
        let chunk = loaded.get(CIndex(IndexXZ::new(5, 9))).unwrap();
        assert_eq!(
            chunk
                .block_at(BCoords(CoordsXZY::new(0, 0, 5)))
                .unwrap()
                .name,
            "minecraft:dirt"
        );
        assert!(loaded.get(CIndex(IndexXZ::new(1, 1))).is_none());
        assert!(
            dim_info
                .load_region(RCoords(CoordsXZ::new(7, 7)), &registry)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_load_region_skips_corrupt_chunk() {
        let registry = test_registry();
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_region(dir.path(), &registry);

        // Flip bytes at the start of the first chunk's compressed payload
        let mut bytes = fs::read(&path).unwrap();
        for byte in &mut bytes[8192 + 5..8192 + 13] {
            *byte ^= 0xFF;
        }
        fs::write(&path, bytes).unwrap();

        let dim_info = DimensionInfo::try_from_path(dir.path().to_path_buf()).unwrap();
        let loaded = dim_info
            .load_region(RCoords(CoordsXZ::new(0, 0)), &registry)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.present_count(), 1);
        assert_eq!(loaded.skipped, 1);
        assert!(loaded.get(CIndex(IndexXZ::new(5, 9))).is_some());
    }

    #[test]
    fn test_world_scan() {
        let registry = test_registry();
        let dir = tempfile::tempdir().unwrap();
        write_test_region(dir.path(), &registry);

        let world = WorldInfo::try_from_path(dir.path().to_path_buf()).unwrap();
        let dim_info = world.get_dimension(&DimensionID::Overworld).unwrap();
        assert_eq!(dim_info.regions.len(), 1);
        assert!(world.get_dimension(&DimensionID::Nether).is_none());

        let raw = dim_info
            .get_raw_chunk(CCoords(CoordsXZ::new(5, 9)))
            .unwrap()
            .unwrap();
        assert_eq!(raw.coords, CCoords(CoordsXZ::new(5, 9)));
    }

    #[test]
    fn test_level_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.dat");
        let mut data = Compound::new();
        data.insert("LevelName", Tag::String("test world".to_owned()));
        let level = Level {
            data,
            data_version: Some(DataVersion::V1_20),
        };
        level.save(&path).unwrap();

        let loaded = Level::load(&path).unwrap();
        assert_eq!(loaded.data_version, Some(DataVersion::V1_20));
        assert_eq!(loaded.data.get_str("LevelName"), Some("test world"));
    }
}
