use std::collections::BTreeMap;
use std::fmt::Write;

use arcstr::ArcStr;

use crate::coords::{CoordsXZY, IndexXZY};
use crate::region::CCoords;
use crate::version::DataVersion;

pub const CHUNK_SIZE: u32 = 16;
pub const SECTION_BLOCK_COUNT: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;
pub const SECTION_BIOME_COUNT: usize = SECTION_BLOCK_COUNT / (4 * 4 * 4) as usize;
/// Nibble arrays hold one 4-bit value per block, two per byte.
pub const SECTION_NIBBLE_LEN: usize = SECTION_BLOCK_COUNT / 2;

pub const AIR: ArcStr = arcstr::literal!("minecraft:air");
pub const DEFAULT_BIOME: ArcStr = arcstr::literal!("minecraft:plains");

/// Absolute block coordinates.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    derive_more::Deref,
    derive_more::DerefMut,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sub,
    derive_more::SubAssign,
)]
pub struct BCoords(pub CoordsXZY);

impl BCoords {
    /// Split into the owning section's Y index and the block index within
    /// that section.
    pub fn to_section_coords(self) -> (i8, BIndex) {
        let section_y = self.y.div_euclid(CHUNK_SIZE as i32) as i8;
        let index = BIndex(IndexXZY::new(
            self.x.rem_euclid(CHUNK_SIZE as i32) as u32,
            self.z.rem_euclid(CHUNK_SIZE as i32) as u32,
            self.y.rem_euclid(CHUNK_SIZE as i32) as u32,
        ));
        (section_y, index)
    }
}

/// 3D block index within a section.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    derive_more::Deref,
    derive_more::DerefMut,
)]
pub struct BIndex(pub IndexXZY);

impl BIndex {
    /// Flat index in x-fastest, then z, then y order.
    pub fn to_flat_index(self) -> usize {
        (self.y * CHUNK_SIZE * CHUNK_SIZE + self.z * CHUNK_SIZE + self.x) as usize
    }

    pub fn from_flat_index(index: usize) -> Self {
        assert!(
            index < SECTION_BLOCK_COUNT,
            "not a valid section block index"
        );
        let x = index & 0xF;
        let z = (index >> 4) & 0xF;
        let y = (index >> 8) & 0xF;
        Self(IndexXZY::new(x as u32, z as u32, y as u32))
    }

    /// Index into the coarse biome array; biomes apply to 4x4x4 volumes.
    pub fn to_biome_index(self) -> usize {
        (((self.y / 4) << 4) | ((self.z / 4) << 2) | (self.x / 4)) as usize
    }
}

/// A block identity name plus the property values that select one concrete
/// state of it. Value semantics: compared and hashed by content.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BlockState {
    pub name: ArcStr,
    pub properties: BTreeMap<ArcStr, ArcStr>,
}

impl BlockState {
    pub fn new(name: ArcStr) -> BlockState {
        BlockState {
            name,
            properties: BTreeMap::new(),
        }
    }

    pub fn air() -> BlockState {
        BlockState::new(AIR)
    }

    pub fn is_air(&self) -> bool {
        self.name == AIR
    }

    /// Get the name of the block without any namespace prefix, e.g. `water`
    /// instead of `minecraft:water`.
    pub fn short_name(&self) -> &str {
        let name = self.name.as_str();
        if let Some((_left, right)) = name.split_once(':') {
            right
        } else {
            name
        }
    }

    pub fn with_property<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
        self.properties
            .insert(ArcStr::from(key.as_ref()), ArcStr::from(value.as_ref()));
        self
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|v| v.as_str())
    }
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            f.write_char('{')?;
            for (i, (key, value)) in self.properties.iter().enumerate() {
                if i > 0 {
                    f.write_char(',')?;
                }
                write!(f, "{key}={value}")?;
            }
            f.write_char('}')?;
        }
        Ok(())
    }
}

/// A 16x16x16 sub-volume of a chunk, holding a block palette with dense
/// per-block indices and an independent, coarser biome palette.
#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    /// Distinct block states present; index 0 is the default (air) entry.
    pub block_palette: Vec<BlockState>,
    /// One palette index per block, x-fastest, then z, then y.
    pub blocks: Box<[u16; SECTION_BLOCK_COUNT]>,
    pub biome_palette: Vec<ArcStr>,
    /// One palette index per 4x4x4 volume.
    pub biomes: [u8; SECTION_BIOME_COUNT],
    /// Raw per-block light nibbles, carried through unchanged when present.
    pub block_light: Option<Vec<i8>>,
    pub sky_light: Option<Vec<i8>>,
}

impl Section {
    pub fn new() -> Section {
        Section {
            block_palette: vec![BlockState::air()],
            blocks: Box::new([0; SECTION_BLOCK_COUNT]),
            biome_palette: vec![DEFAULT_BIOME],
            biomes: [0; SECTION_BIOME_COUNT],
            block_light: None,
            sky_light: None,
        }
    }

    pub fn block_state(&self, index: BIndex) -> &BlockState {
        &self.block_palette[self.blocks[index.to_flat_index()] as usize]
    }

    /// Set the block at `index`, growing the palette if this state is not
    /// yet present.
    pub fn set_block(&mut self, index: BIndex, state: BlockState) {
        let palette_index = match self.block_palette.iter().position(|s| *s == state) {
            Some(i) => i,
            None => {
                self.block_palette.push(state);
                self.block_palette.len() - 1
            }
        };
        self.blocks[index.to_flat_index()] = palette_index as u16;
    }

    pub fn biome(&self, index: BIndex) -> &ArcStr {
        &self.biome_palette[self.biomes[index.to_biome_index()] as usize]
    }

    pub fn set_biome(&mut self, index: BIndex, biome: ArcStr) {
        let palette_index = match self.biome_palette.iter().position(|b| *b == biome) {
            Some(i) => i,
            None => {
                self.biome_palette.push(biome);
                self.biome_palette.len() - 1
            }
        };
        self.biomes[index.to_biome_index()] = palette_index as u8;
    }

    /// Whether the section holds anything besides the default entry.
    pub fn has_blocks(&self) -> bool {
        self.block_palette.len() > 1 && self.blocks.iter().any(|&i| i != 0)
            || !self.block_palette.first().is_some_and(BlockState::is_air)
    }
}

impl Default for Section {
    fn default() -> Section {
        Section::new()
    }
}

/// A 16x16-block-footprint, vertically-sectioned column of world data, owned
/// by exactly one region slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub coords: CCoords,
    pub status: ArcStr,
    pub data_version: Option<DataVersion>,
    /// Sections keyed by signed section Y index.
    pub sections: BTreeMap<i8, Section>,
    /// Tile entity compounds keyed by absolute block coordinates.
    pub tile_entities: BTreeMap<BCoords, crate::nbt::Compound>,
    pub entities: Vec<crate::nbt::Compound>,
    pub pending_ticks: Vec<crate::nbt::Compound>,
}

impl Chunk {
    pub fn new(coords: CCoords) -> Chunk {
        Chunk {
            coords,
            status: arcstr::literal!("minecraft:full"),
            data_version: None,
            sections: BTreeMap::new(),
            tile_entities: BTreeMap::new(),
            entities: Vec::new(),
            pending_ticks: Vec::new(),
        }
    }

    pub fn fully_generated(&self) -> bool {
        self.status == "minecraft:full" || self.status == "full"
    }

    pub fn section(&self, y: i8) -> Option<&Section> {
        self.sections.get(&y)
    }

    /// Get or create the section at `y`.
    pub fn section_mut(&mut self, y: i8) -> &mut Section {
        self.sections.entry(y).or_default()
    }

    pub fn block_at(&self, coords: BCoords) -> Option<&BlockState> {
        let (section_y, index) = coords.to_section_coords();
        self.section(section_y).map(|s| s.block_state(index))
    }

    pub fn set_block(&mut self, coords: BCoords, state: BlockState) {
        let (section_y, index) = coords.to_section_coords();
        self.section_mut(section_y).set_block(index, state);
    }
}
