//! Decode/encode for the palette-era schemas: sections under "Level" with
//! `Palette`/`BlockStates` keys (unpadded, then padded), and the flattened
//! root layout with `block_states`/`biomes` containers per section.

use std::collections::HashMap;

use arcstr::ArcStr;

use crate::chunk::{
    BCoords, BlockState, Chunk, SECTION_BIOME_COUNT, SECTION_BLOCK_COUNT, SECTION_NIBBLE_LEN,
    Section,
};
use crate::codec::packed;
use crate::coords::{CoordsXZY, PointXZ};
use crate::error::{Error, Result};
use crate::nbt::{Compound, List, Tag, TagType};
use crate::region::CCoords;
use crate::registry::Registry;
use crate::version::{DataVersion, Schema};

/// Chunk-level biome arrays switched from 256 column entries to 1024 quart
/// entries in 1.15.
const BIOME_QUARTS: DataVersion = DataVersion::V1_15;

/// Section Y indices are stored as bytes; some writers store ints. Either
/// way the low byte's bit pattern is reinterpreted as signed
/// two's-complement, so 0x80 decodes to -128.
fn section_y(section: &Compound) -> Result<i8> {
    match section.get("Y") {
        Some(Tag::Byte(y)) => Ok(*y),
        Some(Tag::Int(y)) => Ok((*y as u8) as i8),
        Some(other) => Err(Error::format(format!(
            "section Y has unexpected type {:?}",
            other.tag_type()
        ))),
        None => Err(Error::format("section missing Y index")),
    }
}

fn read_palette(list: &List, source: DataVersion, registry: &Registry) -> Result<Vec<BlockState>> {
    let mut palette = Vec::with_capacity(list.len());
    for tag in list {
        let entry = tag
            .as_compound()
            .ok_or_else(|| Error::format("palette entry is not a compound"))?;
        let name = entry
            .get_str("Name")
            .ok_or_else(|| Error::format("palette entry missing Name"))?;
        let name = registry.remap(name, source);
        let identity = registry.get_or_register(&name);
        let mut state = BlockState::new(identity.name().clone());
        if let Some(properties) = entry.get_compound("Properties") {
            for (key, value) in properties.iter() {
                let value = value.as_str().ok_or_else(|| {
                    Error::format(format!("non-string value for block property {key}"))
                })?;
                state
                    .properties
                    .insert(ArcStr::from(key), ArcStr::from(value));
            }
        }
        palette.push(state);
    }
    Ok(palette)
}

/// Unpack a section's block indices, recovering out-of-range entries (a
/// reference error in the input) by pointing them at a fresh air entry.
fn read_blocks(
    palette: &mut Vec<BlockState>,
    data: Option<&[i64]>,
    padded: bool,
    coords: CCoords,
) -> Result<Box<[u16; SECTION_BLOCK_COUNT]>> {
    let mut indices = match data {
        Some(words) => {
            let bits = packed::bits_for(palette.len(), 4);
            packed::unpack(words, bits, SECTION_BLOCK_COUNT, padded)?
        }
        // No data: every block is the first palette entry
        None => vec![0; SECTION_BLOCK_COUNT],
    };
    let len = palette.len() as u16;
    if indices.iter().any(|&i| i >= len) {
        log::debug!("chunk {coords}: block index outside palette, substituting air");
        let air_index = palette.len() as u16;
        palette.push(BlockState::air());
        for index in indices.iter_mut() {
            if *index >= len {
                *index = air_index;
            }
        }
    }
    indices
        .into_boxed_slice()
        .try_into()
        .map_err(|_| Error::internal("unpacked block index count mismatch"))
}

/// Collapse 64 per-quart biome names into a palette plus index array.
fn build_biomes(names: [ArcStr; SECTION_BIOME_COUNT]) -> (Vec<ArcStr>, [u8; SECTION_BIOME_COUNT]) {
    let mut palette: Vec<ArcStr> = Vec::new();
    let mut indices = [0u8; SECTION_BIOME_COUNT];
    for (slot, name) in indices.iter_mut().zip(names) {
        *slot = match palette.iter().position(|b| *b == name) {
            Some(i) => i as u8,
            None => {
                palette.push(name);
                (palette.len() - 1) as u8
            }
        };
    }
    (palette, indices)
}

/// The chunk-level biome array used before per-section biome palettes.
enum ChunkBiomes {
    /// One id per 4x4x4 quart, 4x4 columns by 64 vertical slices.
    Quarts(Vec<i32>),
    /// One id per block column.
    Columns(Vec<i32>),
}

impl ChunkBiomes {
    fn read(level: &Compound) -> Option<ChunkBiomes> {
        match level.get("Biomes") {
            Some(Tag::IntArray(ids)) if ids.len() == 1024 => {
                Some(ChunkBiomes::Quarts(ids.clone()))
            }
            Some(Tag::IntArray(ids)) if ids.len() == 256 => {
                Some(ChunkBiomes::Columns(ids.clone()))
            }
            Some(Tag::ByteArray(ids)) if ids.len() == 256 => Some(ChunkBiomes::Columns(
                ids.iter().map(|&b| b as u8 as i32).collect(),
            )),
            Some(other) => {
                log::debug!(
                    "ignoring chunk biome data with unexpected shape ({:?})",
                    other.tag_type()
                );
                None
            }
            None => None,
        }
    }

    /// Biome id for quart `(qx, qz)` at absolute quart height `qy`.
    fn id_at(&self, qx: usize, qy: usize, qz: usize) -> i32 {
        match self {
            ChunkBiomes::Quarts(ids) => {
                let index = (qy << 4) | (qz << 2) | qx;
                ids.get(index).copied().unwrap_or(0)
            }
            ChunkBiomes::Columns(ids) => ids[(qz * 4) * 16 + qx * 4],
        }
    }

    /// The 64 per-quart names for the section at `section_y`.
    fn section_names(
        &self,
        section_y: i8,
        registry: &Registry,
    ) -> [ArcStr; SECTION_BIOME_COUNT] {
        std::array::from_fn(|i| {
            let qx = i & 0x3;
            let qz = (i >> 2) & 0x3;
            let qy = i >> 4;
            let absolute_qy = section_y as isize * 4 + qy as isize;
            if !(0..64).contains(&absolute_qy) {
                return registry.default_biome();
            }
            registry.biome_name(self.id_at(qx, absolute_qy as usize, qz))
        })
    }
}

fn read_light(section: &Compound, key: &str, coords: CCoords) -> Option<Vec<i8>> {
    let data = section.get_byte_array(key)?;
    if data.len() != SECTION_NIBBLE_LEN {
        log::debug!(
            "chunk {coords}: ignoring {key} with bad length {}",
            data.len()
        );
        return None;
    }
    Some(data.to_vec())
}

pub(super) fn read_tile_entities(list: &List, chunk: &mut Chunk) {
    for tag in list {
        let Some(entity) = tag.as_compound() else {
            continue;
        };
        let (Some(x), Some(y), Some(z)) = (
            entity.get_int("x"),
            entity.get_int("y"),
            entity.get_int("z"),
        ) else {
            log::debug!("chunk {}: dropping tile entity without coordinates", chunk.coords);
            continue;
        };
        chunk
            .tile_entities
            .insert(BCoords(CoordsXZY::new(x, z, y)), entity.clone());
    }
}

pub(super) fn read_compound_list(list: Option<&List>) -> Vec<Compound> {
    list.into_iter()
        .flatten()
        .filter_map(|tag| tag.as_compound().cloned())
        .collect()
}

pub fn decode(root: &Compound, schema: Schema, registry: &Registry) -> Result<Chunk> {
    let flat = schema.flat_root();
    let source = root
        .get_int("DataVersion")
        .map(|v| DataVersion(v as u32))
        .unwrap_or(DataVersion::PALETTED);
    let level = if flat {
        root
    } else {
        root.get_compound("Level")
            .ok_or_else(|| Error::format("chunk missing Level compound"))?
    };
    let x = level
        .get_int("xPos")
        .ok_or_else(|| Error::format("chunk missing xPos"))?;
    let z = level
        .get_int("zPos")
        .ok_or_else(|| Error::format("chunk missing zPos"))?;

    let mut chunk = Chunk::new(CCoords(PointXZ::new(x, z)));
    chunk.data_version = root.get_int("DataVersion").map(|v| DataVersion(v as u32));
    if let Some(status) = level.get_str("Status").or_else(|| level.get_str("status")) {
        chunk.status = ArcStr::from(status);
    }

    let chunk_biomes = if flat { None } else { ChunkBiomes::read(level) };

    let sections_key = if flat { "sections" } else { "Sections" };
    for tag in level.get_list(sections_key).into_iter().flatten() {
        let section_nbt = tag
            .as_compound()
            .ok_or_else(|| Error::format("section is not a compound"))?;
        let y = section_y(section_nbt)?;

        // Locate the palette container; a section without one carries no
        // blocks (it may still carry light data worth keeping).
        let (palette_list, data_words) = if flat {
            match section_nbt.get_compound("block_states") {
                Some(states) => (
                    states.get_list("palette"),
                    states.get_long_array("data"),
                ),
                None => (None, None),
            }
        } else {
            (
                section_nbt.get_list("Palette"),
                section_nbt.get_long_array("BlockStates"),
            )
        };

        let block_light = read_light(section_nbt, "BlockLight", chunk.coords);
        let sky_light = read_light(section_nbt, "SkyLight", chunk.coords);
        if palette_list.is_none() && block_light.is_none() && sky_light.is_none() {
            continue;
        }

        let mut section = Section::new();
        if let Some(palette_list) = palette_list {
            let mut palette = read_palette(palette_list, source, registry)?;
            section.blocks =
                read_blocks(&mut palette, data_words, schema.padded(), chunk.coords)?;
            section.block_palette = palette;
        }

        if flat {
            if let Some(biomes) = section_nbt.get_compound("biomes") {
                let palette_list = biomes
                    .get_list("palette")
                    .ok_or_else(|| Error::format("section biomes missing palette"))?;
                let mut palette = Vec::with_capacity(palette_list.len());
                for tag in palette_list {
                    let name = tag
                        .as_str()
                        .ok_or_else(|| Error::format("biome palette entry is not a string"))?;
                    palette.push(ArcStr::from(name));
                }
                let mut indices = match biomes.get_long_array("data") {
                    Some(words) => {
                        let bits = packed::bits_for(palette.len(), 1);
                        packed::unpack(words, bits, SECTION_BIOME_COUNT, true)?
                    }
                    None => vec![0; SECTION_BIOME_COUNT],
                };
                if palette.is_empty() {
                    palette.push(registry.default_biome());
                }
                let len = palette.len() as u16;
                if indices.iter().any(|&i| i >= len) {
                    log::debug!(
                        "chunk {}: biome index outside palette, substituting default",
                        chunk.coords
                    );
                    for index in indices.iter_mut() {
                        if *index >= len {
                            *index = 0;
                        }
                    }
                }
                section.biome_palette = palette;
                for (slot, index) in section.biomes.iter_mut().zip(indices) {
                    *slot = index as u8;
                }
            }
        } else if let Some(chunk_biomes) = &chunk_biomes {
            let (palette, indices) = build_biomes(chunk_biomes.section_names(y, registry));
            section.biome_palette = palette;
            section.biomes = indices;
        }

        section.block_light = block_light;
        section.sky_light = sky_light;
        chunk.sections.insert(y, section);
    }

    let tile_entities_key = if flat { "block_entities" } else { "TileEntities" };
    if let Some(list) = level.get_list(tile_entities_key) {
        read_tile_entities(list, &mut chunk);
    }
    let entities_key = if flat { "entities" } else { "Entities" };
    chunk.entities = read_compound_list(
        level
            .get_list(entities_key)
            .or_else(|| level.get_list("Entities")),
    );
    let ticks_key = if flat { "block_ticks" } else { "TileTicks" };
    chunk.pending_ticks = read_compound_list(level.get_list(ticks_key));

    Ok(chunk)
}

/// Resolve a section's palette for the target version, deduplicating after
/// substitution and remapping the index array accordingly.
fn resolve_palette(
    section: &Section,
    target: DataVersion,
    registry: &Registry,
) -> Result<(Vec<BlockState>, Vec<u16>)> {
    let mut palette: Vec<BlockState> = Vec::new();
    let mut positions: HashMap<BlockState, u16> = HashMap::new();
    let mut mapping = Vec::with_capacity(section.block_palette.len());
    for state in &section.block_palette {
        let resolved = registry
            .resolve_state(state, target)?
            .unwrap_or_else(BlockState::air);
        let index = *positions.entry(resolved.clone()).or_insert_with(|| {
            palette.push(resolved);
            (palette.len() - 1) as u16
        });
        mapping.push(index);
    }
    let indices = section.blocks.iter().map(|&i| mapping[i as usize]).collect();
    Ok((palette, indices))
}

fn palette_tag(palette: &[BlockState]) -> Tag {
    let mut list = List::with_capacity(TagType::Compound, palette.len());
    for state in palette {
        let mut entry = Compound::new();
        entry.insert("Name", Tag::String(state.name.to_string()));
        if !state.properties.is_empty() {
            let mut properties = Compound::with_capacity(state.properties.len());
            for (key, value) in &state.properties {
                properties.insert(key.as_str(), Tag::String(value.to_string()));
            }
            entry.insert("Properties", Tag::Compound(properties));
        }
        list.push(Tag::Compound(entry));
    }
    Tag::List(list)
}

pub(super) fn tile_entities_tag(chunk: &Chunk) -> Tag {
    let mut list = List::new(TagType::Compound);
    for (coords, entity) in &chunk.tile_entities {
        let mut entity = entity.clone();
        entity.insert("x", Tag::Int(coords.x));
        entity.insert("y", Tag::Int(coords.y));
        entity.insert("z", Tag::Int(coords.z));
        list.push(Tag::Compound(entity));
    }
    Tag::List(list)
}

pub(super) fn compound_list_tag(compounds: &[Compound]) -> Tag {
    let mut list = List::new(TagType::Compound);
    for compound in compounds {
        list.push(Tag::Compound(compound.clone()));
    }
    Tag::List(list)
}

pub fn encode(chunk: &Chunk, target: DataVersion, registry: &Registry) -> Result<Compound> {
    let schema = Schema::for_version(target);
    let flat = schema.flat_root();
    let padded = schema.padded();

    let mut level = Compound::new();
    level.insert("xPos", Tag::Int(chunk.coords.x));
    level.insert("zPos", Tag::Int(chunk.coords.z));
    if flat {
        let min_y = chunk.sections.keys().next().copied().unwrap_or(0);
        level.insert("yPos", Tag::Int(min_y as i32));
    }
    level.insert("Status", Tag::String(chunk.status.to_string()));

    let mut sections = List::new(TagType::Compound);
    for (&y, section) in &chunk.sections {
        let mut out = Compound::new();
        out.insert("Y", Tag::Byte(y));

        let (palette, indices) = resolve_palette(section, target, registry)?;
        let bits = packed::bits_for(palette.len(), 4);
        let data = (palette.len() > 1).then(|| packed::pack(&indices, bits, padded));
        if flat {
            let mut block_states = Compound::new();
            block_states.insert("palette", palette_tag(&palette));
            if let Some(words) = data {
                block_states.insert("data", Tag::LongArray(words));
            }
            out.insert("block_states", Tag::Compound(block_states));

            let mut biomes = Compound::new();
            let mut biome_palette = List::with_capacity(TagType::String, section.biome_palette.len());
            for name in &section.biome_palette {
                biome_palette.push(Tag::String(name.to_string()));
            }
            biomes.insert("palette", Tag::List(biome_palette));
            if section.biome_palette.len() > 1 {
                let quarts: Vec<u16> = section.biomes.iter().map(|&i| i as u16).collect();
                let bits = packed::bits_for(section.biome_palette.len(), 1);
                biomes.insert("data", Tag::LongArray(packed::pack(&quarts, bits, true)));
            }
            out.insert("biomes", Tag::Compound(biomes));
        } else {
            out.insert("Palette", palette_tag(&palette));
            if let Some(words) = data {
                out.insert("BlockStates", Tag::LongArray(words));
            }
        }

        if let Some(light) = &section.block_light {
            out.insert("BlockLight", Tag::ByteArray(light.clone()));
        }
        if let Some(light) = &section.sky_light {
            out.insert("SkyLight", Tag::ByteArray(light.clone()));
        }
        sections.push(Tag::Compound(out));
    }
    level.insert(if flat { "sections" } else { "Sections" }, Tag::List(sections));

    if !flat {
        level.insert("Biomes", Tag::IntArray(chunk_biomes_array(chunk, target, registry)));
    }

    level.insert(
        if flat { "block_entities" } else { "TileEntities" },
        tile_entities_tag(chunk),
    );
    level.insert(
        if flat { "entities" } else { "Entities" },
        compound_list_tag(&chunk.entities),
    );
    level.insert(
        if flat { "block_ticks" } else { "TileTicks" },
        compound_list_tag(&chunk.pending_ticks),
    );

    if flat {
        let mut root = Compound::new();
        root.insert("DataVersion", Tag::Int(target.0 as i32));
        for (key, value) in level {
            root.insert(key, value);
        }
        Ok(root)
    } else {
        let mut root = Compound::new();
        root.insert("DataVersion", Tag::Int(target.0 as i32));
        root.insert("Level", Tag::Compound(level));
        Ok(root)
    }
}

/// Build the chunk-level biome array for pre-flattening targets: 1024 quart
/// ids from 1.15 on, 256 column ids before that.
fn chunk_biomes_array(chunk: &Chunk, target: DataVersion, registry: &Registry) -> Vec<i32> {
    let default = registry.biome_id(&registry.default_biome());
    let quart_id = |qx: usize, qy: usize, qz: usize| -> i32 {
        let section_y = (qy / 4) as i8;
        let local = ((qy % 4) << 4) | (qz << 2) | qx;
        match chunk.section(section_y) {
            Some(section) => {
                let name = &section.biome_palette[section.biomes[local] as usize];
                registry.biome_id(name)
            }
            None => default,
        }
    };
    if target >= BIOME_QUARTS {
        let mut ids = Vec::with_capacity(1024);
        for qy in 0..64 {
            for qz in 0..4 {
                for qx in 0..4 {
                    ids.push(quart_id(qx, qy, qz));
                }
            }
        }
        ids
    } else {
        // Column resolution: sample the ground-level section's quart
        let mut ids = Vec::with_capacity(256);
        for z in 0..16usize {
            for x in 0..16usize {
                ids.push(quart_id(x / 4, 0, z / 4));
            }
        }
        ids
    }
}
