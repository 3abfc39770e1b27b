//! Decode/encode for the pre-palette schema: one flat 16x128x16 byte array
//! of numeric block ids per chunk (y-fastest within an (x, z) column), an
//! optional 4-bit damage-value array, and numeric column biomes.

use std::collections::HashSet;

use arcstr::ArcStr;

use crate::chunk::{
    BIndex, BlockState, Chunk, SECTION_BIOME_COUNT, SECTION_NIBBLE_LEN, Section,
};
use crate::codec::packed;
use crate::codec::paletted;
use crate::coords::{IndexXZY, PointXZ};
use crate::error::{Error, Result};
use crate::nbt::{Compound, Tag};
use crate::region::CCoords;
use crate::registry::Registry;
use crate::version::DataVersion;

/// Legacy chunks are 128 blocks tall: 8 sections.
const LEGACY_SECTION_COUNT: usize = 8;
const LEGACY_HEIGHT: usize = LEGACY_SECTION_COUNT * 16;
const LEGACY_BLOCK_COUNT: usize = 16 * 16 * LEGACY_HEIGHT;
const LEGACY_NIBBLE_LEN: usize = LEGACY_BLOCK_COUNT / 2;
const LEGACY_BIOME_COUNT: usize = 16 * 16;

/// Flat index of `(x, z, y)` in a legacy block array.
fn legacy_index(x: usize, z: usize, y: usize) -> usize {
    (x * 16 + z) * LEGACY_HEIGHT + y
}

/// Re-order one section's worth of a legacy per-block nibble array into the
/// sectioned x-fastest layout.
fn light_from_legacy(legacy: &[i8], section_y: usize) -> Vec<i8> {
    let mut out = vec![0i8; SECTION_NIBBLE_LEN];
    for y in 0..16 {
        for z in 0..16 {
            for x in 0..16 {
                let value = packed::nibble(legacy, legacy_index(x, z, section_y * 16 + y));
                packed::set_nibble(&mut out, (y * 16 + z) * 16 + x, value);
            }
        }
    }
    out
}

fn light_to_legacy(legacy: &mut [i8], section_y: usize, light: &[i8]) {
    for y in 0..16 {
        for z in 0..16 {
            for x in 0..16 {
                let value = packed::nibble(light, (y * 16 + z) * 16 + x);
                packed::set_nibble(legacy, legacy_index(x, z, section_y * 16 + y), value);
            }
        }
    }
}

/// Per-quart biome names from the 256-entry column array, if present.
fn column_biomes(level: &Compound, registry: &Registry) -> Option<[ArcStr; SECTION_BIOME_COUNT]> {
    let ids = level.get_byte_array("Biomes")?;
    if ids.len() != LEGACY_BIOME_COUNT {
        log::debug!("ignoring legacy biome array with bad length {}", ids.len());
        return None;
    }
    Some(std::array::from_fn(|i| {
        let qx = i & 0x3;
        let qz = (i >> 2) & 0x3;
        // column resolution: same name for every vertical quart
        registry.biome_name(ids[(qz * 4) * 16 + qx * 4] as u8 as i32)
    }))
}

pub fn decode(root: &Compound, registry: &Registry) -> Result<Chunk> {
    let level = root
        .get_compound("Level")
        .ok_or_else(|| Error::format("chunk missing Level compound"))?;
    let x = level
        .get_int("xPos")
        .ok_or_else(|| Error::format("chunk missing xPos"))?;
    let z = level
        .get_int("zPos")
        .ok_or_else(|| Error::format("chunk missing zPos"))?;

    let mut chunk = Chunk::new(CCoords(PointXZ::new(x, z)));
    chunk.data_version = None;
    chunk.status = if level.get_byte("TerrainPopulated").unwrap_or(1) != 0 {
        arcstr::literal!("minecraft:full")
    } else {
        arcstr::literal!("minecraft:empty")
    };

    let blocks = level
        .get_byte_array("Blocks")
        .ok_or_else(|| Error::format("legacy chunk missing Blocks array"))?;
    if blocks.len() != LEGACY_BLOCK_COUNT {
        return Err(Error::format(format!(
            "legacy Blocks array has length {}, expected {LEGACY_BLOCK_COUNT}",
            blocks.len()
        )));
    }
    let meta = level
        .get_byte_array("Data")
        .filter(|data| data.len() == LEGACY_NIBBLE_LEN);
    let block_light = level
        .get_byte_array("BlockLight")
        .filter(|data| data.len() == LEGACY_NIBBLE_LEN);
    let sky_light = level
        .get_byte_array("SkyLight")
        .filter(|data| data.len() == LEGACY_NIBBLE_LEN);
    let biomes = column_biomes(level, registry);

    let mut unknown_ids: HashSet<(u16, u8)> = HashSet::new();
    for section_y in 0..LEGACY_SECTION_COUNT {
        let mut section = Section::new();
        let mut occupied = false;
        for y in 0..16usize {
            for z in 0..16usize {
                for x in 0..16usize {
                    let index = legacy_index(x, z, section_y * 16 + y);
                    let id = blocks[index] as u8 as u16;
                    if id == 0 {
                        continue;
                    }
                    let damage = meta.map(|data| packed::nibble(data, index)).unwrap_or(0);
                    let Some(identity) = registry.resolve_legacy(id, damage) else {
                        // unresolvable numeric id: recovered as air
                        if unknown_ids.insert((id, damage)) {
                            log::debug!(
                                "chunk {}: unknown legacy block id {id}:{damage}, substituting air",
                                chunk.coords
                            );
                        }
                        continue;
                    };
                    section.set_block(
                        BIndex(IndexXZY::new(x as u32, z as u32, y as u32)),
                        BlockState::new(identity.name().clone()),
                    );
                    occupied = true;
                }
            }
        }
        if let Some(names) = &biomes {
            let mut palette: Vec<ArcStr> = Vec::new();
            let mut indices = [0u8; SECTION_BIOME_COUNT];
            for (slot, name) in indices.iter_mut().zip(names.iter()) {
                *slot = match palette.iter().position(|b| b == name) {
                    Some(i) => i as u8,
                    None => {
                        palette.push(name.clone());
                        (palette.len() - 1) as u8
                    }
                };
            }
            section.biome_palette = palette;
            section.biomes = indices;
        }
        section.block_light = block_light.map(|data| light_from_legacy(data, section_y));
        section.sky_light = sky_light.map(|data| light_from_legacy(data, section_y));
        if occupied || section.block_light.is_some() || section.sky_light.is_some() {
            chunk.sections.insert(section_y as i8, section);
        }
    }

    if let Some(list) = level.get_list("TileEntities") {
        paletted::read_tile_entities(list, &mut chunk);
    }
    chunk.entities = paletted::read_compound_list(level.get_list("Entities"));
    chunk.pending_ticks = paletted::read_compound_list(level.get_list("TileTicks"));

    Ok(chunk)
}

pub fn encode(chunk: &Chunk, target: DataVersion, registry: &Registry) -> Result<Compound> {
    let mut blocks = vec![0i8; LEGACY_BLOCK_COUNT];
    let mut meta = vec![0i8; LEGACY_NIBBLE_LEN];
    let mut block_light: Option<Vec<i8>> = None;
    let mut sky_light: Option<Vec<i8>> = None;
    let mut unencodable: HashSet<ArcStr> = HashSet::new();

    for (&section_y, section) in &chunk.sections {
        if !(0..LEGACY_SECTION_COUNT as i8).contains(&section_y) {
            if section.has_blocks() {
                log::debug!(
                    "chunk {}: dropping section {section_y} outside the legacy height range",
                    chunk.coords
                );
            }
            continue;
        }
        let section_y = section_y as usize;

        // Pre-resolve each palette entry to its legacy numeric id; entries
        // with no legacy representation at this version become air.
        let legacy_ids: Vec<Option<(u8, u8)>> = section
            .block_palette
            .iter()
            .map(|state| {
                let identity = registry.resolve(&state.name, target)?;
                let legacy = identity.as_ref().and_then(|identity| identity.legacy());
                match legacy {
                    Some(id) if id.id() <= u8::MAX as u16 => {
                        Ok(Some((id.id() as u8, id.meta())))
                    }
                    _ => {
                        if !state.is_air() && unencodable.insert(state.name.clone()) {
                            log::debug!(
                                "chunk {}: no legacy id for {}, substituting air",
                                chunk.coords,
                                state.name
                            );
                        }
                        Ok(None)
                    }
                }
            })
            .collect::<Result<_>>()?;

        for y in 0..16usize {
            for z in 0..16usize {
                for x in 0..16usize {
                    let palette_index = section.blocks[(y * 16 + z) * 16 + x] as usize;
                    let Some((id, damage)) = legacy_ids[palette_index] else {
                        continue;
                    };
                    let index = legacy_index(x, z, section_y * 16 + y);
                    blocks[index] = id as i8;
                    packed::set_nibble(&mut meta, index, damage);
                }
            }
        }

        if let Some(light) = &section.block_light {
            light_to_legacy(
                block_light.get_or_insert_with(|| vec![0i8; LEGACY_NIBBLE_LEN]),
                section_y,
                light,
            );
        }
        if let Some(light) = &section.sky_light {
            light_to_legacy(
                sky_light.get_or_insert_with(|| vec![0i8; LEGACY_NIBBLE_LEN]),
                section_y,
                light,
            );
        }
    }

    let mut biomes = vec![0i8; LEGACY_BIOME_COUNT];
    for z in 0..16usize {
        for x in 0..16usize {
            let id = match chunk.section(0) {
                Some(section) => {
                    let quart = ((z / 4) << 2) | (x / 4);
                    registry.biome_id(&section.biome_palette[section.biomes[quart] as usize])
                }
                None => registry.biome_id(&registry.default_biome()),
            };
            biomes[z * 16 + x] = id as i8;
        }
    }

    let mut level = Compound::new();
    level.insert("xPos", Tag::Int(chunk.coords.x));
    level.insert("zPos", Tag::Int(chunk.coords.z));
    level.insert(
        "TerrainPopulated",
        Tag::Byte(chunk.fully_generated() as i8),
    );
    level.insert("Blocks", Tag::ByteArray(blocks));
    level.insert("Data", Tag::ByteArray(meta));
    if let Some(light) = block_light {
        level.insert("BlockLight", Tag::ByteArray(light));
    }
    if let Some(light) = sky_light {
        level.insert("SkyLight", Tag::ByteArray(light));
    }
    level.insert("Biomes", Tag::ByteArray(biomes));
    level.insert("TileEntities", paletted::tile_entities_tag(chunk));
    level.insert("Entities", paletted::compound_list_tag(&chunk.entities));
    level.insert("TileTicks", paletted::compound_list_tag(&chunk.pending_ticks));

    let mut root = Compound::new();
    root.insert("Level", Tag::Compound(level));
    Ok(root)
}
