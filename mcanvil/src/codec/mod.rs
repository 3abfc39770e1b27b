//! The versioned chunk/biome codec: maps between a decoded tag tree and
//! typed chunk state, with one decode/encode path per on-disk schema
//! generation, selected by detected format version.

mod legacy;
pub mod packed;
mod paletted;

use crate::chunk::Chunk;
use crate::error::Result;
use crate::nbt::Compound;
use crate::registry::Registry;
use crate::version::{DataVersion, Schema};

/// Decode a chunk compound of any supported schema generation.
#[tracing::instrument(level = "debug", skip_all)]
pub fn decode_chunk(root: &Compound, registry: &Registry) -> Result<Chunk> {
    match Schema::detect(root) {
        Schema::Legacy => legacy::decode(root, registry),
        schema => paletted::decode(root, schema, registry),
    }
}

/// Encode a chunk for the schema generation of `target`, resolving block
/// states that postdate it through their substitute chains.
pub fn encode_chunk(chunk: &Chunk, target: DataVersion, registry: &Registry) -> Result<Compound> {
    match Schema::for_version(target) {
        Schema::Legacy => legacy::encode(chunk, target, registry),
        _ => paletted::encode(chunk, target, registry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BCoords, BIndex, BlockState, SECTION_BLOCK_COUNT};
    use crate::coords::{CoordsXZY, PointXZ};
    use crate::nbt::{List, Tag, TagType};
    use crate::region::CCoords;

    fn registry() -> Registry {
        Registry::builtin().unwrap()
    }

    /// A chunk with one populated section: a stone floor, a dirt layer, an
    /// oak log with a property, and a forest biome column.
    fn test_chunk() -> Chunk {
        let mut chunk = Chunk::new(CCoords(PointXZ::new(3, -2)));
        let section = chunk.section_mut(0);
        let stone = BlockState::new(arcstr::literal!("minecraft:stone"));
        let dirt = BlockState::new(arcstr::literal!("minecraft:dirt"));
        let log = BlockState::new(arcstr::literal!("minecraft:oak_log")).with_property("axis", "y");
        for z in 0..16 {
            for x in 0..16 {
                section.set_block(BIndex::from_flat_index(z * 16 + x), stone.clone());
                section.set_block(BIndex::from_flat_index(256 + z * 16 + x), dirt.clone());
            }
        }
        section.set_block(BIndex::from_flat_index(2 * 256 + 5), log.clone());
        // uniform per-column biome so column-resolution encodings roundtrip
        for quart in 0..4usize {
            let index = BIndex::from_flat_index((quart * 4) * 256);
            section.set_biome(index, arcstr::literal!("minecraft:forest"));
        }
        let mut bell = crate::nbt::Compound::new();
        bell.insert("id", Tag::String("minecraft:bell".to_owned()));
        chunk
            .tile_entities
            .insert(BCoords(CoordsXZY::new(53, -27, 2)), bell);
        chunk
    }

    fn assert_same_blocks(a: &Chunk, b: &Chunk) {
        assert_eq!(
            a.sections.keys().collect::<Vec<_>>(),
            b.sections.keys().collect::<Vec<_>>()
        );
        for (y, section_a) in &a.sections {
            let section_b = &b.sections[y];
            for i in 0..SECTION_BLOCK_COUNT {
                let index = BIndex::from_flat_index(i);
                assert_eq!(
                    section_a.block_state(index),
                    section_b.block_state(index),
                    "block mismatch at section {y} index {i}"
                );
            }
            for i in 0..SECTION_BLOCK_COUNT {
                let index = BIndex::from_flat_index(i);
                assert_eq!(
                    section_a.biome(index),
                    section_b.biome(index),
                    "biome mismatch at section {y} index {i}"
                );
            }
        }
    }

    #[test]
    fn test_roundtrip_flattened() {
        let registry = registry();
        let chunk = test_chunk();
        let root = encode_chunk(&chunk, DataVersion::V1_20, &registry).unwrap();
        assert_eq!(root.get_int("DataVersion"), Some(3463));
        assert!(root.get_list("sections").is_some());
        let decoded = decode_chunk(&root, &registry).unwrap();
        assert_eq!(decoded.coords, chunk.coords);
        assert_eq!(decoded.data_version, Some(DataVersion::V1_20));
        assert_same_blocks(&chunk, &decoded);
        let bell = decoded
            .tile_entities
            .get(&BCoords(CoordsXZY::new(53, -27, 2)))
            .unwrap();
        assert_eq!(bell.get_str("id"), Some("minecraft:bell"));
    }

    #[test]
    fn test_roundtrip_level_era() {
        let registry = registry();
        let chunk = test_chunk();
        for target in [DataVersion::V1_13, DataVersion::V1_16] {
            let root = encode_chunk(&chunk, target, &registry).unwrap();
            let level = root.get_compound("Level").unwrap();
            assert!(level.get_list("Sections").is_some());
            let decoded = decode_chunk(&root, &registry).unwrap();
            assert_same_blocks(&chunk, &decoded);
        }
    }

    #[test]
    fn test_padding_cutoff_changes_word_count() {
        let registry = registry();
        // 17 distinct states force a 5-bit index width, where the unpadded
        // and padded layouts produce different word counts
        let mut chunk = Chunk::new(CCoords(PointXZ::new(0, 0)));
        let section = chunk.section_mut(0);
        for i in 0..16 {
            let state = BlockState::new(arcstr::literal!("minecraft:white_wool"))
                .with_property("shade", format!("{i}"));
            section.set_block(BIndex::from_flat_index(i), state);
        }
        assert_eq!(section.block_palette.len(), 17);

        let words_at = |target: DataVersion| -> usize {
            let root = encode_chunk(&chunk, target, &registry).unwrap();
            let level = root.get_compound("Level").unwrap();
            let section = level.get_list("Sections").unwrap().get(0).unwrap();
            section
                .as_compound()
                .unwrap()
                .get_long_array("BlockStates")
                .unwrap()
                .len()
        };
        assert_eq!(words_at(DataVersion(2528)), 320);
        assert_eq!(words_at(DataVersion::PACKED_PADDING), 342);
    }

    #[test]
    fn test_downgrade_substitutes_blocks() {
        let registry = registry();
        let mut chunk = Chunk::new(CCoords(PointXZ::new(0, 0)));
        let index = BIndex::from_flat_index(0);
        chunk
            .section_mut(0)
            .set_block(index, BlockState::new(arcstr::literal!("minecraft:deepslate")));
        let root = encode_chunk(&chunk, DataVersion::V1_13, &registry).unwrap();
        let decoded = decode_chunk(&root, &registry).unwrap();
        assert_eq!(
            decoded.section(0).unwrap().block_state(index).name,
            "minecraft:stone"
        );
    }

    #[test]
    fn test_legacy_roundtrip() {
        let registry = registry();
        let chunk = test_chunk();
        let root = encode_chunk(&chunk, DataVersion(0), &registry).unwrap();
        assert!(root.get("DataVersion").is_none());
        let level = root.get_compound("Level").unwrap();
        assert_eq!(level.get_byte_array("Blocks").unwrap().len(), 32768);
        let decoded = decode_chunk(&root, &registry).unwrap();
        // the oak log keeps its identity but loses its property map
        let index = BIndex::from_flat_index(2 * 256 + 5);
        let log = decoded.section(0).unwrap().block_state(index);
        assert_eq!(log.name, "minecraft:oak_log");
        assert!(log.properties.is_empty());
        let floor = BIndex::from_flat_index(0);
        assert_eq!(
            decoded.section(0).unwrap().block_state(floor).name,
            "minecraft:stone"
        );
        assert_eq!(
            decoded.section(0).unwrap().biome(floor),
            "minecraft:forest"
        );
    }

    #[test]
    fn test_section_y_reinterprets_high_bytes() {
        let registry = registry();
        let mut palette = List::new(TagType::Compound);
        let mut entry = crate::nbt::Compound::new();
        entry.insert("Name", Tag::String("minecraft:stone".to_owned()));
        palette.push(Tag::Compound(entry));
        let mut block_states = crate::nbt::Compound::new();
        block_states.insert("palette", Tag::List(palette));
        let mut section = crate::nbt::Compound::new();
        // a writer that stored the unsigned byte 128 in a wider field
        section.insert("Y", Tag::Int(128));
        section.insert("block_states", Tag::Compound(block_states));
        let mut sections = List::new(TagType::Compound);
        sections.push(Tag::Compound(section));
        let mut root = crate::nbt::Compound::new();
        root.insert("DataVersion", Tag::Int(DataVersion::V1_20.0 as i32));
        root.insert("xPos", Tag::Int(0));
        root.insert("zPos", Tag::Int(0));
        root.insert("sections", Tag::List(sections));

        let decoded = decode_chunk(&root, &registry).unwrap();
        let section = decoded.section(-128).unwrap();
        // no biome container: the fixed default applies
        assert_eq!(
            section.biome(BIndex::from_flat_index(0)),
            "minecraft:plains"
        );
    }

    #[test]
    fn test_missing_chunk_biomes_default_to_plains() {
        let registry = registry();
        let chunk = test_chunk();
        let root = encode_chunk(&chunk, DataVersion::V1_16, &registry).unwrap();
        let mut root = root;
        let mut level = root.get_compound("Level").unwrap().clone();
        level.remove("Biomes");
        root.insert("Level", Tag::Compound(level));

        let decoded = decode_chunk(&root, &registry).unwrap();
        let section = decoded.section(0).unwrap();
        for i in 0..SECTION_BLOCK_COUNT {
            assert_eq!(
                section.biome(BIndex::from_flat_index(i)),
                "minecraft:plains"
            );
        }
    }

    #[test]
    fn test_unknown_block_registers_placeholder() {
        let registry = registry();
        let mut chunk = Chunk::new(CCoords(PointXZ::new(0, 0)));
        let index = BIndex::from_flat_index(7);
        chunk
            .section_mut(0)
            .set_block(index, BlockState::new(arcstr::literal!("modpack:widget")));
        let root = encode_chunk(&chunk, DataVersion::V1_20, &registry).unwrap();
        let decoded = decode_chunk(&root, &registry).unwrap();
        assert_eq!(
            decoded.section(0).unwrap().block_state(index).name,
            "modpack:widget"
        );
        assert!(registry.get("modpack:widget").is_some());
    }

    #[test]
    fn test_rename_applied_to_old_sources() {
        let registry = registry();
        let mut chunk = Chunk::new(CCoords(PointXZ::new(0, 0)));
        let index = BIndex::from_flat_index(0);
        chunk
            .section_mut(0)
            .set_block(index, BlockState::new(arcstr::literal!("minecraft:short_grass")));
        // for a 1.16 target the plant is written under its old name...
        let root = encode_chunk(&chunk, DataVersion::V1_16, &registry).unwrap();
        // ...and decoding that old data maps it forward again
        let decoded = decode_chunk(&root, &registry).unwrap();
        assert_eq!(
            decoded.section(0).unwrap().block_state(index).name,
            "minecraft:short_grass"
        );
    }
}
