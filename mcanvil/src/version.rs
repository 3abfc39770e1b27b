use crate::nbt::Compound;

/// The integer schema identifier embedded in saved data ("DataVersion"),
/// identifying the exact format generation that wrote it.
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
)]
pub struct DataVersion(pub u32);

impl DataVersion {
    /// First schema with paletted section block states (17w47a).
    pub const PALETTED: DataVersion = DataVersion(1451);
    /// First schema where packed index arrays pad each 64-bit word instead
    /// of running one continuous bit-stream (20w17a).
    pub const PACKED_PADDING: DataVersion = DataVersion(2529);
    /// First schema with chunk data at the compound root instead of under
    /// "Level", with per-section block_states/biomes containers (21w43a).
    pub const FLAT_CHUNK: DataVersion = DataVersion(2844);

    pub const V1_13: DataVersion = DataVersion(1519);
    pub const V1_14: DataVersion = DataVersion(1952);
    pub const V1_15: DataVersion = DataVersion(2225);
    pub const V1_16: DataVersion = DataVersion(2566);
    pub const V1_17: DataVersion = DataVersion(2724);
    pub const V1_18: DataVersion = DataVersion(2860);
    pub const V1_19: DataVersion = DataVersion(3105);
    pub const V1_20: DataVersion = DataVersion(3463);
}

/// Semantic game release, for diagnostics and coarse feature checks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum GameVersion {
    /// Anything predating the paletted format (numeric block ids).
    Legacy,
    V1_13,
    V1_14,
    V1_15,
    V1_16,
    V1_17,
    V1_18,
    V1_19,
    V1_20,
}

const GAME_VERSIONS: &[(DataVersion, GameVersion)] = &[
    (DataVersion::V1_20, GameVersion::V1_20),
    (DataVersion::V1_19, GameVersion::V1_19),
    (DataVersion::V1_18, GameVersion::V1_18),
    (DataVersion::V1_17, GameVersion::V1_17),
    (DataVersion::V1_16, GameVersion::V1_16),
    (DataVersion::V1_15, GameVersion::V1_15),
    (DataVersion::V1_14, GameVersion::V1_14),
    (DataVersion::PALETTED, GameVersion::V1_13),
];

impl GameVersion {
    pub fn from_data_version(v: DataVersion) -> GameVersion {
        GAME_VERSIONS
            .iter()
            .find(|(min, _)| v >= *min)
            .map(|(_, gv)| *gv)
            .unwrap_or(GameVersion::Legacy)
    }
}

/// On-disk chunk schema generation. One variant per incompatible encoding of
/// the same logical content; selected by data-version range, or by structure
/// when no data version is present.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Schema {
    /// Flat numeric-id arrays, no palette, no data version.
    Legacy,
    /// Paletted sections under "Level", continuous bit-stream indices.
    Paletted,
    /// Paletted sections under "Level", word-padded indices.
    PalettedPadded,
    /// Paletted sections at the root, word-padded indices, per-section
    /// biome palettes.
    Flattened,
}

const SCHEMA_RANGES: &[(DataVersion, Schema)] = &[
    (DataVersion::FLAT_CHUNK, Schema::Flattened),
    (DataVersion::PACKED_PADDING, Schema::PalettedPadded),
    (DataVersion::PALETTED, Schema::Paletted),
    (DataVersion(0), Schema::Legacy),
];

impl Schema {
    pub fn for_version(v: DataVersion) -> Schema {
        SCHEMA_RANGES
            .iter()
            .find(|(min, _)| v >= *min)
            .map(|(_, schema)| *schema)
            .expect("schema ranges cover all data versions")
    }

    /// Determine the schema that wrote `root`, preferring the embedded data
    /// version and falling back to structural cues for ancient chunks.
    pub fn detect(root: &Compound) -> Schema {
        if let Some(v) = root.get_int("DataVersion") {
            return Schema::for_version(DataVersion(v as u32));
        }
        // No data version: either a pre-1.9 chunk or foreign data. Paletted
        // sections are recognizable by structure; everything else gets the
        // legacy flat-array treatment.
        if let Some(level) = root.get_compound("Level")
            && let Some(sections) = level.get_list("Sections")
            && sections
                .iter()
                .filter_map(|tag| tag.as_compound())
                .any(|section| section.contains_key("Palette"))
        {
            return Schema::Paletted;
        }
        Schema::Legacy
    }

    /// Whether packed index arrays pad each 64-bit word so that no index
    /// straddles a word boundary.
    pub fn padded(self) -> bool {
        matches!(self, Schema::PalettedPadded | Schema::Flattened)
    }

    /// Whether chunk data lives at the compound root rather than under
    /// "Level".
    pub fn flat_root(self) -> bool {
        matches!(self, Schema::Flattened)
    }
}
