//! Reading and writing of block-game world data: the tagged binary ("NBT")
//! serialization format, the sector-addressed region container that bundles
//! compressed chunk payloads, and a version-dispatched codec that turns tag
//! trees into typed chunk state (block palettes, packed index arrays, biome
//! palettes) across roughly a decade of incompatible on-disk schemas.

pub mod cache;
pub mod chunk;
pub mod codec;
pub mod coords;
pub mod error;
pub mod nbt;
pub mod region;
pub mod registry;
pub mod version;
pub mod world;

pub use cache::{ChunkBounds, ChunkCache};
pub use chunk::{BCoords, BIndex, BlockState, Chunk, Section};
pub use codec::{decode_chunk, encode_chunk};
pub use error::{Error, Result};
pub use region::{CCoords, CIndex, RCoords, RawChunk, Region, RegionBuilder, RegionInfo};
pub use registry::{BlockIdentity, Registry};
pub use version::{DataVersion, GameVersion, Schema};
pub use world::{DimensionID, DimensionInfo, Level, RegionChunks, WorldInfo, write_region};
