/*
Region file format notes:

- The chunk location table is ordered by (Z, X): 1024 entries of a 3-byte
  big-endian sector offset plus a 1-byte sector count, offset 0 = no chunk.
- The 4096 bytes of per-chunk timestamps after the table are ignored.
- Chunk payloads are sector-aligned: a 4-byte big-endian length, a 1-byte
  compression method, then `length - 1` compressed bytes, zero-padded to the
  next 4096-byte boundary. The file length is always a multiple of 4096.
 */

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Buf;

use crate::chunk::Chunk;
use crate::codec;
use crate::coords::{CoordsXZ, IndexXZ};
use crate::error::{Error, Result};
use crate::nbt;
use crate::registry::Registry;

pub const SECTOR_SIZE: usize = 4096;
pub const REGION_SIZE: u32 = 32;
pub const REGION_CHUNK_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;
const REGION_HEADER_SIZE: usize = 2 * SECTOR_SIZE;
/// Chunk payload framing: 4-byte length plus 1-byte compression method.
const CHUNK_HEADER_SIZE: u64 = 5;
/// The sector count is a single byte.
const MAX_CHUNK_SECTORS: usize = 255;

/// Global region coordinates.
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
pub struct RCoords(pub CoordsXZ);

impl RCoords {
    /// Chunk coordinates of this region's lowest corner.
    pub fn to_chunk_coords(self) -> CCoords {
        CCoords(CoordsXZ::new(
            self.x * REGION_SIZE as i32,
            self.z * REGION_SIZE as i32,
        ))
    }
}

/// Global chunk coordinates.
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
pub struct CCoords(pub CoordsXZ);

impl CCoords {
    /// Split into the owning region's coordinates and the chunk index
    /// within that region.
    pub fn to_region_coords(self) -> (RCoords, CIndex) {
        (
            RCoords(CoordsXZ::new(
                self.x.div_euclid(REGION_SIZE as i32),
                self.z.div_euclid(REGION_SIZE as i32),
            )),
            CIndex(IndexXZ::new(
                self.x.rem_euclid(REGION_SIZE as i32) as u32,
                self.z.rem_euclid(REGION_SIZE as i32) as u32,
            )),
        )
    }
}

/// 2D chunk index within a region.
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
pub struct CIndex(pub IndexXZ);

impl CIndex {
    pub fn to_chunk_coords(self, region_coords: RCoords) -> CCoords {
        CCoords(CoordsXZ::new(
            region_coords.x * REGION_SIZE as i32 + self.x as i32,
            region_coords.z * REGION_SIZE as i32 + self.z as i32,
        ))
    }

    pub fn to_flat_index(self) -> usize {
        (self.z * REGION_SIZE + self.x) as usize
    }

    pub fn from_flat_index(index: usize) -> Self {
        assert!(index < REGION_CHUNK_COUNT, "not a valid region chunk index");
        Self(IndexXZ::new(
            index as u32 % REGION_SIZE,
            index as u32 / REGION_SIZE,
        ))
    }
}

/// A region file discovered on disk, identified by its `r.<x>.<z>.mca`
/// filename.
#[derive(Clone, Debug)]
pub struct RegionInfo {
    pub coords: RCoords,
    pub path: PathBuf,
}

impl RegionInfo {
    pub fn try_from_path(path: PathBuf) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::format("not a file"));
        }
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::format("invalid filename"))?;
        if let Some(next) = filename.strip_suffix(".mca")
            && let Some(next) = next.strip_prefix("r.")
            && let Some((raw_x, raw_z)) = next.split_once('.')
            && let Ok(x) = i32::from_str(raw_x)
            && let Ok(z) = i32::from_str(raw_z)
        {
            Ok(Self {
                coords: RCoords(CoordsXZ::new(x, z)),
                path,
            })
        } else {
            Err(Error::format("not a region filename (r.X.Z.mca)"))
        }
    }

    pub fn open(&self) -> Result<Region<File>> {
        let file = File::open(&self.path)?;
        Region::from_stream(self.coords, file)
    }
}

/// An open region stream. The location table is parsed once at open time;
/// chunk payloads decode lazily on access.
pub struct Region<S: Read + Seek> {
    coords: RCoords,
    locations: [u32; REGION_CHUNK_COUNT],
    stream_len: u64,
    stream: S,
}

impl<S: Read + Seek> Region<S> {
    pub fn from_stream(coords: RCoords, mut stream: S) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; REGION_HEADER_SIZE];
        stream.read_exact(&mut header)?;
        let mut locations = [0u32; REGION_CHUNK_COUNT];
        let mut table = &header[..(REGION_CHUNK_COUNT * 4)];
        for location in locations.iter_mut() {
            *location = table.get_u32();
        }
        let stream_len = stream.seek(SeekFrom::End(0))?;
        Ok(Self {
            coords,
            locations,
            stream_len,
            stream,
        })
    }

    pub fn coords(&self) -> RCoords {
        self.coords
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn into_iter(self) -> RegionChunkIter<S> {
        RegionChunkIter {
            region: self,
            index_iter: 0..REGION_CHUNK_COUNT,
        }
    }

    /// Read and decompress the chunk at `chunk_index`, if present.
    pub fn get_raw_chunk(&mut self, chunk_index: CIndex) -> Result<Option<RawChunk>> {
        let Some(mut raw_chunk) = self.get_raw_chunk_by_index(chunk_index.to_flat_index())? else {
            return Ok(None);
        };
        raw_chunk.index = chunk_index;
        raw_chunk.coords = chunk_index.to_chunk_coords(self.coords);
        Ok(Some(raw_chunk))
    }

    fn get_raw_chunk_by_index(&mut self, index: usize) -> Result<Option<RawChunk>> {
        assert!(index < self.locations.len());
        let location = self.locations[index];
        // Offset of 0 means there is no chunk data for this chunk
        if location == 0 {
            return Ok(None);
        }
        let sector_offset = (location >> 8) as u64;
        let sector_count = (location & 0xFF) as u64;
        if sector_count == 0 {
            return Err(Error::format("present chunk slot with zero sector count"));
        }

        // A slot pointing past the end of the file happens in partially
        // generated regions; treat it as an absent chunk.
        let offset = sector_offset * SECTOR_SIZE as u64;
        if offset + sector_count * SECTOR_SIZE as u64 > self.stream_len {
            log::warn!(
                "region {}: chunk slot {} points outside the file, skipping",
                self.coords,
                CIndex::from_flat_index(index),
            );
            return Ok(None);
        }

        self.stream.seek(SeekFrom::Start(offset))?;
        let length = self.stream.read_u32::<BigEndian>()? as u64;
        if length == 0 {
            return Err(Error::format("present chunk slot with zero-length payload"));
        }
        if length > sector_count * SECTOR_SIZE as u64 - 4 {
            return Err(Error::format(format!(
                "chunk payload of {length} bytes exceeds its {sector_count} allocated sectors"
            )));
        }
        let method = nbt::Method::from_flag(self.stream.read_u8()?)?;
        let mut compressed = vec![0u8; (length - 1) as usize];
        self.stream.read_exact(&mut compressed)?;
        let data = nbt::decompress(&compressed, method)?;

        Ok(Some(RawChunk {
            index: Default::default(),
            coords: Default::default(),
            data,
        }))
    }
}

pub struct RegionChunkIter<S: Read + Seek> {
    region: Region<S>,
    index_iter: Range<usize>,
}

impl<S: Read + Seek> RegionChunkIter<S> {
    pub fn into_inner(self) -> Region<S> {
        self.region
    }
}

impl<S: Read + Seek> Iterator for RegionChunkIter<S> {
    type Item = Result<RawChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        for i in self.index_iter.by_ref() {
            match self.region.get_raw_chunk_by_index(i) {
                Ok(Some(mut raw_chunk)) => {
                    raw_chunk.index = CIndex::from_flat_index(i);
                    raw_chunk.coords = raw_chunk.index.to_chunk_coords(self.region.coords);
                    return Some(Ok(raw_chunk));
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// A present chunk slot's decompressed (but not yet decoded) payload.
#[derive(derive_more::Debug)]
pub struct RawChunk {
    pub index: CIndex,
    pub coords: CCoords,
    #[debug(ignore)]
    pub data: Vec<u8>,
}

impl RawChunk {
    /// Decode the payload into typed chunk data.
    pub fn parse(&self, registry: &Registry) -> Result<Chunk> {
        let tag = nbt::from_bytes(&self.data)?;
        let root = tag
            .as_compound()
            .ok_or_else(|| Error::format("chunk root is not a compound"))?;
        codec::decode_chunk(root, registry)
    }
}

/// Accumulates chunk payloads for a region, then writes the sector-aligned
/// container in one pass: header placeholder first, payloads appended in
/// slot order, location table backfilled.
pub struct RegionBuilder {
    coords: RCoords,
    slots: Vec<Option<Vec<u8>>>,
}

impl RegionBuilder {
    pub fn new(coords: RCoords) -> Self {
        Self {
            coords,
            slots: (0..REGION_CHUNK_COUNT).map(|_| None).collect(),
        }
    }

    pub fn coords(&self) -> RCoords {
        self.coords
    }

    /// Set a slot's payload: uncompressed tag-tree bytes.
    pub fn put_chunk(&mut self, index: CIndex, data: Vec<u8>) {
        self.slots[index.to_flat_index()] = Some(data);
    }

    pub fn write_to<W: Write + Seek>(&self, mut writer: W) -> Result<()> {
        writer.seek(SeekFrom::Start(0))?;
        // Header placeholder: location table plus zeroed timestamps
        writer.write_all(&[0u8; REGION_HEADER_SIZE])?;

        let mut locations = [0u32; REGION_CHUNK_COUNT];
        let mut next_sector = (REGION_HEADER_SIZE / SECTOR_SIZE) as u64;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(data) = slot else {
                continue;
            };
            let compressed = nbt::compress(data, nbt::Method::Zlib)?;
            let total = CHUNK_HEADER_SIZE as usize + compressed.len();
            let sectors = total.div_ceil(SECTOR_SIZE);
            if sectors == 0 {
                return Err(Error::internal(format!(
                    "computed zero sector count for populated chunk slot {index}"
                )));
            }
            if sectors > MAX_CHUNK_SECTORS {
                return Err(Error::format(format!(
                    "chunk at slot {index} needs {sectors} sectors, limit is {MAX_CHUNK_SECTORS}"
                )));
            }
            writer.write_u32::<BigEndian>(compressed.len() as u32 + 1)?;
            writer.write_u8(nbt::Method::Zlib.flag())?;
            writer.write_all(&compressed)?;
            // Zero-pad to the sector boundary
            let padding = sectors * SECTOR_SIZE - total;
            io::copy(&mut io::repeat(0).take(padding as u64), &mut writer)?;

            locations[index] = ((next_sector as u32) << 8) | sectors as u32;
            next_sector += sectors as u64;
        }

        writer.seek(SeekFrom::Start(0))?;
        for location in locations {
            writer.write_u32::<BigEndian>(location)?;
        }
        writer.flush()?;
        Ok(())
    }
}
