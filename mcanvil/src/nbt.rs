//! The tagged binary serialization format used by standalone world files and
//! region-embedded chunk payloads.
//!
//! Wire format notes:
//!
//! - Every value is preceded by a 1-byte type id; named values additionally
//!   carry a 2-byte length-prefixed UTF-8 key.
//! - All numeric scalars and array lengths are big-endian.
//! - A compound is a sequence of named values terminated by the end marker;
//!   a list is a type id, a 4-byte count, then unnamed payloads.
//! - Standalone files are gzip-wrapped; region payloads use zlib (or,
//!   rarely, gzip) selected by a 1-byte method flag.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression as Flate2Level;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::{Error, Result};

/// Initial capacity cap for length-prefixed containers, so a corrupt length
/// field cannot trigger a huge up-front allocation.
const PREALLOC_LIMIT: usize = 1 << 16;

/// The type id of a tag, as stored on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TagType {
    End = 0,
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    ByteArray = 7,
    String = 8,
    List = 9,
    Compound = 10,
    IntArray = 11,
    LongArray = 12,
}

impl TagType {
    pub fn from_id(id: u8) -> Option<TagType> {
        match id {
            0 => Some(TagType::End),
            1 => Some(TagType::Byte),
            2 => Some(TagType::Short),
            3 => Some(TagType::Int),
            4 => Some(TagType::Long),
            5 => Some(TagType::Float),
            6 => Some(TagType::Double),
            7 => Some(TagType::ByteArray),
            8 => Some(TagType::String),
            9 => Some(TagType::List),
            10 => Some(TagType::Compound),
            11 => Some(TagType::IntArray),
            12 => Some(TagType::LongArray),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

/// A single tagged value.
#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(List),
    Compound(Compound),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    pub fn tag_type(&self) -> TagType {
        match self {
            Tag::Byte(_) => TagType::Byte,
            Tag::Short(_) => TagType::Short,
            Tag::Int(_) => TagType::Int,
            Tag::Long(_) => TagType::Long,
            Tag::Float(_) => TagType::Float,
            Tag::Double(_) => TagType::Double,
            Tag::ByteArray(_) => TagType::ByteArray,
            Tag::String(_) => TagType::String,
            Tag::List(_) => TagType::List,
            Tag::Compound(_) => TagType::Compound,
            Tag::IntArray(_) => TagType::IntArray,
            Tag::LongArray(_) => TagType::LongArray,
        }
    }

    pub fn as_i8(&self) -> Option<i8> {
        match self {
            Tag::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Tag::Short(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Tag::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Tag::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Tag::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Tag::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Tag::Compound(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Tag::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_byte_array(&self) -> Option<&[i8]> {
        match self {
            Tag::ByteArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            Tag::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_long_array(&self) -> Option<&[i64]> {
        match self {
            Tag::LongArray(v) => Some(v),
            _ => None,
        }
    }
}

/// A mapping from string keys to tags. Insertion order is irrelevant to
/// semantics (equality ignores it) but is preserved for diagnostics and
/// byte-stable re-encoding.
#[derive(Clone, Debug, Default)]
pub struct Compound {
    entries: Vec<(String, Tag)>,
}

impl Compound {
    pub fn new() -> Compound {
        Compound::default()
    }

    pub fn with_capacity(capacity: usize) -> Compound {
        Compound {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Tag> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Tag> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert a value, replacing (in place) any existing value for the key.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: Tag) -> Option<Tag> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, old)) => Some(std::mem::replace(old, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Tag> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tag)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_byte(&self, key: &str) -> Option<i8> {
        self.get(key)?.as_i8()
    }

    pub fn get_short(&self, key: &str) -> Option<i16> {
        self.get(key)?.as_i16()
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key)?.as_i32()
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_i64()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_compound(&self, key: &str) -> Option<&Compound> {
        self.get(key)?.as_compound()
    }

    pub fn get_list(&self, key: &str) -> Option<&List> {
        self.get(key)?.as_list()
    }

    pub fn get_byte_array(&self, key: &str) -> Option<&[i8]> {
        self.get(key)?.as_byte_array()
    }

    pub fn get_int_array(&self, key: &str) -> Option<&[i32]> {
        self.get(key)?.as_int_array()
    }

    pub fn get_long_array(&self, key: &str) -> Option<&[i64]> {
        self.get(key)?.as_long_array()
    }
}

impl PartialEq for Compound {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl IntoIterator for Compound {
    type Item = (String, Tag);
    type IntoIter = std::vec::IntoIter<(String, Tag)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Tag)> for Compound {
    fn from_iter<I: IntoIterator<Item = (String, Tag)>>(iter: I) -> Compound {
        let mut compound = Compound::new();
        for (k, v) in iter {
            compound.insert(k, v);
        }
        compound
    }
}

/// A homogeneous ordered sequence of tags. The element type is fixed at
/// creation and enforced on insertion; a mismatched push is a programming
/// error, not a recoverable data error.
#[derive(Clone, Debug, PartialEq)]
pub struct List {
    elem: TagType,
    items: Vec<Tag>,
}

impl List {
    pub fn new(elem: TagType) -> List {
        List {
            elem,
            items: Vec::new(),
        }
    }

    pub fn with_capacity(elem: TagType, capacity: usize) -> List {
        List {
            elem,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn elem_type(&self) -> TagType {
        self.elem
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a tag. An empty end-typed list adopts the type of the first
    /// element pushed into it.
    pub fn push(&mut self, tag: Tag) {
        if self.elem == TagType::End && self.items.is_empty() {
            self.elem = tag.tag_type();
        }
        assert_eq!(
            tag.tag_type(),
            self.elem,
            "cannot insert {:?} into a list of {:?}",
            tag.tag_type(),
            self.elem,
        );
        self.items.push(tag);
    }

    pub fn get(&self, index: usize) -> Option<&Tag> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.items.iter()
    }
}

impl IntoIterator for List {
    type Item = Tag;
    type IntoIter = std::vec::IntoIter<Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Compression method flag for region-embedded payloads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Gzip,
    Zlib,
}

impl Method {
    pub fn from_flag(flag: u8) -> Result<Method> {
        match flag {
            1 => Ok(Method::Gzip),
            2 => Ok(Method::Zlib),
            other => Err(Error::format(format!(
                "unsupported compression method: {other}"
            ))),
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            Method::Gzip => 1,
            Method::Zlib => 2,
        }
    }
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| Error::format(format!("invalid UTF-8 in string tag: {e}")))
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::format(format!("string tag too long: {} bytes", s.len())))?;
    writer.write_u16::<BigEndian>(len)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_array_len<R: Read>(reader: &mut R) -> Result<usize> {
    let len = reader.read_i32::<BigEndian>()?;
    usize::try_from(len).map_err(|_| Error::format(format!("negative array length: {len}")))
}

/// Read a named tag: type id, key, payload.
pub fn read_named<R: Read>(reader: &mut R) -> Result<(String, Tag)> {
    let id = reader.read_u8()?;
    let ty = TagType::from_id(id).ok_or_else(|| Error::format(format!("unknown tag type: {id}")))?;
    if ty == TagType::End {
        return Err(Error::format("unexpected end tag at value position"));
    }
    let name = read_string(reader)?;
    let tag = read_payload(reader, ty)?;
    Ok((name, tag))
}

fn read_payload<R: Read>(reader: &mut R, ty: TagType) -> Result<Tag> {
    match ty {
        TagType::End => Err(Error::format("unexpected end tag at value position")),
        TagType::Byte => Ok(Tag::Byte(reader.read_i8()?)),
        TagType::Short => Ok(Tag::Short(reader.read_i16::<BigEndian>()?)),
        TagType::Int => Ok(Tag::Int(reader.read_i32::<BigEndian>()?)),
        TagType::Long => Ok(Tag::Long(reader.read_i64::<BigEndian>()?)),
        TagType::Float => Ok(Tag::Float(reader.read_f32::<BigEndian>()?)),
        TagType::Double => Ok(Tag::Double(reader.read_f64::<BigEndian>()?)),
        TagType::ByteArray => {
            let len = read_array_len(reader)?;
            let mut bytes = Vec::with_capacity(len.min(PREALLOC_LIMIT));
            let read = reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
            if read != len {
                return Err(Error::format("truncated byte array"));
            }
            Ok(Tag::ByteArray(bytes.into_iter().map(|b| b as i8).collect()))
        }
        TagType::String => Ok(Tag::String(read_string(reader)?)),
        TagType::List => {
            let elem_id = reader.read_u8()?;
            let elem = TagType::from_id(elem_id)
                .ok_or_else(|| Error::format(format!("unknown list element type: {elem_id}")))?;
            let len = reader.read_i32::<BigEndian>()?;
            if elem == TagType::End {
                if len > 0 {
                    return Err(Error::format("non-empty list of end tags"));
                }
                return Ok(Tag::List(List::new(TagType::End)));
            }
            let len = usize::try_from(len)
                .map_err(|_| Error::format(format!("negative list length: {len}")))?;
            let mut list = List::with_capacity(elem, len.min(PREALLOC_LIMIT));
            for _ in 0..len {
                list.push(read_payload(reader, elem)?);
            }
            Ok(Tag::List(list))
        }
        TagType::Compound => {
            let mut compound = Compound::new();
            loop {
                let id = reader.read_u8()?;
                let ty = TagType::from_id(id)
                    .ok_or_else(|| Error::format(format!("unknown tag type: {id}")))?;
                if ty == TagType::End {
                    break;
                }
                let name = read_string(reader)?;
                compound.insert(name, read_payload(reader, ty)?);
            }
            Ok(Tag::Compound(compound))
        }
        TagType::IntArray => {
            let len = read_array_len(reader)?;
            let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
            for _ in 0..len {
                values.push(reader.read_i32::<BigEndian>()?);
            }
            Ok(Tag::IntArray(values))
        }
        TagType::LongArray => {
            let len = read_array_len(reader)?;
            let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
            for _ in 0..len {
                values.push(reader.read_i64::<BigEndian>()?);
            }
            Ok(Tag::LongArray(values))
        }
    }
}

/// Write a named tag: type id, key, payload.
pub fn write_named<W: Write>(writer: &mut W, name: &str, tag: &Tag) -> Result<()> {
    writer.write_u8(tag.tag_type().id())?;
    write_string(writer, name)?;
    write_payload(writer, tag)
}

fn write_payload<W: Write>(writer: &mut W, tag: &Tag) -> Result<()> {
    match tag {
        Tag::Byte(v) => writer.write_i8(*v)?,
        Tag::Short(v) => writer.write_i16::<BigEndian>(*v)?,
        Tag::Int(v) => writer.write_i32::<BigEndian>(*v)?,
        Tag::Long(v) => writer.write_i64::<BigEndian>(*v)?,
        Tag::Float(v) => writer.write_f32::<BigEndian>(*v)?,
        Tag::Double(v) => writer.write_f64::<BigEndian>(*v)?,
        Tag::ByteArray(v) => {
            writer.write_i32::<BigEndian>(v.len() as i32)?;
            for &b in v {
                writer.write_i8(b)?;
            }
        }
        Tag::String(v) => write_string(writer, v)?,
        Tag::List(v) => {
            writer.write_u8(v.elem_type().id())?;
            writer.write_i32::<BigEndian>(v.len() as i32)?;
            for item in v.iter() {
                write_payload(writer, item)?;
            }
        }
        Tag::Compound(v) => {
            for (name, tag) in v.iter() {
                write_named(writer, name, tag)?;
            }
            writer.write_u8(TagType::End.id())?;
        }
        Tag::IntArray(v) => {
            writer.write_i32::<BigEndian>(v.len() as i32)?;
            for &i in v {
                writer.write_i32::<BigEndian>(i)?;
            }
        }
        Tag::LongArray(v) => {
            writer.write_i32::<BigEndian>(v.len() as i32)?;
            for &l in v {
                writer.write_i64::<BigEndian>(l)?;
            }
        }
    }
    Ok(())
}

/// Truncation shows up as an unexpected-EOF i/o error; reclassify it as the
/// format error it is when decoding an in-memory payload.
fn reclassify_eof(error: Error) -> Error {
    match error {
        Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Error::format("truncated tag stream")
        }
        other => other,
    }
}

/// Decode a tag tree from uncompressed bytes, stripping the redundant
/// empty-keyed root wrapper.
pub fn from_bytes(data: &[u8]) -> Result<Tag> {
    let mut cursor = io::Cursor::new(data);
    let (_, tag) = read_named(&mut cursor).map_err(reclassify_eof)?;
    Ok(tag)
}

/// Encode a tag tree to uncompressed bytes, re-adding the empty-keyed root
/// wrapper.
pub fn to_bytes(tag: &Tag) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_named(&mut buffer, "", tag)?;
    Ok(buffer)
}

/// Load a standalone (gzip-wrapped) tag tree, e.g. a `.dat` file.
pub fn from_gzip_reader<R: Read>(reader: R) -> Result<Tag> {
    let mut data = Vec::new();
    GzDecoder::new(reader)
        .read_to_end(&mut data)
        .map_err(|e| Error::format(format!("corrupt gzip stream: {e}")))?;
    from_bytes(&data)
}

/// Save a standalone (gzip-wrapped) tag tree.
pub fn to_gzip_writer<W: Write>(writer: W, tag: &Tag) -> Result<()> {
    let mut encoder = GzEncoder::new(writer, Flate2Level::default());
    write_named(&mut encoder, "", tag)?;
    encoder.finish()?;
    Ok(())
}

/// Decompress a region-embedded payload according to its method flag.
pub fn decompress(data: &[u8], method: Method) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let result = match method {
        Method::Gzip => GzDecoder::new(data).read_to_end(&mut out),
        Method::Zlib => ZlibDecoder::new(data).read_to_end(&mut out),
    };
    result.map_err(|e| Error::format(format!("corrupt {method:?} stream: {e}")))?;
    Ok(out)
}

/// Compress a region-embedded payload.
pub fn compress(data: &[u8], method: Method) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match method {
        Method::Gzip => {
            let mut encoder = GzEncoder::new(&mut out, Flate2Level::default());
            encoder.write_all(data)?;
            encoder.finish()?;
        }
        Method::Zlib => {
            let mut encoder = ZlibEncoder::new(&mut out, Flate2Level::default());
            encoder.write_all(data)?;
            encoder.finish()?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Tag {
        let mut pos = List::new(TagType::Double);
        pos.push(Tag::Double(1.5));
        pos.push(Tag::Double(-64.0));
        pos.push(Tag::Double(0.25));

        let mut inner = Compound::new();
        inner.insert("id", Tag::String("minecraft:chest".to_owned()));
        inner.insert("x", Tag::Int(-3));

        let mut root = Compound::new();
        root.insert("DataVersion", Tag::Int(3465));
        root.insert("flag", Tag::Byte(1));
        root.insert("seed", Tag::Long(-4_242_424_242));
        root.insert("scale", Tag::Float(0.5));
        root.insert("Pos", Tag::List(pos));
        root.insert("entity", Tag::Compound(inner));
        root.insert("heights", Tag::LongArray(vec![i64::MIN, 0, i64::MAX]));
        root.insert("biomes", Tag::IntArray(vec![1, 2, 3]));
        root.insert("raw", Tag::ByteArray(vec![-128, 0, 127]));
        Tag::Compound(root)
    }

    #[test]
    fn test_roundtrip() {
        let tree = sample_tree();
        let bytes = to_bytes(&tree).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), tree);
    }

    #[test]
    fn test_compound_equality_ignores_order() {
        let mut a = Compound::new();
        a.insert("x", Tag::Int(1));
        a.insert("y", Tag::Int(2));
        let mut b = Compound::new();
        b.insert("y", Tag::Int(2));
        b.insert("x", Tag::Int(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_compound_preserves_insertion_order() {
        let mut c = Compound::new();
        c.insert("z", Tag::Int(1));
        c.insert("a", Tag::Int(2));
        c.insert("z", Tag::Int(3));
        let keys: Vec<_> = c.iter().map(|(k, _)| k.to_owned()).collect();
        assert_eq!(keys, ["z", "a"]);
        assert_eq!(c.get_int("z"), Some(3));
    }

    #[test]
    fn test_unknown_tag_type_is_format_error() {
        // type id 13 does not exist
        let bytes = [13u8, 0, 0];
        assert!(matches!(from_bytes(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_truncated_stream_is_format_error() {
        let tree = sample_tree();
        let bytes = to_bytes(&tree).unwrap();
        assert!(matches!(
            from_bytes(&bytes[..bytes.len() / 2]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    #[should_panic(expected = "cannot insert")]
    fn test_list_rejects_mismatched_type() {
        let mut list = List::new(TagType::Int);
        list.push(Tag::Int(1));
        list.push(Tag::String("nope".to_owned()));
    }

    #[test]
    fn test_empty_list_adopts_type() {
        let mut list = List::new(TagType::End);
        list.push(Tag::Short(7));
        assert_eq!(list.elem_type(), TagType::Short);
    }

    #[test]
    fn test_gzip_roundtrip_strips_empty_root_key() {
        let tree = sample_tree();
        let mut buffer = Vec::new();
        to_gzip_writer(&mut buffer, &tree).unwrap();
        let loaded = from_gzip_reader(buffer.as_slice()).unwrap();
        assert_eq!(loaded, tree);

        // The root wrapper on the wire is a compound with an empty key
        let mut raw = Vec::new();
        GzDecoder::new(buffer.as_slice())
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(raw[0], TagType::Compound.id());
        assert_eq!(&raw[1..3], &[0, 0]);
    }

    #[test]
    fn test_compressed_payload_roundtrip() {
        let tree = sample_tree();
        let bytes = to_bytes(&tree).unwrap();
        for method in [Method::Gzip, Method::Zlib] {
            let packed = compress(&bytes, method).unwrap();
            assert_eq!(decompress(&packed, method).unwrap(), bytes);
        }
    }

    #[test]
    fn test_method_flags() {
        assert_eq!(Method::from_flag(1).unwrap(), Method::Gzip);
        assert_eq!(Method::from_flag(2).unwrap(), Method::Zlib);
        assert!(matches!(Method::from_flag(3), Err(Error::Format(_))));
        assert_eq!(Method::Zlib.flag(), 2);
    }

    #[test]
    fn test_corrupt_compression_is_format_error() {
        let garbage = [0xDE, 0xAD, 0xBE, 0xEF];
        assert!(matches!(
            decompress(&garbage, Method::Zlib),
            Err(Error::Format(_))
        ));
    }
}
