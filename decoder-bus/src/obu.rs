//! AV1 Open Bitstream Unit headers.

use std::fmt;

use serde::Serialize;

use crate::bit_reader::BitReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ObuType {
    SequenceHeader,
    TemporalDelimiter,
    FrameHeader,
    TileGroup,
    Metadata,
    Frame,
    RedundantFrameHeader,
    TileList,
    Padding,
    Reserved(u8),
}

impl ObuType {
    /// Maps the 4-bit `obu_type` field. Values above 15 are not OBU types.
    pub fn from_raw(value: u8) -> Option<ObuType> {
        let obu_type = match value {
            1 => ObuType::SequenceHeader,
            2 => ObuType::TemporalDelimiter,
            3 => ObuType::FrameHeader,
            4 => ObuType::TileGroup,
            5 => ObuType::Metadata,
            6 => ObuType::Frame,
            7 => ObuType::RedundantFrameHeader,
            8 => ObuType::TileList,
            15 => ObuType::Padding,
            0 | 9..=14 => ObuType::Reserved(value),
            _ => return None,
        };
        Some(obu_type)
    }

    pub fn raw(self) -> u8 {
        match self {
            ObuType::SequenceHeader => 1,
            ObuType::TemporalDelimiter => 2,
            ObuType::FrameHeader => 3,
            ObuType::TileGroup => 4,
            ObuType::Metadata => 5,
            ObuType::Frame => 6,
            ObuType::RedundantFrameHeader => 7,
            ObuType::TileList => 8,
            ObuType::Padding => 15,
            ObuType::Reserved(value) => value,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObuType::SequenceHeader => "sequence_header",
            ObuType::TemporalDelimiter => "temporal_delimiter",
            ObuType::FrameHeader => "frame_header",
            ObuType::TileGroup => "tile_group",
            ObuType::Metadata => "metadata",
            ObuType::Frame => "frame",
            ObuType::RedundantFrameHeader => "redundant_frame_header",
            ObuType::TileList => "tile_list",
            ObuType::Padding => "padding",
            ObuType::Reserved(_) => "reserved",
        }
    }
}

impl fmt::Display for ObuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObuType::Reserved(value) => write!(f, "reserved({})", value),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObuHeader {
    pub obu_type: ObuType,
    pub has_extension: bool,
    pub has_size_field: bool,
    pub temporal_id: u8,
    pub spatial_id: u8,
    /// Offset of the first header byte.
    pub start_offset: usize,
    /// Header bytes, including the extension and the size field.
    pub header_size: usize,
    /// Payload length from the size field.
    pub payload_size: Option<usize>,
    /// Absolute offset one past the payload, when the size field is present.
    pub end_offset: Option<usize>,
}

impl ObuHeader {
    pub fn payload_offset(&self) -> usize {
        self.start_offset + self.header_size
    }
}

/// Parses the OBU header at `data[start..end]`.
///
/// Returns `None` for an empty range, an out-of-range type, a truncated
/// header or an unreadable size field. Never panics on malformed input.
pub fn parse_obu_header(data: &[u8], start: usize, end: usize) -> Option<ObuHeader> {
    if start >= end || start >= data.len() {
        return None;
    }
    let mut reader = BitReader::with_range(data, start, end);
    reader.try_skip_bits(1)?;
    let obu_type = ObuType::from_raw(reader.try_read_bits(4)? as u8)?;
    let has_extension = reader.try_read_flag()?;
    let has_size_field = reader.try_read_flag()?;
    reader.try_skip_bits(1)?;

    let (mut temporal_id, mut spatial_id) = (0, 0);
    if has_extension {
        temporal_id = reader.try_read_bits(3)? as u8;
        spatial_id = reader.try_read_bits(2)? as u8;
        reader.try_skip_bits(3)?;
    }

    let payload_size = if has_size_field {
        Some(usize::try_from(reader.read_uleb128()?).ok()?)
    } else {
        None
    };
    let header_size = reader.byte_position() - start;
    let end_offset = match payload_size {
        Some(size) => Some(start.checked_add(header_size)?.checked_add(size)?),
        None => None,
    };

    Some(ObuHeader {
        obu_type,
        has_extension,
        has_size_field,
        temporal_id,
        spatial_id,
        start_offset: start,
        header_size,
        payload_size,
        end_offset,
    })
}

/// One complete OBU borrowed from a larger buffer.
#[derive(Debug, Clone, Copy)]
pub struct Obu<'a> {
    pub header: ObuHeader,
    /// Header and payload.
    pub data: &'a [u8],
    pub payload: &'a [u8],
}

/// Iterates the OBUs of a low-overhead bitstream.
///
/// An OBU without a size field runs to the end of the buffer. Iteration
/// stops at the first header that fails to parse or whose payload would run
/// past the buffer; [`ObuIter::offset`] then tells where.
pub struct ObuIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ObuIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Offset of the first byte not yet returned.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_finished(&self) -> bool {
        self.offset >= self.data.len()
    }
}

impl<'a> Iterator for ObuIter<'a> {
    type Item = Obu<'a>;

    fn next(&mut self) -> Option<Obu<'a>> {
        let header = parse_obu_header(self.data, self.offset, self.data.len())?;
        let end = header.end_offset.unwrap_or(self.data.len());
        if end > self.data.len() {
            return None;
        }
        let obu = Obu {
            header,
            data: &self.data[self.offset..end],
            payload: &self.data[header.payload_offset()..end],
        };
        self.offset = end;
        Some(obu)
    }
}
