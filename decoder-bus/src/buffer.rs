use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use bytes::BytesMut;

use crate::frame_header::FrameType;
use crate::sequence_header::PixelLayout;

/// Flags carried by pipeline buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 2);
    pub const DECODE_ONLY: BufferFlags = BufferFlags(1 << 31);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

/// Common behaviour of every buffer handed around by the engine.
pub trait DecoderBuffer: Send + 'static {
    fn flags(&self) -> BufferFlags;

    fn add_flag(&mut self, flag: BufferFlags);

    /// Resets content and flags so the buffer can be reused.
    fn clear(&mut self);

    fn is_end_of_stream(&self) -> bool {
        self.flags().contains(BufferFlags::END_OF_STREAM)
    }

    fn is_decode_only(&self) -> bool {
        self.flags().contains(BufferFlags::DECODE_ONLY)
    }

    fn is_key_frame(&self) -> bool {
        self.flags().contains(BufferFlags::KEY_FRAME)
    }
}

pub trait InputBuffer: DecoderBuffer {
    /// Makes sure at least `size` bytes can be written without reallocating.
    fn ensure_space_for_write(&mut self, _size: usize) {}
}

pub trait OutputBuffer: DecoderBuffer {
    fn skipped_output_buffer_count(&self) -> u32;

    fn set_skipped_output_buffer_count(&mut self, count: u32);
}

/// Compressed access unit handed to the decoder.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    pub data: BytesMut,
    pub time_us: i64,
    flags: BufferFlags,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Replaces the payload with `data`.
    pub fn fill(&mut self, data: &[u8], time_us: i64) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.time_us = time_us;
    }
}

impl DecoderBuffer for PacketBuffer {
    fn flags(&self) -> BufferFlags {
        self.flags
    }

    fn add_flag(&mut self, flag: BufferFlags) {
        self.flags |= flag;
    }

    fn clear(&mut self) {
        self.data.clear();
        self.time_us = 0;
        self.flags = BufferFlags::NONE;
    }
}

impl InputBuffer for PacketBuffer {
    fn ensure_space_for_write(&mut self, size: usize) {
        let len = self.data.len();
        self.data.reserve(size.saturating_sub(len));
    }
}

/// Decoded picture, or the metadata of one when the hook does not produce pixels.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pub data: BytesMut,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub layout: Option<PixelLayout>,
    pub frame_type: Option<FrameType>,
    pub time_us: i64,
    flags: BufferFlags,
    skipped_output_buffer_count: u32,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecoderBuffer for FrameBuffer {
    fn flags(&self) -> BufferFlags {
        self.flags
    }

    fn add_flag(&mut self, flag: BufferFlags) {
        self.flags |= flag;
    }

    fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
        self.bit_depth = 0;
        self.layout = None;
        self.frame_type = None;
        self.time_us = 0;
        self.flags = BufferFlags::NONE;
        self.skipped_output_buffer_count = 0;
    }
}

impl OutputBuffer for FrameBuffer {
    fn skipped_output_buffer_count(&self) -> u32 {
        self.skipped_output_buffer_count
    }

    fn set_skipped_output_buffer_count(&mut self, count: u32) {
        self.skipped_output_buffer_count = count;
    }
}

impl fmt::Display for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}x{} depth={} time_us={} flags={:#x} skipped={}",
            self.width,
            self.height,
            self.bit_depth,
            self.time_us,
            self.flags.bits(),
            self.skipped_output_buffer_count
        )
    }
}
