use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::buffer::{DecoderBuffer, FrameBuffer, OutputBuffer};
use crate::frame_header::FrameType;
use crate::hook::DecodeError;
use crate::sequence_header::PixelLayout;

pub type FrameSender = tokio::sync::broadcast::Sender<FrameCmd>;
pub type FrameReceiver = tokio::sync::broadcast::Receiver<FrameCmd>;

#[derive(Debug, Clone)]
pub enum FrameCmd {
    Data(DecodedFrame),
    /// The engine stopped on this error; `EOF` follows.
    Error(DecodeError),
    EOF,
}

/// Owned copy of a delivered output buffer, cheap to clone across
/// subscribers.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub layout: Option<PixelLayout>,
    pub frame_type: Option<FrameType>,
    pub time_us: i64,
    pub is_key: bool,
    /// Decode-only buffers dropped right before this one.
    pub skipped: u32,
}

impl From<&FrameBuffer> for DecodedFrame {
    fn from(buffer: &FrameBuffer) -> Self {
        Self {
            data: Bytes::copy_from_slice(&buffer.data),
            width: buffer.width,
            height: buffer.height,
            bit_depth: buffer.bit_depth,
            layout: buffer.layout,
            frame_type: buffer.frame_type,
            time_us: buffer.time_us,
            is_key: buffer.is_key_frame(),
            skipped: buffer.skipped_output_buffer_count(),
        }
    }
}

impl Display for DecodedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "DecodedFrame data_len: {}, width: {}, height: {}, bit_depth: {}, layout: {}, type: {}, time_us: {}, is_key: {}, skipped: {}",
            self.data.len(),
            self.width,
            self.height,
            self.bit_depth,
            self.layout.map_or("unknown", PixelLayout::name),
            self.frame_type.map_or("unknown", FrameType::name),
            self.time_us,
            self.is_key,
            self.skipped
        )
    }
}
