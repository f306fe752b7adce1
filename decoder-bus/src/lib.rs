//! AV1 bitstream parsing and a threaded, buffer-pooled decode engine.

/// Registers FFmpeg components. Call once at startup before creating an
/// [`ffmpeg::FfmpegHook`].
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod bit_reader;
pub mod buffer;
pub mod engine;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod frame_header;
pub mod hook;
pub mod inspect;
pub mod metadata;
pub mod obu;
pub mod packet;
pub mod pool;
pub mod sequence_header;
pub mod task;
pub mod temporal_unit;

#[cfg(test)]
mod test_util;

pub use engine::{DecodeEngine, EngineConfig};
pub use hook::{DecodeError, DecodeHook};
pub use metadata::probe;
pub use task::DecoderTask;
