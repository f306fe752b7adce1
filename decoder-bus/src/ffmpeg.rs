//! AV1 decode hook backed by FFmpeg.
//!
//! Hardware decoders are tried first, then dav1d and libaom, then FFmpeg's
//! native AV1 decoder.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::error::EAGAIN;

use crate::buffer::{BufferFlags, DecoderBuffer, FrameBuffer, PacketBuffer};
use crate::frame_header::FrameType;
use crate::hook::{DecodeError, DecodeFault, DecodeHook, FrameStatus, SendStatus};
use crate::sequence_header::PixelLayout;

const HW_DECODERS: &[&str] = &["av1_cuvid", "av1_qsv"];
const SW_DECODERS: &[&str] = &["libdav1d", "libaom-av1"];

/// Finds an AV1 decoder, honouring `preferred` when it names one.
pub fn find_av1_decoder(preferred: Option<&str>) -> Option<ffmpeg_next::Codec> {
    if let Some(name) = preferred {
        match ffmpeg_next::decoder::find_by_name(name) {
            Some(codec) => return Some(codec),
            None => log::warn!("decoder {} not available, falling back", name),
        }
    }
    for name in HW_DECODERS {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    for name in SW_DECODERS {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found software decoder: {}", name);
            return Some(codec);
        }
    }
    ffmpeg_next::decoder::find(ffmpeg_next::codec::Id::AV1)
}

/// Layout and bit depth of the formats AV1 decoders produce.
fn pixel_info(format: Pixel) -> Option<(PixelLayout, u8)> {
    let info = match format {
        Pixel::GRAY8 => (PixelLayout::I400, 8),
        Pixel::GRAY10LE => (PixelLayout::I400, 10),
        Pixel::GRAY12LE => (PixelLayout::I400, 12),
        Pixel::YUV420P | Pixel::NV12 => (PixelLayout::I420, 8),
        Pixel::YUV420P10LE | Pixel::P010LE => (PixelLayout::I420, 10),
        Pixel::YUV420P12LE => (PixelLayout::I420, 12),
        Pixel::YUV422P => (PixelLayout::I422, 8),
        Pixel::YUV422P10LE => (PixelLayout::I422, 10),
        Pixel::YUV422P12LE => (PixelLayout::I422, 12),
        Pixel::YUV444P => (PixelLayout::I444, 8),
        Pixel::YUV444P10LE => (PixelLayout::I444, 10),
        Pixel::YUV444P12LE => (PixelLayout::I444, 12),
        _ => return None,
    };
    Some(info)
}

fn is_eagain(err: &ffmpeg_next::Error) -> bool {
    matches!(err, ffmpeg_next::Error::Other { errno } if *errno == EAGAIN)
}

pub struct FfmpegHook {
    decoder: ffmpeg_next::codec::decoder::Video,
    codec_name: String,
    eof_sent: bool,
}

impl FfmpegHook {
    pub fn new(preferred: Option<&str>) -> anyhow::Result<Self> {
        crate::init()?;
        let codec = find_av1_decoder(preferred).ok_or(anyhow::anyhow!("no AV1 decoder found"))?;
        let codec_name = codec.name().to_string();
        let decoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .decoder()
            .open_as(codec)?
            .video()?;
        log::info!("using decoder {}", codec_name);
        Ok(Self {
            decoder,
            codec_name,
            eof_sent: false,
        })
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    fn copy_frame(
        frame: &ffmpeg_next::frame::Video,
        output: &mut FrameBuffer,
    ) -> Result<(), DecodeError> {
        let (layout, bit_depth) = pixel_info(frame.format()).ok_or_else(|| {
            DecodeError::new(
                "ffmpeg",
                format!("unsupported pixel format {:?}", frame.format()),
            )
        })?;
        let sample_bytes = if bit_depth > 8 { 2 } else { 1 };
        // semi-planar formats carry U and V interleaved in plane 1
        let semi_planar = matches!(frame.format(), Pixel::NV12 | Pixel::P010LE);
        output.data.clear();
        for plane in 0..frame.planes() {
            let data = frame.data(plane);
            let stride = frame.stride(plane);
            let components = if semi_planar && plane == 1 { 2 } else { 1 };
            let row_bytes =
                (frame.plane_width(plane) as usize * sample_bytes * components).min(stride);
            for row in 0..frame.plane_height(plane) as usize {
                let start = row * stride;
                output.data.extend_from_slice(&data[start..start + row_bytes]);
            }
        }
        output.width = frame.width();
        output.height = frame.height();
        output.bit_depth = bit_depth;
        output.layout = Some(layout);
        output.time_us = frame.timestamp().or(frame.pts()).unwrap_or(0);
        if frame.is_key() {
            output.frame_type = Some(FrameType::Key);
            output.add_flag(BufferFlags::KEY_FRAME);
        }
        Ok(())
    }
}

impl DecodeHook for FfmpegHook {
    type Input = PacketBuffer;
    type Output = FrameBuffer;
    type Error = DecodeError;

    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn create_input(&mut self) -> PacketBuffer {
        PacketBuffer::new()
    }

    fn create_output(&mut self) -> FrameBuffer {
        FrameBuffer::new()
    }

    fn send_data(&mut self, input: &mut PacketBuffer, reset: bool) -> Result<SendStatus, DecodeError> {
        if reset {
            self.decoder.flush();
            self.eof_sent = false;
        }
        let mut packet = ffmpeg_next::Packet::copy(&input.data);
        packet.set_pts(Some(input.time_us));
        packet.set_dts(Some(input.time_us));
        match self.decoder.send_packet(&packet) {
            Ok(()) => Ok(SendStatus::Ok),
            Err(err) if is_eagain(&err) => Ok(SendStatus::NeedResend),
            Err(err) => Err(DecodeError::new("ffmpeg", err)),
        }
    }

    fn get_frame(
        &mut self,
        output: &mut FrameBuffer,
        _decode_only: bool,
        flushing: bool,
    ) -> Result<FrameStatus, DecodeError> {
        if flushing && !self.eof_sent {
            self.decoder
                .send_eof()
                .map_err(|err| DecodeError::new("ffmpeg", err))?;
            self.eof_sent = true;
        }
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                Self::copy_frame(&frame, output)?;
                Ok(FrameStatus::Ok)
            }
            Err(err) if matches!(err, ffmpeg_next::Error::Eof) || is_eagain(&err) => {
                if flushing {
                    // drained; reopen for input that follows end of stream
                    self.decoder.flush();
                    self.eof_sent = false;
                }
                Ok(FrameStatus::NotYetAvailable)
            }
            Err(err) => Err(DecodeError::new("ffmpeg", err)),
        }
    }

    fn map_error(&self, fault: DecodeFault) -> DecodeError {
        fault.into()
    }
}
