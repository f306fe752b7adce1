//! AV1 sequence header OBU payload (AV1 bitstream section 5.5).
//!
//! The parser walks the payload in the same order as the bitstream syntax,
//! one section per function, filling a [`SequenceHeader`] as it goes. Every
//! field width is normative. Any rejected branch, or running out of data,
//! yields `None`.

use std::fmt;

use serde::Serialize;

use crate::bit_reader::BitReader;
use crate::obu::{ObuType, parse_obu_header};

pub const MAX_OPERATING_POINTS: usize = 32;

/// `SELECT_SCREEN_CONTENT_TOOLS` / `SELECT_INTEGER_MV`: decided per frame.
pub const ADAPTIVE: u8 = 2;

pub const COLOR_PRIMARIES_BT709: u8 = 1;
pub const COLOR_PRIMARIES_UNSPECIFIED: u8 = 2;
pub const TRANSFER_UNSPECIFIED: u8 = 2;
pub const TRANSFER_SRGB: u8 = 13;
pub const MATRIX_IDENTITY: u8 = 0;
pub const MATRIX_UNSPECIFIED: u8 = 2;

pub const CHROMA_SAMPLE_POSITION_UNKNOWN: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PixelLayout {
    I400,
    I420,
    I422,
    I444,
}

impl PixelLayout {
    fn from_subsampling(subsampling_x: bool, subsampling_y: bool) -> Self {
        match (subsampling_x, subsampling_y) {
            (true, true) => PixelLayout::I420,
            (true, false) => PixelLayout::I422,
            (false, _) => PixelLayout::I444,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelLayout::I400 => "yuv400",
            PixelLayout::I420 => "yuv420",
            PixelLayout::I422 => "yuv422",
            PixelLayout::I444 => "yuv444",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimingInfo {
    pub num_units_in_display_tick: u32,
    pub time_scale: u32,
    /// `num_ticks_per_picture_minus_1 + 1` when pictures are equally spaced.
    pub num_ticks_per_picture: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecoderModelInfo {
    pub buffer_delay_length: u8,
    pub num_units_in_decoding_tick: u32,
    pub buffer_removal_time_length: u8,
    pub frame_presentation_time_length: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperatingParameters {
    pub decoder_buffer_delay: u32,
    pub encoder_buffer_delay: u32,
    pub low_delay_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperatingPoint {
    /// Bit mask of temporal (bits 0..8) and spatial (bits 8..12) layers.
    pub idc: u16,
    pub seq_level_idx: u8,
    pub major_level: u8,
    pub minor_level: u8,
    pub tier: u8,
    pub decoder_model: Option<OperatingParameters>,
    pub initial_display_delay: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorConfig {
    pub bit_depth: u8,
    pub mono_chrome: bool,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub full_range: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub separate_uv_delta_q: bool,
    pub layout: PixelLayout,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            bit_depth: 8,
            mono_chrome: false,
            color_primaries: COLOR_PRIMARIES_UNSPECIFIED,
            transfer_characteristics: TRANSFER_UNSPECIFIED,
            matrix_coefficients: MATRIX_UNSPECIFIED,
            full_range: false,
            subsampling_x: true,
            subsampling_y: true,
            chroma_sample_position: CHROMA_SAMPLE_POSITION_UNKNOWN,
            separate_uv_delta_q: false,
            layout: PixelLayout::I420,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequenceHeader {
    pub profile: u8,
    pub still_picture: bool,
    pub reduced_still_picture_header: bool,
    pub timing_info: Option<TimingInfo>,
    pub decoder_model_info: Option<DecoderModelInfo>,
    pub initial_display_delay_present: bool,
    pub operating_points: Vec<OperatingPoint>,
    pub frame_width_bits: u8,
    pub frame_height_bits: u8,
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    pub frame_id_numbers_present: bool,
    pub delta_frame_id_length: u8,
    pub frame_id_length: u8,
    pub use_128x128_superblock: bool,
    pub enable_filter_intra: bool,
    pub enable_intra_edge_filter: bool,
    pub enable_interintra_compound: bool,
    pub enable_masked_compound: bool,
    pub enable_warped_motion: bool,
    pub enable_dual_filter: bool,
    pub enable_order_hint: bool,
    pub enable_jnt_comp: bool,
    pub enable_ref_frame_mvs: bool,
    /// 0, 1 or [`ADAPTIVE`].
    pub screen_content_tools: u8,
    /// 0, 1 or [`ADAPTIVE`].
    pub force_integer_mv: u8,
    pub order_hint_bits: u8,
    pub enable_superres: bool,
    pub enable_cdef: bool,
    pub enable_restoration: bool,
    pub color: ColorConfig,
    pub film_grain_params_present: bool,
}

/// Parses a sequence header OBU found at `data[offset..limit]`.
///
/// The range starts at the OBU header. Returns `None` if the OBU is not a
/// sequence header or if its payload is rejected.
pub fn parse_sequence_header(data: &[u8], offset: usize, limit: usize) -> Option<SequenceHeader> {
    let header = parse_obu_header(data, offset, limit)?;
    if header.obu_type != ObuType::SequenceHeader {
        return None;
    }
    let end = header.end_offset.map_or(limit, |end| end.min(limit));
    let mut reader = BitReader::with_range(data, header.payload_offset(), end);
    SequenceHeader::parse_payload(&mut reader)
}

impl SequenceHeader {
    /// Parses a sequence header payload starting at the reader's position.
    pub fn parse_payload(reader: &mut BitReader<'_>) -> Option<SequenceHeader> {
        let mut seq = SequenceHeader::default();
        seq.read_prefix(reader)?;
        if seq.reduced_still_picture_header {
            seq.read_reduced_operating_point(reader)?;
        } else {
            seq.read_timing_and_decoder_model(reader)?;
            seq.read_operating_points(reader)?;
        }
        seq.read_frame_size(reader)?;
        seq.read_frame_ids(reader)?;
        seq.read_coding_tools(reader)?;
        seq.read_color_config(reader)?;
        seq.film_grain_params_present = reader.try_read_flag()?;
        Some(seq)
    }

    fn read_prefix(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        self.profile = r.try_read_bits(3)? as u8;
        if self.profile > 2 {
            return None;
        }
        self.still_picture = r.try_read_flag()?;
        self.reduced_still_picture_header = r.try_read_flag()?;
        if self.reduced_still_picture_header && !self.still_picture {
            return None;
        }
        Some(())
    }

    fn read_reduced_operating_point(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        let seq_level_idx = r.try_read_bits(5)? as u8;
        self.operating_points.push(OperatingPoint {
            idc: 0,
            seq_level_idx,
            major_level: 2 + (seq_level_idx >> 2),
            minor_level: seq_level_idx & 3,
            tier: 0,
            decoder_model: None,
            initial_display_delay: None,
        });
        Some(())
    }

    fn read_timing_and_decoder_model(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        if !r.try_read_flag()? {
            return Some(());
        }
        let num_units_in_display_tick = r.try_read_bits(32)?;
        let time_scale = r.try_read_bits(32)?;
        let num_ticks_per_picture = if r.try_read_flag()? {
            let minus_1 = r.read_uvlc()?;
            if minus_1 == u32::MAX {
                return None;
            }
            Some(minus_1 + 1)
        } else {
            None
        };
        self.timing_info = Some(TimingInfo {
            num_units_in_display_tick,
            time_scale,
            num_ticks_per_picture,
        });

        if r.try_read_flag()? {
            let buffer_delay_length = r.try_read_bits(5)? as u8 + 1;
            let num_units_in_decoding_tick = r.try_read_bits(32)?;
            let buffer_removal_time_length = r.try_read_bits(5)? as u8 + 1;
            let frame_presentation_time_length = r.try_read_bits(5)? as u8 + 1;
            self.decoder_model_info = Some(DecoderModelInfo {
                buffer_delay_length,
                num_units_in_decoding_tick,
                buffer_removal_time_length,
                frame_presentation_time_length,
            });
        }
        Some(())
    }

    fn read_operating_points(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        self.initial_display_delay_present = r.try_read_flag()?;
        let count = r.try_read_bits(5)? as usize + 1;
        if count > MAX_OPERATING_POINTS {
            return None;
        }
        for _ in 0..count {
            let idc = r.try_read_bits(12)? as u16;
            let seq_level_idx = r.try_read_bits(5)? as u8;
            let major_level = 2 + (seq_level_idx >> 2);
            let minor_level = seq_level_idx & 3;
            let tier = if major_level > 3 {
                r.try_read_bits(1)? as u8
            } else {
                0
            };

            let mut decoder_model = None;
            if let Some(info) = self.decoder_model_info {
                if r.try_read_flag()? {
                    let n = u32::from(info.buffer_delay_length);
                    decoder_model = Some(OperatingParameters {
                        decoder_buffer_delay: r.try_read_bits(n)?,
                        encoder_buffer_delay: r.try_read_bits(n)?,
                        low_delay_mode: r.try_read_flag()?,
                    });
                }
            }

            let mut initial_display_delay = None;
            if self.initial_display_delay_present && r.try_read_flag()? {
                initial_display_delay = Some(r.try_read_bits(4)? as u8 + 1);
            }

            self.operating_points.push(OperatingPoint {
                idc,
                seq_level_idx,
                major_level,
                minor_level,
                tier,
                decoder_model,
                initial_display_delay,
            });
        }
        Some(())
    }

    fn read_frame_size(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        self.frame_width_bits = r.try_read_bits(4)? as u8 + 1;
        self.frame_height_bits = r.try_read_bits(4)? as u8 + 1;
        self.max_frame_width = r.try_read_bits(u32::from(self.frame_width_bits))? + 1;
        self.max_frame_height = r.try_read_bits(u32::from(self.frame_height_bits))? + 1;
        Some(())
    }

    fn read_frame_ids(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        if self.reduced_still_picture_header {
            return Some(());
        }
        self.frame_id_numbers_present = r.try_read_flag()?;
        if self.frame_id_numbers_present {
            self.delta_frame_id_length = r.try_read_bits(4)? as u8 + 2;
            self.frame_id_length = r.try_read_bits(3)? as u8 + self.delta_frame_id_length + 1;
        }
        Some(())
    }

    fn read_coding_tools(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        self.use_128x128_superblock = r.try_read_flag()?;
        self.enable_filter_intra = r.try_read_flag()?;
        self.enable_intra_edge_filter = r.try_read_flag()?;

        if self.reduced_still_picture_header {
            self.screen_content_tools = ADAPTIVE;
            self.force_integer_mv = ADAPTIVE;
        } else {
            self.enable_interintra_compound = r.try_read_flag()?;
            self.enable_masked_compound = r.try_read_flag()?;
            self.enable_warped_motion = r.try_read_flag()?;
            self.enable_dual_filter = r.try_read_flag()?;
            self.enable_order_hint = r.try_read_flag()?;
            if self.enable_order_hint {
                self.enable_jnt_comp = r.try_read_flag()?;
                self.enable_ref_frame_mvs = r.try_read_flag()?;
            }
            self.screen_content_tools = read_tri_state(r)?;
            self.force_integer_mv = if self.screen_content_tools > 0 {
                read_tri_state(r)?
            } else {
                ADAPTIVE
            };
            if self.enable_order_hint {
                self.order_hint_bits = r.try_read_bits(3)? as u8 + 1;
            }
        }

        self.enable_superres = r.try_read_flag()?;
        self.enable_cdef = r.try_read_flag()?;
        self.enable_restoration = r.try_read_flag()?;
        Some(())
    }

    fn read_color_config(&mut self, r: &mut BitReader<'_>) -> Option<()> {
        let color = &mut self.color;
        let high_bitdepth = r.try_read_flag()?;
        color.bit_depth = if !high_bitdepth {
            8
        } else if self.profile == 2 && r.try_read_flag()? {
            12
        } else {
            10
        };
        color.mono_chrome = if self.profile == 1 {
            false
        } else {
            r.try_read_flag()?
        };

        if r.try_read_flag()? {
            color.color_primaries = r.try_read_bits(8)? as u8;
            color.transfer_characteristics = r.try_read_bits(8)? as u8;
            color.matrix_coefficients = r.try_read_bits(8)? as u8;
        }

        if color.mono_chrome {
            color.full_range = r.try_read_flag()?;
            color.subsampling_x = true;
            color.subsampling_y = true;
            color.layout = PixelLayout::I400;
            return Some(());
        }

        if color.color_primaries == COLOR_PRIMARIES_BT709
            && color.transfer_characteristics == TRANSFER_SRGB
            && color.matrix_coefficients == MATRIX_IDENTITY
        {
            // sRGB is 4:4:4 only: profile 1, or profile 2 at 12 bits.
            if self.profile != 1 && !(self.profile == 2 && color.bit_depth == 12) {
                return None;
            }
            color.full_range = true;
            color.subsampling_x = false;
            color.subsampling_y = false;
        } else {
            color.full_range = r.try_read_flag()?;
            match self.profile {
                0 => {
                    color.subsampling_x = true;
                    color.subsampling_y = true;
                }
                1 => {
                    color.subsampling_x = false;
                    color.subsampling_y = false;
                }
                _ if color.bit_depth == 12 => {
                    color.subsampling_x = r.try_read_flag()?;
                    color.subsampling_y = if color.subsampling_x {
                        r.try_read_flag()?
                    } else {
                        false
                    };
                }
                _ => {
                    color.subsampling_x = true;
                    color.subsampling_y = false;
                }
            }
            if color.subsampling_x && color.subsampling_y {
                color.chroma_sample_position = r.try_read_bits(2)? as u8;
            }
        }
        color.layout = PixelLayout::from_subsampling(color.subsampling_x, color.subsampling_y);
        color.separate_uv_delta_q = r.try_read_flag()?;
        Some(())
    }

    pub fn width(&self) -> u32 {
        self.max_frame_width
    }

    pub fn height(&self) -> u32 {
        self.max_frame_height
    }

    pub fn bit_depth(&self) -> u8 {
        self.color.bit_depth
    }

    /// `major * 10 + minor` of the first operating point, e.g. 40 for 4.0.
    pub fn level_idc(&self) -> u32 {
        self.operating_points
            .first()
            .map_or(0, |op| u32::from(op.major_level) * 10 + u32::from(op.minor_level))
    }

    /// Codec string as used by ISO-BMFF and MSE, e.g. `av01.0.08M.08`.
    pub fn codec_string(&self) -> String {
        let (level, tier) = self
            .operating_points
            .first()
            .map_or((0, 0), |op| (op.seq_level_idx, op.tier));
        format!(
            "av01.{}.{:02}{}.{:02}",
            self.profile,
            level,
            if tier == 0 { 'M' } else { 'H' },
            self.color.bit_depth
        )
    }

    /// Frame rate implied by constant-interval timing info.
    pub fn frame_rate(&self) -> Option<f64> {
        let timing = self.timing_info?;
        let ticks = timing.num_ticks_per_picture?;
        if timing.num_units_in_display_tick == 0 {
            return None;
        }
        Some(
            f64::from(timing.time_scale)
                / (f64::from(timing.num_units_in_display_tick) * f64::from(ticks)),
        )
    }
}

/// `seq_choose_*` flag followed, when clear, by the forced value.
fn read_tri_state(r: &mut BitReader<'_>) -> Option<u8> {
    if r.try_read_flag()? {
        Some(ADAPTIVE)
    } else {
        Some(r.try_read_bits(1)? as u8)
    }
}

impl fmt::Display for SequenceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[SEQUENCE_HEADER]")?;
        writeln!(f, "codec_string={}", self.codec_string())?;
        writeln!(f, "profile={}", self.profile)?;
        writeln!(f, "still_picture={}", self.still_picture as u8)?;
        writeln!(
            f,
            "reduced_still_picture_header={}",
            self.reduced_still_picture_header as u8
        )?;
        writeln!(f, "width={}", self.max_frame_width)?;
        writeln!(f, "height={}", self.max_frame_height)?;
        writeln!(f, "bit_depth={}", self.color.bit_depth)?;
        writeln!(f, "pix_layout={}", self.color.layout.name())?;
        writeln!(f, "color_primaries={}", self.color.color_primaries)?;
        writeln!(f, "color_transfer={}", self.color.transfer_characteristics)?;
        writeln!(f, "color_matrix={}", self.color.matrix_coefficients)?;
        writeln!(
            f,
            "color_range={}",
            if self.color.full_range { "pc" } else { "tv" }
        )?;
        match self.frame_rate() {
            Some(rate) => writeln!(f, "frame_rate={:.3}", rate)?,
            None => writeln!(f, "frame_rate=N/A")?,
        }
        writeln!(f, "level_idc={}", self.level_idc())?;
        writeln!(f, "nb_operating_points={}", self.operating_points.len())?;
        writeln!(f, "film_grain={}", self.film_grain_params_present as u8)?;
        writeln!(f, "[/SEQUENCE_HEADER]")
    }
}

#[cfg(test)]
#[path = "sequence_header_test.rs"]
mod sequence_header_test;
