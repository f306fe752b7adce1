//! Leading fields of the AV1 uncompressed frame header.
//!
//! Only the prefix needed to classify a frame is parsed: whether it is shown,
//! its type, and whether it is a random access point.

use serde::Serialize;

use crate::bit_reader::BitReader;
use crate::obu::ObuHeader;
use crate::sequence_header::{ADAPTIVE, SequenceHeader};

pub const PRIMARY_REF_NONE: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameType {
    Key,
    Inter,
    IntraOnly,
    Switch,
}

impl FrameType {
    fn from_raw(value: u32) -> FrameType {
        match value {
            0 => FrameType::Key,
            1 => FrameType::Inter,
            2 => FrameType::IntraOnly,
            _ => FrameType::Switch,
        }
    }

    pub fn is_intra(self) -> bool {
        matches!(self, FrameType::Key | FrameType::IntraOnly)
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Key => "key",
            FrameType::Inter => "inter",
            FrameType::IntraOnly => "intra_only",
            FrameType::Switch => "switch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeaderInfo {
    pub show_existing_frame: bool,
    /// Slot shown when `show_existing_frame` is set.
    pub frame_to_show_map_idx: Option<u8>,
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub showable_frame: bool,
    pub error_resilient_mode: bool,
    pub disable_cdf_update: bool,
    pub allow_screen_content_tools: bool,
    pub force_integer_mv: bool,
    pub current_frame_id: Option<u32>,
    pub frame_size_override: bool,
    pub order_hint: u32,
    pub primary_ref_frame: u8,
}

impl FrameHeaderInfo {
    /// A shown key frame starts a new coded video sequence.
    pub fn is_random_access_point(&self) -> bool {
        !self.show_existing_frame && self.frame_type == FrameType::Key && self.show_frame
    }

    /// Whether decoding this header produces a picture for display.
    pub fn is_displayed(&self) -> bool {
        self.show_existing_frame || self.show_frame
    }

    /// Parses the header prefix at the reader's position. `obu` is the
    /// header of the frame or frame header OBU carrying it, used for the
    /// operating point layer checks.
    pub fn parse(
        r: &mut BitReader<'_>,
        seq: &SequenceHeader,
        obu: &ObuHeader,
    ) -> Option<FrameHeaderInfo> {
        let equal_picture_interval = seq
            .timing_info
            .is_some_and(|timing| timing.num_ticks_per_picture.is_some());
        let presentation_time_bits = seq
            .decoder_model_info
            .filter(|_| !equal_picture_interval)
            .map(|model| u32::from(model.frame_presentation_time_length));

        if seq.reduced_still_picture_header {
            return Self::parse_after_type(r, seq, obu, FrameType::Key, true, false);
        }

        if r.try_read_flag()? {
            let frame_to_show_map_idx = r.try_read_bits(3)? as u8;
            if let Some(bits) = presentation_time_bits {
                r.try_skip_bits(bits as usize)?;
            }
            let current_frame_id = if seq.frame_id_numbers_present {
                Some(r.try_read_bits(u32::from(seq.frame_id_length))?)
            } else {
                None
            };
            return Some(FrameHeaderInfo {
                show_existing_frame: true,
                frame_to_show_map_idx: Some(frame_to_show_map_idx),
                frame_type: FrameType::Inter,
                show_frame: true,
                showable_frame: false,
                error_resilient_mode: false,
                disable_cdf_update: false,
                allow_screen_content_tools: false,
                force_integer_mv: false,
                current_frame_id,
                frame_size_override: false,
                order_hint: 0,
                primary_ref_frame: PRIMARY_REF_NONE,
            });
        }

        let frame_type = FrameType::from_raw(r.try_read_bits(2)?);
        let show_frame = r.try_read_flag()?;
        if show_frame {
            if let Some(bits) = presentation_time_bits {
                r.try_skip_bits(bits as usize)?;
            }
        }
        let showable_frame = if show_frame {
            frame_type != FrameType::Key
        } else {
            r.try_read_flag()?
        };
        Self::parse_after_type(r, seq, obu, frame_type, show_frame, showable_frame)
    }

    fn parse_after_type(
        r: &mut BitReader<'_>,
        seq: &SequenceHeader,
        obu: &ObuHeader,
        frame_type: FrameType,
        show_frame: bool,
        showable_frame: bool,
    ) -> Option<FrameHeaderInfo> {
        let error_resilient_mode = if seq.reduced_still_picture_header
            || frame_type == FrameType::Switch
            || (frame_type == FrameType::Key && show_frame)
        {
            true
        } else {
            r.try_read_flag()?
        };
        let disable_cdf_update = r.try_read_flag()?;

        let allow_screen_content_tools = if seq.screen_content_tools == ADAPTIVE {
            r.try_read_flag()?
        } else {
            seq.screen_content_tools == 1
        };
        let mut force_integer_mv = if !allow_screen_content_tools {
            false
        } else if seq.force_integer_mv == ADAPTIVE {
            r.try_read_flag()?
        } else {
            seq.force_integer_mv == 1
        };
        if frame_type.is_intra() {
            force_integer_mv = true;
        }

        let current_frame_id = if seq.frame_id_numbers_present {
            Some(r.try_read_bits(u32::from(seq.frame_id_length))?)
        } else {
            None
        };

        let frame_size_override = if frame_type == FrameType::Switch {
            true
        } else if seq.reduced_still_picture_header {
            false
        } else {
            r.try_read_flag()?
        };

        let order_hint = if seq.order_hint_bits > 0 {
            r.try_read_bits(u32::from(seq.order_hint_bits))?
        } else {
            0
        };

        let primary_ref_frame = if frame_type.is_intra() || error_resilient_mode {
            PRIMARY_REF_NONE
        } else {
            r.try_read_bits(3)? as u8
        };

        if let Some(model) = seq.decoder_model_info {
            if r.try_read_flag()? {
                for op in &seq.operating_points {
                    if op.decoder_model.is_none() {
                        continue;
                    }
                    let in_temporal_layer = (op.idc >> obu.temporal_id) & 1 == 1;
                    let in_spatial_layer = (op.idc >> (obu.spatial_id + 8)) & 1 == 1;
                    if op.idc == 0 || (in_temporal_layer && in_spatial_layer) {
                        r.try_skip_bits(usize::from(model.buffer_removal_time_length))?;
                    }
                }
            }
        }

        Some(FrameHeaderInfo {
            show_existing_frame: false,
            frame_to_show_map_idx: None,
            frame_type,
            show_frame,
            showable_frame,
            error_resilient_mode,
            disable_cdf_update,
            allow_screen_content_tools,
            force_integer_mv,
            current_frame_id,
            frame_size_override,
            order_hint,
            primary_ref_frame,
        })
    }
}
