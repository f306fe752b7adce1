//! Bitstream builders shared by the unit tests.

use crate::obu::ObuType;

pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_len: 0,
        }
    }

    /// Appends the low `bits` bits of `value`, most significant first.
    pub fn put(&mut self, value: u64, bits: usize) {
        for i in (0..bits).rev() {
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    pub fn flag(&mut self, value: bool) {
        self.put(value as u64, 1);
    }

    pub fn put_uvlc(&mut self, value: u32) {
        let v = value as u64 + 1;
        let leading_zeros = 63 - v.leading_zeros() as usize;
        self.put(0, leading_zeros);
        self.put(1, 1);
        self.put(v - (1 << leading_zeros), leading_zeros);
    }

    /// Appends AV1 trailing bits and pads to a byte boundary.
    pub fn trailing_bits(&mut self) {
        self.put(1, 1);
        while self.bit_len % 8 != 0 {
            self.put(0, 1);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn leb128(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Wraps `payload` in an OBU with a size field and no extension.
pub fn obu(obu_type: ObuType, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![(obu_type.raw() << 3) | 0b010];
    out.extend(leb128(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

/// Sequence header knobs used by the tests. Defaults describe a 1920x1080
/// 8-bit 4:2:0 main profile stream with order hints and adaptive screen
/// content tools.
#[derive(Clone)]
pub struct SeqParams {
    pub profile: u8,
    pub still_picture: bool,
    pub reduced: bool,
    pub width: u32,
    pub height: u32,
    pub seq_level_idx: u8,
    pub timing_info: bool,
    pub equal_picture_interval: Option<u32>,
    pub decoder_model: bool,
    pub initial_display_delay: bool,
    pub operating_points: Vec<u16>,
    pub frame_id_numbers: bool,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub mono_chrome: bool,
    pub color_description: Option<(u8, u8, u8)>,
    pub subsampling: (bool, bool),
}

impl Default for SeqParams {
    fn default() -> Self {
        Self {
            profile: 0,
            still_picture: false,
            reduced: false,
            width: 1920,
            height: 1080,
            seq_level_idx: 8,
            timing_info: false,
            equal_picture_interval: None,
            decoder_model: false,
            initial_display_delay: false,
            operating_points: vec![0],
            frame_id_numbers: false,
            high_bitdepth: false,
            twelve_bit: false,
            mono_chrome: false,
            color_description: None,
            subsampling: (true, false),
        }
    }
}

pub const ORDER_HINT_BITS: usize = 7;
pub const FRAME_ID_BITS: usize = 15;
pub const BUFFER_DELAY_BITS: usize = 10;
pub const PRESENTATION_TIME_BITS: usize = 8;

pub fn sequence_header_payload(p: &SeqParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put(p.profile as u64, 3);
    w.flag(p.still_picture);
    w.flag(p.reduced);
    if p.reduced {
        w.put(p.seq_level_idx as u64, 5);
    } else {
        w.flag(p.timing_info);
        if p.timing_info {
            w.put(1001, 32);
            w.put(60000, 32);
            w.flag(p.equal_picture_interval.is_some());
            if let Some(ticks) = p.equal_picture_interval {
                w.put_uvlc(ticks);
            }
            w.flag(p.decoder_model);
            if p.decoder_model {
                w.put(BUFFER_DELAY_BITS as u64 - 1, 5);
                w.put(90, 32);
                w.put(9, 5);
                w.put(PRESENTATION_TIME_BITS as u64 - 1, 5);
            }
        }
        w.flag(p.initial_display_delay);
        w.put(p.operating_points.len() as u64 - 1, 5);
        for &idc in &p.operating_points {
            w.put(idc as u64, 12);
            w.put(p.seq_level_idx as u64, 5);
            if p.seq_level_idx > 7 {
                w.flag(true);
            }
            if p.decoder_model {
                w.flag(true);
                w.put(500, BUFFER_DELAY_BITS);
                w.put(700, BUFFER_DELAY_BITS);
                w.flag(false);
            }
            if p.initial_display_delay {
                w.flag(true);
                w.put(9, 4);
            }
        }
    }
    w.put(15, 4);
    w.put(15, 4);
    w.put(p.width as u64 - 1, 16);
    w.put(p.height as u64 - 1, 16);
    if !p.reduced {
        w.flag(p.frame_id_numbers);
        if p.frame_id_numbers {
            // delta_frame_id_length 14, frame_id_length 15
            w.put(12, 4);
            w.put(0, 3);
        }
    }
    w.flag(false); // use_128x128_superblock
    w.flag(true); // enable_filter_intra
    w.flag(true); // enable_intra_edge_filter
    if !p.reduced {
        w.flag(true); // interintra
        w.flag(true); // masked compound
        w.flag(true); // warped motion
        w.flag(false); // dual filter
        w.flag(true); // order hint
        w.flag(true); // jnt comp
        w.flag(true); // ref frame mvs
        w.flag(true); // seq_choose_screen_content_tools
        w.flag(true); // seq_choose_integer_mv
        w.put(ORDER_HINT_BITS as u64 - 1, 3);
    }
    w.flag(false); // superres
    w.flag(true); // cdef
    w.flag(true); // restoration
    w.flag(p.high_bitdepth);
    if p.profile == 2 && p.high_bitdepth {
        w.flag(p.twelve_bit);
    }
    if p.profile != 1 {
        w.flag(p.mono_chrome);
    }
    w.flag(p.color_description.is_some());
    if let Some((primaries, transfer, matrix)) = p.color_description {
        w.put(primaries as u64, 8);
        w.put(transfer as u64, 8);
        w.put(matrix as u64, 8);
    }
    let srgb = p.color_description == Some((1, 13, 0));
    if p.mono_chrome {
        w.flag(false); // color_range
    } else if srgb {
        w.flag(false); // separate_uv_delta_q
    } else {
        w.flag(true); // color_range
        let (ss_x, ss_y) = match p.profile {
            0 => (true, true),
            1 => (false, false),
            _ if p.twelve_bit => {
                w.flag(p.subsampling.0);
                if p.subsampling.0 {
                    w.flag(p.subsampling.1);
                }
                (p.subsampling.0, p.subsampling.0 && p.subsampling.1)
            }
            _ => (true, false),
        };
        if ss_x && ss_y {
            w.put(1, 2); // chroma_sample_position
        }
        w.flag(false); // separate_uv_delta_q
    }
    w.flag(false); // film_grain_params_present
    w.trailing_bits();
    w.finish()
}

pub fn sequence_header_obu(p: &SeqParams) -> Vec<u8> {
    obu(ObuType::SequenceHeader, &sequence_header_payload(p))
}

/// Frame header knobs; matches streams built from [`SeqParams::default`].
#[derive(Clone, Copy)]
pub struct FrameParams {
    pub frame_type: u8,
    pub show_frame: bool,
    pub show_existing_frame: bool,
    pub order_hint: u8,
}

impl FrameParams {
    pub fn key() -> Self {
        Self {
            frame_type: 0,
            show_frame: true,
            show_existing_frame: false,
            order_hint: 0,
        }
    }

    pub fn inter(order_hint: u8) -> Self {
        Self {
            frame_type: 1,
            show_frame: true,
            show_existing_frame: false,
            order_hint,
        }
    }
}

/// Uncompressed header prefix for a stream without decoder model or frame
/// ids, followed by filler so the OBU looks like a real frame.
pub fn frame_header_payload(f: &FrameParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.flag(f.show_existing_frame);
    if f.show_existing_frame {
        w.put(0, 3);
        w.trailing_bits();
        return w.finish();
    }
    w.put(f.frame_type as u64, 2);
    w.flag(f.show_frame);
    if !f.show_frame {
        w.flag(true); // showable_frame
    }
    let intra = f.frame_type == 0 || f.frame_type == 2;
    if !(f.frame_type == 3 || (f.frame_type == 0 && f.show_frame)) {
        w.flag(false); // error_resilient_mode
    }
    w.flag(false); // disable_cdf_update
    w.flag(false); // allow_screen_content_tools
    w.flag(false); // frame_size_override_flag
    w.put(f.order_hint as u64, ORDER_HINT_BITS);
    if !intra {
        w.put(0, 3); // primary_ref_frame
    }
    w.put(0xabcd, 16);
    w.trailing_bits();
    w.finish()
}

pub fn frame_obu(f: &FrameParams) -> Vec<u8> {
    obu(ObuType::Frame, &frame_header_payload(f))
}

pub fn temporal_delimiter() -> Vec<u8> {
    obu(ObuType::TemporalDelimiter, &[])
}

/// One temporal unit per entry of `frames`; the first also carries a
/// sequence header.
pub fn stream(seq: &SeqParams, frames: &[FrameParams]) -> Vec<Vec<u8>> {
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let mut unit = temporal_delimiter();
            if i == 0 {
                unit.extend(sequence_header_obu(seq));
            }
            unit.extend(frame_obu(frame));
            unit
        })
        .collect()
}
