//! Splits a low-overhead AV1 bitstream into temporal units.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::Serialize;

use crate::bit_reader::BitReader;
use crate::frame_header::{FrameHeaderInfo, FrameType};
use crate::obu::{Obu, ObuIter, ObuType, parse_obu_header};
use crate::sequence_header::SequenceHeader;

/// Largest OBU payload accepted before the size field is treated as corrupt.
pub const DEFAULT_MAX_OBU_SIZE: usize = 16 * 1024 * 1024;

/// Header byte, extension byte and an 8-byte size field.
const MAX_OBU_HEADER_SIZE: usize = 10;
/// Bytes kept while scanning, so a delimiter split across chunks is found.
const DELIMITER_TAIL: usize = 2;

/// All OBUs between two temporal delimiters.
#[derive(Debug, Clone)]
pub struct TemporalUnit {
    pub data: Bytes,
    pub obu_count: usize,
    /// Contains a shown key frame.
    pub is_key: bool,
    /// Frames in this unit that produce a picture.
    pub shown_frames: usize,
    /// Type of the first frame header, if any.
    pub frame_type: Option<FrameType>,
    /// Sequence header in effect at the end of the unit.
    pub sequence_header: Option<Arc<SequenceHeader>>,
}

impl TemporalUnit {
    /// Units without any displayed frame only advance decoder state.
    pub fn is_decode_only(&self) -> bool {
        self.shown_frames == 0
    }
}

/// Per-unit summary used by the probe.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnitStats {
    pub temporal_units: usize,
    pub key_units: usize,
    pub shown_frames: usize,
    pub obus: usize,
    /// Bytes dropped as corrupt or as an incomplete tail.
    pub skipped_bytes: usize,
}

/// Push-based temporal unit splitter.
///
/// Bytes may arrive in arbitrary chunks; OBUs are only consumed once they are
/// complete. A temporal delimiter closes the unit in progress. An OBU whose
/// size field exceeds the configured maximum, or whose header cannot be
/// parsed, is skipped together with everything up to the next temporal
/// delimiter.
pub struct TemporalUnitReader {
    max_obu_size: usize,
    skipping: bool,
    pending: BytesMut,
    current: BytesMut,
    current_obus: usize,
    current_key: bool,
    current_shown: usize,
    current_frame_type: Option<FrameType>,
    sequence_header: Option<Arc<SequenceHeader>>,
    stats: UnitStats,
}

impl Default for TemporalUnitReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TemporalUnitReader {
    pub fn new() -> Self {
        Self::with_max_obu_size(DEFAULT_MAX_OBU_SIZE)
    }

    pub fn with_max_obu_size(max_obu_size: usize) -> Self {
        Self {
            max_obu_size,
            skipping: false,
            pending: BytesMut::new(),
            current: BytesMut::new(),
            current_obus: 0,
            current_key: false,
            current_shown: 0,
            current_frame_type: None,
            sequence_header: None,
            stats: UnitStats::default(),
        }
    }

    /// Sequence header seen most recently.
    pub fn sequence_header(&self) -> Option<&Arc<SequenceHeader>> {
        self.sequence_header.as_ref()
    }

    pub fn stats(&self) -> &UnitStats {
        &self.stats
    }

    /// Feeds more bytes and returns the units they completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<TemporalUnit> {
        self.pending.extend_from_slice(data);
        let mut units = Vec::new();
        loop {
            if self.skipping && !self.resync() {
                break;
            }
            // Needs the size field to know an OBU is complete; a sizeless OBU
            // is left for finish().
            let pending = std::mem::take(&mut self.pending);
            let mut iter = ObuIter::new(&pending);
            let mut consumed = 0;
            while let Some(obu) = iter.next() {
                if !obu.header.has_size_field {
                    break;
                }
                consumed = iter.offset();
                units.extend(self.add_obu(&obu));
            }
            let corrupt = self.is_corrupt(&pending, consumed);
            self.pending = pending;
            let _ = self.pending.split_to(consumed);
            if !corrupt {
                break;
            }
            log::warn!("corrupt OBU size field, skipping to the next temporal delimiter");
            self.skip(1);
            self.skipping = true;
        }
        units
    }

    /// Flushes the unit in progress, including a trailing OBU that has no
    /// size field. Malformed trailing bytes are dropped.
    pub fn finish(&mut self) -> Vec<TemporalUnit> {
        if self.skipping {
            self.skip(self.pending.len());
            self.skipping = false;
        }
        let pending = std::mem::take(&mut self.pending);
        let mut iter = ObuIter::new(&pending);
        let mut units = Vec::new();
        while let Some(obu) = iter.next() {
            units.extend(self.add_obu(&obu));
        }
        if !iter.is_finished() {
            let dropped = pending.len() - iter.offset();
            log::warn!("dropping {} trailing bytes that do not form an OBU", dropped);
            self.stats.skipped_bytes += dropped;
        }
        units.extend(self.take_current());
        units
    }

    /// Drops buffered bytes and the unit in progress, keeping the sequence
    /// header. Used after a seek.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.skipping = false;
        self.clear_current();
    }

    /// An OBU at `offset` that cannot complete however many bytes follow.
    fn is_corrupt(&self, data: &[u8], offset: usize) -> bool {
        match parse_obu_header(data, offset, data.len()) {
            Some(header) => header
                .payload_size
                .is_some_and(|size| size > self.max_obu_size),
            None => data.len() - offset >= MAX_OBU_HEADER_SIZE,
        }
    }

    /// Drops pending bytes up to the next temporal delimiter. Returns false
    /// when none is buffered yet.
    fn resync(&mut self) -> bool {
        let found = (0..self.pending.len()).find(|&offset| {
            parse_obu_header(&self.pending, offset, self.pending.len()).is_some_and(|header| {
                header.obu_type == ObuType::TemporalDelimiter && header.payload_size == Some(0)
            })
        });
        match found {
            Some(offset) => {
                log::debug!("resynced after skipping {} bytes", offset);
                self.skip(offset);
                self.skipping = false;
                true
            }
            None => {
                self.skip(self.pending.len().saturating_sub(DELIMITER_TAIL));
                false
            }
        }
    }

    fn skip(&mut self, n: usize) {
        let _ = self.pending.split_to(n);
        self.stats.skipped_bytes += n;
    }

    fn add_obu(&mut self, obu: &Obu<'_>) -> Option<TemporalUnit> {
        let mut completed = None;
        match obu.header.obu_type {
            ObuType::TemporalDelimiter => {
                completed = self.take_current();
            }
            ObuType::SequenceHeader => {
                let mut reader = BitReader::new(obu.payload);
                match SequenceHeader::parse_payload(&mut reader) {
                    Some(seq) => {
                        let changed = self
                            .sequence_header
                            .as_deref()
                            .is_none_or(|current| *current != seq);
                        if changed {
                            log::debug!(
                                "sequence header: {} {}x{}",
                                seq.codec_string(),
                                seq.max_frame_width,
                                seq.max_frame_height
                            );
                            self.sequence_header = Some(Arc::new(seq));
                        }
                    }
                    None => log::warn!("ignoring invalid sequence header"),
                }
            }
            ObuType::Frame | ObuType::FrameHeader => self.inspect_frame_header(obu),
            _ => {}
        }
        self.current.extend_from_slice(obu.data);
        self.current_obus += 1;
        self.stats.obus += 1;
        completed
    }

    fn inspect_frame_header(&mut self, obu: &Obu<'_>) {
        let Some(seq) = self.sequence_header.as_deref() else {
            log::debug!("frame before any sequence header");
            return;
        };
        let mut reader = BitReader::new(obu.payload);
        let Some(info) = FrameHeaderInfo::parse(&mut reader, seq, &obu.header) else {
            log::debug!("unparsable frame header");
            return;
        };
        if self.current_frame_type.is_none() && !info.show_existing_frame {
            self.current_frame_type = Some(info.frame_type);
        }
        if info.is_displayed() {
            self.current_shown += 1;
        }
        if info.is_random_access_point() {
            self.current_key = true;
        }
    }

    fn take_current(&mut self) -> Option<TemporalUnit> {
        if self.current.is_empty() {
            return None;
        }
        let unit = TemporalUnit {
            data: self.current.split().freeze(),
            obu_count: self.current_obus,
            is_key: self.current_key,
            shown_frames: self.current_shown,
            frame_type: self.current_frame_type,
            sequence_header: self.sequence_header.clone(),
        };
        self.clear_current();
        self.stats.temporal_units += 1;
        self.stats.shown_frames += unit.shown_frames;
        if unit.is_key {
            self.stats.key_units += 1;
        }
        Some(unit)
    }

    fn clear_current(&mut self) {
        self.current.clear();
        self.current_obus = 0;
        self.current_key = false;
        self.current_shown = 0;
        self.current_frame_type = None;
    }
}

/// Splits a complete buffer into temporal units.
pub fn split_temporal_units(data: &[u8]) -> Vec<TemporalUnit> {
    let mut reader = TemporalUnitReader::new();
    let mut units = reader.push(data);
    units.extend(reader.finish());
    units
}
