//! Reference decode hook that parses temporal units instead of decoding them.
//!
//! It behaves like a buffering decoder: units are queued on `send_data`, a
//! full queue asks for a resend, and pictures come out `frame_delay` units
//! late. Output buffers carry the picture's metadata but no pixels.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bit_reader::BitReader;
use crate::buffer::{BufferFlags, DecoderBuffer, FrameBuffer, PacketBuffer};
use crate::frame_header::{FrameHeaderInfo, FrameType};
use crate::hook::{DecodeError, DecodeFault, DecodeHook, FrameStatus, SendStatus};
use crate::obu::{ObuIter, ObuType};
use crate::sequence_header::SequenceHeader;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    /// Units held before `send_data` refuses more input.
    pub max_pending: usize,
    /// Units held back before the first picture is released.
    pub frame_delay: usize,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            max_pending: 8,
            frame_delay: 0,
        }
    }
}

#[derive(Debug)]
struct PendingUnit {
    sequence_header: Arc<SequenceHeader>,
    frame_type: Option<FrameType>,
    shown: bool,
    key: bool,
    time_us: i64,
}

pub struct InspectHook {
    config: InspectConfig,
    sequence_header: Option<Arc<SequenceHeader>>,
    pending: VecDeque<PendingUnit>,
}

impl InspectHook {
    pub fn new(config: InspectConfig) -> anyhow::Result<Self> {
        if config.frame_delay >= config.max_pending {
            anyhow::bail!(
                "frame delay {} must be below max pending {}",
                config.frame_delay,
                config.max_pending
            );
        }
        Ok(Self {
            config,
            sequence_header: None,
            pending: VecDeque::new(),
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn parse_unit(&mut self, data: &[u8], time_us: i64) -> Result<PendingUnit, DecodeError> {
        let mut iter = ObuIter::new(data);
        let mut frame_type = None;
        let mut shown = false;
        let mut key = false;
        let mut obus = 0;
        while let Some(obu) = iter.next() {
            obus += 1;
            match obu.header.obu_type {
                ObuType::SequenceHeader => {
                    let mut reader = BitReader::new(obu.payload);
                    let seq = SequenceHeader::parse_payload(&mut reader)
                        .ok_or_else(|| DecodeError::new("parse", "invalid sequence header"))?;
                    if self.sequence_header.as_deref() != Some(&seq) {
                        log::debug!("inspect: new sequence {}", seq.codec_string());
                        self.sequence_header = Some(Arc::new(seq));
                    }
                }
                ObuType::Frame | ObuType::FrameHeader => {
                    let Some(seq) = self.sequence_header.as_deref() else {
                        return Err(DecodeError::new("parse", "frame before sequence header"));
                    };
                    let mut reader = BitReader::new(obu.payload);
                    let info = FrameHeaderInfo::parse(&mut reader, seq, &obu.header)
                        .ok_or_else(|| DecodeError::new("parse", "truncated frame header"))?;
                    if frame_type.is_none() && !info.show_existing_frame {
                        frame_type = Some(info.frame_type);
                    }
                    shown |= info.is_displayed();
                    key |= info.is_random_access_point();
                }
                _ => {}
            }
        }
        if obus == 0 || !iter.is_finished() {
            return Err(DecodeError::new(
                "parse",
                format!("{} bytes are not an OBU sequence", data.len() - iter.offset()),
            ));
        }
        let sequence_header = self
            .sequence_header
            .clone()
            .ok_or_else(|| DecodeError::new("parse", "no sequence header"))?;
        Ok(PendingUnit {
            sequence_header,
            frame_type,
            shown,
            key,
            time_us,
        })
    }
}

impl DecodeHook for InspectHook {
    type Input = PacketBuffer;
    type Output = FrameBuffer;
    type Error = DecodeError;

    fn name(&self) -> &str {
        "inspect"
    }

    fn create_input(&mut self) -> PacketBuffer {
        PacketBuffer::new()
    }

    fn create_output(&mut self) -> FrameBuffer {
        FrameBuffer::new()
    }

    fn send_data(&mut self, input: &mut PacketBuffer, reset: bool) -> Result<SendStatus, DecodeError> {
        if reset {
            log::debug!("inspect: reset, dropping {} pending units", self.pending.len());
            self.pending.clear();
        }
        if self.pending.len() >= self.config.max_pending {
            return Ok(SendStatus::NeedResend);
        }
        let unit = self.parse_unit(&input.data, input.time_us)?;
        self.pending.push_back(unit);
        Ok(SendStatus::Ok)
    }

    fn get_frame(
        &mut self,
        output: &mut FrameBuffer,
        _decode_only: bool,
        flushing: bool,
    ) -> Result<FrameStatus, DecodeError> {
        if !flushing && self.pending.len() <= self.config.frame_delay {
            return Ok(FrameStatus::NotYetAvailable);
        }
        let Some(unit) = self.pending.pop_front() else {
            return Ok(FrameStatus::NotYetAvailable);
        };
        let seq = &unit.sequence_header;
        output.width = seq.width();
        output.height = seq.height();
        output.bit_depth = seq.bit_depth();
        output.layout = Some(seq.color.layout);
        output.frame_type = unit.frame_type;
        output.time_us = unit.time_us;
        if unit.key {
            output.add_flag(BufferFlags::KEY_FRAME);
        }
        if !unit.shown {
            output.add_flag(BufferFlags::DECODE_ONLY);
        }
        Ok(FrameStatus::Ok)
    }

    fn map_error(&self, fault: DecodeFault) -> DecodeError {
        fault.into()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::buffer::OutputBuffer;
    use crate::engine::{DecodeEngine, EngineConfig};
    use crate::sequence_header::PixelLayout;
    use crate::test_util::{
        FrameParams, SeqParams, sequence_header_obu, stream, temporal_delimiter,
    };

    fn packet(data: &[u8], time_us: i64) -> PacketBuffer {
        let mut buf = PacketBuffer::new();
        buf.fill(data, time_us);
        buf
    }

    fn hook(max_pending: usize, frame_delay: usize) -> InspectHook {
        InspectHook::new(InspectConfig {
            max_pending,
            frame_delay,
        })
        .unwrap()
    }

    #[test]
    fn test_metadata_is_reported() {
        let units = stream(&SeqParams::default(), &[FrameParams::key(), FrameParams::inter(1)]);
        let mut hook = hook(4, 0);
        let mut out = FrameBuffer::new();

        assert_eq!(hook.send_data(&mut packet(&units[0], 0), false).unwrap(), SendStatus::Ok);
        assert_eq!(hook.get_frame(&mut out, false, false).unwrap(), FrameStatus::Ok);
        assert_eq!((out.width, out.height, out.bit_depth), (1920, 1080, 8));
        assert_eq!(out.layout, Some(PixelLayout::I420));
        assert_eq!(out.frame_type, Some(FrameType::Key));
        assert!(out.is_key_frame());
        assert!(!out.is_decode_only());

        out.clear();
        hook.send_data(&mut packet(&units[1], 33_333), false).unwrap();
        hook.get_frame(&mut out, false, false).unwrap();
        assert_eq!(out.frame_type, Some(FrameType::Inter));
        assert_eq!(out.time_us, 33_333);
        assert!(!out.is_key_frame());
    }

    #[test]
    fn test_full_backlog_asks_for_resend() {
        let units = stream(
            &SeqParams::default(),
            &[FrameParams::key(), FrameParams::inter(1), FrameParams::inter(2)],
        );
        let mut hook = hook(2, 1);
        let mut out = FrameBuffer::new();
        hook.send_data(&mut packet(&units[0], 0), false).unwrap();
        assert_eq!(
            hook.get_frame(&mut out, false, false).unwrap(),
            FrameStatus::NotYetAvailable
        );
        hook.send_data(&mut packet(&units[1], 1), false).unwrap();
        assert_eq!(hook.pending(), 2);
        assert_eq!(
            hook.send_data(&mut packet(&units[2], 2), false).unwrap(),
            SendStatus::NeedResend
        );
        hook.get_frame(&mut out, false, false).unwrap();
        assert_eq!(out.time_us, 0);
        assert_eq!(hook.send_data(&mut packet(&units[2], 2), false).unwrap(), SendStatus::Ok);
    }

    #[test]
    fn test_flushing_releases_delayed_units() {
        let units = stream(&SeqParams::default(), &[FrameParams::key(), FrameParams::inter(1)]);
        let mut hook = hook(4, 3);
        let mut out = FrameBuffer::new();
        for (i, unit) in units.iter().enumerate() {
            hook.send_data(&mut packet(unit, i as i64), false).unwrap();
        }
        assert_eq!(
            hook.get_frame(&mut out, false, false).unwrap(),
            FrameStatus::NotYetAvailable
        );
        assert_eq!(hook.get_frame(&mut out, false, true).unwrap(), FrameStatus::Ok);
        assert_eq!(hook.get_frame(&mut out, false, true).unwrap(), FrameStatus::Ok);
        assert_eq!(
            hook.get_frame(&mut out, false, true).unwrap(),
            FrameStatus::NotYetAvailable
        );
    }

    #[test]
    fn test_hidden_unit_is_decode_only() {
        let hidden = FrameParams {
            show_frame: false,
            ..FrameParams::inter(4)
        };
        let units = stream(&SeqParams::default(), &[FrameParams::key(), hidden]);
        let mut hook = hook(4, 0);
        let mut out = FrameBuffer::new();
        hook.send_data(&mut packet(&units[0], 0), false).unwrap();
        hook.get_frame(&mut out, false, false).unwrap();
        out.clear();
        hook.send_data(&mut packet(&units[1], 1), false).unwrap();
        hook.get_frame(&mut out, false, false).unwrap();
        assert!(out.is_decode_only());
    }

    #[test]
    fn test_reset_drops_backlog() {
        let units = stream(&SeqParams::default(), &[FrameParams::key(), FrameParams::key()]);
        let mut hook = hook(4, 2);
        hook.send_data(&mut packet(&units[0], 0), false).unwrap();
        assert_eq!(hook.pending(), 1);
        hook.send_data(&mut packet(&units[1], 1), true).unwrap();
        assert_eq!(hook.pending(), 1);
    }

    #[test]
    fn test_rejects_garbage() {
        let mut hook = hook(4, 0);
        let err = hook
            .send_data(&mut packet(&[0xff, 0xff, 0xff], 0), false)
            .unwrap_err();
        assert_eq!(err.context(), "parse");

        let units = stream(&SeqParams::default(), &[FrameParams::inter(1)]);
        // drop the temporal delimiter and sequence header
        let skip = temporal_delimiter().len() + sequence_header_obu(&SeqParams::default()).len();
        let frame_only = &units[0][skip..];
        let err = hook.send_data(&mut packet(frame_only, 0), false).unwrap_err();
        assert_eq!(err.message(), "frame before sequence header");
    }

    #[test]
    fn test_rejects_delay_not_below_backlog() {
        assert!(
            InspectHook::new(InspectConfig {
                max_pending: 2,
                frame_delay: 2,
            })
            .is_err()
        );
    }

    #[test]
    fn test_runs_inside_engine() {
        let frames: Vec<FrameParams> = (0..12)
            .map(|i| {
                if i % 6 == 0 {
                    FrameParams::key()
                } else {
                    FrameParams::inter(i as u8)
                }
            })
            .collect();
        let units = stream(&SeqParams::default(), &frames);
        let hook = hook(3, 2);
        let engine = DecodeEngine::new(
            hook,
            &EngineConfig {
                num_input_buffers: 2,
                num_output_buffers: 2,
                initial_input_size: 1024,
            },
        )
        .unwrap();

        let mut next = 0;
        let mut eos_sent = false;
        let mut delivered = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            assert!(Instant::now() < deadline, "pipeline stalled");
            if !eos_sent {
                if let Some(mut buf) = engine.dequeue_input_buffer().unwrap() {
                    if next < units.len() {
                        buf.fill(&units[next], next as i64 * 1000);
                        next += 1;
                    } else {
                        buf.add_flag(BufferFlags::END_OF_STREAM);
                        eos_sent = true;
                    }
                    engine.queue_input_buffer(buf).unwrap();
                }
            }
            match engine.dequeue_output_buffer().unwrap() {
                Some(out) => {
                    let eos = out.is_end_of_stream();
                    if !eos {
                        delivered.push((out.time_us, out.is_key_frame(), out.skipped_output_buffer_count()));
                    }
                    engine.release_output_buffer(out);
                    if eos {
                        break;
                    }
                }
                None => std::thread::sleep(Duration::from_micros(200)),
            }
        }

        assert_eq!(delivered.len(), 12);
        assert!(delivered.iter().enumerate().all(|(i, d)| d.0 == i as i64 * 1000));
        let keys: Vec<usize> = (0..12).filter(|&i| delivered[i].1).collect();
        assert_eq!(keys, vec![0, 6]);
        assert_eq!(delivered[0].2, 2);
    }
}
