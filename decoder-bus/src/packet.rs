use bytes::Bytes;

use crate::temporal_unit::TemporalUnit;

pub type PacketSender = tokio::sync::mpsc::Sender<PacketCmd>;
pub type PacketReceiver = tokio::sync::mpsc::Receiver<PacketCmd>;

#[derive(Debug, Clone)]
pub enum PacketCmd {
    Data(Packet),
    /// Drop everything in flight, e.g. after a seek.
    Flush,
    EOF,
}

/// One temporal unit ready to be queued into a decode engine.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub data: Bytes,
    pub time_us: i64,
    pub decode_only: bool,
    pub is_key: bool,
}

impl Packet {
    pub fn new(data: Bytes, time_us: i64) -> Self {
        Self {
            data,
            time_us,
            ..Default::default()
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn with_time(mut self, time_us: i64) -> Self {
        self.time_us = time_us;
        self
    }
}

impl From<TemporalUnit> for Packet {
    fn from(unit: TemporalUnit) -> Self {
        Self {
            decode_only: unit.is_decode_only(),
            is_key: unit.is_key,
            data: unit.data,
            time_us: 0,
        }
    }
}
