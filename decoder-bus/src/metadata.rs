//! OBU stream metadata (similar to ffprobe).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::obu::ObuIter;
use crate::sequence_header::SequenceHeader;
use crate::temporal_unit::{TemporalUnitReader, UnitStats};

/// Container-level info.
#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    pub file_name: String,
    pub size_bytes: usize,
    /// Bytes skipped as corrupt or as an incomplete tail.
    pub skipped_bytes: usize,
    /// Duration in seconds; None without constant-rate timing info.
    pub duration_sec: Option<f64>,
}

/// Full probe result.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub format: FormatInfo,
    /// OBU count per type name.
    pub obu_counts: BTreeMap<&'static str, usize>,
    pub units: UnitStats,
    /// First sequence header in the stream.
    pub sequence_header: Option<SequenceHeader>,
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name=obu")?;
        writeln!(f, "filename={}", self.format.file_name)?;
        writeln!(f, "size={}", self.format.size_bytes)?;
        if let Some(d) = self.format.duration_sec {
            writeln!(f, "duration_sec={:.3}", d)?;
        } else {
            writeln!(f, "duration_sec=N/A")?;
        }
        writeln!(f, "skipped_bytes={}", self.format.skipped_bytes)?;
        writeln!(f, "[/FORMAT]")?;
        writeln!(f, "[UNITS]")?;
        writeln!(f, "nb_temporal_units={}", self.units.temporal_units)?;
        writeln!(f, "nb_key_units={}", self.units.key_units)?;
        writeln!(f, "nb_shown_frames={}", self.units.shown_frames)?;
        writeln!(f, "nb_obus={}", self.units.obus)?;
        for (name, count) in &self.obu_counts {
            writeln!(f, "obu.{}={}", name, count)?;
        }
        writeln!(f, "[/UNITS]")?;
        if let Some(seq) = &self.sequence_header {
            write!(f, "{}", seq)?;
        }
        Ok(())
    }
}

/// Reads an OBU file and summarises it (similar to ffprobe).
///
/// # Example
///
/// ```ignore
/// use decoder_bus::metadata::probe;
/// let info = probe("input.obu")?;
/// println!("{}", info);
/// ```
pub fn probe(path: impl AsRef<Path>) -> anyhow::Result<StreamInfo> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    probe_bytes(&path.display().to_string(), &data)
}

/// Same as [`probe`] on an in-memory stream.
pub fn probe_bytes(file_name: &str, data: &[u8]) -> anyhow::Result<StreamInfo> {
    let mut obu_counts = BTreeMap::new();
    let mut first_sequence_header = None;
    let mut reader = TemporalUnitReader::new();
    for unit in reader.push(data).into_iter().chain(reader.finish()) {
        for obu in ObuIter::new(&unit.data) {
            *obu_counts.entry(obu.header.obu_type.name()).or_insert(0) += 1;
        }
        if first_sequence_header.is_none() {
            first_sequence_header = unit.sequence_header.as_deref().cloned();
        }
    }
    if obu_counts.is_empty() {
        anyhow::bail!("{} does not start with an OBU", file_name);
    }
    let units = reader.stats().clone();

    let duration_sec = first_sequence_header
        .as_ref()
        .and_then(SequenceHeader::frame_rate)
        .filter(|rate| *rate > 0.0)
        .map(|rate| units.shown_frames as f64 / rate);

    Ok(StreamInfo {
        format: FormatInfo {
            file_name: file_name.to_string(),
            size_bytes: data.len(),
            skipped_bytes: units.skipped_bytes,
            duration_sec,
        },
        obu_counts,
        units,
        sequence_header: first_sequence_header,
    })
}
