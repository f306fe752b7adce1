use std::path::Path;

use decoder_bus::buffer::{FrameBuffer, PacketBuffer};
use decoder_bus::inspect::{InspectConfig, InspectHook};
use decoder_bus::packet::{Packet, PacketCmd};
use decoder_bus::temporal_unit::TemporalUnitReader;
use decoder_bus::{DecodeEngine, DecodeError, DecodeHook, DecoderTask, EngineConfig};
use futures::StreamExt;
use tokio::io::AsyncReadExt;

use crate::cli::HookKind;

const READ_CHUNK: usize = 64 * 1024;
const DEFAULT_FRAME_RATE: f64 = 30.0;

pub struct DecodeOptions {
    pub engine: EngineConfig,
    pub inspect: InspectConfig,
    pub hook: HookKind,
    pub decoder: Option<String>,
    pub max_obu_size: usize,
}

#[derive(Debug, Default)]
pub struct DecodeSummary {
    pub frames: u64,
    pub key_frames: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

pub async fn run(path: &Path, options: DecodeOptions) -> anyhow::Result<DecodeSummary> {
    match options.hook {
        HookKind::Inspect => {
            let hook = InspectHook::new(options.inspect.clone())?;
            run_with(path, hook, &options).await
        }
        HookKind::Ffmpeg => run_ffmpeg(path, &options).await,
    }
}

#[cfg(feature = "ffmpeg")]
async fn run_ffmpeg(path: &Path, options: &DecodeOptions) -> anyhow::Result<DecodeSummary> {
    let hook = decoder_bus::ffmpeg::FfmpegHook::new(options.decoder.as_deref())?;
    run_with(path, hook, options).await
}

#[cfg(not(feature = "ffmpeg"))]
async fn run_ffmpeg(_path: &Path, _options: &DecodeOptions) -> anyhow::Result<DecodeSummary> {
    anyhow::bail!("built without the ffmpeg feature")
}

async fn run_with<H>(
    path: &Path,
    hook: H,
    options: &DecodeOptions,
) -> anyhow::Result<DecodeSummary>
where
    H: DecodeHook<Input = PacketBuffer, Output = FrameBuffer, Error = DecodeError>,
{
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", path.display(), e))?;
    let config = &options.engine;
    let engine = DecodeEngine::new(hook, config)?;
    let task = DecoderTask::new();
    let mut frames = task.frame_stream();
    let (packet_tx, packet_rx) = tokio::sync::mpsc::channel(config.num_input_buffers.max(1) * 2);
    let handle = task.start(engine, packet_rx).await;

    let cancel = task.cancellation_token();
    let max_obu_size = options.max_obu_size;
    let reader = tokio::spawn(async move {
        if let Err(e) = feed(file, packet_tx, max_obu_size).await {
            log::error!("reading input failed: {}", e);
            cancel.cancel();
        }
    });

    let mut summary = DecodeSummary::default();
    loop {
        tokio::select! {
            frame = frames.next() => {
                let Some(frame) = frame else { break };
                let frame = frame?;
                summary.frames += 1;
                summary.key_frames += frame.is_key as u64;
                summary.skipped += u64::from(frame.skipped);
                log::debug!("{}", frame);
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                summary.cancelled = true;
                task.stop();
                break;
            }
        }
    }

    handle.await?;
    reader.abort();
    Ok(summary)
}

/// Reads the file in chunks and sends one packet per temporal unit.
async fn feed(
    mut file: tokio::fs::File,
    packet_tx: tokio::sync::mpsc::Sender<PacketCmd>,
    max_obu_size: usize,
) -> anyhow::Result<()> {
    let mut reader = TemporalUnitReader::with_max_obu_size(max_obu_size);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut index = 0u64;
    loop {
        let n = file.read(&mut chunk).await?;
        let units = if n == 0 {
            reader.finish()
        } else {
            reader.push(&chunk[..n])
        };
        for unit in units {
            let rate = unit
                .sequence_header
                .as_deref()
                .and_then(|seq| seq.frame_rate())
                .filter(|rate| *rate > 0.0)
                .unwrap_or(DEFAULT_FRAME_RATE);
            let time_us = (index as f64 * 1_000_000.0 / rate) as i64;
            index += 1;
            if packet_tx
                .send(PacketCmd::Data(Packet::from(unit).with_time(time_us)))
                .await
                .is_err()
            {
                return Ok(());
            }
        }
        if n == 0 {
            break;
        }
    }
    let skipped = reader.stats().skipped_bytes;
    if skipped > 0 {
        log::warn!("skipped {} corrupt bytes", skipped);
    }
    log::info!("read {} temporal units", index);
    let _ = packet_tx.send(PacketCmd::EOF).await;
    Ok(())
}
