use std::pin::Pin;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use futures::{Stream, StreamExt, future};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use crate::buffer::{BufferFlags, DecoderBuffer, FrameBuffer, PacketBuffer};
use crate::engine::DecodeEngine;
use crate::frame::{DecodedFrame, FrameCmd, FrameReceiver, FrameSender};
use crate::hook::{DecodeError, DecodeHook};
use crate::packet::{Packet, PacketCmd, PacketReceiver};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<DecodedFrame, DecodeError>> + Send>>;

/// Drives a [`DecodeEngine`] from an async packet channel and broadcasts the
/// decoded frames.
pub struct DecoderTask {
    cancel: CancellationToken,
    frame_chan: FrameSender,
}

impl Default for DecoderTask {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderTask {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let (sender, _) = tokio::sync::broadcast::channel(1024);

        Self {
            cancel,
            frame_chan: sender,
        }
    }

    pub fn subscribe(&self) -> FrameReceiver {
        self.frame_chan.subscribe()
    }

    /// Frames until end of stream. A decode error is yielded once, then the
    /// stream ends.
    pub fn frame_stream(&self) -> FrameStream {
        let stream = BroadcastStream::new(self.subscribe())
            .take_while(|cmd| future::ready(!matches!(cmd, Ok(FrameCmd::EOF))))
            .filter_map(|cmd| async move {
                match cmd {
                    Ok(FrameCmd::Data(frame)) => Some(Ok(frame)),
                    Ok(FrameCmd::Error(err)) => Some(Err(err)),
                    Ok(FrameCmd::EOF) => None,
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        log::warn!("frame subscriber lagged, {} frames lost", n);
                        None
                    }
                }
            });
        Box::pin(stream)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the pump. The returned handle completes once `FrameCmd::EOF`
    /// has been broadcast and the engine released.
    pub async fn start<H>(
        &self,
        engine: DecodeEngine<H>,
        mut packets: PacketReceiver,
    ) -> JoinHandle<()>
    where
        H: DecodeHook<Input = PacketBuffer, Output = FrameBuffer, Error = DecodeError>,
    {
        let cancel_clone = self.cancel.clone();
        let sender_clone = self.frame_chan.clone();
        tokio::spawn(async move {
            let (packet_tx, packet_rx) = std::sync::mpsc::channel::<PacketCmd>();
            log::info!("decoder task started: {}", engine.name());

            let handle_cancel = cancel_clone.clone();
            let mut handle = tokio::task::spawn_blocking(move || {
                Self::decode_loop(engine, handle_cancel, packet_rx, sender_clone)
            });
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        break;
                    }
                    res = &mut handle => {
                        // stopped on its own, e.g. after a decode error
                        if let Err(e) = res {
                            log::error!("decode loop join error: {}", e);
                        }
                        return;
                    }
                    cmd = packets.recv() => {
                        match cmd {
                            Some(PacketCmd::EOF) | None => {
                                let _ = packet_tx.send(PacketCmd::EOF);
                                break;
                            }
                            Some(cmd) => {
                                if packet_tx.send(cmd).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            if let Err(e) = handle.await {
                log::error!("decode loop join error: {}", e);
            }
        })
    }

    fn decode_loop<H>(
        engine: DecodeEngine<H>,
        cancel: CancellationToken,
        packet_rx: Receiver<PacketCmd>,
        out_sender: FrameSender,
    ) where
        H: DecodeHook<Input = PacketBuffer, Output = FrameBuffer, Error = DecodeError>,
    {
        let mut frames = 0u64;
        if let Err(e) = Self::pump(&engine, &cancel, &packet_rx, &out_sender, &mut frames) {
            log::error!("{} decode error: {}", engine.name(), e);
            let _ = out_sender.send(FrameCmd::Error(e));
        }
        engine.release();
        log::info!("{} decode finished, {} frames", engine.name(), frames);
        let _ = out_sender.send(FrameCmd::EOF);
    }

    /// Moves packets in and frames out until end of stream, cancellation or
    /// the engine's error.
    fn pump<H>(
        engine: &DecodeEngine<H>,
        cancel: &CancellationToken,
        packet_rx: &Receiver<PacketCmd>,
        out_sender: &FrameSender,
        frames: &mut u64,
    ) -> Result<(), DecodeError>
    where
        H: DecodeHook<Input = PacketBuffer, Output = FrameBuffer, Error = DecodeError>,
    {
        let mut pending: Option<Packet> = None;
        let mut eos_pending = false;
        let mut eos_queued = false;
        loop {
            if cancel.is_cancelled() {
                log::info!("{} decode cancelled", engine.name());
                return Ok(());
            }

            if let Some(out) = engine.dequeue_output_buffer()? {
                let eos = out.is_end_of_stream();
                if !eos {
                    *frames += 1;
                    let _ = out_sender.send(FrameCmd::Data(DecodedFrame::from(&*out)));
                }
                engine.release_output_buffer(out);
                if eos {
                    return Ok(());
                }
                continue;
            }

            let mut waited = false;
            if pending.is_none() && !eos_pending && !eos_queued {
                waited = true;
                match packet_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(PacketCmd::Data(packet)) => pending = Some(packet),
                    Ok(PacketCmd::Flush) => {
                        log::debug!("{} flush", engine.name());
                        engine.flush();
                    }
                    Ok(PacketCmd::EOF) | Err(RecvTimeoutError::Disconnected) => {
                        eos_pending = true;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            if pending.is_some() || eos_pending {
                if let Some(mut buf) = engine.dequeue_input_buffer()? {
                    match pending.take() {
                        Some(packet) => {
                            buf.fill(&packet.data, packet.time_us);
                            if packet.decode_only {
                                buf.add_flag(BufferFlags::DECODE_ONLY);
                            }
                            if packet.is_key {
                                buf.add_flag(BufferFlags::KEY_FRAME);
                            }
                        }
                        None => {
                            buf.add_flag(BufferFlags::END_OF_STREAM);
                            eos_pending = false;
                            eos_queued = true;
                        }
                    }
                    engine.queue_input_buffer(buf)?;
                    continue;
                }
            }

            if !waited {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
#[path = "task_test.rs"]
mod task_test;
