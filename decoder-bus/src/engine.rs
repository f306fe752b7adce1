//! Threaded decode engine.
//!
//! A [`DecodeEngine`] owns one worker thread and a pair of buffer pools. The
//! producer dequeues an empty input buffer, fills it and queues it back; the
//! worker feeds queued inputs to the [`DecodeHook`] and queues the pictures it
//! produces; the consumer dequeues those and releases them when done.
//!
//! All pool and queue state lives behind a single mutex. None of the caller
//! facing methods wait on the worker; only [`DecodeEngine::release`] blocks,
//! and only on the thread join.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferFlags, DecoderBuffer, InputBuffer, OutputBuffer};
use crate::hook::{DecodeFault, DecodeHook, FrameStatus, SendStatus};
use crate::pool::{BufferPool, PoolStats, Pooled};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub num_input_buffers: usize,
    pub num_output_buffers: usize,
    /// Bytes reserved in every input buffer up front.
    pub initial_input_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_input_buffers: 4,
            num_output_buffers: 4,
            initial_input_size: 768 * 1024,
        }
    }
}

/// Who holds the input buffers at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputCensus {
    pub capacity: usize,
    pub available: usize,
    /// Checked out by the producer, including buffers revoked by a flush.
    pub producer: usize,
    pub queued: usize,
    /// Being decoded, or parked for a resend.
    pub worker: usize,
}

/// Who holds the output buffers at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputCensus {
    pub capacity: usize,
    pub available: usize,
    pub worker: usize,
    pub queued: usize,
    pub consumer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferCensus {
    pub input: InputCensus,
    pub output: OutputCensus,
}

impl BufferCensus {
    /// Every buffer is accounted to exactly one holder.
    pub fn is_conserved(&self) -> bool {
        let input = &self.input;
        let output = &self.output;
        input.available + input.producer + input.queued + input.worker == input.capacity
            && output.available + output.worker + output.queued + output.consumer
                == output.capacity
    }
}

struct State<I, O> {
    input_pool: BufferPool<I>,
    output_pool: BufferPool<O>,
    queued_input: VecDeque<Pooled<I>>,
    queued_output: VecDeque<Pooled<O>>,
    /// Slot of the input buffer the producer currently holds.
    dequeued_input: Option<usize>,
    /// Slots the producer still holds that a flush has revoked.
    revoked_inputs: Vec<usize>,
    /// Input refused by the hook, offered again on the next iteration.
    resend_input: Option<Pooled<I>>,
    decoding_input: bool,
    decoding_output: bool,
    consumer_outputs: usize,
    /// A flush happened while the worker was decoding.
    flushed: bool,
    reset_pending: bool,
    draining: bool,
    /// Set together with the published error; the worker stops producing.
    halted: bool,
    released: bool,
    skipped_output_buffer_count: u32,
}

impl<I: InputBuffer, O: OutputBuffer> State<I, O> {
    fn can_decode(&self) -> bool {
        let has_input =
            !self.queued_input.is_empty() || self.resend_input.is_some() || self.draining;
        has_input && self.output_pool.available() > 0 && !self.halted
    }
}

struct Shared<H: DecodeHook> {
    state: Mutex<State<H::Input, H::Output>>,
    cond: Condvar,
    error: OnceLock<H::Error>,
}

impl<H: DecodeHook> Shared<H> {
    fn lock(&self) -> MutexGuard<'_, State<H::Input, H::Output>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_error(&self) -> Result<(), H::Error> {
        match self.error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// What one worker iteration took out of the shared state.
struct Job<I, O> {
    input: Option<Pooled<I>>,
    output: Pooled<O>,
    reset: bool,
}

/// What one worker iteration produced.
struct Outcome<E> {
    resend: bool,
    reset_delivered: bool,
    drain_started: bool,
    drain_finished: bool,
    error: Option<E>,
}

impl<E> Default for Outcome<E> {
    fn default() -> Self {
        Self {
            resend: false,
            reset_delivered: false,
            drain_started: false,
            drain_finished: false,
            error: None,
        }
    }
}

pub struct DecodeEngine<H: DecodeHook> {
    shared: Arc<Shared<H>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl<H: DecodeHook> DecodeEngine<H> {
    /// Creates the buffer pools through `hook` and starts the worker thread.
    pub fn new(mut hook: H, config: &EngineConfig) -> anyhow::Result<Self> {
        if config.num_input_buffers == 0 || config.num_output_buffers == 0 {
            anyhow::bail!(
                "engine needs at least one input and one output buffer, got {}/{}",
                config.num_input_buffers,
                config.num_output_buffers
            );
        }
        let name = hook.name().to_string();
        let mut input_pool = BufferPool::new(config.num_input_buffers, || hook.create_input());
        input_pool.for_each_available(|buf| buf.ensure_space_for_write(config.initial_input_size));
        let output_pool = BufferPool::new(config.num_output_buffers, || hook.create_output());

        let shared = Arc::new(Shared::<H> {
            state: Mutex::new(State {
                input_pool,
                output_pool,
                queued_input: VecDeque::new(),
                queued_output: VecDeque::new(),
                dequeued_input: None,
                revoked_inputs: Vec::new(),
                resend_input: None,
                decoding_input: false,
                decoding_output: false,
                consumer_outputs: 0,
                flushed: false,
                reset_pending: false,
                draining: false,
                halted: false,
                released: false,
                skipped_output_buffer_count: 0,
            }),
            cond: Condvar::new(),
            error: OnceLock::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("decode-{}", name))
            .spawn(move || run(worker_shared, hook))?;
        log::debug!(
            "{} engine started with {} inputs, {} outputs",
            name,
            config.num_input_buffers,
            config.num_output_buffers
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reserves `size` bytes in every input buffer. Only valid while all
    /// inputs are in the pool, i.e. before the first dequeue.
    pub fn set_initial_input_buffer_size(&self, size: usize) {
        let mut state = self.shared.lock();
        assert_eq!(
            state.input_pool.available(),
            state.input_pool.capacity(),
            "input buffers already in use"
        );
        state
            .input_pool
            .for_each_available(|buf| buf.ensure_space_for_write(size));
    }

    /// Hands out an empty input buffer, or `None` if all are in use.
    ///
    /// # Panics
    ///
    /// If the producer still holds the previously dequeued buffer.
    pub fn dequeue_input_buffer(&self) -> Result<Option<Pooled<H::Input>>, H::Error> {
        self.shared.check_error()?;
        let mut state = self.shared.lock();
        assert!(
            state.dequeued_input.is_none(),
            "input buffer {:?} is still checked out",
            state.dequeued_input
        );
        let buffer = state.input_pool.acquire();
        state.dequeued_input = buffer.as_ref().map(|buf| buf.slot());
        Ok(buffer)
    }

    /// Queues the buffer last returned by [`dequeue_input_buffer`].
    ///
    /// A buffer revoked by an intervening [`flush`] goes straight back to the
    /// pool.
    ///
    /// [`dequeue_input_buffer`]: DecodeEngine::dequeue_input_buffer
    /// [`flush`]: DecodeEngine::flush
    pub fn queue_input_buffer(&self, buffer: Pooled<H::Input>) -> Result<(), H::Error> {
        self.shared.check_error()?;
        let mut state = self.shared.lock();
        if let Some(pos) = state.revoked_inputs.iter().position(|&slot| slot == buffer.slot()) {
            state.revoked_inputs.swap_remove(pos);
            state.input_pool.release(buffer);
            return Ok(());
        }
        assert_eq!(
            state.dequeued_input,
            Some(buffer.slot()),
            "queued input buffer was not the one dequeued"
        );
        state.dequeued_input = None;
        state.queued_input.push_back(buffer);
        if state.can_decode() {
            self.shared.cond.notify_one();
        }
        Ok(())
    }

    /// Oldest decoded buffer, if any.
    pub fn dequeue_output_buffer(&self) -> Result<Option<Pooled<H::Output>>, H::Error> {
        self.shared.check_error()?;
        let mut state = self.shared.lock();
        let buffer = state.queued_output.pop_front();
        if buffer.is_some() {
            state.consumer_outputs += 1;
        }
        Ok(buffer)
    }

    /// Returns a buffer obtained from [`DecodeEngine::dequeue_output_buffer`].
    pub fn release_output_buffer(&self, buffer: Pooled<H::Output>) {
        let mut state = self.shared.lock();
        state.consumer_outputs = state.consumer_outputs.saturating_sub(1);
        state.output_pool.release(buffer);
        if state.can_decode() {
            self.shared.cond.notify_one();
        }
    }

    /// Drops every queued buffer and the decode in progress, and asks the
    /// hook to reset on the next send. The worker keeps running.
    pub fn flush(&self) {
        let mut state = self.shared.lock();
        state.flushed = true;
        state.reset_pending = true;
        state.draining = false;
        state.skipped_output_buffer_count = 0;
        if let Some(slot) = state.dequeued_input.take() {
            state.revoked_inputs.push(slot);
        }
        while let Some(buffer) = state.queued_input.pop_front() {
            state.input_pool.release(buffer);
        }
        if let Some(buffer) = state.resend_input.take() {
            state.input_pool.release(buffer);
        }
        while let Some(buffer) = state.queued_output.pop_front() {
            state.output_pool.release(buffer);
        }
    }

    /// Stops the worker and waits for it to exit. Safe to call more than
    /// once.
    pub fn release(&self) {
        {
            let mut state = self.shared.lock();
            state.released = true;
            self.shared.cond.notify_all();
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("{} decode thread panicked", self.name);
            }
            log::debug!("{} engine released", self.name);
        }
    }

    /// The error that halted the worker, if any.
    pub fn error(&self) -> Option<H::Error> {
        self.shared.error.get().cloned()
    }

    pub fn input_stats(&self) -> PoolStats {
        self.shared.lock().input_pool.stats()
    }

    pub fn output_stats(&self) -> PoolStats {
        self.shared.lock().output_pool.stats()
    }

    /// Counts buffers per holder under the lock.
    pub fn census(&self) -> BufferCensus {
        let state = self.shared.lock();
        BufferCensus {
            input: InputCensus {
                capacity: state.input_pool.capacity(),
                available: state.input_pool.available(),
                producer: state.dequeued_input.iter().count() + state.revoked_inputs.len(),
                queued: state.queued_input.len(),
                worker: state.decoding_input as usize + state.resend_input.iter().count(),
            },
            output: OutputCensus {
                capacity: state.output_pool.capacity(),
                available: state.output_pool.available(),
                worker: state.decoding_output as usize,
                queued: state.queued_output.len(),
                consumer: state.consumer_outputs,
            },
        }
    }
}

impl<H: DecodeHook> Drop for DecodeEngine<H> {
    fn drop(&mut self) {
        self.release();
    }
}

fn run<H: DecodeHook>(shared: Arc<Shared<H>>, mut hook: H) {
    while let Some(mut job) = next_job(&shared) {
        let outcome = decode(&mut hook, &mut job);
        finish_job(&shared, &hook, job, outcome);
    }
    log::debug!("{} decode thread exiting", hook.name());
}

/// Waits for work and takes it out of the shared state. `None` once released.
fn next_job<H: DecodeHook>(shared: &Shared<H>) -> Option<Job<H::Input, H::Output>> {
    let mut state = shared.lock();
    loop {
        while !state.released && !state.can_decode() {
            state = shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.released {
            return None;
        }
        let input = if state.draining {
            None
        } else {
            match state.resend_input.take() {
                Some(buffer) => Some(buffer),
                None => state.queued_input.pop_front(),
            }
        };
        let Some(output) = state.output_pool.acquire() else {
            // can_decode() saw a free output; put the input back and wait.
            if let Some(buffer) = input {
                state.resend_input = Some(buffer);
            }
            continue;
        };
        state.flushed = false;
        state.decoding_input = input.is_some();
        state.decoding_output = true;
        let reset = std::mem::take(&mut state.reset_pending);
        return Some(Job {
            input,
            output,
            reset,
        });
    }
}

/// Runs the hook for one job with the lock released.
fn decode<H: DecodeHook>(hook: &mut H, job: &mut Job<H::Input, H::Output>) -> Outcome<H::Error> {
    let mut outcome = Outcome::default();
    let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), H::Error> {
        match job.input.as_deref_mut() {
            Some(input) if input.is_end_of_stream() => {
                job.output.add_flag(BufferFlags::DECODE_ONLY);
                outcome.drain_started = true;
            }
            Some(input) => {
                let decode_only = input.is_decode_only();
                if decode_only {
                    job.output.add_flag(BufferFlags::DECODE_ONLY);
                }
                let status = hook.send_data(input, job.reset)?;
                outcome.reset_delivered = true;
                outcome.resend = status == SendStatus::NeedResend;
                if hook.get_frame(&mut job.output, decode_only, false)?
                    == FrameStatus::NotYetAvailable
                {
                    job.output.add_flag(BufferFlags::DECODE_ONLY);
                }
            }
            None => {
                if hook.get_frame(&mut job.output, false, true)? == FrameStatus::NotYetAvailable {
                    job.output.add_flag(BufferFlags::END_OF_STREAM);
                    outcome.drain_finished = true;
                }
            }
        }
        Ok(())
    }));
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => outcome.error = Some(err),
        Err(payload) => outcome.error = Some(hook.map_error(DecodeFault::from_panic(payload))),
    }
    outcome
}

/// Hands the job's buffers to their next owner.
fn finish_job<H: DecodeHook>(
    shared: &Shared<H>,
    hook: &H,
    job: Job<H::Input, H::Output>,
    outcome: Outcome<H::Error>,
) {
    let Job {
        input,
        output,
        reset,
    } = job;
    let mut state = shared.lock();
    state.decoding_input = false;
    state.decoding_output = false;
    if reset && !outcome.reset_delivered {
        state.reset_pending = true;
    }

    if let Some(err) = outcome.error {
        log::error!("{} decode error: {}", hook.name(), err);
        state.halted = true;
        let _ = shared.error.set(err);
        state.output_pool.release(output);
        if let Some(buffer) = input {
            state.input_pool.release(buffer);
        }
        return;
    }

    if state.flushed {
        state.output_pool.release(output);
    } else {
        if outcome.drain_started {
            state.draining = true;
        }
        if outcome.drain_finished {
            state.draining = false;
        }
        if output.is_decode_only() {
            state.skipped_output_buffer_count += 1;
            state.output_pool.release(output);
        } else {
            let mut output = output;
            let skipped = std::mem::take(&mut state.skipped_output_buffer_count);
            output.set_skipped_output_buffer_count(skipped);
            state.queued_output.push_back(output);
        }
    }

    if let Some(buffer) = input {
        if outcome.resend && !state.flushed {
            state.resend_input = Some(buffer);
        } else {
            state.input_pool.release(buffer);
        }
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
