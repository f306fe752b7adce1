use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::buffer::{InputBuffer, OutputBuffer};

/// Outcome of handing one input buffer to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Ok,
    /// The decoder is full. The same input is offered again on the next
    /// iteration.
    NeedResend,
}

/// Outcome of asking the decoder for a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ok,
    /// Nothing to output yet. While draining this means the backlog is empty.
    NotYetAvailable,
}

/// Unexpected failure caught at the worker boundary, typically a panic in the
/// hook.
#[derive(Debug, Clone)]
pub struct DecodeFault {
    pub message: String,
}

impl DecodeFault {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }
}

impl fmt::Display for DecodeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected decode error: {}", self.message)
    }
}

/// Error published by a decode engine. Cheap to clone so every caller can
/// receive the same value.
#[derive(Debug, Clone)]
pub struct DecodeError {
    context: &'static str,
    message: Arc<str>,
}

impl DecodeError {
    pub fn new(context: &'static str, message: impl fmt::Display) -> Self {
        Self {
            context,
            message: message.to_string().into(),
        }
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeFault> for DecodeError {
    fn from(fault: DecodeFault) -> Self {
        DecodeError::new("fault", fault)
    }
}

/// The codec behind a [`DecodeEngine`](crate::engine::DecodeEngine).
///
/// The engine owns the hook and calls it from its worker thread only. Input
/// and output buffers are created once, up front, and then recycled.
pub trait DecodeHook: Send + 'static {
    type Input: InputBuffer;
    type Output: OutputBuffer;
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn create_input(&mut self) -> Self::Input;

    fn create_output(&mut self) -> Self::Output;

    /// Feeds one access unit. `reset` is set on the first call after a flush;
    /// the decoder must drop any internal state before consuming `input`.
    fn send_data(&mut self, input: &mut Self::Input, reset: bool)
    -> Result<SendStatus, Self::Error>;

    /// Fetches the next picture into `output`. `decode_only` means the
    /// picture will be discarded; `flushing` means no further input will
    /// arrive and buffered pictures should be returned.
    fn get_frame(
        &mut self,
        output: &mut Self::Output,
        decode_only: bool,
        flushing: bool,
    ) -> Result<FrameStatus, Self::Error>;

    /// Turns a fault caught at the worker boundary into this hook's error.
    fn map_error(&self, fault: DecodeFault) -> Self::Error;
}
