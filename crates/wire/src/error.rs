use std::io;

use crate::join::RejectCode;
use crate::link::LinkState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error("read of {needed} bytes overruns the {remaining} remaining")]
    Overrun { needed: usize, remaining: usize },
    #[error("decoded floating point value is NaN")]
    NotANumber,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("declared length {declared} does not match payload size {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("payload of {0} bytes exceeds the maximum packet size")]
    TooLarge(usize),
    #[error("malformed message: {0}")]
    Malformed(#[from] PackError),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("link is not usable (state {0:?})")]
    NotConnected(LinkState),
    #[error("server hung up")]
    Hungup,
    #[error("declared length {declared} does not match {received} bytes received")]
    BadLength { declared: usize, received: usize },
    #[error("message of {0} bytes exceeds the maximum packet size")]
    TooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("rejected by server ({code:?}): {reason}")]
    Rejected { code: RejectCode, reason: String },
    #[error("server forced a disconnect")]
    SuperKilled,
    #[error("no reply to join request before the connection timeout")]
    TimedOut,
    #[error(transparent)]
    Link(#[from] LinkError),
}
