use std::io;

use thiserror::Error;

use super::{aggregate::AggregateKind, response::RequestKind, wire::MessageKind};

/// SQLSTATE reported for combiner consistency failures.
pub const DATA_CORRUPTED: &str = "XX001";
/// SQLSTATE reported for reductions the combiner cannot perform.
pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
/// SQLSTATE reported when the output sink fails.
pub const IO_ERROR: &str = "58030";

#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected response from the data nodes: {kind} during a {established:?} request")]
    UnexpectedResponse {
        kind: MessageKind,
        established: RequestKind,
    },
    #[error("unexpected response from the data nodes: {0}")]
    UnexpectedMessage(MessageKind),
    #[error("more {kind} responses than the {node_count} data nodes taking part")]
    TooManyResponses { kind: MessageKind, node_count: usize },
    #[error("message from node {node} but only {node_count} nodes take part")]
    UnknownNode { node: usize, node_count: usize },
    #[error(
        "write to replicated table returned different results from the data nodes: {expected} != {got}"
    )]
    ReplicaMismatch { expected: u64, got: u64 },
    #[error("unknown aggregate type: {0:?}")]
    UnsupportedAggregate(AggregateKind),
    #[error("malformed data row: {0}")]
    MalformedDataRow(&'static str),
    #[error("aggregate value width changed from {expected} to {got} bytes")]
    AggregateWidthMismatch { expected: usize, got: usize },
    #[error("unsupported aggregate value width: {0} bytes")]
    UnsupportedWidth(usize),
    #[error("aggregate value is not an unsigned integer")]
    InvalidAggregateText,
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i32),
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    #[error("sink error: {0}")]
    Sink(#[from] io::Error),
}

impl Error {
    /// Returns true for errors that mean the nodes disagree with each other or
    /// with the coordinator. These abort the statement and are never retried.
    pub fn is_data_corruption(&self) -> bool {
        !matches!(self, Error::UnsupportedAggregate(_) | Error::Sink(_))
    }

    /// The SQLSTATE the coordinator reports to the client for this error.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            Error::UnsupportedAggregate(_) => FEATURE_NOT_SUPPORTED,
            Error::Sink(_) => IO_ERROR,
            _ => DATA_CORRUPTED,
        }
    }
}
