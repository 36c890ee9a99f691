// A statement that touches several data nodes gets one reply stream from each
// of them. The coordinator's client must still see exactly one reply, shaped
// as if a single server had answered, so every message a node sends passes
// through a response combiner before anything reaches the client.
//
// The combiner is a plain state machine owned by the statement's execution
// loop. It has no notion of time and does no I/O of its own beyond writing to
// the sink it was given: reading node connections, timeouts and retries all
// belong to the caller. Messages from different nodes may be interleaved in
// any order; messages from the same node must arrive in the order the node
// sent them.
//
// Replies are reconciled per kind. Row counts of writes are summed or checked
// for equality, the first schema description stands in for all of them, and a
// pushed-down aggregate is reduced to a single row. Anything that shows the
// nodes disagreeing about what statement they ran aborts the statement.

pub mod aggregate;
pub mod dump;
pub mod error;
pub mod phase;
pub mod response;
pub mod row_count;
pub mod sink;
#[cfg(feature = "task")]
pub mod task;
pub mod wire;

pub use aggregate::{AggregateKind, AggregateMerger, FieldFormat};
pub use dump::FrameDump;
pub use error::Error;
pub use response::{CombineMode, MergeStatus, RequestKind, ResponseCombiner};
pub use sink::{Destination, Sink, WriterSink};
#[cfg(feature = "task")]
pub use sink::ChannelSink;
#[cfg(feature = "task")]
pub use task::{spawn_merge_task, MergeSummary, NodeMessage};
pub use wire::{decode_frame, BackendMessage, MessageKind};
