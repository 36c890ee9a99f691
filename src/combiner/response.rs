use bytes::BytesMut;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

use super::{
    aggregate::AggregateMerger,
    dump::FrameDump,
    error::Error,
    phase::{advance, DescriptionPhase},
    row_count::CommandTag,
    sink::{Destination, Sink},
    wire::{encode_frame, BackendMessage, MessageKind, FRAME_HEADER_LEN},
};

/// How the row counts in the nodes' CommandComplete tags are reduced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CombineMode {
    /// Forward the last tag unchanged.
    #[default]
    None,
    /// Every node must report the same count, e.g. a write to a replicated
    /// table.
    RequireSame,
    /// Counts are added up, e.g. a write to a distributed table.
    Sum,
}

/// The kind of statement the nodes are answering, fixed by the first reply
/// that implies one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestKind {
    #[default]
    Undefined,
    Command,
    Query,
    CopyIn,
    CopyOut,
}

/// Result of a successful [`ResponseCombiner::merge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStatus {
    Merged,
    /// An error was already seen in this cycle; the message was ignored.
    AlreadyFailed,
}

/// State belonging to one statement cycle. Reset wholesale between statements.
#[derive(Debug, Default)]
struct Cycle {
    request_kind: RequestKind,
    command_complete_count: usize,
    description: DescriptionPhase,
    copy_in_count: usize,
    copy_out_count: usize,
    row_count: u64,
    /// Set when a tag without a row count turned off row count merging.
    mode_downgraded: bool,
    in_error: bool,
}

/// Folds the replies of `node_count` data nodes into a single reply.
///
/// Not synchronised: one owner feeds it every node's messages, one at a time.
/// See [`crate::combiner::task`] for running it behind a channel.
#[derive(TypedBuilder)]
pub struct ResponseCombiner<S> {
    node_count: usize,
    #[builder(default)]
    combine_mode: CombineMode,
    #[builder(default)]
    destination: Destination,
    sink: S,
    #[builder(default, setter(skip))]
    cycle: Cycle,
    #[builder(default, setter(skip))]
    aggregates: Vec<AggregateMerger>,
    #[builder(default, setter(skip))]
    copy_sink: Option<Box<dyn Sink + Send>>,
}

impl<S: Sink> ResponseCombiner<S> {
    pub fn new(
        node_count: usize,
        combine_mode: CombineMode,
        destination: Destination,
        sink: S,
    ) -> Self {
        Self::builder()
            .node_count(node_count)
            .combine_mode(combine_mode)
            .destination(destination)
            .sink(sink)
            .build()
    }

    /// Installs the aggregates the plan pushed down to the nodes. Replaces
    /// any previously attached list.
    pub fn set_aggregates(&mut self, aggregates: Vec<AggregateMerger>) {
        self.aggregates = aggregates;
    }

    /// Routes COPY TO rows into `sink` instead of the client.
    pub fn attach_copy_sink(&mut self, sink: Box<dyn Sink + Send>) {
        self.copy_sink = Some(sink);
    }

    /// Hands the COPY sink back to its owner. Closing and resetting the
    /// combiner drop a sink that is still attached.
    pub fn detach_copy_sink(&mut self) -> Option<Box<dyn Sink + Send>> {
        self.copy_sink.take()
    }

    pub fn merge_message(&mut self, msg: &BackendMessage) -> Result<MergeStatus, Error> {
        self.merge(msg.kind, &msg.payload)
    }

    /// Feeds one message from any node into the combiner.
    ///
    /// Fatal inconsistencies are returned as errors and poison the rest of the
    /// cycle, as does an ErrorResponse from a node. Once poisoned, every call
    /// returns [`MergeStatus::AlreadyFailed`] without effect.
    pub fn merge(&mut self, kind: MessageKind, payload: &[u8]) -> Result<MergeStatus, Error> {
        if self.cycle.in_error {
            trace!(%kind, "ignoring message after error");
            return Ok(MergeStatus::AlreadyFailed);
        }
        match self.dispatch(kind, payload) {
            Ok(()) => Ok(MergeStatus::Merged),
            Err(error) => {
                warn!(%kind, %error, "combining responses failed");
                self.cycle.in_error = true;
                Err(error)
            }
        }
    }

    fn dispatch(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), Error> {
        match kind {
            MessageKind::CopyOutComplete => {
                // The coordinator sends its own CopyDone.
                self.establish(kind, RequestKind::CopyOut)?;
                advance(&mut self.cycle.copy_out_count, self.node_count, kind)?;
            }
            MessageKind::CommandComplete => self.command_complete(payload)?,
            MessageKind::RowDescription => {
                self.establish(kind, RequestKind::Query)?;
                if self.cycle.description.row_description(self.node_count)? {
                    self.emit(kind, payload)?;
                }
            }
            MessageKind::ParameterStatus => {
                self.establish(kind, RequestKind::Query)?;
                if self.cycle.description.parameter_status(self.node_count)? {
                    self.emit(kind, payload)?;
                }
            }
            MessageKind::CopyInResponse => {
                self.establish(kind, RequestKind::CopyIn)?;
                if advance(&mut self.cycle.copy_in_count, self.node_count, kind)? == 1 {
                    self.emit(kind, payload)?;
                }
            }
            MessageKind::CopyOutResponse => {
                // Counted only: the coordinator sends its own CopyOutResponse.
                self.establish(kind, RequestKind::CopyOut)?;
                advance(&mut self.cycle.copy_out_count, self.node_count, kind)?;
            }
            MessageKind::CopyOutDataRow => {
                self.establish(kind, RequestKind::CopyOut)?;
                self.copy_row(payload)?;
            }
            MessageKind::DataRow => self.data_row(payload)?,
            MessageKind::ErrorResponse => {
                self.cycle.in_error = true;
                self.emit(kind, payload)?;
            }
            MessageKind::Notification | MessageKind::Notice => self.emit(kind, payload)?,
            MessageKind::EmptyQuery | MessageKind::Other(_) => {
                return Err(Error::UnexpectedMessage(kind));
            }
        }
        Ok(())
    }

    fn establish(&mut self, kind: MessageKind, expected: RequestKind) -> Result<(), Error> {
        match self.cycle.request_kind {
            RequestKind::Undefined => {
                debug!(request_kind = ?expected, "request kind established");
                self.cycle.request_kind = expected;
                Ok(())
            }
            established if established == expected => Ok(()),
            established => Err(Error::UnexpectedResponse { kind, established }),
        }
    }

    /// Row counts are only merged for plain commands; queries and COPY also
    /// finish with a CommandComplete, which is then just counted.
    fn command_complete(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.cycle.request_kind == RequestKind::Undefined {
            self.establish(MessageKind::CommandComplete, RequestKind::Command)?;
        }
        let seen = advance(
            &mut self.cycle.command_complete_count,
            self.node_count,
            MessageKind::CommandComplete,
        )?;
        let merging = self.cycle.request_kind == RequestKind::Command;
        let tag = CommandTag::parse(payload);

        if merging {
            match (self.effective_combine_mode(), tag.rows()) {
                (CombineMode::None, _) => {}
                (_, None) => {
                    debug!(%tag, "command tag carries no row count, no longer merging");
                    self.cycle.mode_downgraded = true;
                }
                (CombineMode::RequireSame, Some(rows)) => {
                    if seen == 1 {
                        self.cycle.row_count = rows;
                    } else if rows != self.cycle.row_count {
                        return Err(Error::ReplicaMismatch {
                            expected: self.cycle.row_count,
                            got: rows,
                        });
                    }
                }
                (CombineMode::Sum, Some(rows)) => {
                    self.cycle.row_count = self.cycle.row_count.saturating_add(rows);
                }
            }
        }

        if seen != self.node_count {
            return Ok(());
        }
        debug!(node_count = self.node_count, "all nodes completed");
        if merging && self.effective_combine_mode() != CombineMode::None {
            let merged = tag.with_rows(self.cycle.row_count);
            self.emit(MessageKind::CommandComplete, &merged.to_payload())
        } else {
            self.emit(MessageKind::CommandComplete, payload)
        }
    }

    fn copy_row(&mut self, payload: &[u8]) -> Result<(), Error> {
        if let Some(copy_sink) = self.copy_sink.as_mut() {
            copy_sink.write(payload)?;
            return Ok(());
        }
        // Nodes and client share the server encoding, rows pass through as is.
        self.emit(MessageKind::CopyOutDataRow, payload)
    }

    fn data_row(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.aggregates.is_empty() {
            return self.emit(MessageKind::DataRow, payload);
        }
        for aggregate in &mut self.aggregates {
            aggregate.merge_one(payload, self.node_count)?;
        }

        // The first aggregate decides when the merged row is sent.
        let first = &self.aggregates[0];
        if !first.is_complete(self.node_count) {
            return Ok(());
        }
        let header = payload
            .get(..2)
            .and_then(|header| <[u8; 2]>::try_from(header).ok())
            .ok_or(Error::MalformedDataRow("row shorter than its column count"))?;
        debug!(value = ?first.value(), "aggregate complete");
        let row = first.synthesize_row(header);
        self.emit(MessageKind::DataRow, &row)
    }

    fn emit(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), Error> {
        if !self.destination.forwards() {
            return Ok(());
        }
        trace!(frame = %FrameDump::new(kind, payload), "emit");
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        encode_frame(kind, payload, &mut frame);
        self.sink.write(&frame)?;
        Ok(())
    }

    /// Returns true if every node finished the statement and nothing went
    /// wrong. A false result with no error seen means a node fell silent.
    pub fn validate(&self) -> bool {
        let cycle = &self.cycle;
        let n = self.node_count;
        if cycle.in_error {
            return false;
        }
        let complete = match cycle.request_kind {
            RequestKind::Undefined => false,
            RequestKind::Command => cycle.command_complete_count == n,
            RequestKind::Query => {
                cycle.command_complete_count == n && cycle.description.is_complete(n)
            }
            RequestKind::CopyIn => cycle.copy_in_count == n,
            RequestKind::CopyOut => cycle.copy_out_count == n,
        };
        if !complete {
            debug!(
                request_kind = ?cycle.request_kind,
                node_count = n,
                command_complete = cycle.command_complete_count,
                description = cycle.description.count(),
                copy_in = cycle.copy_in_count,
                copy_out = cycle.copy_out_count,
                "combiner incomplete"
            );
        }
        complete
    }

    pub fn validate_and_close(self) -> bool {
        self.validate()
    }

    /// Validates the finished cycle and prepares the combiner for the next
    /// statement on the same session.
    pub fn validate_and_reset(&mut self) -> bool {
        let valid = self.validate();
        self.cycle = Cycle::default();
        self.aggregates.clear();
        self.copy_sink = None;
        valid
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// The mode the combiner was created with.
    pub fn combine_mode(&self) -> CombineMode {
        self.combine_mode
    }

    /// The mode in force for the current cycle.
    pub fn effective_combine_mode(&self) -> CombineMode {
        if self.cycle.mode_downgraded {
            CombineMode::None
        } else {
            self.combine_mode
        }
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn request_kind(&self) -> RequestKind {
        self.cycle.request_kind
    }

    pub fn command_complete_count(&self) -> usize {
        self.cycle.command_complete_count
    }

    pub fn description_count(&self) -> usize {
        self.cycle.description.count()
    }

    pub fn copy_in_count(&self) -> usize {
        self.cycle.copy_in_count
    }

    pub fn copy_out_count(&self) -> usize {
        self.cycle.copy_out_count
    }

    pub fn row_count(&self) -> u64 {
        self.cycle.row_count
    }

    pub fn in_error(&self) -> bool {
        self.cycle.in_error
    }

    pub fn aggregates(&self) -> &[AggregateMerger] {
        &self.aggregates
    }

    pub fn has_copy_sink(&self) -> bool {
        self.copy_sink.is_some()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
