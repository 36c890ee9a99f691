use hashbrown::HashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, debug_span, warn, Instrument};

use super::{error::Error, response::ResponseCombiner, sink::Sink, wire::BackendMessage};

/// A message read from one data node's connection.
#[derive(Clone, Debug)]
pub struct NodeMessage {
    /// Index of the node, in `0..node_count`.
    pub node: usize,
    pub message: BackendMessage,
}

impl NodeMessage {
    pub fn new(node: usize, message: BackendMessage) -> Self {
        Self { node, message }
    }
}

/// How a statement's node streams ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSummary {
    /// The combiner validated: every node finished and nothing went wrong.
    pub valid: bool,
    /// Frames received from each node, indexed by node.
    pub frames: Vec<usize>,
}

impl MergeSummary {
    /// Nodes that never delivered a single frame.
    pub fn silent_nodes(&self) -> Vec<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, frames)| **frames == 0)
            .map(|(node, _)| node)
            .collect()
    }
}

/// Spawns a task that owns `combiner` and feeds it everything received on
/// `rx`, in arrival order.
///
/// Connection readers can run anywhere and share clones of the sender; this
/// task stays the combiner's only writer. The task finishes once every sender
/// is dropped, returning a [`MergeSummary`], or at the first fatal combining
/// error.
pub fn spawn_merge_task<S>(
    combiner: ResponseCombiner<S>,
    rx: mpsc::UnboundedReceiver<NodeMessage>,
) -> JoinHandle<Result<MergeSummary, Error>>
where
    S: Sink + Send + 'static,
{
    tokio::spawn(run_merge_task(combiner, rx))
}

pub async fn run_merge_task<S: Sink>(
    mut combiner: ResponseCombiner<S>,
    mut rx: mpsc::UnboundedReceiver<NodeMessage>,
) -> Result<MergeSummary, Error> {
    let node_count = combiner.node_count();
    let span = debug_span!("merge", node_count);
    async move {
        let mut frames: HashMap<usize, usize> = HashMap::new();
        while let Some(NodeMessage { node, message }) = rx.recv().await {
            if node >= node_count {
                return Err(Error::UnknownNode { node, node_count });
            }
            *frames.entry(node).or_default() += 1;
            combiner.merge_message(&message)?;
        }
        let valid = combiner.validate_and_close();
        let summary = MergeSummary {
            valid,
            frames: (0..node_count)
                .map(|node| frames.get(&node).copied().unwrap_or(0))
                .collect(),
        };
        if valid {
            debug!(frames = ?summary.frames, "node streams closed");
        } else {
            warn!(silent = ?summary.silent_nodes(), frames = ?summary.frames, "statement incomplete");
        }
        Ok(summary)
    }
    .instrument(span)
    .await
}
