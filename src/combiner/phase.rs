use super::{error::Error, wire::MessageKind};

/// Counts one more node through a phase. A node answers each phase once, so a
/// count that already reached `node_count` means some node replied twice.
pub(crate) fn advance(
    count: &mut usize,
    node_count: usize,
    kind: MessageKind,
) -> Result<usize, Error> {
    if *count >= node_count {
        return Err(Error::TooManyResponses { kind, node_count });
    }
    *count += 1;
    Ok(*count)
}

/// The description phase of a query cycle.
///
/// RowDescription and ParameterStatus replies advance the same counter. A
/// RowDescription is forwarded when it is the first message of the phase, a
/// ParameterStatus when it is the one that brings the phase to `node_count`.
/// Mixing the two kinds in one cycle therefore shifts when the other is
/// forwarded; the validator only looks at the combined count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptionPhase {
    seen: usize,
}

impl DescriptionPhase {
    /// Counts a RowDescription. Returns true if it should be forwarded.
    pub fn row_description(&mut self, node_count: usize) -> Result<bool, Error> {
        let seen = advance(&mut self.seen, node_count, MessageKind::RowDescription)?;
        Ok(seen == 1)
    }

    /// Counts a ParameterStatus. Returns true if it should be forwarded.
    pub fn parameter_status(&mut self, node_count: usize) -> Result<bool, Error> {
        let seen = advance(&mut self.seen, node_count, MessageKind::ParameterStatus)?;
        Ok(seen == node_count)
    }

    pub fn count(&self) -> usize {
        self.seen
    }

    pub fn is_complete(&self, node_count: usize) -> bool {
        self.seen == node_count
    }
}
