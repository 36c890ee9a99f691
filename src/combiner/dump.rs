use std::fmt;

use super::wire::{BackendMessage, MessageKind};

/// One frame rendered for logs: its kind, the wire length word and the payload
/// in hex, e.g. `CommandComplete len=13 55 50 44 41 54 45 20 33 00`.
///
/// Nothing is formatted until the value is displayed, so a dump can be passed
/// to `trace!` with tracing turned off.
#[derive(Clone, Copy)]
pub struct FrameDump<'a> {
    kind: MessageKind,
    payload: &'a [u8],
}

impl<'a> FrameDump<'a> {
    pub fn new(kind: MessageKind, payload: &'a [u8]) -> Self {
        Self { kind, payload }
    }
}

impl fmt::Display for FrameDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The length word counts itself.
        write!(f, "{} len={}", self.kind, self.payload.len() + 4)?;
        for byte in self.payload {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FrameDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl BackendMessage {
    pub fn dump(&self) -> FrameDump<'_> {
        FrameDump::new(self.kind, &self.payload)
    }
}
