use std::io;

use bytes::{BufMut, BytesMut};
#[cfg(feature = "task")]
use bytes::Bytes;
#[cfg(feature = "task")]
use tokio::sync::mpsc;

/// Where the combined reply goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Destination {
    /// Frames are written to the client sink.
    #[default]
    Client,
    /// State is tracked but nothing is written, because the coordinator sends
    /// the equivalent reply itself.
    Discard,
}

impl Destination {
    pub fn forwards(&self) -> bool {
        matches!(self, Destination::Client)
    }
}

/// A destination for bytes produced by the combiner: either the client's
/// reply stream (complete frames) or a COPY TO target (raw row data).
pub trait Sink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl Sink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

impl Sink for BytesMut {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.put_slice(bytes);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }
}

/// Adapts any [`io::Write`], e.g. the file behind `COPY ... TO 'path'`.
pub struct WriterSink<W>(W);

impl<W: io::Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self(writer)
    }

    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: io::Write> Sink for WriterSink<W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)
    }
}

/// Hands every write to a client writer task as its own chunk.
#[cfg(feature = "task")]
#[derive(Clone)]
pub struct ChannelSink(mpsc::UnboundedSender<Bytes>);

#[cfg(feature = "task")]
impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self(tx)
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

#[cfg(feature = "task")]
impl Sink for ChannelSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.send(Bytes::copy_from_slice(bytes)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "client writer has gone away")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_sink_appends() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write(b"1\t").unwrap();
        sink.write(b"2\n").unwrap();
        assert_eq!(sink.into_inner(), b"1\t2\n");
    }

    #[cfg(feature = "task")]
    #[test]
    fn channel_sink_chunks() {
        let (mut sink, mut rx) = ChannelSink::channel();
        sink.write(b"abc").unwrap();
        sink.write(b"de").unwrap();
        assert_eq!(&rx.try_recv().unwrap()[..], b"abc");
        assert_eq!(&rx.try_recv().unwrap()[..], b"de");

        drop(rx);
        assert_eq!(
            sink.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }
}
