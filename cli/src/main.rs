use std::io;

use bytes::{BufMut, BytesMut};
use fanout::combiner::{
    decode_frame, spawn_merge_task, AggregateKind, AggregateMerger,
    BackendMessage, ChannelSink, CombineMode, Destination, MessageKind, NodeMessage,
    ResponseCombiner, WriterSink,
};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

const NODES: usize = 3;

/// Plays the part of the connection layer: each node's reply is written to a
/// byte buffer and read back a few bytes at a time, the way frames trickle in
/// off a socket.
async fn run_statement(
    name: &str,
    combiner: ResponseCombiner<ChannelSink>,
    replies: Vec<Vec<BackendMessage>>,
    mut client_rx: mpsc::UnboundedReceiver<bytes::Bytes>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let merge = spawn_merge_task(combiner, rx);

    let nodes = replies.into_iter().enumerate().map(|(node, messages)| {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut wire = BytesMut::new();
            for msg in &messages {
                msg.encode(&mut wire);
            }
            let mut inbound = BytesMut::new();
            while !wire.is_empty() {
                let chunk = wire.split_to(wire.len().min(7));
                inbound.extend_from_slice(&chunk);
                while let Some(msg) = decode_frame(&mut inbound)? {
                    if tx.send(NodeMessage::new(node, msg)).is_err() {
                        return Ok(());
                    }
                }
            }
            Ok::<_, fanout::combiner::Error>(())
        })
    });
    for result in join_all(nodes).await {
        if let Ok(Err(error)) = result {
            warn!(%error, "node stream broken");
        }
    }
    drop(tx);

    match merge.await {
        Ok(Ok(summary)) => info!(
            statement = name,
            valid = summary.valid,
            silent = ?summary.silent_nodes(),
            "statement finished"
        ),
        Ok(Err(error)) => warn!(statement = name, %error, sqlstate = error.sqlstate(), "statement failed"),
        Err(error) => warn!(statement = name, %error, "merge task panicked"),
    }

    println!("-- {}", name);
    let mut client = BytesMut::new();
    while let Ok(chunk) = client_rx.try_recv() {
        client.extend_from_slice(&chunk);
    }
    while let Ok(Some(msg)) = decode_frame(&mut client) {
        println!("{}", msg.dump());
    }
}

/// A one column RowDescription for an `int8` result in text format.
fn int8_description(column: &str) -> bytes::Bytes {
    let mut buf = BytesMut::new();
    buf.put_i16(1);
    buf.put_slice(column.as_bytes());
    buf.put_u8(b'\0');
    buf.put_u32(0); // table oid
    buf.put_i16(0); // column number
    buf.put_u32(20); // int8
    buf.put_i16(8);
    buf.put_i32(-1);
    buf.put_i16(0);
    buf.freeze()
}

fn combiner(mode: CombineMode) -> (ResponseCombiner<ChannelSink>, mpsc::UnboundedReceiver<bytes::Bytes>) {
    let (sink, rx) = ChannelSink::channel();
    (
        ResponseCombiner::new(NODES, mode, Destination::Client, sink),
        rx,
    )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // UPDATE on a distributed table: counts add up.
    let (c, rx) = combiner(CombineMode::Sum);
    let replies = (0..NODES)
        .map(|node| vec![BackendMessage::command_complete(&format!("UPDATE {}", node * 2 + 1))])
        .collect();
    run_statement("update distributed", c, replies, rx).await;

    // UPDATE on a replicated table where one replica diverged.
    let (c, rx) = combiner(CombineMode::RequireSame);
    let replies = [4, 4, 3]
        .iter()
        .map(|rows| vec![BackendMessage::command_complete(&format!("UPDATE {}", rows))])
        .collect();
    run_statement("update replicated", c, replies, rx).await;

    // SELECT max(id), pushed down to every node.
    let (mut c, rx) = combiner(CombineMode::None);
    c.set_aggregates(vec![AggregateMerger::new(AggregateKind::Max)]);
    let replies = ["17", "230", "96"]
        .iter()
        .map(|value| {
            vec![
                BackendMessage::new(MessageKind::RowDescription, int8_description("max")),
                BackendMessage::text_row(Some(*value)),
                BackendMessage::command_complete("SELECT 1"),
            ]
        })
        .collect();
    run_statement("select max", c, replies, rx).await;

    // COPY ... TO STDOUT on the coordinator host: rows bypass the client.
    let (mut c, rx) = combiner(CombineMode::None);
    c.attach_copy_sink(Box::new(WriterSink::new(io::stdout())));
    let replies = (0..NODES)
        .map(|node| {
            vec![
                BackendMessage::new(MessageKind::CopyOutResponse, &b"\x00\x00\x02\x00\x00\x00\x00"[..]),
                BackendMessage::new(MessageKind::CopyOutDataRow, format!("{}\tnode{}\n", node, node).into_bytes()),
            ]
        })
        .collect();
    run_statement("copy to", c, replies, rx).await;
}
