use bytes::BytesMut;
use fanout::combiner::{
    decode_frame, AggregateKind, AggregateMerger, BackendMessage, CombineMode, Destination, Error,
    MergeStatus, MessageKind, ResponseCombiner,
};
use proptest::prelude::*;

fn drain(combiner: &mut ResponseCombiner<BytesMut>) -> Vec<BackendMessage> {
    let mut out = Vec::new();
    while let Some(msg) = decode_frame(combiner.sink_mut()).unwrap() {
        out.push(msg);
    }
    out
}

fn new_combiner(nodes: usize, mode: CombineMode) -> ResponseCombiner<BytesMut> {
    ResponseCombiner::new(nodes, mode, Destination::Client, BytesMut::new())
}

proptest! {
    #[test]
    fn sum_of_row_counts(counts in prop::collection::vec(0u64..1_000_000, 1..16)) {
        let mut c = new_combiner(counts.len(), CombineMode::Sum);
        for (i, rows) in counts.iter().enumerate() {
            let tag = format!("UPDATE {}", rows);
            c.merge_message(&BackendMessage::command_complete(&tag)).unwrap();
            if i + 1 < counts.len() {
                prop_assert!(drain(&mut c).is_empty());
            }
        }
        let total: u64 = counts.iter().sum();
        let expected = format!("UPDATE {}", total);
        prop_assert_eq!(drain(&mut c), vec![BackendMessage::command_complete(&expected)]);
        prop_assert!(c.validate());
    }

    #[test]
    fn replicated_counts_agree(nodes in 1usize..16, rows in 0u64..1_000_000) {
        let mut c = new_combiner(nodes, CombineMode::RequireSame);
        let tag = format!("DELETE {}", rows);
        for _ in 0..nodes {
            c.merge_message(&BackendMessage::command_complete(&tag)).unwrap();
        }
        prop_assert_eq!(drain(&mut c), vec![BackendMessage::command_complete(&tag)]);
        prop_assert!(c.validate());
    }

    #[test]
    fn replicated_counts_disagree(
        nodes in 2usize..16,
        rows in 0u64..1_000,
        odd in 0usize..16,
        delta in 1u64..100,
    ) {
        let odd = odd % nodes;
        let mut c = new_combiner(nodes, CombineMode::RequireSame);
        let mut failed = false;
        for node in 0..nodes {
            let count = if node == odd { rows + delta } else { rows };
            let msg = BackendMessage::command_complete(&format!("UPDATE {}", count));
            match c.merge_message(&msg) {
                Ok(MergeStatus::Merged) => prop_assert!(!failed),
                Ok(MergeStatus::AlreadyFailed) => prop_assert!(failed),
                Err(Error::ReplicaMismatch { .. }) => failed = true,
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
        prop_assert!(failed);
        prop_assert!(drain(&mut c).is_empty());
        prop_assert!(!c.validate());
    }

    #[test]
    fn max_emitted_after_last_contribution(values in prop::collection::vec(any::<u32>(), 1..16)) {
        let mut c = new_combiner(values.len(), CombineMode::None);
        c.set_aggregates(vec![AggregateMerger::new(AggregateKind::Max)]);
        for (i, value) in values.iter().enumerate() {
            c.merge_message(&BackendMessage::text_row(Some(&value.to_string()))).unwrap();
            if i + 1 < values.len() {
                prop_assert!(drain(&mut c).is_empty());
            }
        }
        let max = values.iter().max().unwrap().to_string();
        prop_assert_eq!(drain(&mut c), vec![BackendMessage::text_row(Some(&max))]);
    }

    #[test]
    fn nothing_after_error(nodes in 1usize..8, extra in 0usize..8) {
        let mut c = new_combiner(nodes, CombineMode::Sum);
        c.merge(MessageKind::ErrorResponse, b"SERROR\0C23505\0\0").unwrap();
        let _ = drain(&mut c);
        for _ in 0..extra {
            prop_assert_eq!(
                c.merge_message(&BackendMessage::command_complete("UPDATE 1")).unwrap(),
                MergeStatus::AlreadyFailed
            );
            prop_assert_eq!(
                c.merge(MessageKind::Notice, b"SNOTICE\0\0").unwrap(),
                MergeStatus::AlreadyFailed
            );
        }
        prop_assert!(drain(&mut c).is_empty());
        prop_assert_eq!(c.command_complete_count(), 0);
        prop_assert!(!c.validate());
    }

    #[test]
    fn validate_tracks_completion(nodes in 1usize..16, done in 0usize..16) {
        let done = done % (nodes + 1);
        let mut c = new_combiner(nodes, CombineMode::Sum);
        for _ in 0..done {
            c.merge_message(&BackendMessage::command_complete("INSERT 0 1")).unwrap();
        }
        prop_assert_eq!(c.validate(), done == nodes);
    }

    #[test]
    fn validate_tracks_every_phase(nodes in 1usize..8, done in 0usize..8, phase in 0usize..3) {
        let done = done % (nodes + 1);
        let mut c = new_combiner(nodes, CombineMode::None);
        match phase {
            0 => {
                // At least one description, so the cycle is classified as a query.
                for _ in 0..done.max(1) {
                    c.merge(MessageKind::RowDescription, b"\x00\x00").unwrap();
                }
                for _ in 0..nodes {
                    c.merge_message(&BackendMessage::command_complete("SELECT 0")).unwrap();
                }
                prop_assert_eq!(c.validate(), done.max(1) == nodes);
            }
            1 => {
                for _ in 0..done {
                    c.merge(MessageKind::CopyInResponse, b"\x00\x00\x00").unwrap();
                }
                prop_assert_eq!(c.validate(), done == nodes);
            }
            _ => {
                for _ in 0..done {
                    c.merge(MessageKind::CopyOutResponse, b"\x00\x00\x00").unwrap();
                }
                prop_assert_eq!(c.validate(), done == nodes);
            }
        }
    }

    #[test]
    fn surplus_reply_poisons_the_cycle(nodes in 1usize..8, rows in 0u64..100) {
        let mut c = new_combiner(nodes, CombineMode::Sum);
        let msg = BackendMessage::command_complete(&format!("DELETE {}", rows));
        for _ in 0..nodes {
            c.merge_message(&msg).unwrap();
        }
        let is_surplus = matches!(c.merge_message(&msg), Err(Error::TooManyResponses { .. }));
        prop_assert!(is_surplus);
        prop_assert_eq!(c.command_complete_count(), nodes);
        prop_assert_eq!(c.row_count(), rows * nodes as u64);
        prop_assert!(!c.validate());
    }

    #[test]
    fn reset_behaves_like_new(nodes in 1usize..8, counts in prop::collection::vec(0u64..100, 1..8)) {
        let mut reused = new_combiner(nodes, CombineMode::Sum);
        reused.merge(MessageKind::RowDescription, b"\x00\x00").unwrap();
        reused.set_aggregates(vec![AggregateMerger::new(AggregateKind::Max)]);
        let _ = reused.validate_and_reset();
        let _ = drain(&mut reused);
        let mut fresh = new_combiner(nodes, CombineMode::Sum);

        for rows in counts.iter().take(nodes) {
            let msg = BackendMessage::command_complete(&format!("UPDATE {}", rows));
            prop_assert_eq!(
                reused.merge_message(&msg).unwrap(),
                fresh.merge_message(&msg).unwrap()
            );
        }
        prop_assert_eq!(drain(&mut reused), drain(&mut fresh));
        prop_assert_eq!(reused.validate(), fresh.validate());
        prop_assert_eq!(reused.row_count(), fresh.row_count());
    }
}

#[test]
fn row_count_examples() {
    use fanout::combiner::row_count::parse_row_count;

    assert_eq!(parse_row_count(b"UPDATE 12\0"), (2, 12));
    assert_eq!(parse_row_count(b"INSERT 0 0\0"), (1, 0));
    assert_eq!(parse_row_count(b"VACUUM\0"), (0, 0));
}

#[test]
fn description_and_parameter_status_with_three_nodes() {
    let mut c = new_combiner(3, CombineMode::None);
    for node in 0..3u8 {
        c.merge(MessageKind::RowDescription, &[0, 0, node]).unwrap();
    }
    let out = drain(&mut c);
    assert_eq!(out.len(), 1);
    assert_eq!(&out[0].payload[..], &[0, 0, 0]);

    let mut c = new_combiner(3, CombineMode::None);
    for node in 0..3u8 {
        c.merge(MessageKind::ParameterStatus, &[b'a', 0, node, 0]).unwrap();
    }
    let out = drain(&mut c);
    assert_eq!(out.len(), 1);
    assert_eq!(&out[0].payload[..], &[b'a', 0, 2, 0]);
}
