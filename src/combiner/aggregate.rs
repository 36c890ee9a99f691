use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use typed_builder::TypedBuilder;

use super::{
    error::Error,
    wire::{put_field, MessageKind},
};

/// Column count (`i16`) followed by the first field's length (`i32`).
const ROW_HEADER_LEN: usize = 2 + 4;

/// The reduction an aggregate applies across nodes. Only `Max` is merged by
/// the combiner today; the planner may still hand over the others, in which
/// case merging fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    Max,
    Min,
    Sum,
    Count,
    Avg,
}

/// How the node encodes the aggregate column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FieldFormat {
    /// ASCII decimal, the default result format.
    #[default]
    Text,
    /// Big-endian unsigned integer of 1, 2, 4 or 8 bytes.
    Binary,
}

/// Running reduction of one aggregate column across every node's row.
#[derive(Clone, Debug, TypedBuilder)]
pub struct AggregateMerger {
    kind: AggregateKind,
    #[builder(default)]
    format: FieldFormat,
    #[builder(default, setter(skip))]
    running_value: Option<u64>,
    #[builder(default, setter(skip))]
    contributions_seen: usize,
    #[builder(default, setter(skip))]
    value_width: Option<usize>,
}

impl AggregateMerger {
    pub fn new(kind: AggregateKind) -> Self {
        Self::builder().kind(kind).build()
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    /// The reduced value so far. `None` until a non-NULL value arrives.
    pub fn value(&self) -> Option<u64> {
        self.running_value
    }

    pub fn contributions_seen(&self) -> usize {
        self.contributions_seen
    }

    pub fn value_width(&self) -> Option<usize> {
        self.value_width
    }

    pub fn is_complete(&self, node_count: usize) -> bool {
        self.contributions_seen == node_count
    }

    /// Folds one node's DataRow into the running value. Each of the
    /// `node_count` nodes contributes exactly one row.
    pub fn merge_one(&mut self, payload: &[u8], node_count: usize) -> Result<(), Error> {
        if self.kind != AggregateKind::Max {
            return Err(Error::UnsupportedAggregate(self.kind));
        }
        if self.contributions_seen >= node_count {
            return Err(Error::TooManyResponses {
                kind: MessageKind::DataRow,
                node_count,
            });
        }
        if payload.len() < ROW_HEADER_LEN {
            return Err(Error::MalformedDataRow("row shorter than its field header"));
        }
        if BigEndian::read_i16(&payload[..2]) < 1 {
            return Err(Error::MalformedDataRow("row has no columns"));
        }

        let field_len = BigEndian::read_i32(&payload[2..ROW_HEADER_LEN]);
        if field_len == -1 {
            // NULL does not move max, but the node has still answered.
            self.contributions_seen += 1;
            return Ok(());
        }
        if field_len < 0 {
            return Err(Error::MalformedDataRow("negative field length"));
        }

        let width = field_len as usize;
        let field = payload
            .get(ROW_HEADER_LEN..ROW_HEADER_LEN + width)
            .ok_or(Error::MalformedDataRow("field runs past the end of the row"))?;
        if let (Some(expected), FieldFormat::Binary) = (self.value_width, self.format) {
            if expected != width {
                return Err(Error::AggregateWidthMismatch {
                    expected,
                    got: width,
                });
            }
        }

        let value = decode_value(self.format, field)?;
        self.value_width.get_or_insert(width);
        self.running_value = Some(match self.running_value {
            Some(current) if current >= value => current,
            _ => value,
        });
        self.contributions_seen += 1;
        Ok(())
    }

    /// The single DataRow sent to the client once every node has contributed.
    /// `header` is the column count copied from the row that completed the
    /// reduction.
    pub fn synthesize_row(&self, header: [u8; 2]) -> Bytes {
        let mut buf = BytesMut::with_capacity(ROW_HEADER_LEN + 20);
        buf.put_slice(&header);
        let text = self.running_value.map(|value| value.to_string());
        put_field(&mut buf, text.as_deref().map(str::as_bytes));
        buf.freeze()
    }
}

fn decode_value(format: FieldFormat, field: &[u8]) -> Result<u64, Error> {
    match format {
        FieldFormat::Text => std::str::from_utf8(field)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or(Error::InvalidAggregateText),
        FieldFormat::Binary => match field.len() {
            1 => Ok(u64::from(field[0])),
            2 => Ok(u64::from(BigEndian::read_u16(field))),
            4 => Ok(u64::from(BigEndian::read_u32(field))),
            8 => Ok(BigEndian::read_u64(field)),
            width => Err(Error::UnsupportedWidth(width)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row(value: &str) -> Vec<u8> {
        let mut row = vec![0, 1];
        row.extend_from_slice(&(value.len() as i32).to_be_bytes());
        row.extend_from_slice(value.as_bytes());
        row
    }

    fn merge(agg: &mut AggregateMerger, row: &[u8]) -> Result<(), Error> {
        agg.merge_one(row, 8)
    }

    fn binary_row(value: &[u8]) -> Vec<u8> {
        let mut row = vec![0, 1];
        row.extend_from_slice(&(value.len() as i32).to_be_bytes());
        row.extend_from_slice(value);
        row
    }

    #[test]
    fn max_of_text_values() {
        let mut agg = AggregateMerger::new(AggregateKind::Max);
        for value in ["5", "9", "7"] {
            merge(&mut agg, &text_row(value)).unwrap();
        }
        assert_eq!(agg.value(), Some(9));
        assert!(agg.is_complete(3));
        assert_eq!(
            &agg.synthesize_row([0, 1])[..],
            b"\x00\x01\x00\x00\x00\x019"
        );
    }

    #[test]
    fn text_widths_may_differ() {
        let mut agg = AggregateMerger::new(AggregateKind::Max);
        merge(&mut agg, &text_row("5")).unwrap();
        merge(&mut agg, &text_row("120")).unwrap();
        assert_eq!(agg.value(), Some(120));
        assert_eq!(agg.value_width(), Some(1));
    }

    #[test]
    fn binary_width_is_enforced() {
        let mut agg = AggregateMerger::builder()
            .kind(AggregateKind::Max)
            .format(FieldFormat::Binary)
            .build();
        merge(&mut agg, &binary_row(&7u32.to_be_bytes())).unwrap();
        merge(&mut agg, &binary_row(&300u32.to_be_bytes())).unwrap();
        assert_eq!(agg.value(), Some(300));
        assert!(matches!(
            merge(&mut agg, &binary_row(&1u64.to_be_bytes())),
            Err(Error::AggregateWidthMismatch {
                expected: 4,
                got: 8
            })
        ));
        assert_eq!(agg.contributions_seen(), 2);
    }

    #[test]
    fn odd_binary_width() {
        let mut agg = AggregateMerger::builder()
            .kind(AggregateKind::Max)
            .format(FieldFormat::Binary)
            .build();
        assert!(matches!(
            merge(&mut agg, &binary_row(&[0, 0, 1])),
            Err(Error::UnsupportedWidth(3))
        ));
    }

    #[test]
    fn nulls_count_but_do_not_reduce() {
        let mut agg = AggregateMerger::new(AggregateKind::Max);
        merge(&mut agg, b"\x00\x01\xff\xff\xff\xff").unwrap();
        assert_eq!(agg.value(), None);
        assert_eq!(
            &agg.synthesize_row([0, 1])[..],
            b"\x00\x01\xff\xff\xff\xff"
        );
        merge(&mut agg, &text_row("4")).unwrap();
        assert_eq!(agg.value(), Some(4));
        assert_eq!(agg.contributions_seen(), 2);
    }

    #[test]
    fn truncated_rows() {
        let mut agg = AggregateMerger::new(AggregateKind::Max);
        assert!(matches!(
            merge(&mut agg, b"\x00\x01\x00"),
            Err(Error::MalformedDataRow(_))
        ));
        assert!(matches!(
            merge(&mut agg, b"\x00\x01\x00\x00\x00\x0512"),
            Err(Error::MalformedDataRow(_))
        ));
        assert!(matches!(
            merge(&mut agg, &text_row("abc")),
            Err(Error::InvalidAggregateText)
        ));
        assert_eq!(agg.contributions_seen(), 0);
    }

    #[test]
    fn other_kinds_are_unsupported() {
        for kind in [
            AggregateKind::Min,
            AggregateKind::Sum,
            AggregateKind::Count,
            AggregateKind::Avg,
        ] {
            let mut agg = AggregateMerger::new(kind);
            assert!(matches!(
                merge(&mut agg, &text_row("1")),
                Err(Error::UnsupportedAggregate(k)) if k == kind
            ));
        }
    }

    #[test]
    fn one_contribution_per_node() {
        let mut agg = AggregateMerger::new(AggregateKind::Max);
        agg.merge_one(&text_row("3"), 2).unwrap();
        agg.merge_one(b"\x00\x01\xff\xff\xff\xff", 2).unwrap();
        assert!(agg.is_complete(2));
        assert!(matches!(
            agg.merge_one(&text_row("99"), 2),
            Err(Error::TooManyResponses {
                kind: MessageKind::DataRow,
                node_count: 2
            })
        ));
        assert_eq!(agg.value(), Some(3));
        assert_eq!(agg.contributions_seen(), 2);
    }
}
