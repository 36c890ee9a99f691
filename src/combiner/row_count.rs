use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Returns the last run of decimal digits in a command status string as
/// `(digit_count, value)`.
///
/// The status text ends at the first NUL or at the end of the buffer. A status
/// that does not end in a digit yields `(0, 0)`, which callers read as "no row
/// count present".
pub fn parse_row_count(status: &[u8]) -> (usize, u64) {
    let mut digits = 0;
    let mut value: u64 = 0;
    for &byte in status.iter().take_while(|&&b| b != b'\0') {
        if byte.is_ascii_digit() {
            value = value
                .saturating_mul(10)
                .saturating_add(u64::from(byte - b'0'));
            digits += 1;
        } else {
            value = 0;
            digits = 0;
        }
    }
    (digits, value)
}

/// A command tag split into its verb prefix and trailing row count, e.g.
/// `"INSERT 0 "` and `5` for `INSERT 0 5`. The prefix is kept as raw bytes, so
/// a rebuilt tag differs from the node's only in the digits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTag {
    prefix: Bytes,
    rows: Option<u64>,
}

impl CommandTag {
    /// Splits a CommandComplete payload. The prefix keeps everything before
    /// the trailing digit run, including the separating space.
    pub fn parse(status: &[u8]) -> Self {
        let text = match status.iter().position(|&b| b == b'\0') {
            Some(end) => &status[..end],
            None => status,
        };
        let (digits, rows) = parse_row_count(text);
        let prefix = Bytes::copy_from_slice(&text[..text.len() - digits]);
        Self {
            prefix,
            rows: (digits > 0).then_some(rows),
        }
    }

    /// The same verb with a different row count.
    pub fn with_rows(&self, rows: u64) -> Self {
        Self {
            prefix: self.prefix.clone(),
            rows: Some(rows),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn rows(&self) -> Option<u64> {
        self.rows
    }

    /// The NUL terminated CommandComplete payload.
    pub fn to_payload(&self) -> Bytes {
        let rows = self.rows.map(|rows| rows.to_string()).unwrap_or_default();
        let mut buf = BytesMut::with_capacity(self.prefix.len() + rows.len() + 1);
        buf.put_slice(&self.prefix);
        buf.put_slice(rows.as_bytes());
        buf.put_u8(b'\0');
        buf.freeze()
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = String::from_utf8_lossy(&self.prefix);
        match self.rows {
            Some(rows) => write!(f, "{}{}", prefix, rows),
            None => f.write_str(&prefix),
        }
    }
}
