use serde::Serialize;

/// Half-open byte range into source text.
///
/// Every position in the Opal pipeline is a byte offset into the original
/// UTF-8 source. Tokens carry their own 1-based line/column, stamped by the
/// lexer as it scans; a span by itself knows nothing about lines.
/// [`LineMap`] is the offset-to-position bridge for diagnostics produced
/// after lexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    /// Create a span from byte offsets. Start must not exceed end.
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "span start ({start}) must be <= end ({end})");
        Self { start, end }
    }

    /// Zero-width span at an offset -- the EOF token's position, or an
    /// insertion point for diagnostics.
    pub fn point(offset: u32) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Length in bytes.
    pub fn len(self) -> u32 {
        self.end - self.start
    }

    /// Whether the span covers no bytes.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// The smallest span covering both `self` and `other`.
    pub fn cover(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// The spanned slice of the source this span was produced from.
    pub fn slice(self, source: &str) -> &str {
        &source[self.start as usize..self.end as usize]
    }
}

/// Maps byte offsets to 1-based (line, column) positions.
///
/// Built once per source file by recording where each line begins; a lookup
/// bisects the recorded starts for the greatest one at or before the
/// offset. Columns are byte columns within the line.
#[derive(Debug)]
pub struct LineMap {
    /// Offset of the first byte of each line. Always begins with 0.
    starts: Vec<u32>,
}

impl LineMap {
    /// Record the line starts of `source`.
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0u32];
        let mut offset = 0u32;
        for fragment in source.split_inclusive('\n') {
            offset += fragment.len() as u32;
            if fragment.ends_with('\n') {
                starts.push(offset);
            }
        }
        Self { starts }
    }

    /// The 1-based (line, column) of a byte offset.
    pub fn position_of(&self, offset: u32) -> (u32, u32) {
        // Bisect for the last line start at or before the offset.
        let mut lo = 0;
        let mut hi = self.starts.len();
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.starts[mid] <= offset {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        (lo as u32 + 1, offset - self.starts[lo] + 1)
    }

    /// Number of lines in the source.
    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}
