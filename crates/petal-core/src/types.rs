use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn start_of_input() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceSpan {
    pub fn new(start: SourceLocation, end: SourceLocation) -> Self {
        Self { start, end }
    }

    pub fn synthetic() -> Self {
        Self {
            start: SourceLocation::start_of_input(),
            end: SourceLocation::start_of_input(),
        }
    }

    pub fn contains(&self, other: &SourceSpan) -> bool {
        self.start.offset <= other.start.offset && other.end.offset <= self.end.offset
    }

    /// Slice the original source text covered by this span.
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        let start = self.start.offset.min(source.len());
        let end = self.end.offset.min(source.len());
        &source[start..end]
    }
}

/// Render a one-line excerpt with a caret column marker, used by every
/// user-visible diagnostic.
pub fn excerpt_with_caret(source: &str, location: &SourceLocation) -> String {
    let line_start = source[..location.offset.min(source.len())]
        .rfind('\n')
        .map(|index| index + 1)
        .unwrap_or(0);
    let line_end = source[line_start..]
        .find('\n')
        .map(|index| line_start + index)
        .unwrap_or(source.len());
    let line = &source[line_start..line_end];
    let caret_column = location.offset.saturating_sub(line_start);
    let mut out = String::with_capacity(line.len() * 2 + 2);
    out.push_str(line);
    out.push('\n');
    for ch in line.chars().take(caret_column) {
        out.push(if ch == '\t' { '\t' } else { ' ' });
    }
    out.push('^');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_containment_uses_offsets() {
        let outer = SourceSpan {
            start: SourceLocation {
                offset: 0,
                line: 1,
                column: 1,
            },
            end: SourceLocation {
                offset: 20,
                line: 1,
                column: 21,
            },
        };
        let inner = SourceSpan {
            start: SourceLocation {
                offset: 5,
                line: 1,
                column: 6,
            },
            end: SourceLocation {
                offset: 9,
                line: 1,
                column: 10,
            },
        };
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn excerpt_points_at_offending_column() {
        let source = "<p>\n<div tal:bad>\n</p>";
        let location = SourceLocation {
            offset: 9,
            line: 2,
            column: 6,
        };
        let excerpt = excerpt_with_caret(source, &location);
        assert_eq!(excerpt, "<div tal:bad>\n     ^");
    }
}
