use petal_core::SourceSpan;
use serde::{Deserialize, Serialize};

/// One lexical token. `text` is always the exact source slice so that
/// every later diagnostic can cite literal template input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    Text,
    /// `&name;`, `&#nn;` or `&#xhh;` inside character data.
    EntityRef,
    /// `<name`, switches the scanner into tag mode.
    StartTagOpen { name: String },
    Attribute(AttrToken),
    /// `>` or `/>`, including any whitespace before it.
    TagClose { self_closing: bool },
    /// `</name>` including surrounding whitespace.
    EndTag { name: String },
    Comment { variant: CommentVariant },
    Cdata,
    Doctype,
    XmlDecl,
    /// `<?target …?>`; the target `python` marks an inline code block.
    ProcessingInstruction { target: String, content: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrToken {
    pub name: String,
    /// Raw value between the quotes; `None` for a bare attribute.
    pub raw_value: Option<String>,
    /// `"\""`, `"'"` or empty for an unquoted value.
    pub quote: String,
    /// Whitespace between the previous token and the name.
    pub space: String,
    /// The literal `=` with surrounding whitespace; empty for a bare
    /// attribute.
    pub eq: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentVariant {
    /// `<!-- … -->`: kept, interpolated by default.
    Standard,
    /// `<!--! … -->`: dropped from output.
    Drop,
    /// `<!--? … -->`: emitted verbatim, never interpolated.
    Verbatim,
}
