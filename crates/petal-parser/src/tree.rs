use petal_core::{SourceLocation, SourceSpan, TemplateError};
use serde::{Deserialize, Serialize};

use crate::lexer::tokenize;
use crate::token::{AttrToken, CommentVariant, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub children: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum XmlNode {
    Element(ElementNode),
    Text(TextNode),
    Comment(CommentNode),
    Pi(PiNode),
    Cdata(RawNode),
    Doctype(RawNode),
    XmlDecl(RawNode),
}

/// Character data, entity references included as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub raw: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNode {
    /// Full `<!--…-->` source text.
    pub raw: String,
    pub variant: CommentVariant,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiNode {
    pub target: String,
    pub content: String,
    pub raw: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub raw: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeNode {
    pub name: String,
    pub raw_value: Option<String>,
    pub quote: String,
    pub space: String,
    pub eq: String,
    pub span: SourceSpan,
}

impl AttributeNode {
    /// Entity-decoded attribute value for semantic use; the raw slice
    /// stays untouched for re-serialization.
    pub fn decoded_value(&self) -> Option<String> {
        self.raw_value.as_deref().map(decode_entities)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    /// Tag name as written, prefix included.
    pub name: String,
    pub attributes: Vec<AttributeNode>,
    pub children: Vec<XmlNode>,
    pub self_closing: bool,
    /// Whitespace plus `>` or `/>` closing the start tag.
    pub close_text: String,
    /// Exact end-tag source, absent for self-closing elements.
    pub end_tag_text: Option<String>,
    pub span: SourceSpan,
}

impl ElementNode {
    pub fn attribute(&self, lowercase_name: &str) -> Option<&AttributeNode> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name.to_lowercase() == lowercase_name)
    }

    pub fn local_name(&self) -> &str {
        self.name
            .rsplit_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.rsplit_once(':').map(|(prefix, _)| prefix)
    }
}

/// Parse decoded text into a node tree. The tree preserves every raw
/// slice, so `serialize` reproduces the input byte-for-byte.
pub fn parse(source: &str) -> Result<Document, TemplateError> {
    let tokens = tokenize(source)?;
    build_tree(tokens)
}

struct OpenElement {
    node: ElementNode,
    start: SourceLocation,
}

fn build_tree(tokens: Vec<Token>) -> Result<Document, TemplateError> {
    let mut root: Vec<XmlNode> = Vec::new();
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut pending: Option<OpenElement> = None;

    fn attach(root: &mut Vec<XmlNode>, stack: &mut [OpenElement], node: XmlNode) {
        match stack.last_mut() {
            Some(open) => open.node.children.push(node),
            None => root.push(node),
        }
    }

    fn attach_text(root: &mut Vec<XmlNode>, stack: &mut [OpenElement], token: &Token) {
        let children = match stack.last_mut() {
            Some(open) => &mut open.node.children,
            None => root,
        };
        if let Some(XmlNode::Text(text)) = children.last_mut() {
            text.raw.push_str(&token.text);
            text.span.end = token.span.end;
            return;
        }
        children.push(XmlNode::Text(TextNode {
            raw: token.text.clone(),
            span: token.span,
        }));
    }

    for token in tokens {
        match token.kind {
            TokenKind::StartTagOpen { ref name } => {
                pending = Some(OpenElement {
                    node: ElementNode {
                        name: name.clone(),
                        attributes: Vec::new(),
                        children: Vec::new(),
                        self_closing: false,
                        close_text: String::new(),
                        end_tag_text: None,
                        span: token.span,
                    },
                    start: token.span.start,
                });
            }
            TokenKind::Attribute(AttrToken {
                name,
                raw_value,
                quote,
                space,
                eq,
            }) => {
                let Some(open) = pending.as_mut() else {
                    return Err(TemplateError::parse(
                        "Attribute outside of a start tag.",
                        token.span,
                    ));
                };
                open.node.attributes.push(AttributeNode {
                    name,
                    raw_value,
                    quote,
                    space,
                    eq,
                    span: token.span,
                });
            }
            TokenKind::TagClose { self_closing } => {
                let Some(mut open) = pending.take() else {
                    return Err(TemplateError::parse(
                        "Tag close outside of a start tag.",
                        token.span,
                    ));
                };
                open.node.close_text = token.text.clone();
                open.node.self_closing = self_closing;
                open.node.span = SourceSpan::new(open.start, token.span.end);
                if self_closing {
                    attach(&mut root, &mut stack, XmlNode::Element(open.node));
                } else {
                    stack.push(open);
                }
            }
            TokenKind::EndTag { ref name } => {
                let Some(mut open) = stack.pop() else {
                    return Err(TemplateError::parse(
                        format!("Unexpected end tag \"</{}>\".", name),
                        token.span,
                    ));
                };
                if &open.node.name != name {
                    return Err(TemplateError::parse(
                        format!(
                            "Unexpected end tag \"</{}>\"; open element is \"<{}>\".",
                            name, open.node.name
                        ),
                        token.span,
                    ));
                }
                open.node.end_tag_text = Some(token.text.clone());
                open.node.span = SourceSpan::new(open.start, token.span.end);
                attach(&mut root, &mut stack, XmlNode::Element(open.node));
            }
            TokenKind::Text | TokenKind::EntityRef => {
                attach_text(&mut root, &mut stack, &token);
            }
            TokenKind::Comment { variant } => {
                attach(
                    &mut root,
                    &mut stack,
                    XmlNode::Comment(CommentNode {
                        raw: token.text,
                        variant,
                        span: token.span,
                    }),
                );
            }
            TokenKind::Cdata => attach(
                &mut root,
                &mut stack,
                XmlNode::Cdata(RawNode {
                    raw: token.text,
                    span: token.span,
                }),
            ),
            TokenKind::Doctype => attach(
                &mut root,
                &mut stack,
                XmlNode::Doctype(RawNode {
                    raw: token.text,
                    span: token.span,
                }),
            ),
            TokenKind::XmlDecl => attach(
                &mut root,
                &mut stack,
                XmlNode::XmlDecl(RawNode {
                    raw: token.text,
                    span: token.span,
                }),
            ),
            TokenKind::ProcessingInstruction { target, content } => attach(
                &mut root,
                &mut stack,
                XmlNode::Pi(PiNode {
                    target,
                    content,
                    raw: token.text,
                    span: token.span,
                }),
            ),
        }
    }

    if let Some(open) = stack.pop() {
        return Err(TemplateError::parse(
            format!("Element \"<{}>\" never closed.", open.node.name),
            open.node.span,
        ));
    }
    if pending.is_some() {
        return Err(TemplateError::parse(
            "Start tag never closed.",
            SourceSpan::synthetic(),
        ));
    }

    Ok(Document { children: root })
}

/// Re-serialize the tree from its preserved raw slices.
pub fn serialize(document: &Document) -> String {
    let mut out = String::new();
    for node in &document.children {
        serialize_node(node, &mut out);
    }
    out
}

fn serialize_node(node: &XmlNode, out: &mut String) {
    match node {
        XmlNode::Element(element) => {
            out.push('<');
            out.push_str(&element.name);
            for attribute in &element.attributes {
                out.push_str(&attribute.space);
                out.push_str(&attribute.name);
                out.push_str(&attribute.eq);
                if let Some(raw) = &attribute.raw_value {
                    out.push_str(&attribute.quote);
                    out.push_str(raw);
                    out.push_str(&attribute.quote);
                }
            }
            out.push_str(&element.close_text);
            for child in &element.children {
                serialize_node(child, out);
            }
            if let Some(end_tag) = &element.end_tag_text {
                out.push_str(end_tag);
            }
        }
        XmlNode::Text(text) => out.push_str(&text.raw),
        XmlNode::Comment(comment) => out.push_str(&comment.raw),
        XmlNode::Pi(pi) => out.push_str(&pi.raw),
        XmlNode::Cdata(raw) | XmlNode::Doctype(raw) | XmlNode::XmlDecl(raw) => {
            out.push_str(&raw.raw)
        }
    }
}

/// Decode the fixed entity set (`amp`, `lt`, `gt`, `quot`, `apos`)
/// plus numeric references; anything else passes through unchanged.
pub fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(found) = rest.find('&') {
        out.push_str(&rest[..found]);
        rest = &rest[found..];
        let Some(close) = rest.find(';') else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let body = &rest[1..close];
        let decoded = match body {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => {
                if let Some(digits) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                    u32::from_str_radix(digits, 16).ok().and_then(char::from_u32)
                } else if let Some(digits) = body.strip_prefix('#') {
                    digits.parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    None
                }
            }
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[close + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Negotiate the input encoding and decode bytes to text. Priority:
/// byte-order mark, explicit setting, XML-declaration `encoding`
/// attribute, UTF-8. Decoding errors degrade to the replacement
/// character.
pub fn decode_source(bytes: &[u8], explicit: Option<&str>) -> String {
    if let Some(stripped) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(stripped).into_owned();
    }
    if let Some(stripped) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(stripped, false);
    }
    if let Some(stripped) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(stripped, true);
    }

    let encoding = explicit
        .map(|name| name.to_ascii_lowercase())
        .or_else(|| sniff_declared_encoding(bytes));

    match encoding.as_deref() {
        Some("iso-8859-1") | Some("latin-1") | Some("latin1") => {
            bytes.iter().map(|byte| *byte as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| {
            let (first, second) = (pair[0], *pair.get(1).unwrap_or(&0));
            if big_endian {
                u16::from_be_bytes([first, second])
            } else {
                u16::from_le_bytes([first, second])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn sniff_declared_encoding(bytes: &[u8]) -> Option<String> {
    let head_len = bytes.len().min(256);
    let head: String = bytes[..head_len].iter().map(|byte| *byte as char).collect();
    let declaration_end = head.find("?>")?;
    let declaration = &head[..declaration_end];
    if !declaration.starts_with("<?xml") {
        return None;
    }
    let found = declaration.find("encoding")?;
    let after = &declaration[found + "encoding".len()..];
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let quote = after.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value: String = after[1..].chars().take_while(|ch| *ch != quote).collect();
    Some(value.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_lossless() {
        let source = concat!(
            "<?xml version=\"1.0\"?>\n",
            "<!DOCTYPE html>\n",
            "<html lang='en'>\n",
            "  <!-- note -->\n",
            "  <body class = \"main\"  data-x=unquoted>\n",
            "    Text &amp; more <br/>\n",
            "    <![CDATA[raw < data]]>\n",
            "  </body >\n",
            "</html>"
        );
        let document = parse(source).expect("parse should pass");
        assert_eq!(serialize(&document), source);
    }

    #[test]
    fn unexpected_end_tag_is_unrecoverable() {
        let error = parse("<div><p>x</div>").expect_err("should fail");
        assert!(error.to_string().contains("/div"));
        assert!(parse("x</p>").is_err());
    }

    #[test]
    fn attribute_values_decode_entities_lazily() {
        let document = parse("<p title=\"a &amp; b &#33;\"/>").expect("parse should pass");
        let XmlNode::Element(element) = &document.children[0] else {
            panic!("expected an element");
        };
        let attribute = element.attribute("title").expect("title attribute");
        assert_eq!(attribute.raw_value.as_deref(), Some("a &amp; b &#33;"));
        assert_eq!(attribute.decoded_value().as_deref(), Some("a & b !"));
    }

    #[test]
    fn element_names_split_into_prefix_and_local() {
        let document = parse("<tal:block/>").expect("parse should pass");
        let XmlNode::Element(element) = &document.children[0] else {
            panic!("expected an element");
        };
        assert_eq!(element.prefix(), Some("tal"));
        assert_eq!(element.local_name(), "block");
    }

    #[test]
    fn unknown_entities_pass_through_decoding() {
        assert_eq!(decode_entities("&nbsp; &amp; &#x41;"), "&nbsp; & A");
    }

    #[test]
    fn encoding_negotiation_reads_the_xml_declaration() {
        let latin = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><p>caf\xe9</p>";
        assert!(decode_source(latin, None).contains("café"));

        let utf8 = "<p>café</p>".as_bytes();
        assert!(decode_source(utf8, None).contains("café"));

        let bom = [0xEF, 0xBB, 0xBF, b'<', b'p', b'/', b'>'];
        assert_eq!(decode_source(&bom, None), "<p/>");
    }

    #[test]
    fn invalid_utf8_degrades_to_replacement() {
        let bytes = b"<p>\xff</p>";
        let decoded = decode_source(bytes, None);
        assert!(decoded.contains('\u{FFFD}'));
    }
}
