use petal_core::{SourceLocation, SourceSpan, TemplateError};

use crate::token::{AttrToken, CommentVariant, Token, TokenKind};

/// Single-pass scanner over decoded text. Permissive where the markup
/// grammar allows it (`<`/`>` inside quoted attribute values, unquoted
/// values, bare attributes); strict where it does not (`--` inside a
/// comment, unterminated constructs).
pub fn tokenize(source: &str) -> Result<Vec<Token>, TemplateError> {
    Scanner::new(source).run()
}

struct Scanner<'a> {
    source: &'a str,
    offset: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

fn is_space(ch: char) -> bool {
    matches!(ch, ' ' | '\n' | '\r' | '\t')
}

fn is_name_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == ':' || !ch.is_ascii()
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | ':' | '.' | '-') || !ch.is_ascii()
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn location(&self) -> SourceLocation {
        SourceLocation {
            offset: self.offset,
            line: self.line,
            column: self.column,
        }
    }

    fn advance(&mut self, bytes: usize) {
        let consumed = &self.source[self.offset..self.offset + bytes];
        for ch in consumed.chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.offset += bytes;
    }

    fn error(&self, message: impl Into<String>, start: SourceLocation) -> TemplateError {
        TemplateError::parse(message, SourceSpan::new(start, self.location()))
    }

    fn push(&mut self, kind: TokenKind, start: SourceLocation) {
        let end = self.location();
        let text = self.source[start.offset..end.offset].to_string();
        self.tokens.push(Token {
            kind,
            text,
            span: SourceSpan::new(start, end),
        });
    }

    fn run(mut self) -> Result<Vec<Token>, TemplateError> {
        while self.peek().is_some() {
            if self.rest().starts_with('<') {
                self.scan_markup()?;
            } else {
                self.scan_text();
            }
        }
        Ok(self.tokens)
    }

    fn scan_text(&mut self) {
        let mut start = self.location();
        let mut has_text = false;
        while let Some(ch) = self.peek() {
            if ch == '<' {
                break;
            }
            if ch == '&' {
                if let Some(len) = entity_length(self.rest()) {
                    if has_text {
                        self.push(TokenKind::Text, start);
                    }
                    let entity_start = self.location();
                    self.advance(len);
                    self.push(TokenKind::EntityRef, entity_start);
                    start = self.location();
                    has_text = false;
                    continue;
                }
            }
            self.advance(ch.len_utf8());
            has_text = true;
        }
        if has_text {
            self.push(TokenKind::Text, start);
        }
    }

    fn scan_markup(&mut self) -> Result<(), TemplateError> {
        let start = self.location();
        let rest = self.rest();

        if rest.starts_with("<!--") {
            return self.scan_comment(start);
        }
        if rest.starts_with("<![CDATA[") {
            return self.scan_until(start, "<![CDATA[", "]]>", TokenKind::Cdata);
        }
        if rest.len() >= 9 && rest[..9].eq_ignore_ascii_case("<!doctype") {
            return self.scan_doctype(start);
        }
        if rest.starts_with("<?") {
            return self.scan_processing_instruction(start);
        }
        if rest.starts_with("</") {
            return self.scan_end_tag(start);
        }

        let after = rest[1..].chars().next();
        match after {
            Some(ch) if is_name_start(ch) => self.scan_start_tag(start),
            _ => Err(self.error(
                format!("Unexpected character after \"<\": {:?}", self.rest()
                    .chars()
                    .take(8)
                    .collect::<String>()),
                start,
            )),
        }
    }

    fn scan_comment(&mut self, start: SourceLocation) -> Result<(), TemplateError> {
        self.advance("<!--".len());
        let variant = match self.peek() {
            Some('!') => {
                self.advance(1);
                CommentVariant::Drop
            }
            Some('?') => {
                self.advance(1);
                CommentVariant::Verbatim
            }
            _ => CommentVariant::Standard,
        };
        let Some(close) = self.rest().find("-->") else {
            return Err(self.error("Unterminated comment.", start));
        };
        let content = &self.rest()[..close];
        if let Some(found) = content.find("--") {
            let mut probe = Scanner::new(self.source);
            probe.advance(self.offset + found);
            let at = probe.location();
            return Err(TemplateError::parse(
                "Comment contains \"--\", which is not allowed.",
                SourceSpan::new(at, at),
            ));
        }
        self.advance(close + "-->".len());
        self.push(TokenKind::Comment { variant }, start);
        Ok(())
    }

    fn scan_until(
        &mut self,
        start: SourceLocation,
        opener: &str,
        closer: &str,
        kind: TokenKind,
    ) -> Result<(), TemplateError> {
        self.advance(opener.len());
        let Some(close) = self.rest().find(closer) else {
            return Err(self.error(format!("Expected {:?} before end of input.", closer), start));
        };
        self.advance(close + closer.len());
        self.push(kind, start);
        Ok(())
    }

    fn scan_doctype(&mut self, start: SourceLocation) -> Result<(), TemplateError> {
        self.advance("<!doctype".len());
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Some('[') => {
                    depth += 1;
                    self.advance(1);
                }
                Some(']') => {
                    depth = depth.saturating_sub(1);
                    self.advance(1);
                }
                Some('>') if depth == 0 => {
                    self.advance(1);
                    self.push(TokenKind::Doctype, start);
                    return Ok(());
                }
                Some(ch) => self.advance(ch.len_utf8()),
                None => return Err(self.error("Unterminated doctype.", start)),
            }
        }
    }

    fn scan_processing_instruction(&mut self, start: SourceLocation) -> Result<(), TemplateError> {
        self.advance("<?".len());
        let target_start = self.offset;
        while let Some(ch) = self.peek() {
            if is_name_char(ch) {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
        let target = self.source[target_start..self.offset].to_string();
        if target.is_empty() {
            return Err(self.error("Expected a processing-instruction target.", start));
        }
        let Some(close) = self.rest().find("?>") else {
            return Err(self.error("Unterminated processing instruction.", start));
        };
        let content = self.rest()[..close].to_string();
        self.advance(close + "?>".len());
        if target.eq_ignore_ascii_case("xml") {
            self.push(TokenKind::XmlDecl, start);
        } else {
            self.push(TokenKind::ProcessingInstruction { target, content }, start);
        }
        Ok(())
    }

    fn scan_end_tag(&mut self, start: SourceLocation) -> Result<(), TemplateError> {
        self.advance("</".len());
        let name_start = self.offset;
        while let Some(ch) = self.peek() {
            if is_name_char(ch) {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
        let name = self.source[name_start..self.offset].to_string();
        if name.is_empty() {
            return Err(self.error("Expected a tag name after \"</\".", start));
        }
        while let Some(ch) = self.peek() {
            if is_space(ch) {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
        match self.peek() {
            Some('>') => {
                self.advance(1);
                self.push(TokenKind::EndTag { name }, start);
                Ok(())
            }
            _ => Err(self.error(format!("Malformed end tag \"</{}\".", name), start)),
        }
    }

    fn scan_start_tag(&mut self, start: SourceLocation) -> Result<(), TemplateError> {
        self.advance(1);
        let name_start = self.offset;
        while let Some(ch) = self.peek() {
            if is_name_char(ch) {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
        let name = self.source[name_start..self.offset].to_string();
        self.push(TokenKind::StartTagOpen { name: name.clone() }, start);

        loop {
            let item_start = self.location();
            let space_start = self.offset;
            while let Some(ch) = self.peek() {
                if is_space(ch) {
                    self.advance(ch.len_utf8());
                } else {
                    break;
                }
            }
            let space = self.source[space_start..self.offset].to_string();

            match self.peek() {
                Some('>') => {
                    self.advance(1);
                    self.push(TokenKind::TagClose { self_closing: false }, item_start);
                    return Ok(());
                }
                Some('/') if self.rest().starts_with("/>") => {
                    self.advance(2);
                    self.push(TokenKind::TagClose { self_closing: true }, item_start);
                    return Ok(());
                }
                Some(ch) if !is_space(ch) && ch != '=' => {
                    self.scan_attribute(item_start, space)?;
                }
                Some(_) => {
                    return Err(self.error("Malformed attribute in start tag.", item_start));
                }
                None => {
                    return Err(self.error(
                        format!("Start tag \"<{}\" never closed.", name),
                        start,
                    ));
                }
            }
        }
    }

    fn scan_attribute(
        &mut self,
        item_start: SourceLocation,
        space: String,
    ) -> Result<(), TemplateError> {
        let name_start = self.offset;
        while let Some(ch) = self.peek() {
            if is_space(ch) || matches!(ch, '=' | '>' | '\'' | '"') || self.rest().starts_with("/>")
            {
                break;
            }
            self.advance(ch.len_utf8());
        }
        let name = self.source[name_start..self.offset].to_string();
        if name.is_empty() {
            return Err(self.error("Expected an attribute name.", item_start));
        }

        let eq_start = self.offset;
        let mut probe = self.offset;
        let mut has_eq = false;
        for ch in self.source[self.offset..].chars() {
            if is_space(ch) {
                probe += ch.len_utf8();
                continue;
            }
            if ch == '=' {
                has_eq = true;
                probe += 1;
            }
            break;
        }
        if !has_eq {
            self.tokens.push(Token {
                kind: TokenKind::Attribute(AttrToken {
                    name,
                    raw_value: None,
                    quote: String::new(),
                    space,
                    eq: String::new(),
                }),
                text: self.source[item_start.offset..self.offset].to_string(),
                span: SourceSpan::new(item_start, self.location()),
            });
            return Ok(());
        }
        self.advance(probe - self.offset);
        while let Some(ch) = self.peek() {
            if is_space(ch) {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
        let eq = self.source[eq_start..self.offset].to_string();

        let (raw_value, quote) = match self.peek() {
            Some(quote_ch @ ('"' | '\'')) => {
                self.advance(1);
                let value_start = self.offset;
                loop {
                    match self.peek() {
                        // `<` and `>` inside quoted values pass through.
                        Some(ch) if ch != quote_ch => self.advance(ch.len_utf8()),
                        Some(_) => break,
                        None => {
                            return Err(self.error(
                                "Unterminated quoted attribute value.",
                                item_start,
                            ))
                        }
                    }
                }
                let raw = self.source[value_start..self.offset].to_string();
                self.advance(1);
                (raw, quote_ch.to_string())
            }
            Some(_) => {
                let value_start = self.offset;
                while let Some(ch) = self.peek() {
                    if is_space(ch) || ch == '>' || self.rest().starts_with("/>") {
                        break;
                    }
                    self.advance(ch.len_utf8());
                }
                let raw = self.source[value_start..self.offset].to_string();
                if raw.is_empty() {
                    return Err(self.error("Expected an attribute value after \"=\".", item_start));
                }
                (raw, String::new())
            }
            None => return Err(self.error("Unterminated start tag.", item_start)),
        };

        self.tokens.push(Token {
            kind: TokenKind::Attribute(AttrToken {
                name,
                raw_value: Some(raw_value),
                quote,
                space,
                eq,
            }),
            text: self.source[item_start.offset..self.offset].to_string(),
            span: SourceSpan::new(item_start, self.location()),
        });
        Ok(())
    }
}

/// Length in bytes of a well-formed entity reference at the start of
/// `rest`, if any.
fn entity_length(rest: &str) -> Option<usize> {
    let mut chars = rest.char_indices();
    let (_, first) = chars.next()?;
    if first != '&' {
        return None;
    }
    let mut body_len = 0usize;
    let mut numeric = false;
    let mut hex = false;
    for (index, ch) in chars {
        match (index, ch) {
            (1, '#') => numeric = true,
            (2, 'x' | 'X') if numeric => hex = true,
            (_, ';') => {
                if body_len == 0 {
                    return None;
                }
                return Some(index + 1);
            }
            (_, ch) => {
                let valid = if hex {
                    ch.is_ascii_hexdigit()
                } else if numeric {
                    ch.is_ascii_digit()
                } else {
                    ch.is_ascii_alphanumeric()
                };
                if !valid || body_len >= 8 {
                    return None;
                }
                body_len += 1;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize should pass")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn tokens_cover_source_exactly() {
        let source = "<p class=\"x\">Hi &amp; bye</p>";
        let tokens = tokenize(source).expect("tokenize should pass");
        let reassembled: String = tokens.iter().map(|token| token.text.as_str()).collect();
        assert_eq!(reassembled, source);
    }

    #[test]
    fn start_tag_produces_open_attribute_and_close_tokens() {
        let tokens = kinds("<a href='/x' download>k</a>");
        assert!(matches!(&tokens[0], TokenKind::StartTagOpen { name } if name == "a"));
        let TokenKind::Attribute(href) = &tokens[1] else {
            panic!("expected href attribute");
        };
        assert_eq!(href.name, "href");
        assert_eq!(href.raw_value.as_deref(), Some("/x"));
        assert_eq!(href.quote, "'");
        let TokenKind::Attribute(bare) = &tokens[2] else {
            panic!("expected bare attribute");
        };
        assert_eq!(bare.name, "download");
        assert_eq!(bare.raw_value, None);
        assert!(matches!(tokens[3], TokenKind::TagClose { self_closing: false }));
        assert!(matches!(&tokens[5], TokenKind::EndTag { name } if name == "a"));
    }

    #[test]
    fn angle_brackets_inside_quoted_values_are_accepted() {
        let tokens = tokenize("<p title=\"a < b > c\"/>").expect("tokenize should pass");
        let TokenKind::Attribute(attr) = &tokens[1].kind else {
            panic!("expected attribute");
        };
        assert_eq!(attr.raw_value.as_deref(), Some("a < b > c"));
        assert!(matches!(tokens[2].kind, TokenKind::TagClose { self_closing: true }));
    }

    #[test]
    fn comment_variants_are_classified() {
        assert!(matches!(
            kinds("<!-- plain -->")[0],
            TokenKind::Comment {
                variant: CommentVariant::Standard
            }
        ));
        assert!(matches!(
            kinds("<!--! dropped -->")[0],
            TokenKind::Comment {
                variant: CommentVariant::Drop
            }
        ));
        assert!(matches!(
            kinds("<!--? verbatim -->")[0],
            TokenKind::Comment {
                variant: CommentVariant::Verbatim
            }
        ));
    }

    #[test]
    fn double_hyphen_inside_comment_is_a_hard_error() {
        let error = tokenize("<!-- a -- b -->").expect_err("should fail");
        assert!(error.to_string().contains("--"));
    }

    #[test]
    fn python_code_block_is_a_processing_instruction() {
        let tokens = tokenize("<?python x = 1 ?>").expect("tokenize should pass");
        let TokenKind::ProcessingInstruction { target, content } = &tokens[0].kind else {
            panic!("expected a processing instruction");
        };
        assert_eq!(target, "python");
        assert_eq!(content.trim(), "x = 1");
    }

    #[test]
    fn xml_declaration_cdata_and_doctype_are_recognized() {
        let source = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<x><![CDATA[a < b]]></x>";
        let tokens = kinds(source);
        assert!(matches!(tokens[0], TokenKind::XmlDecl));
        assert!(matches!(tokens[2], TokenKind::Doctype));
        assert!(tokens.iter().any(|kind| matches!(kind, TokenKind::Cdata)));
    }

    #[test]
    fn entity_references_are_separate_tokens() {
        let tokens = tokenize("a &amp; b &#169; &bogus text").expect("tokenize should pass");
        let entities: Vec<&str> = tokens
            .iter()
            .filter(|token| matches!(token.kind, TokenKind::EntityRef))
            .map(|token| token.text.as_str())
            .collect();
        assert_eq!(entities, vec!["&amp;", "&#169;"]);
    }

    #[test]
    fn carriage_return_and_tab_count_as_whitespace_in_tags() {
        let tokens = tokenize("<p\r\n\tclass=\"x\"\t>y</p>").expect("tokenize should pass");
        assert!(tokens
            .iter()
            .any(|token| matches!(&token.kind, TokenKind::Attribute(attr) if attr.name == "class")));
    }

    #[test]
    fn unterminated_constructs_cite_the_input() {
        assert!(tokenize("<p").is_err());
        assert!(tokenize("<!-- never closed").is_err());
        assert!(tokenize("<p class=\"x>").is_err());
        assert!(tokenize("</>").is_err());
    }
}
