/// Escape character data for content position: `<`, `>`, `&`, `"`
/// become entities.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape an attribute value. `&` is re-escaped only where it does not
/// already open a valid entity reference, so pre-escaped values pass
/// through unchanged.
pub fn escape_attribute(text: &str, quote: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (index, ch) in text.char_indices() {
        match ch {
            '&' => {
                if entity_follows(&text[index..]) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quote != "'" => out.push_str("&quot;"),
            '\'' if quote == "'" => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn entity_follows(rest: &str) -> bool {
    let Some(close) = rest.find(';') else {
        return false;
    };
    if close < 2 || close > 10 {
        return false;
    }
    let body = &rest[1..close];
    if let Some(digits) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        return !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_hexdigit());
    }
    if let Some(digits) = body.strip_prefix('#') {
        return !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit());
    }
    body.chars().all(|ch| ch.is_ascii_alphanumeric())
        && body.chars().next().is_some_and(|ch| ch.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_escaping_covers_the_four_characters() {
        assert_eq!(escape_html("a < b & c > \"d\""), "a &lt; b &amp; c &gt; &quot;d&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn attribute_escaping_preserves_existing_entities() {
        assert_eq!(escape_attribute("a &amp; b", "\""), "a &amp; b");
        assert_eq!(escape_attribute("a & b", "\""), "a &amp; b");
        assert_eq!(escape_attribute("x &#169; &bad &#x1F;", "\""), "x &#169; &amp;bad &#x1F;");
    }

    #[test]
    fn attribute_escaping_respects_the_quote_style() {
        assert_eq!(escape_attribute("say \"hi\"", "\""), "say &quot;hi&quot;");
        assert_eq!(escape_attribute("it's", "'"), "it&#39;s");
        assert_eq!(escape_attribute("say \"hi\"", "'"), "say \"hi\"");
    }
}
