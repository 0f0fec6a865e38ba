//! Html field sanitization applied on write.
//!
//! Deliberately conservative: strips script/style blocks, event-handler
//! attributes, and javascript: URLs. Anything richer belongs to the
//! presentation layer.

/// Sanitize one html fragment.
#[must_use]
pub fn sanitize_html(input: &str) -> String {
    let mut out = strip_block(input, "script");
    out = strip_block(&out, "style");
    out = strip_event_attrs(&out);
    out.replace("javascript:", "")
}

// Remove <tag ...>...</tag> blocks, case-insensitively.
fn strip_block(input: &str, tag: &str) -> String {
    let lower = input.to_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find(&open) {
        let start = pos + start;
        out.push_str(&input[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => {
                // Unterminated block: drop the rest.
                return out;
            }
        }
    }
    out.push_str(&input[pos..]);
    out
}

// Remove on*="..." attributes.
fn strip_event_attrs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let lower = input.to_lowercase();
    let mut pos = 0;

    while let Some(found) = lower[pos..].find(" on") {
        let attr_start = pos + found;
        // Only treat it as an attribute if an '=' follows the name.
        let after_name = lower[attr_start + 3..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .map(|i| attr_start + 3 + i);
        let Some(eq_pos) = after_name else { break };
        if bytes.get(eq_pos) != Some(&b'=') {
            out.push_str(&input[pos..=attr_start]);
            pos = attr_start + 1;
            continue;
        }
        out.push_str(&input[pos..attr_start]);
        // Skip over ="..." / ='...' / =bare.
        let mut end = eq_pos + 1;
        match bytes.get(end) {
            Some(&(q @ (b'"' | b'\''))) => {
                end += 1;
                while end < bytes.len() && bytes[end] != q {
                    end += 1;
                }
                end = (end + 1).min(bytes.len());
            }
            _ => {
                while end < bytes.len() && !bytes[end].is_ascii_whitespace() && bytes[end] != b'>' {
                    end += 1;
                }
            }
        }
        pos = end;
    }
    out.push_str(&input[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_blocks_are_removed() {
        let html = "<p>hi</p><script>alert(1)</script><p>bye</p>";
        assert_eq!(sanitize_html(html), "<p>hi</p><p>bye</p>");
    }

    #[test]
    fn event_handlers_are_removed() {
        let html = r#"<a href="/x" onclick="steal()">link</a>"#;
        assert_eq!(sanitize_html(html), r#"<a href="/x">link</a>"#);
    }

    #[test]
    fn javascript_urls_are_removed() {
        let html = r#"<a href="javascript:run()">x</a>"#;
        assert_eq!(sanitize_html(html), r#"<a href="run()">x</a>"#);
    }

    #[test]
    fn plain_markup_is_untouched() {
        let html = "<div class=\"note\"><b>bold</b> text</div>";
        assert_eq!(sanitize_html(html), html);
    }
}
