//! Minimal HTML helpers for the rendering path.

/// Escape text for inclusion in HTML markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Convert HTML to plain text for the text-layout engine.
///
/// - Removes `<script>`/`<style>` blocks and HTML comments
/// - Converts `<br>` and block-element boundaries to newlines
/// - Strips all remaining tags
/// - Decodes the common named entities
/// - Collapses runs of blank lines to at most one
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");
    text = remove_comments(&text);

    // Tag boundaries that imply a line break.
    let mut broken = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(start) = rest.find('<') {
        broken.push_str(&rest[..start]);
        let after = &rest[start..];
        let end = after.find('>').map(|p| p + 1).unwrap_or(after.len());
        let tag = after[..end].to_ascii_lowercase();
        if is_block_boundary(&tag) {
            broken.push('\n');
        }
        rest = &after[end..];
    }
    broken.push_str(rest);

    let decoded = decode_entities(&broken);

    // Collapse whitespace per line and squeeze blank runs.
    let mut out = String::with_capacity(decoded.len());
    let mut prev_blank = true;
    for line in decoded.lines() {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if trimmed.is_empty() {
            if !prev_blank {
                out.push('\n');
                prev_blank = true;
            }
        } else {
            out.push_str(&trimmed);
            out.push('\n');
            prev_blank = false;
        }
    }
    out.trim_end().to_string()
}

fn is_block_boundary(tag: &str) -> bool {
    const BREAKING: &[&str] = &[
        "br", "p", "/p", "div", "/div", "tr", "/tr", "li", "/li", "ul", "/ul", "ol", "/ol",
        "table", "/table", "h1", "/h1", "h2", "/h2", "h3", "/h3", "h4", "/h4", "h5", "/h5",
        "h6", "/h6", "hr", "pre", "/pre", "blockquote", "/blockquote",
    ];
    let name: String = tag
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_end_matches('/')
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    BREAKING.contains(&name.as_str())
}

/// Remove an entire tag block (e.g. `<script>…</script>`), case-insensitive.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    while let Some(start) = remaining.to_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        match after.to_lowercase().find(&close) {
            Some(end) => remaining = &after[end + close.len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}

fn remove_comments(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    while let Some(start) = remaining.find("<!--") {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        match after.find("-->") {
            Some(end) => remaining = &after[end + 3..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_html_to_text_basic() {
        let text = html_to_text("<p>Hello <b>world</b></p><p>Second paragraph</p>");
        assert!(text.contains("Hello world"));
        assert!(text.contains("Second paragraph"));
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_html_to_text_entities() {
        assert_eq!(html_to_text("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
    }

    #[test]
    fn test_html_to_text_removes_scripts_and_comments() {
        let text = html_to_text("Before<script>alert('x')</script><!-- hidden -->After");
        assert_eq!(text, "BeforeAfter");
    }

    #[test]
    fn test_html_to_text_collapses_blank_runs() {
        let text = html_to_text("<p>a</p><p></p><p></p><p>b</p>");
        assert_eq!(text, "a\n\nb");
    }

    #[test]
    fn test_html_to_text_empty() {
        assert_eq!(html_to_text(""), "");
    }
}
