//! Plain-text to HTML rendering for email bodies.
//!
//! Deterministic line-by-line rules: `#`/`##` prefixes become
//! headings, `-`/`*` prefixes become list items grouped into one
//! `<ul>` per contiguous block, everything else becomes a paragraph.
//! Every text segment is escaped.

/// Escape the five HTML-special characters.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render a plain-text body into an HTML fragment.
pub fn render_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut in_list = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            close_list(&mut out, &mut in_list);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("## ") {
            close_list(&mut out, &mut in_list);
            out.push_str(&format!("<h3>{}</h3>\n", html_escape(rest)));
        } else if let Some(rest) = trimmed.strip_prefix("# ") {
            close_list(&mut out, &mut in_list);
            out.push_str(&format!("<h2>{}</h2>\n", html_escape(rest)));
        } else if let Some(rest) = list_item(trimmed) {
            if !in_list {
                out.push_str("<ul>\n");
                in_list = true;
            }
            out.push_str(&format!("<li>{}</li>\n", html_escape(rest)));
        } else {
            close_list(&mut out, &mut in_list);
            out.push_str(&format!("<p>{}</p>\n", html_escape(trimmed)));
        }
    }

    // A list still open at end-of-input is closed here.
    close_list(&mut out, &mut in_list);
    out
}

fn close_list(out: &mut String, in_list: &mut bool) {
    if *in_list {
        out.push_str("</ul>\n");
        *in_list = false;
    }
}

fn list_item(line: &str) -> Option<&str> {
    line.strip_prefix("- ").or_else(|| line.strip_prefix("* "))
}
