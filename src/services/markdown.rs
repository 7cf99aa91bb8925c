//! Markdown to HTML rendering for pull request descriptions and comments.
//!
//! Covers the subset Bitbucket users write in practice: headings, paragraphs,
//! flat lists, block quotes, fenced code, rules, and inline code, emphasis and
//! links. Everything else is escaped and passed through as text.

pub fn markdown_to_html(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    let mut paragraph: Vec<&str> = Vec::new();
    let mut list: Option<&'static str> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            flush_paragraph(&mut out, &mut paragraph);
            close_list(&mut out, &mut list);
            let lang = trimmed.trim_start_matches('`').trim();
            if lang.is_empty() {
                out.push_str("<pre><code>");
            } else {
                out.push_str(&format!(
                    "<pre><code class=\"language-{}\">",
                    escape_html(lang)
                ));
            }
            i += 1;
            let mut first = true;
            while i < lines.len() && !lines[i].trim_start().starts_with("```") {
                if !first {
                    out.push('\n');
                }
                out.push_str(&escape_html(lines[i]));
                first = false;
                i += 1;
            }
            out.push_str("</code></pre>\n");
            // skip the closing fence
            i += 1;
            continue;
        }

        if trimmed.is_empty() {
            flush_paragraph(&mut out, &mut paragraph);
            close_list(&mut out, &mut list);
            i += 1;
            continue;
        }

        if let Some((level, text)) = parse_heading(trimmed) {
            flush_paragraph(&mut out, &mut paragraph);
            close_list(&mut out, &mut list);
            out.push_str(&format!("<h{level}>{}</h{level}>\n", inline_to_html(text)));
            i += 1;
            continue;
        }

        if is_rule(trimmed) {
            flush_paragraph(&mut out, &mut paragraph);
            close_list(&mut out, &mut list);
            out.push_str("<hr>\n");
            i += 1;
            continue;
        }

        if trimmed.starts_with('>') {
            flush_paragraph(&mut out, &mut paragraph);
            close_list(&mut out, &mut list);
            let mut quoted: Vec<&str> = Vec::new();
            while i < lines.len() && lines[i].trim_start().starts_with('>') {
                let content = lines[i].trim_start().trim_start_matches('>');
                quoted.push(content.strip_prefix(' ').unwrap_or(content));
                i += 1;
            }
            out.push_str("<blockquote>\n");
            out.push_str(&markdown_to_html(&quoted.join("\n")));
            out.push_str("</blockquote>\n");
            continue;
        }

        let item = parse_unordered_item(trimmed)
            .map(|content| ("ul", content))
            .or_else(|| parse_ordered_item(trimmed).map(|content| ("ol", content)));
        if let Some((tag, content)) = item {
            flush_paragraph(&mut out, &mut paragraph);
            if list != Some(tag) {
                close_list(&mut out, &mut list);
                out.push_str(&format!("<{}>\n", tag));
                list = Some(tag);
            }
            out.push_str(&format!("<li>{}</li>\n", inline_to_html(content)));
            i += 1;
            continue;
        }

        close_list(&mut out, &mut list);
        paragraph.push(trimmed);
        i += 1;
    }

    flush_paragraph(&mut out, &mut paragraph);
    close_list(&mut out, &mut list);
    out
}

fn flush_paragraph(out: &mut String, paragraph: &mut Vec<&str>) {
    if paragraph.is_empty() {
        return;
    }
    let body = paragraph
        .iter()
        .map(|line| inline_to_html(line))
        .collect::<Vec<_>>()
        .join("<br>\n");
    out.push_str(&format!("<p>{}</p>\n", body));
    paragraph.clear();
}

fn close_list(out: &mut String, list: &mut Option<&'static str>) {
    if let Some(tag) = list.take() {
        out.push_str(&format!("</{}>\n", tag));
    }
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if rest.is_empty() {
        return Some((level, ""));
    }
    rest.strip_prefix(' ').map(|text| (level, text.trim()))
}

fn is_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && ["-", "*", "_"]
            .iter()
            .any(|m| compact.chars().all(|c| c.to_string() == *m))
}

fn parse_unordered_item(line: &str) -> Option<&str> {
    ["- ", "* ", "+ "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
}

fn parse_ordered_item(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line[digits..]
        .strip_prefix(". ")
        .or_else(|| line[digits..].strip_prefix(") "))
}

fn inline_to_html(input: &str) -> String {
    let tokens = tokenize_inline(input);
    render_inline_tokens(&tokens)
}

#[derive(Debug)]
enum InlineToken<'a> {
    Text(&'a str),
    Bold(Vec<InlineToken<'a>>),
    Italic(Vec<InlineToken<'a>>),
    Code(&'a str),
    Link { text: &'a str, href: &'a str },
}

fn tokenize_inline(input: &str) -> Vec<InlineToken<'_>> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] == b'`' {
            let start = pos + 1;
            if let Some(end) = input[start..].find('`') {
                tokens.push(InlineToken::Code(&input[start..start + end]));
                pos = start + end + 1;
                continue;
            }
        }

        if let Some(marker) = double_marker_at(bytes, pos) {
            let start = pos + 2;
            if let Some(end) = input[start..].find(marker) {
                if end > 0 {
                    let inner = &input[start..start + end];
                    tokens.push(InlineToken::Bold(tokenize_inline(inner)));
                    pos = start + end + 2;
                    continue;
                }
            }
        }

        if matches!(bytes[pos], b'*' | b'_') && double_marker_at(bytes, pos).is_none() {
            let marker = bytes[pos] as char;
            let start = pos + 1;
            let opens_word = bytes.get(start).is_some_and(|b| !b.is_ascii_whitespace());
            let after_word = pos > 0 && bytes[pos - 1].is_ascii_alphanumeric();
            // snake_case identifiers are not emphasis
            if opens_word && !(marker == '_' && after_word) {
                if let Some(end) = input[start..].find(marker) {
                    if end > 0 {
                        let inner = &input[start..start + end];
                        tokens.push(InlineToken::Italic(tokenize_inline(inner)));
                        pos = start + end + 1;
                        continue;
                    }
                }
            }
        }

        if bytes[pos] == b'[' {
            if let Some((text, href, consumed)) = parse_md_link(input, pos) {
                tokens.push(InlineToken::Link { text, href });
                pos += consumed;
                continue;
            }
        }

        let start = pos;
        pos += 1;
        while pos < bytes.len() && !matches!(bytes[pos], b'`' | b'*' | b'_' | b'[') {
            pos += 1;
        }
        tokens.push(InlineToken::Text(&input[start..pos]));
    }

    tokens
}

fn double_marker_at(bytes: &[u8], pos: usize) -> Option<&'static str> {
    match (bytes.get(pos), bytes.get(pos + 1)) {
        (Some(b'*'), Some(b'*')) => Some("**"),
        (Some(b'_'), Some(b'_')) => Some("__"),
        _ => None,
    }
}

fn parse_md_link(input: &str, pos: usize) -> Option<(&str, &str, usize)> {
    let rest = &input[pos..];
    let bracket_end = rest.find(']')?;
    let text = &rest[1..bracket_end];
    let after_bracket = &rest[bracket_end + 1..];
    if !after_bracket.starts_with('(') {
        return None;
    }
    let paren_end = closing_paren(after_bracket)?;
    let href = after_bracket[1..paren_end].trim();
    Some((text, href, bracket_end + 1 + paren_end + 1))
}

/// Index of the `)` closing the `(` at the start of `input`, allowing nested
/// pairs such as `/wiki/Foo_(bar)`.
fn closing_paren(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in input.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn render_inline_tokens(tokens: &[InlineToken<'_>]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            InlineToken::Text(text) => out.push_str(&escape_html(text)),
            InlineToken::Bold(inner) => {
                out.push_str(&format!("<strong>{}</strong>", render_inline_tokens(inner)))
            }
            InlineToken::Italic(inner) => {
                out.push_str(&format!("<em>{}</em>", render_inline_tokens(inner)))
            }
            InlineToken::Code(code) => {
                out.push_str(&format!("<code>{}</code>", escape_html(code)))
            }
            InlineToken::Link { text, href } => {
                if is_safe_href(href) {
                    out.push_str(&format!(
                        "<a href=\"{}\">{}</a>",
                        escape_html(href),
                        inline_to_html(text)
                    ));
                } else {
                    out.push_str(&inline_to_html(text));
                }
            }
        }
    }
    out
}

fn is_safe_href(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    !(lower.starts_with("javascript:") || lower.starts_with("data:") || lower.starts_with("vbscript:"))
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
