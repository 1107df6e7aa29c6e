//! Small text helpers shared by the script runner and snippet catalog.

/// Strip the minimum common leading whitespace from every non-blank line.
///
/// Lets callers write indented Python source inside Rust string literals
/// without the device seeing an unexpected indent.
pub fn dedent(source: &str) -> String {
    let min_indent = source
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    if min_indent == 0 {
        return source.to_string();
    }

    let mut out = source
        .lines()
        .map(|l| {
            // Blank lines may be shorter than the common indent.
            let strip = l.chars().take_while(|c| c.is_whitespace()).count().min(min_indent);
            l.chars().skip(strip).collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n");
    if source.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Quote `s` as a single-quoted Python string literal.
///
/// Every remote path travels through this helper before being spliced
/// into a snippet, so a quote or backslash in a filename cannot break
/// out of the literal.
pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Last non-empty line of a traceback, i.e. the exception class and message.
pub fn exception_line(stderr: &str) -> Option<String> {
    stderr.lines().rev().map(str::trim_end).find(|l| !l.is_empty()).map(str::to_string)
}
