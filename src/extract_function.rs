/// Leading whitespace width in characters; a tab counts as one.
fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Recovers the lines of the function starting at (or just after) `start_line`.
///
/// Decorators from `start_line` onwards are skipped to reach the first
/// `def ` line, whose indentation bounds the body: every following line that
/// is blank or indented deeper belongs to the function, and the first other
/// line ends it. The result starts at `start_line`, so decorators are kept.
///
/// This reads indentation only. A dedented line inside a multi-line string
/// ends the body early.
///
/// Returns `(line_number, text)` pairs with 1-based line numbers, or an empty
/// vector when no `def` follows `start_line`.
pub fn extract_function_body<S: AsRef<str>>(
    src_lines: &[S],
    start_line: usize,
) -> Vec<(usize, String)> {
    if start_line == 0 {
        return Vec::new();
    }
    let first = start_line - 1;
    let text = |i: usize| src_lines[i].as_ref();

    let mut i = first;
    while i < src_lines.len() && text(i).trim().starts_with('@') {
        i += 1;
    }
    while i < src_lines.len() && !text(i).trim().starts_with("def ") {
        i += 1;
    }
    if i >= src_lines.len() {
        return Vec::new();
    }

    let def_index = i;
    let def_indent = indent_width(text(def_index));

    let end = (def_index + 1..src_lines.len())
        .find(|&k| !is_blank(text(k)) && indent_width(text(k)) <= def_indent)
        .unwrap_or(src_lines.len());

    (first..end).map(|k| (k + 1, text(k).to_string())).collect()
}
