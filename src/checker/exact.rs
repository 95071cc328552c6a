//! Exact output comparison

/// Compare program output with expected output.
///
/// Non-strict mode ignores whitespace at line ends, CRLF line endings and
/// trailing blank lines. Strict mode is byte-for-byte.
pub fn compare(actual: &[u8], expected: &[u8], strict_space: bool) -> bool {
    if strict_space {
        return actual == expected;
    }
    normalize(actual) == normalize(expected)
}

fn normalize(data: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = data.split(|&b| b == b'\n').map(trim_end).collect();

    while lines.last().map(|line| line.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

fn trim_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    &line[..end]
}
