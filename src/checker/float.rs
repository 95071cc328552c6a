//! Tolerance-based output comparison for floating point answers

/// Compare outputs line by line and token by token.
///
/// Lines are split on any run of whitespace, so spacing never matters here.
/// Numeric tokens match when `|a - b| <= epsilon * (1 + max(|a|, |b|))`;
/// non-numeric tokens must be identical; a numeric token never matches a
/// non-numeric one. Line and token counts must agree.
pub fn compare(actual: &[u8], expected: &[u8], epsilon: f64) -> bool {
    let actual = String::from_utf8_lossy(actual);
    let expected = String::from_utf8_lossy(expected);

    let mut actual_lines = actual.lines();
    let mut expected_lines = expected.lines();

    loop {
        match (actual_lines.next(), expected_lines.next()) {
            (None, None) => return true,
            (Some(a), Some(e)) => {
                if !compare_line(a, e, epsilon) {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

fn compare_line(actual: &str, expected: &str, epsilon: f64) -> bool {
    let actual_tokens: Vec<&str> = actual.split_whitespace().collect();
    let expected_tokens: Vec<&str> = expected.split_whitespace().collect();

    if actual_tokens.len() != expected_tokens.len() {
        return false;
    }

    actual_tokens
        .iter()
        .zip(&expected_tokens)
        .all(|(a, e)| tokens_match(a, e, epsilon))
}

fn tokens_match(actual: &str, expected: &str, epsilon: f64) -> bool {
    match (parse_number(actual), parse_number(expected)) {
        (Some(a), Some(e)) => {
            let tolerance = epsilon * (1.0 + a.abs().max(e.abs()));
            (a - e).abs() <= tolerance
        }
        (None, None) => actual == expected,
        _ => false,
    }
}

/// NaN and infinities are treated as text
fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_within_tolerance() {
        assert!(compare(b"1.000000\n", b"1.0000009\n", EPS));
        assert!(compare(b"1000000.5\n", b"1000000.0\n", EPS));
    }

    #[test]
    fn test_outside_tolerance() {
        assert!(!compare(b"1.0\n", b"1.1\n", EPS));
        assert!(compare(b"1.0\n", b"1.1\n", 0.1));
    }

    #[test]
    fn test_textual_tokens() {
        assert!(compare(b"NaN yes 2.0\n", b"NaN yes 2\n", EPS));
        assert!(!compare(b"NaN\n", b"nan\n", EPS));
        assert!(!compare(b"1.0\n", b"one\n", EPS));
    }

    #[test]
    fn test_line_and_token_counts() {
        assert!(!compare(b"1\n2\n", b"1\n", EPS));
        assert!(!compare(b"1 2\n", b"1\n", EPS));
        assert!(compare(b"", b"", EPS));
    }

    #[test]
    fn test_whitespace_is_never_significant() {
        assert!(compare(b"  1.0   2.0 \r\n", b"1.0 2.0\n", EPS));
        assert!(compare(b"1.0 2.0 \n", b"1.0 2.0\n", EPS));
        assert!(compare(b"1.0\t2.0\n", b"1.0 2.0\n", EPS));
        assert!(compare(b" 1.0 2.0\n", b"1.0 2.0\n", EPS));
        assert!(compare(b"1.0  2.0\n", b"1.0000001 2.0\n", EPS));
    }
}
