//! Bounding captured output before it lands in the step log.
//!
//! The whole step log is rewritten on every transition, so one chatty
//! installer must not bloat every later commit. The head and the tail of the
//! output are kept; the middle is replaced by a marker.

/// Keep at most `max_chars` characters of `output`.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let keep_head = max_chars / 2;
    let keep_tail = max_chars - keep_head;
    let omitted = total - max_chars;

    // Byte offsets of the cut points, always on char boundaries.
    let head_end = output
        .char_indices()
        .nth(keep_head)
        .map_or(output.len(), |(i, _)| i);
    let tail_start = output
        .char_indices()
        .nth(total - keep_tail)
        .map_or(output.len(), |(i, _)| i);

    format!(
        "{}\n... [{omitted} chars omitted] ...\n{}",
        &output[..head_end],
        &output[tail_start..]
    )
}

/// Strip ANSI colour codes and decode lossily.
pub fn clean_text(raw: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&stripped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_budget_is_unchanged() {
        assert_eq!(truncate_output("hello", 5), "hello");
        assert_eq!(truncate_output("", 0), "");
    }

    #[test]
    fn over_budget_keeps_both_ends() {
        let input = format!("{}{}{}", "A".repeat(10), "B".repeat(100), "C".repeat(10));
        let out = truncate_output(&input, 20);
        assert!(out.starts_with(&"A".repeat(10)));
        assert!(out.ends_with(&"C".repeat(10)));
        assert!(out.contains("[100 chars omitted]"));
    }

    #[test]
    fn multibyte_chars_are_counted_not_bytes() {
        let input = "é".repeat(8);
        assert_eq!(truncate_output(&input, 8), input);
        let out = truncate_output(&"€".repeat(50), 10);
        assert!(out.starts_with("€€€€€\n"));
        assert!(out.ends_with("\n€€€€€"));
    }

    #[test]
    fn ansi_codes_are_removed() {
        assert_eq!(clean_text(b"\x1b[32mok\x1b[0m"), "ok");
    }
}
