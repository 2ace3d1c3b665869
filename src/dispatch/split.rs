//! Splitting of oversized alerts
//!
//! Alerts are a header block followed by itemized lines. Chunks always start
//! with the full header and only break between lines, so every itemized line
//! lands intact in exactly one chunk.

/// Separator between the header block and the first itemized line, and between lines
pub const LINE_SEPARATOR: &str = "\n";

/// Split `header` + `lines` into messages of at most `max_chars` characters.
///
/// A single line that cannot fit next to the header is still sent on its own
/// chunk rather than cut.
pub fn split_message(header: &str, lines: &[String], max_chars: usize) -> Vec<String> {
    let header_len = header.chars().count();
    let mut chunks = Vec::new();
    let mut current = header.to_string();
    let mut current_len = header_len;
    let mut has_lines = false;

    for line in lines {
        let line_len = line.chars().count() + LINE_SEPARATOR.len();
        if has_lines && current_len + line_len > max_chars {
            chunks.push(std::mem::replace(&mut current, header.to_string()));
            current_len = header_len;
        }
        current.push_str(LINE_SEPARATOR);
        current.push_str(line);
        current_len += line_len;
        has_lines = true;
    }

    chunks.push(current);
    chunks
}

/// Itemized lines of a chunk produced by [`split_message`]
pub fn itemized_lines<'a>(chunk: &'a str, header: &str) -> Vec<&'a str> {
    chunk
        .strip_prefix(header)
        .unwrap_or(chunk)
        .split(LINE_SEPARATOR)
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("<a href=\"https://etherscan.io/tx/0x{:064x}\">tx</a> 0.0500 ETH", i))
            .collect()
    }

    #[test]
    fn test_small_message_not_split() {
        let items = lines(3);
        let chunks = split_message("<b>Header</b>", &items, 4096);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("<b>Header</b>\n"));
    }

    #[test]
    fn test_split_respects_limit_and_preserves_lines() {
        let header = "<b>Pool A</b> 120 transfers\nPattern: Uniform at 0.0500";
        let items = lines(120);
        let chunks = split_message(header, &items, 4096);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 4096);
            assert!(chunk.starts_with(header));
        }

        let rejoined: Vec<String> = chunks
            .iter()
            .flat_map(|c| itemized_lines(c, header))
            .map(str::to_string)
            .collect();
        assert_eq!(rejoined, items);
    }

    #[test]
    fn test_oversized_line_sent_alone() {
        let header = "H";
        let items = vec!["short".to_string(), "x".repeat(50), "tail".to_string()];
        let chunks = split_message(header, &items, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(itemized_lines(&chunks[1], header), vec!["x".repeat(50).as_str()]);
    }

    #[test]
    fn test_header_only() {
        let chunks = split_message("Only header", &[], 100);
        assert_eq!(chunks, vec!["Only header".to_string()]);
    }
}
