//! Alert text rendering (Telegram HTML)

use chrono::DateTime;

use super::grouping::{counterparty, TransactionGroup};
use crate::config::{WatchKind, WatchedAddress};
use crate::dispatch::split_message;
use crate::pattern::Classification;

/// A rendered alert: header block plus one itemized line per transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub header: String,
    pub lines: Vec<String>,
}

impl Alert {
    /// Messages ready for the dispatcher, split at line boundaries
    pub fn to_messages(&self, max_chars: usize) -> Vec<String> {
        split_message(&self.header, &self.lines, max_chars)
    }
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// `0x1234…abcd`
pub fn short_address(address: &str) -> String {
    if address.len() <= 12 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}

fn kind_label(kind: WatchKind) -> &'static str {
    match kind {
        WatchKind::External => "transactions",
        WatchKind::Internal => "internal transfers",
    }
}

pub fn render_group(
    watched: &WatchedAddress,
    group: &TransactionGroup,
    classification: &Classification,
    explorer_url: &str,
) -> Alert {
    let explorer = explorer_url.trim_end_matches('/');
    let when = group
        .latest_timestamp()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown time".to_string());

    let header = format!(
        "🔔 <b>{}</b> {}\n\
         Blocks {}-{} · {} txs · {:.4} ETH\n\
         Pattern: {}\n\
         Tier: {}\n\
         ⏰ {}",
        escape_html(&watched.name),
        kind_label(watched.kind),
        group.first_block(),
        group.last_block(),
        group.len(),
        group.total_eth(),
        classification.describe(),
        classification.range,
        when,
    );

    let lines = group
        .transactions
        .iter()
        .map(|tx| {
            let wallet = escape_html(counterparty(tx, watched.kind));
            format!(
                "{:.6} ETH · <a href=\"{}/address/{}\">{}</a> · <a href=\"{}/tx/{}\">tx</a>",
                tx.value_eth(),
                explorer,
                wallet,
                short_address(&wallet),
                explorer,
                escape_html(&tx.hash),
            )
        })
        .collect();

    Alert { header, lines }
}

/// Side-channel message naming the wallet that received the smallest value
pub fn render_min_recipient(watched: &WatchedAddress, group: &TransactionGroup) -> Option<String> {
    let tx = group.min_value_transaction()?;
    Some(format!(
        "📉 <b>{}</b> min {:.6} ETH\n<code>{}</code>\nblock {}",
        escape_html(&watched.name),
        tx.value_eth(),
        escape_html(counterparty(tx, watched.kind)),
        tx.block_number,
    ))
}

/// Prepended when an address produced more alerts than are shown
pub fn truncation_notice(watched: &WatchedAddress, found: usize, shown: usize) -> String {
    format!(
        "⚠️ <b>{}</b>: {} found, showing latest {}",
        escape_html(&watched.name),
        found,
        shown
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::split::itemized_lines;
    use crate::pattern::classify;
    use crate::source::Transaction;

    fn watched() -> WatchedAddress {
        WatchedAddress {
            name: "Pool <A>".into(),
            address: "0x1111111111111111111111111111111111111111".into(),
            kind: WatchKind::Internal,
        }
    }

    fn group(n: usize) -> TransactionGroup {
        TransactionGroup {
            key: 100,
            transactions: (0..n)
                .map(|i| Transaction {
                    block_number: 100 + i as u64 % 50,
                    timestamp: 1_700_000_000,
                    hash: format!("0x{:064x}", i),
                    from: "0x1111111111111111111111111111111111111111".into(),
                    to: format!("0x{:040x}", i + 1),
                    value: 50_000_000_000_000_000,
                    is_error: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_group() {
        let g = group(3);
        let c = classify(&g.values_eth());
        let alert = render_group(&watched(), &g, &c, "https://etherscan.io/");

        assert!(alert.header.contains("Pool &lt;A&gt;"));
        assert!(alert.header.contains("3 txs"));
        assert!(alert.header.contains("Uniform at 0.0500"));
        assert!(alert.header.contains("Tier: middle"));
        assert!(alert.header.contains("2023-11-14"));
        assert_eq!(alert.lines.len(), 3);
        assert!(alert.lines[0].starts_with("0.050000 ETH"));
        assert!(alert.lines[0].contains("https://etherscan.io/tx/0x"));

        let messages = alert.to_messages(4096);
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].contains("\n\n"));
        assert!(messages[0].contains("UTC\n0.050000 ETH"));
    }

    #[test]
    fn test_large_alert_splits_without_losing_lines() {
        let g = group(200);
        let c = classify(&g.values_eth());
        let alert = render_group(&watched(), &g, &c, "https://etherscan.io");
        let messages = alert.to_messages(4096);

        assert!(messages.len() > 1);
        let rejoined: Vec<&str> = messages
            .iter()
            .flat_map(|m| itemized_lines(m, &alert.header))
            .collect();
        assert_eq!(rejoined, alert.lines.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn test_min_recipient() {
        let mut g = group(3);
        g.transactions[1].value = 30_000_000_000_000_000;
        let msg = render_min_recipient(&watched(), &g).unwrap();
        assert!(msg.contains("0.030000 ETH"));
        assert!(msg.contains(&g.transactions[1].to));

        let empty = TransactionGroup { key: 0, transactions: vec![] };
        assert!(render_min_recipient(&watched(), &empty).is_none());
    }

    #[test]
    fn test_short_address_and_escape() {
        assert_eq!(
            short_address("0x1234567890abcdef1234567890abcdef12345678"),
            "0x1234…5678"
        );
        assert_eq!(short_address("0x12"), "0x12");
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_truncation_notice() {
        assert_eq!(
            truncation_notice(&watched(), 8, 5),
            "⚠️ <b>Pool &lt;A&gt;</b>: 8 found, showing latest 5"
        );
    }
}
