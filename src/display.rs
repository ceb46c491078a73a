// src/display.rs
//
// Console rendering of captured messages and session summaries.

use crate::io::{ConsumerSummary, LinkSummary, Message};

/// Render a byte as 8 glyphs, MSB first: 1 -> '■', 0 -> '·'.
pub fn binary_glyphs(byte: u8) -> String {
    (0..8)
        .rev()
        .map(|bit| if byte & (1 << bit) != 0 { '■' } else { '·' })
        .collect()
}

/// `ttyUSB0 001.25s [ 3]: 81 01 ab ■······■ ·······■ ■·■·■·■■`
pub fn format_message(message: &Message) -> String {
    let mut line = format!(
        "{} {:06.2}s [{:2}]:",
        message.link,
        message.relative_secs(),
        message.payload.len()
    );
    for byte in &message.payload {
        line.push(' ');
        line.push_str(&hex::encode([*byte]));
    }
    for byte in &message.payload {
        line.push(' ');
        line.push_str(&binary_glyphs(*byte));
    }
    line
}

pub fn format_message_json(message: &Message) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

/// `totals: ttyA 12, ttyB 3`
pub fn format_totals(links: &[LinkSummary]) -> String {
    let parts: Vec<String> = links
        .iter()
        .map(|l| format!("{} {}", l.link, l.stats.total_frame_count))
        .collect();
    format!("totals: {}", parts.join(", "))
}

pub fn format_summary_json(links: &[LinkSummary], consumer: &ConsumerSummary) -> String {
    serde_json::json!({ "links": links, "consumer": consumer }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{CaptureStats, Termination};

    #[test]
    fn test_binary_glyphs() {
        assert_eq!(binary_glyphs(0x00), "········");
        assert_eq!(binary_glyphs(0xFF), "■■■■■■■■");
        assert_eq!(binary_glyphs(0x81), "■······■");
    }

    #[test]
    fn test_format_message() {
        let msg = Message {
            relative_us: 1_250_000,
            link: "ttyUSB0".to_string(),
            payload: vec![0x81, 0x01],
        };
        assert_eq!(
            format_message(&msg),
            "ttyUSB0 001.25s [ 2]: 81 01 ■······■ ·······■"
        );
    }

    #[test]
    fn test_format_empty_payload() {
        let msg = Message {
            relative_us: 0,
            link: "a".to_string(),
            payload: vec![],
        };
        assert_eq!(format_message(&msg), "a 000.00s [ 0]:");
    }

    #[test]
    fn test_format_totals() {
        let links = vec![
            LinkSummary {
                link: "ttyA".to_string(),
                stats: CaptureStats {
                    total_frame_count: 12,
                    ..Default::default()
                },
                termination: Some(Termination::ClosedByCaller),
            },
            LinkSummary {
                link: "ttyB".to_string(),
                stats: CaptureStats::default(),
                termination: None,
            },
        ];
        assert_eq!(format_totals(&links), "totals: ttyA 12, ttyB 0");

        let json: serde_json::Value =
            serde_json::from_str(&format_summary_json(&links, &ConsumerSummary::default())).unwrap();
        assert_eq!(json["links"][0]["stats"]["total_frame_count"], 12);
    }
}
