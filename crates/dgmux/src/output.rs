use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dgmux_peer::MuxEvent;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One event as reported by `simulate`.
#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub node: String,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventRow {
    pub fn from_event(node: &str, event: &MuxEvent) -> Self {
        let mut row = Self {
            node: node.to_string(),
            event: event.kind(),
            connection: event.connection().map(|c| c.get()),
            channel: None,
            size: None,
            detail: None,
        };
        match event {
            MuxEvent::Connected { .. } => {}
            MuxEvent::Disconnected { reason, .. } => row.detail = Some(reason.to_string()),
            MuxEvent::Data {
                channel, payload, ..
            } => {
                row.channel = Some(*channel);
                row.size = Some(payload.len());
                row.detail = Some(payload_preview(payload));
            }
            MuxEvent::Error { code, message, .. } => {
                row.detail = Some(format!("{code}: {message}"));
            }
        }
        row
    }
}

/// Print a serializable document as a single JSON line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Print rows under `header` as a table.
pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn print_events(rows: &[EventRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => print_table(
            &["NODE", "EVENT", "CONN", "CHANNEL", "SIZE", "DETAIL"],
            rows.iter()
                .map(|r| {
                    vec![
                        r.node.clone(),
                        r.event.to_string(),
                        opt(r.connection),
                        opt(r.channel),
                        opt(r.size),
                        r.detail.clone().unwrap_or_default(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            for r in rows {
                let mut line = format!("{} {}", r.node, r.event);
                if let Some(connection) = r.connection {
                    line.push_str(&format!(" connection={connection}"));
                }
                if let Some(channel) = r.channel {
                    line.push_str(&format!(" channel={channel}"));
                }
                if let Some(size) = r.size {
                    line.push_str(&format!(" size={size}"));
                }
                if let Some(detail) = &r.detail {
                    line.push_str(&format!(" ({detail})"));
                }
                println!("{line}");
            }
        }
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Text payloads are shown as-is up to 32 characters, anything else by size.
pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if text.chars().count() > 32 => {
            format!("{}...", text.chars().take(32).collect::<String>())
        }
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dgmux_peer::{ConnectionId, DisconnectReason};

    #[test]
    fn test_preview_truncates_long_text() {
        assert_eq!(payload_preview(b"short"), "short");
        let long = "x".repeat(40);
        assert_eq!(payload_preview(long.as_bytes()), format!("{}...", "x".repeat(32)));
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn test_event_rows_carry_event_fields() {
        let data = EventRow::from_event(
            "host",
            &MuxEvent::Data {
                connection: ConnectionId::new(3),
                channel: 1,
                payload: Bytes::from_static(b"hi"),
            },
        );
        assert_eq!(data.event, "data");
        assert_eq!(data.connection, Some(3));
        assert_eq!(data.channel, Some(1));
        assert_eq!(data.size, Some(2));

        let gone = EventRow::from_event(
            "client-1",
            &MuxEvent::Disconnected {
                connection: ConnectionId::new(1),
                reason: DisconnectReason::Rejected,
            },
        );
        assert_eq!(gone.detail.as_deref(), Some("connection rejected by server"));
        let json = serde_json::to_value(&gone).unwrap();
        assert!(json.get("channel").is_none());
    }
}
