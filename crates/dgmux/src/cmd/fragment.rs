use dgmux_frame::{Fragmenter, MessageIdCounter};
use serde::Serialize;

use crate::cmd::FragmentArgs;
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct PacketRow {
    message_id: u32,
    fragment_index: u32,
    more_fragments: bool,
    payload_size: usize,
    wire_size: usize,
}

#[derive(Serialize)]
struct FragmentOutput {
    message_size: usize,
    max_payload: usize,
    max_fragments: usize,
    max_message_size: usize,
    packets: Vec<PacketRow>,
}

pub fn run(args: FragmentArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = read_payload(&args)?;
    let fragmenter = Fragmenter::for_datagram_size(args.datagram_size, args.max_fragments)
        .map_err(|err| frame_error("fragmenter", err))?;
    let mut ids = MessageIdCounter::starting_at(args.message_id);
    let packets = fragmenter
        .fragment(&mut ids, &payload)
        .map_err(|err| frame_error("fragment", err))?;

    let out = FragmentOutput {
        message_size: payload.len(),
        max_payload: fragmenter.max_payload(),
        max_fragments: fragmenter.max_fragments(),
        max_message_size: fragmenter.max_message_size(),
        packets: packets
            .iter()
            .map(|p| PacketRow {
                message_id: p.message_id,
                fragment_index: p.fragment_index,
                more_fragments: p.more_fragments,
                payload_size: p.payload.len(),
                wire_size: p.wire_size(),
            })
            .collect(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["MESSAGE", "INDEX", "MORE", "PAYLOAD", "WIRE"],
            out.packets
                .iter()
                .map(|p| {
                    vec![
                        p.message_id.to_string(),
                        p.fragment_index.to_string(),
                        p.more_fragments.to_string(),
                        p.payload_size.to_string(),
                        p.wire_size.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            println!(
                "{} bytes -> {} packet(s) (max payload {}, max message {})",
                out.message_size,
                out.packets.len(),
                out.max_payload,
                out.max_message_size
            );
            for p in &out.packets {
                println!(
                    "  id={} index={} more={} payload={} wire={}",
                    p.message_id, p.fragment_index, p.more_fragments, p.payload_size, p.wire_size
                );
            }
        }
    }

    Ok(SUCCESS)
}

fn read_payload(args: &FragmentArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return std::fs::read(path)
            .map_err(|err| CliError::new(USAGE, format!("read {}: {err}", path.display())));
    }
    if let Some(size) = args.size {
        return Ok(pattern(size));
    }
    Err(CliError::new(
        USAGE,
        "one of --data, --file or --size is required",
    ))
}

/// Repeating printable bytes, so generated payloads preview as text.
pub(crate) fn pattern(size: usize) -> Vec<u8> {
    (b'a'..=b'z').cycle().take(size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_printable() {
        let bytes = pattern(30);
        assert_eq!(bytes.len(), 30);
        assert_eq!(&bytes[..3], b"abc");
        assert_eq!(bytes[26], b'a');
    }

    #[test]
    fn test_missing_payload_is_usage_error() {
        let args = FragmentArgs {
            data: None,
            file: None,
            size: None,
            datagram_size: 100,
            max_fragments: 4,
            message_id: 0,
        };
        let err = read_payload(&args).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
