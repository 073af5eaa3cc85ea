//! Multi-channel example: a reliable and an unreliable channel side by side,
//! with fragments delivered out of order.
//!
//! Run with:
//!   cargo run --example multi-channel --features peer

use dgmux::peer::{Client, MuxConfig, MuxEvent, Server};
use dgmux::transport::{MemoryNetwork, PeerId};

const RELIABLE: u8 = 0;
const UNRELIABLE: u8 = 1;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // small datagrams so every message spans several fragments
    let net = MemoryNetwork::with_max_datagram_size(32);
    let mut server = Server::new(net.endpoint("host"), MuxConfig::default())?;
    let mut client = Client::new(net.endpoint("guest"), MuxConfig::default())?;

    client.connect("host", "guest-multi")?;
    server.poll_once()?;
    client.poll_once()?;
    if !client.is_connected() {
        return Err("handshake did not complete".into());
    }

    client.send(RELIABLE, b"{\"action\":\"spawn\",\"entity\":\"ship\",\"x\":10,\"y\":20}")?;
    client.send(UNRELIABLE, b"position update 10,20 heading 90 speed 4")?;

    let host = PeerId::from("host");
    for channel in [RELIABLE, UNRELIABLE] {
        eprintln!(
            "[net] channel {channel}: {} fragments queued, reversing",
            net.pending(&host, channel)
        );
        net.reverse_inbox(&host, channel);
    }

    server.poll_once()?;
    for event in server.drain_events() {
        if let MuxEvent::Data {
            channel, payload, ..
        } = event
        {
            let name = match channel {
                RELIABLE => "RELIABLE",
                UNRELIABLE => "UNRELIABLE",
                _ => "UNKNOWN",
            };
            eprintln!(
                "[server] channel={name} payload={}",
                String::from_utf8_lossy(&payload)
            );
        }
    }

    server.shutdown()?;
    client.poll_once()?;
    for event in client.drain_events() {
        eprintln!("[client] {event:?}");
    }
    Ok(())
}
