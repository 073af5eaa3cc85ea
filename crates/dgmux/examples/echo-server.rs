//! Minimal echo server: one client connects over the in-memory network and
//! every message it sends comes back.
//!
//! Run with:
//!   cargo run --example echo-server --features peer

use dgmux::peer::{Client, MuxConfig, MuxEvent, Server};
use dgmux::transport::MemoryNetwork;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let net = MemoryNetwork::new();
    let mut server = Server::new(net.endpoint("host"), MuxConfig::default())?;
    let mut client = Client::new(net.endpoint("guest"), MuxConfig::default())?;

    client.connect("host", "guest-echo")?;
    while !client.is_connected() {
        server.poll_once()?;
        client.poll_once()?;
    }
    eprintln!("Client connected as {:?}", client.connection());

    let big = "x".repeat(4000);
    for message in ["hello", "world", big.as_str()] {
        client.send(0, message.as_bytes())?;
    }

    server.poll_once()?;
    while let Some(event) = server.next_event() {
        match event {
            MuxEvent::Data {
                connection,
                channel,
                payload,
            } => {
                eprintln!(
                    "Received {} bytes on channel {channel} from {connection}",
                    payload.len()
                );
                server.send(connection, channel, &payload)?;
            }
            other => eprintln!("Server event: {other:?}"),
        }
    }

    client.poll_once()?;
    for event in client.drain_events() {
        if let MuxEvent::Data { payload, .. } = event {
            eprintln!("Echo: {} bytes", payload.len());
        }
    }

    client.disconnect()?;
    server.poll_once()?;
    for event in server.drain_events() {
        eprintln!("Server event: {event:?}");
    }
    Ok(())
}
