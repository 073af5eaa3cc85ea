//! Drive a server from a tokio task and consume its events as a stream.
//!
//! Run with:
//!   cargo run --example async-ticker --features async

use std::time::Duration;

use dgmux::peer::{run_ticker, Client, EventStream, MuxConfig, MuxEvent, Server};
use dgmux::transport::MemoryNetwork;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let net = MemoryNetwork::new();
    let server = Server::new(net.endpoint("host"), MuxConfig::default())?;
    let mut client = Client::new(net.endpoint("guest"), MuxConfig::default())?;
    client.connect("host", "guest-async")?;

    let (tx, mut events) = EventStream::channel(64);
    let cancel = CancellationToken::new();
    let ticker = tokio::spawn(run_ticker(
        server,
        Duration::from_millis(5),
        tx,
        cancel.clone(),
    ));

    let mut sent = false;
    while let Some(event) = events.recv().await {
        eprintln!("[server] {event:?}");
        match event {
            MuxEvent::Connected { .. } if !sent => {
                client.poll_once()?;
                client.send(0, b"hello from the client")?;
                sent = true;
            }
            MuxEvent::Data { .. } => cancel.cancel(),
            MuxEvent::Disconnected { .. } => break,
            _ => {}
        }
    }

    let server = ticker.await??;
    eprintln!("server shut down: {}", server.is_shut_down());
    Ok(())
}
