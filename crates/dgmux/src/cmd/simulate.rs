use dgmux_peer::{
    Client, DisconnectReason, MuxConfig, MuxEndpoint, MuxError, MuxEvent, Server,
};
use dgmux_transport::{MemoryNetwork, MemoryTransport, PeerId};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::fragment::pattern;
use crate::cmd::SimulateArgs;
use crate::exit::{mux_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_events, print_json, print_table, EventRow, OutputFormat};

const HOST: &str = "host";

#[derive(Debug, Default, Serialize)]
struct SimulationReport {
    clients: usize,
    connected: usize,
    rejected: usize,
    sent: usize,
    delivered: usize,
    echoed: usize,
    ticks: usize,
    events: Vec<EventRow>,
}

impl SimulationReport {
    fn record(&mut self, node: &str, event: MuxEvent) {
        let server = node == HOST;
        match &event {
            MuxEvent::Connected { .. } if !server => self.connected += 1,
            MuxEvent::Disconnected {
                reason: DisconnectReason::Rejected,
                ..
            } => self.rejected += 1,
            MuxEvent::Data { .. } if server => self.delivered += 1,
            MuxEvent::Data { .. } => self.echoed += 1,
            _ => {}
        }
        self.events.push(EventRow::from_event(node, &event));
    }

    fn is_complete(&self, echo: bool) -> bool {
        self.delivered == self.sent && (!echo || self.echoed == self.delivered)
    }
}

struct Simulation {
    net: MemoryNetwork,
    server: Server<MemoryTransport>,
    clients: Vec<(String, Client<MemoryTransport>)>,
    report: SimulationReport,
}

impl Simulation {
    fn new(args: &SimulateArgs, config: MuxConfig) -> Result<Self, MuxError> {
        let net = MemoryNetwork::with_max_datagram_size(args.datagram_size);

        let mut server_config = config.clone();
        if let Some(max) = args.max_connections {
            server_config.max_connections = max;
        }
        let server = Server::new(net.endpoint(HOST), server_config)?;

        let mut clients = Vec::with_capacity(args.clients);
        for index in 1..=args.clients {
            let name = format!("client-{index}");
            let client = Client::new(net.endpoint(name.as_str()), config.clone())?;
            clients.push((name, client));
        }

        Ok(Self {
            net,
            server,
            clients,
            report: SimulationReport {
                clients: args.clients,
                ..SimulationReport::default()
            },
        })
    }

    /// One tick of the server followed by one tick of every client.
    fn tick(&mut self) -> Result<(), MuxError> {
        self.report.ticks += 1;
        self.server.poll_once()?;
        collect(&mut self.report, HOST, &mut self.server);
        for (name, client) in &mut self.clients {
            client.poll_once()?;
            collect(&mut self.report, name, client);
        }
        Ok(())
    }

    fn handshake(&mut self) -> Result<(), MuxError> {
        for (name, client) in &mut self.clients {
            client.connect(HOST, format!("{name}-session"))?;
        }
        // the server admits one client per tick
        let limit = self.clients.len() * 2 + 4;
        for _ in 0..limit {
            if self.clients.iter().all(|(_, c)| !c.is_connecting()) {
                break;
            }
            self.tick()?;
        }
        info!(
            connected = self.report.connected,
            rejected = self.report.rejected,
            "handshake phase done"
        );
        Ok(())
    }

    fn exchange(&mut self, args: &SimulateArgs) -> Result<(), MuxError> {
        for (name, client) in &mut self.clients {
            if !client.is_connected() {
                continue;
            }
            for seq in 0..args.messages {
                client.send(args.channel, &message_payload(name, seq, args.size))?;
                self.report.sent += 1;
            }
        }

        let host = PeerId::from(HOST);
        if args.reverse {
            debug!(channel = args.channel, "reversing server inbox");
            self.net.reverse_inbox(&host, args.channel);
        }
        self.server.poll_once()?;
        self.report.ticks += 1;

        let mut echoes = Vec::new();
        while let Some(event) = self.server.next_event() {
            if let MuxEvent::Data {
                connection,
                channel,
                payload,
            } = &event
            {
                if args.echo {
                    echoes.push((*connection, *channel, payload.clone()));
                }
            }
            self.report.record(HOST, event);
        }
        for (connection, channel, payload) in echoes {
            self.server.send(connection, channel, &payload)?;
        }

        if args.reverse {
            for (name, _) in &self.clients {
                self.net
                    .reverse_inbox(&PeerId::from(name.as_str()), args.channel);
            }
        }
        for (name, client) in &mut self.clients {
            client.poll_once()?;
            collect(&mut self.report, name, client);
        }
        Ok(())
    }

    fn shutdown(mut self) -> Result<SimulationReport, MuxError> {
        self.server.shutdown()?;
        collect(&mut self.report, HOST, &mut self.server);
        for (name, client) in &mut self.clients {
            client.poll_once()?;
            client.shutdown()?;
            collect(&mut self.report, name, client);
        }
        Ok(self.report)
    }
}

fn collect<E: MuxEndpoint>(report: &mut SimulationReport, node: &str, endpoint: &mut E) {
    while let Some(event) = endpoint.next_event() {
        report.record(node, event);
    }
}

/// `size` bytes starting with `<client>#<seq>:` so deliveries are traceable.
fn message_payload(client: &str, seq: usize, size: usize) -> Vec<u8> {
    let mut payload = pattern(size);
    let tag = format!("{client}#{seq}:");
    let len = tag.len().min(size);
    payload[..len].copy_from_slice(&tag.as_bytes()[..len]);
    payload
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = match &args.config {
        Some(path) => MuxConfig::from_file(path).map_err(|err| mux_error("config", err))?,
        None => MuxConfig::default(),
    };

    let report = simulate(&args, config).map_err(|err| mux_error("simulate", err))?;
    let code = if report.is_complete(args.echo) {
        SUCCESS
    } else {
        FAILURE
    };

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            print_events(&report.events, format);
            print_table(
                &["CLIENTS", "CONNECTED", "REJECTED", "SENT", "DELIVERED", "ECHOED", "TICKS"],
                vec![vec![
                    report.clients.to_string(),
                    report.connected.to_string(),
                    report.rejected.to_string(),
                    report.sent.to_string(),
                    report.delivered.to_string(),
                    report.echoed.to_string(),
                    report.ticks.to_string(),
                ]],
            );
        }
        OutputFormat::Pretty => {
            print_events(&report.events, format);
            println!(
                "clients={} connected={} rejected={} sent={} delivered={} echoed={} ticks={}",
                report.clients,
                report.connected,
                report.rejected,
                report.sent,
                report.delivered,
                report.echoed,
                report.ticks
            );
        }
    }

    Ok(code)
}

fn simulate(args: &SimulateArgs, config: MuxConfig) -> Result<SimulationReport, MuxError> {
    let mut sim = Simulation::new(args, config)?;
    sim.handshake()?;
    sim.exchange(args)?;
    sim.shutdown()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SimulateArgs {
        SimulateArgs {
            config: None,
            clients: 2,
            messages: 2,
            size: 3000,
            channel: 0,
            reverse: false,
            max_connections: None,
            datagram_size: 1170,
            echo: false,
        }
    }

    #[test]
    fn test_payload_is_tagged() {
        let payload = message_payload("client-1", 4, 20);
        assert_eq!(payload.len(), 20);
        assert!(payload.starts_with(b"client-1#4:"));
        assert_eq!(message_payload("client-1", 4, 3), b"cli");
    }

    #[test]
    fn test_every_message_is_delivered() {
        let report = simulate(&args(), MuxConfig::default()).unwrap();
        assert_eq!(report.connected, 2);
        assert_eq!(report.sent, 4);
        assert_eq!(report.delivered, 4);
        assert!(report.is_complete(false));
    }

    #[test]
    fn test_reversed_delivery_with_echo() {
        let args = SimulateArgs {
            reverse: true,
            echo: true,
            ..args()
        };
        let report = simulate(&args, MuxConfig::default()).unwrap();
        assert_eq!(report.delivered, 4);
        assert_eq!(report.echoed, 4);
    }

    #[test]
    fn test_capacity_rejects_extra_clients() {
        let args = SimulateArgs {
            clients: 3,
            max_connections: Some(1),
            ..args()
        };
        let report = simulate(&args, MuxConfig::default()).unwrap();
        assert_eq!(report.connected, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.sent, 2);
        assert_eq!(report.delivered, 2);
    }

    #[test]
    fn test_unknown_channel_fails() {
        let args = SimulateArgs {
            channel: 5,
            ..args()
        };
        let err = simulate(&args, MuxConfig::default()).unwrap_err();
        assert!(matches!(err, MuxError::UnknownChannel { channel: 5, .. }));
    }
}
