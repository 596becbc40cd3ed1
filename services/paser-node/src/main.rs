use anyhow::{bail, Context};
use paser_core::{logging, PaserConfig, PASER_PORT};
use paser_crypto::{load_ca_key, Ed25519Engine, NodeCredentials, TrustStore};
use paser_mesh::network::{StaticPosition, SystemClock};
use paser_mesh::{Collaborators, PaserNode};
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, error, info};

mod host;

use host::{ifindex_for, LoggingForwardingTable, OutboxTransport};

const NODE_PROTOCOL_VERSION: u32 = 1;
const MAX_DATAGRAM: usize = 65_535;
/// Upper bound on how long the loop sleeps without a pending timer.
const IDLE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--log-json") {
        logging::init_json();
    } else {
        logging::init();
    }

    let config_path = parse_config_path(&args)?;
    let config = PaserConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    run(config).await
}

async fn run(config: PaserConfig) -> anyhow::Result<()> {
    let security = &config.security;
    let credentials = NodeCredentials::load(&security.cert_path, &security.key_path)
        .context("loading node credentials")?;
    let trust = TrustStore::new(load_ca_key(&security.ca_cert_path).context("loading CA key")?)?;

    let interfaces = config.node.interfaces.clone();
    let transport = OutboxTransport::default();
    let mut node = PaserNode::new(
        config.clone(),
        Collaborators {
            engine: Box::new(Ed25519Engine::new(credentials, trust)),
            transport: Box::new(transport.clone()),
            kernel: Box::new(LoggingForwardingTable::default()),
            clock: Box::new(SystemClock),
            position: Box::new(StaticPosition(config.node.position)),
        },
    )?;

    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, PASER_PORT))
        .await
        .with_context(|| format!("binding UDP port {PASER_PORT}"))?;
    socket.set_broadcast(true)?;
    info!(
        address = %config.node.address,
        gateway = config.node.is_gateway,
        port = PASER_PORT,
        "PASER node listening"
    );

    node.start();
    flush(&socket, &transport).await;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let wait = match node.next_deadline() {
            Some(deadline) => Duration::from_millis(deadline.saturating_sub(now_ms())),
            None => IDLE_WAIT,
        };
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                let SocketAddr::V4(from) = from else {
                    continue;
                };
                if interfaces.iter().any(|i| i.addr == *from.ip()) {
                    continue;
                }
                let ifindex = ifindex_for(&interfaces, *from.ip());
                if let Err(reason) = node.handle_incoming_message(&buf[..len], ifindex) {
                    debug!(from = %from, %reason, "message dropped");
                }
            }
            _ = tokio::time::sleep(wait) => {
                node.dispatch_due_timers();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
        flush(&socket, &transport).await;
    }
    Ok(())
}

async fn flush(socket: &UdpSocket, transport: &OutboxTransport) {
    for packet in transport.drain() {
        let target = SocketAddrV4::new(packet.dest, PASER_PORT);
        if let Err(e) = socket.send_to(&packet.bytes, target).await {
            error!(dest = %packet.dest, error = %e, "send failed");
        }
    }
}

fn now_ms() -> u64 {
    use paser_mesh::Clock;
    SystemClock.now_ms()
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}
