use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use worldnet_common::{EntityUuid, NetworkId, PeerId, Topic, Transform, UserId};
use worldnet_net::{MemoryHub, MemoryTransport, TransportEvent};
use worldnet_sync::{Session, SyncConfig};

/// Rounds a simulation may take to settle before it is reported as stuck.
const MAX_ROUNDS: usize = 64;

#[derive(Parser)]
#[command(name = "worldnet-cli", about = "Drive in-memory world synchronization sessions")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON session configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Run the single-peer offline scene scenario
    Scenario,
    /// Simulate a host and clients spawning entities over an in-memory hub
    Simulate {
        /// Number of peers, host included
        #[arg(short, long, default_value = "3")]
        peers: usize,
        /// Entities spawned by each peer
        #[arg(short, long, default_value = "4")]
        entities: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => SyncConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("worldnet-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("net: {}", worldnet_net::crate_info());
            println!("sync: {}", worldnet_sync::crate_info());
            println!(
                "config: parent_wait_ticks={}, dedup_window={}, max_actions_per_tick={:?}",
                config.parent_wait_ticks, config.dedup_window, config.max_actions_per_tick
            );
        }
        Commands::Scenario => scenario(config)?,
        Commands::Simulate { peers, entities } => simulate(config, peers.max(1), entities)?,
    }

    Ok(())
}

fn at(x: f32) -> Transform {
    Transform {
        position: glam::Vec3::new(x, 0.0, 0.0),
        ..Transform::default()
    }
}

fn scenario(config: SyncConfig) -> anyhow::Result<()> {
    let mut session = Session::new(config, PeerId::generate(), UserId::from("offline-user"));
    let network = session.join_world_offline()?;
    println!("Offline world: network={network}, ready={}", session.is_world_ready());

    let root = EntityUuid::from_scene("level.scene", "root");
    let child = EntityUuid::from_scene("level.scene", "child");
    session.on_scene_entity_added(root.clone(), None, "level.scene", at(0.0))?;
    session.on_scene_entity_added(child.clone(), Some(root.clone()), "level.scene", at(1.0))?;
    session.tick();

    let parent = session.parent_uuid_of(&child).cloned();
    println!(
        "Scene: entities={}, child parent={}",
        session.world().entity_count(),
        parent.as_ref().map_or("<root>", EntityUuid::as_str)
    );
    println!(
        "Hierarchy: {}",
        if parent.as_ref() == Some(&root) { "OK" } else { "MISMATCH" }
    );

    session.remove_network(&network);
    println!(
        "After removal: world host id={:?}",
        session.host_id(Topic::World).map(NetworkId::as_str)
    );
    Ok(())
}

fn simulate(config: SyncConfig, peers: usize, entities: usize) -> anyhow::Result<()> {
    println!("Simulation: peers={peers}, entities per peer={entities}");
    let hub = MemoryHub::new();
    let network = NetworkId::from("sim");
    let mut sessions = Vec::with_capacity(peers);
    let mut transports = Vec::with_capacity(peers);

    let host_peer = PeerId::from("peer-0");
    let mut host = Session::new(config.clone(), host_peer.clone(), UserId::from("user-0"));
    host.host_world(network.clone())?;
    transports.push(hub.connect(host_peer.clone()));
    sessions.push(host);

    for i in 1..peers {
        let peer = PeerId::from(format!("peer-{i}"));
        let user = UserId::from(format!("user-{i}"));
        let mut client = Session::new(config.clone(), peer.clone(), user.clone());
        client.join_world_as_client(network.clone(), host_peer.clone())?;
        client.set_world_ready()?;
        transports.push(hub.connect(peer.clone()));
        sessions[0].handle_transport_event(TransportEvent::Connected {
            network: network.clone(),
            peer_id: peer,
            user_id: user,
        })?;
        sessions.push(client);
    }

    for (i, session) in sessions.iter_mut().enumerate() {
        let mut parent = None;
        for n in 0..entities {
            let uuid = EntityUuid::generate();
            session.spawn_entity(uuid.clone(), parent.take(), at((i * entities + n) as f32))?;
            // Nest every other entity under the one before it.
            if n % 2 == 0 {
                parent = Some(uuid);
            }
        }
    }

    let rounds = settle(&mut sessions, &mut transports);
    report(&sessions, rounds);

    if peers > 1 {
        let leaving = sessions.len() - 1;
        let peer_id = sessions[leaving].local_peer().clone();
        println!("Disconnecting {peer_id}");
        hub.disconnect(&peer_id);
        sessions.pop();
        transports.pop();
        sessions[0].handle_transport_event(TransportEvent::Disconnected {
            network: network.clone(),
            peer_id,
        })?;
        let rounds = settle(&mut sessions, &mut transports);
        report(&sessions, rounds);
    }
    Ok(())
}

/// Tick, flush and deliver until no peer has anything left to do.
fn settle(sessions: &mut [Session], transports: &mut [MemoryTransport]) -> usize {
    for round in 1..=MAX_ROUNDS {
        for (session, transport) in sessions.iter_mut().zip(transports.iter_mut()) {
            session.tick();
            session.flush_outgoing(transport);
        }
        let mut received = 0;
        for (session, transport) in sessions.iter_mut().zip(transports.iter_mut()) {
            received += session.receive_frames(transport.recv().into_iter().map(|(_, payload)| payload));
        }
        let idle = sessions.iter().all(|s| s.pending_actions() == 0);
        if received == 0 && idle {
            return round;
        }
    }
    tracing::warn!(rounds = MAX_ROUNDS, "simulation did not settle");
    MAX_ROUNDS
}

fn report(sessions: &[Session], rounds: usize) {
    for session in sessions {
        let stats = session.bus_stats();
        println!(
            "{}: entities={}, hash={:#x}, applied={}, duplicates={}, stale={}",
            session.local_peer(),
            session.world().entity_count(),
            session.world().state_hash(),
            stats.applied,
            stats.dropped_duplicate,
            stats.dropped_stale
        );
    }
    let converged = sessions
        .windows(2)
        .all(|pair| pair[0].world().state_hash() == pair[1].world().state_hash());
    println!(
        "Settled after {rounds} rounds, converged: {}",
        if converged { "OK" } else { "MISMATCH" }
    );
}
