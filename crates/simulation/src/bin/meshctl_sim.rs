//! Mesh provisioning simulation CLI
//!
//! Builds a mesh of simulated lamps, provisions and groups them through the
//! client, switches them and optionally rotates the network key.

use anyhow::{bail, Context};
use clap::Parser;
use meshctl_client::ClientConfig;
use meshctl_core::Notification;
use meshctl_messages::ProvisionBearer;
use meshctl_simulation::{NetworkConfig, SimulatedDevice, SimulationRunner};
use meshctl_types::models::{
    CONFIG_SERVER, GENERIC_LEVEL_SERVER, GENERIC_ONOFF_SERVER, HEALTH_SERVER,
    LIGHT_LIGHTNESS_SERVER,
};
use meshctl_types::{
    CompositionData, DeviceUuid, ElementComposition, Features, ModelId, NetKeyIndex,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshctl-sim")]
#[command(about = "Deterministic simulation of mesh provisioning")]
#[command(version)]
struct Cli {
    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Number of lamps in range
    #[arg(short, long, default_value = "4")]
    devices: u8,

    /// Provision the first lamp over PB-GATT
    #[arg(long)]
    gatt: bool,

    /// One-way latency in milliseconds
    #[arg(long, default_value = "40")]
    latency_ms: u64,

    /// Packet loss rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    packet_loss: f64,

    /// Rotate the primary network key after provisioning
    #[arg(long)]
    rotate_key: bool,

    /// Take this many lamps out of range before rotating
    #[arg(long, default_value = "0")]
    unreachable: u8,
}

fn lamp(index: u8) -> SimulatedDevice {
    let composition = CompositionData {
        company_id: 0x05F1,
        product_id: 0x0200,
        version_id: 0x0001,
        replay_cache: 32,
        features: Features {
            relay: true,
            proxy: true,
            ..Default::default()
        },
        elements: vec![ElementComposition {
            location: 0x0100,
            models: [
                CONFIG_SERVER,
                HEALTH_SERVER,
                GENERIC_ONOFF_SERVER,
                GENERIC_LEVEL_SERVER,
                LIGHT_LIGHTNESS_SERVER,
            ]
            .into_iter()
            .map(ModelId::Sig)
            .collect(),
        }],
    };
    let mut uuid = [0u8; 16];
    uuid[0] = 0x1A;
    uuid[15] = index;
    SimulatedDevice::new(DeviceUuid::from_bytes(uuid), composition).with_rssi(-40 - index as i8)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if cli.unreachable > cli.devices {
        bail!("cannot take {} of {} lamps out of range", cli.unreachable, cli.devices);
    }

    let network = NetworkConfig::default()
        .with_seed(cli.seed)
        .with_latency(Duration::from_millis(cli.latency_ms))
        .with_packet_loss(cli.packet_loss);
    let mut runner = SimulationRunner::new(network, ClientConfig::default());

    let mut uuids = Vec::new();
    for i in 0..cli.devices {
        let mut device = lamp(i);
        if cli.gatt && i == 0 {
            device = device.with_bearer(ProvisionBearer::Gatt);
        }
        uuids.push(device.uuid());
        runner.add_device(device);
    }

    runner
        .call(|c| c.network_create("sim", "provisioner", DeviceUuid::from_bytes([0xAA; 16]), 1))
        .context("creating network")?;
    runner.run_until_idle();
    runner
        .call(|c| c.create_group("lights", None))
        .context("creating group")?;
    runner.run_until_idle();

    for (i, uuid) in uuids.iter().enumerate() {
        runner
            .call(|c| c.scan_unprovisioned(true))
            .context("starting scan")?;
        runner.run_for(Duration::from_secs(1));
        let name = format!("lamp-{}", i + 1);
        runner
            .call(|c| c.provision(&name, Some("lights"), *uuid, 0))
            .with_context(|| format!("provisioning {}", name))?;
        runner.run_until_idle();
    }

    let provisioned = runner
        .notifications()
        .iter()
        .filter(|n| {
            matches!(
                n,
                Notification::ProvisionStatus {
                    state: meshctl_core::ProvisionState::Success { .. },
                    ..
                }
            )
        })
        .count();
    info!(provisioned, "Provisioning finished");

    if runner.client().is_connected() {
        runner
            .call(|c| c.onoff_set("lights", true, None, false))
            .context("switching lights")?;
        runner.run_until_idle();
    }

    for uuid in uuids.iter().rev().take(cli.unreachable as usize) {
        runner.set_reachable(*uuid, false);
    }

    if cli.rotate_key {
        runner
            .call(|c| c.rotate_net_key(NetKeyIndex::PRIMARY))
            .context("rotating network key")?;
        runner.run_until_idle();
    }

    let stats = runner.stats();
    println!("Simulated time:      {:?}", runner.now());
    println!("Devices provisioned: {}", provisioned);
    println!("Events processed:    {}", stats.events_processed);
    println!("Messages sent:       {}", stats.messages_sent);
    println!("Messages lost:       {}", runner.network().lost());
    println!("Replies delivered:   {}", stats.replies_delivered);
    println!("Timers fired:        {}", stats.timers_fired);
    for notification in runner.notifications() {
        match notification {
            Notification::KeyRefreshComplete { net_key } => {
                println!("Key refresh complete: {}", net_key);
            }
            Notification::KeyRefreshStalled {
                net_key, lagging, ..
            } => {
                println!("Key refresh stalled:  {} ({} lagging)", net_key, lagging.len());
            }
            _ => {}
        }
    }
    Ok(())
}
