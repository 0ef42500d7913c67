//! Simulated radio network: the local device, the devices in range and
//! delivery of configuration and model traffic between them.

use crate::device::SimulatedDevice;
use meshctl_core::Event;
use meshctl_messages::{ConfigRequest, ModelRequest, ProvisioningData};
use meshctl_types::models::{CONFIG_CLIENT, CONFIG_SERVER, GENERIC_ONOFF_CLIENT, HEALTH_SERVER};
use meshctl_types::{
    Address, AppKeyIndex, CompositionData, DeviceUuid, ElementComposition, Features, Key128,
    ModelId, NetKeyIndex,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::trace;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// One-way over-the-air latency.
    pub latency: Duration,

    /// Latency variance as a fraction of the base latency (0.0 - 1.0).
    pub jitter_fraction: f64,

    /// Probability that a message (request or reply) is lost.
    pub packet_loss_rate: f64,

    /// Time for the local core to process a message.
    pub local_latency: Duration,

    /// Random seed for deterministic simulation.
    pub seed: u64,

    /// Composition of the local provisioner device.
    pub local_composition: CompositionData,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(40),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
            local_latency: Duration::from_millis(1),
            seed: 12345,
            local_composition: provisioner_composition(),
        }
    }
}

impl NetworkConfig {
    /// Set the one-way latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the latency jitter.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Set the packet loss rate.
    pub fn with_packet_loss(mut self, rate: f64) -> Self {
        self.packet_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the local device's composition.
    pub fn with_local_composition(mut self, composition: CompositionData) -> Self {
        self.local_composition = composition;
        self
    }
}

/// Composition of a typical provisioner: configuration client and server,
/// health and a generic client.
pub fn provisioner_composition() -> CompositionData {
    CompositionData {
        company_id: 0x05F1,
        product_id: 0x0100,
        version_id: 0x0001,
        replay_cache: 64,
        features: Features::default(),
        elements: vec![ElementComposition {
            location: 0x0000,
            models: [CONFIG_SERVER, CONFIG_CLIENT, HEALTH_SERVER, GENERIC_ONOFF_CLIENT]
                .into_iter()
                .map(ModelId::Sig)
                .collect(),
        }],
    }
}

/// The devices of the simulated mesh.
pub struct SimulatedNetwork {
    config: NetworkConfig,
    rng: ChaCha8Rng,
    local: SimulatedDevice,
    devices: Vec<SimulatedDevice>,
    lost: u64,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));
        let local = SimulatedDevice::new(DeviceUuid::default(), config.local_composition.clone());
        Self {
            config,
            rng,
            local,
            devices: Vec::new(),
            lost: 0,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Place a device in range.
    pub fn add_device(&mut self, device: SimulatedDevice) {
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    pub fn device(&self, uuid: DeviceUuid) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.uuid() == uuid)
    }

    pub fn device_mut(&mut self, uuid: DeviceUuid) -> Option<&mut SimulatedDevice> {
        self.devices.iter_mut().find(|d| d.uuid() == uuid)
    }

    /// Remote device owning an element address.
    pub fn device_at(&self, address: Address) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.owns(address))
    }

    pub fn local(&self) -> &SimulatedDevice {
        &self.local
    }

    /// Messages lost in transit so far.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Give the local device the identity the open network assigns it.
    pub fn attach_local(&mut self, unicast: Address, net_key: Key128, device_key: Key128) {
        if self.local.unicast() == Some(unicast) {
            return;
        }
        self.local.provision(
            &ProvisioningData {
                net_key,
                net_key_index: NetKeyIndex::PRIMARY,
                key_refresh: false,
                iv_update: false,
                iv_index: 0,
                unicast,
            },
            device_key,
        );
    }

    /// First reachable proxy holding the network key.
    pub fn proxy_for(&self, net_key: NetKeyIndex) -> Option<Address> {
        self.devices
            .iter()
            .filter(|d| d.is_reachable() && d.is_proxy() && d.net_key(net_key).is_some())
            .find_map(|d| d.unicast())
    }

    /// Whether a node accepts a proxy connection by node identity.
    pub fn accepts_identity(&self, unicast: Address) -> bool {
        self.device_at(unicast)
            .map(|d| d.is_reachable() && d.is_proxy() && d.unicast() == Some(unicast))
            .unwrap_or(false)
    }

    /// Unprovisioned devices within range.
    pub fn beacons(&self) -> impl Iterator<Item = &SimulatedDevice> {
        self.devices
            .iter()
            .filter(|d| d.is_reachable() && !d.is_provisioned())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Randomness
    // ═══════════════════════════════════════════════════════════════════════

    /// One-way latency with jitter; local delivery has none.
    pub fn hop(&mut self, local: bool) -> Duration {
        if local {
            return self.config.local_latency;
        }
        let base = self.config.latency.as_secs_f64();
        let jitter = self.config.jitter_fraction;
        let factor = if jitter > 0.0 {
            1.0 + self.rng.gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(base * factor)
    }

    /// Whether the next over-the-air transmission is lost.
    fn drop_packet(&mut self) -> bool {
        let rate = self.config.packet_loss_rate;
        let lost = rate > 0.0 && self.rng.gen_bool(rate);
        if lost {
            self.lost += 1;
        }
        lost
    }

    /// Fresh device key for a provisioning handshake.
    pub fn random_key(&mut self) -> Key128 {
        Key128::random(&mut self.rng)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery
    // ═══════════════════════════════════════════════════════════════════════

    /// Deliver a configuration request and collect the reply events with
    /// their delay.
    ///
    /// The request and the reply may each be lost; a lost reply still leaves
    /// the request applied.
    pub fn deliver_config(
        &mut self,
        dst: Address,
        request: &ConfigRequest,
        local: bool,
    ) -> Vec<(Duration, Event)> {
        let rtt = self.hop(local) + self.hop(local);
        let request_lost = !local && self.drop_packet();
        let reply_lost = !local && self.drop_packet();
        let device = if local {
            Some(&mut self.local)
        } else {
            self.devices.iter_mut().find(|d| d.owns(dst))
        };
        let Some(device) = device else {
            trace!(dst = %dst, "No device at destination");
            return vec![];
        };
        if !device.is_reachable() || request_lost {
            return vec![];
        }
        let seq = device.next_seq();
        let Some(status) = device.handle_config(request) else {
            return vec![];
        };
        if reply_lost {
            return vec![];
        }
        let mut out = Vec::with_capacity(2);
        if !local {
            out.push((
                rtt,
                Event::SeqChanged {
                    src: dst,
                    seq,
                    previous_iv: false,
                },
            ));
        }
        out.push((rtt, Event::ConfigStatus { src: dst, status }));
        out
    }

    /// Deliver an application message to every element it addresses.
    pub fn deliver_model(
        &mut self,
        dst: Address,
        request: &ModelRequest,
        app_key: AppKeyIndex,
        acknowledged: bool,
        local: bool,
    ) -> Vec<(Duration, Event)> {
        let mut out = Vec::new();
        if local || !dst.is_unicast() {
            let rtt = self.hop(true) + self.hop(true);
            let delivery = Delivery {
                dst,
                request,
                app_key,
                acknowledged,
                rtt,
                over_air: false,
            };
            delivery.collect(&mut self.local, &mut out);
        }
        if local {
            return out;
        }
        for i in 0..self.devices.len() {
            let rtt = self.hop(false) + self.hop(false);
            let lost = self.drop_packet();
            let device = &mut self.devices[i];
            if !device.is_reachable() || lost {
                continue;
            }
            let delivery = Delivery {
                dst,
                request,
                app_key,
                acknowledged,
                rtt,
                over_air: true,
            };
            delivery.collect(device, &mut out);
        }
        out
    }
}

/// One application message on its way to a device.
struct Delivery<'a> {
    dst: Address,
    request: &'a ModelRequest,
    app_key: AppKeyIndex,
    acknowledged: bool,
    rtt: Duration,
    over_air: bool,
}

impl Delivery<'_> {
    fn collect(&self, device: &mut SimulatedDevice, out: &mut Vec<(Duration, Event)>) {
        for element in device.model_targets(self.dst, self.request, self.app_key) {
            let seq = device.next_seq();
            let Some(status) = device.handle_model(self.request, self.acknowledged) else {
                continue;
            };
            if self.over_air {
                out.push((
                    self.rtt,
                    Event::SeqChanged {
                        src: element,
                        seq,
                        previous_iv: false,
                    },
                ));
            }
            out.push((self.rtt, Event::ModelStatus { src: element, status }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_messages::ConfigStatus;
    use meshctl_test_helpers::{lamp_composition, test_key, test_uuid};

    fn lamp_at(unicast: u16) -> SimulatedDevice {
        let mut device = SimulatedDevice::new(test_uuid(unicast as u8), lamp_composition());
        device.provision(
            &ProvisioningData {
                net_key: test_key(1),
                net_key_index: NetKeyIndex::PRIMARY,
                key_refresh: false,
                iv_update: false,
                iv_index: 0,
                unicast: Address(unicast),
            },
            test_key(unicast as u8),
        );
        device
    }

    #[test]
    fn test_latency_is_deterministic() {
        let config = NetworkConfig::default().with_seed(7);
        let mut a = SimulatedNetwork::new(config.clone());
        let mut b = SimulatedNetwork::new(config);
        let first: Vec<_> = (0..5).map(|_| a.hop(false)).collect();
        let second: Vec<_> = (0..5).map(|_| b.hop(false)).collect();
        assert_eq!(first, second);
        assert_eq!(a.hop(true), Duration::from_millis(1));
    }

    #[test]
    fn test_config_reply_with_sequence() {
        let mut network = SimulatedNetwork::new(NetworkConfig::default().with_jitter(0.0));
        network.add_device(lamp_at(0x0010));

        let events = network.deliver_config(Address(0x0010), &ConfigRequest::DefaultTtlSet(9), false);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, Duration::from_millis(80));
        assert!(matches!(
            events[0].1,
            Event::SeqChanged { seq: 1, .. }
        ));
        assert_eq!(
            events[1].1,
            Event::ConfigStatus {
                src: Address(0x0010),
                status: ConfigStatus::DefaultTtl(9)
            }
        );
        assert_eq!(network.device_at(Address(0x0010)).and_then(|d| d.default_ttl()), Some(9));
    }

    #[test]
    fn test_unreachable_device_is_silent() {
        let mut network = SimulatedNetwork::new(NetworkConfig::default());
        let mut lamp = lamp_at(0x0010);
        lamp.set_reachable(false);
        network.add_device(lamp);
        assert!(network
            .deliver_config(Address(0x0010), &ConfigRequest::BeaconSet(false), false)
            .is_empty());
        assert_eq!(network.proxy_for(NetKeyIndex::PRIMARY), None);
    }

    #[test]
    fn test_total_loss() {
        let mut network = SimulatedNetwork::new(NetworkConfig::default().with_packet_loss(1.0));
        network.add_device(lamp_at(0x0010));
        assert!(network
            .deliver_config(Address(0x0010), &ConfigRequest::BeaconSet(false), false)
            .is_empty());
        assert_eq!(network.lost(), 2);
        // The local device is not on the air.
        network.attach_local(Address(0x0001), test_key(1), test_key(3));
        let events = network.deliver_config(Address(0x0001), &ConfigRequest::BeaconSet(false), true);
        assert_eq!(
            events,
            vec![(
                Duration::from_millis(2),
                Event::ConfigStatus {
                    src: Address(0x0001),
                    status: ConfigStatus::Beacon(false)
                }
            )]
        );
    }
}
