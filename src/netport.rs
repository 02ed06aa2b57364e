//! The declarative model of a virtual network under test, plus the
//! logical-port lookup table.
//!
//! A [`NetDev`] describes one interface: its namespace, how it is layered
//! (plain port, VLAN sub-interface, bridge, bridge member), its addresses
//! and routes. The device kind is never declared directly; it is a pure
//! function of the declarative fields, derived at build time. A
//! [`Topology`] is an ordered list of these; order is load-bearing, since
//! provisioning walks it forward and teardown unwinds it in reverse.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Default location of the port assignment table.
pub const NETPORT_FILE: &str = "testdata/netport.toml";

/// Mapping of logical port name → physical device name, loaded once at
/// process start.
///
/// Loading panics on a missing or malformed table and on a mapped device
/// that is absent from the host: these are construction faults of the test
/// environment, not test failures.
#[derive(Debug, Clone, Default)]
pub struct PortMap {
    port_by_netport: HashMap<String, String>,
    netport_by_port: HashMap<String, String>,
}

impl PortMap {
    pub fn load() -> Self {
        Self::load_from(NETPORT_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .unwrap_or_else(|err| panic!("{}: {err}", path.display()));
        let port_by_netport: HashMap<String, String> = toml::from_str(&text)
            .unwrap_or_else(|err| panic!("{}: {err}", path.display()));
        let mut netport_by_port = HashMap::new();
        for (netport, port) in &port_by_netport {
            let sysport = Path::new("/sys/class/net").join(port);
            if let Err(err) = fs::metadata(&sysport) {
                panic!("{}: {err}", sysport.display());
            }
            netport_by_port.insert(port.clone(), netport.clone());
        }
        Self {
            port_by_netport,
            netport_by_port,
        }
    }

    /// Physical device for a logical port name.
    pub fn port(&self, netport: &str) -> Option<&str> {
        self.port_by_netport.get(netport).map(String::as_str)
    }

    /// Logical port name for a physical device.
    pub fn netport(&self, port: &str) -> Option<&str> {
        self.netport_by_port.get(port).map(String::as_str)
    }
}

/// A destination prefix routed via a gateway; applied only after the
/// owning interface has its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub gw: String,
}

impl Route {
    pub fn new(prefix: impl Into<String>, gw: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            gw: gw.into(),
        }
    }
}

/// A synthetic interface created inside the owning namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyIf {
    pub ifname: String,
    pub ifa: String,
}

impl DummyIf {
    pub fn new(ifname: impl Into<String>, ifa: impl Into<String>) -> Self {
        Self {
            ifname: ifname.into(),
            ifa: ifa.into(),
        }
    }
}

/// Derived device kind, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevKind {
    /// Plain port moved into a namespace with an address.
    Port,
    /// VLAN sub-interface on a physical link.
    VlanPort,
    /// Linux bridge device.
    Bridge,
    /// VLAN sub-interface attached to an upper bridge, no address of its own.
    BridgeMember,
}

impl DevKind {
    /// Pure derivation from the declarative fields: bridge > bridge-member
    /// > vlan-port > plain port.
    pub fn derive(is_bridge: bool, vlan: u16, upper: &str) -> Self {
        if is_bridge {
            DevKind::Bridge
        } else if vlan != 0 {
            if upper.is_empty() {
                DevKind::VlanPort
            } else {
                DevKind::BridgeMember
            }
        } else {
            DevKind::Port
        }
    }
}

/// One interface of the network under test.
///
/// Declared statically per topology; `kind` and `ifname` are filled in
/// during the build walk. Empty string and zero mean "not set".
#[derive(Debug, Clone, Default)]
pub struct NetDev {
    pub netns: String,
    pub is_bridge: bool,
    /// Caller-fixed device index for a bridge. Kernel ifindex allocation is
    /// per-namespace, so sequentially allocated bridges collide with
    /// unrelated devices in other namespaces; presets pin a huge base.
    pub bridge_ifindex: u32,
    /// Declared by some presets; not applied to the device.
    pub bridge_mac: String,
    pub vlan: u16,
    /// Lookup key into the [`PortMap`]; empty for bridges.
    pub netport: String,
    /// Resolved interface name, filled during build (preset for bridges).
    pub ifname: String,
    /// Upper bridge reference, only for members.
    pub upper: String,
    pub ifa: String,
    pub dummy_ifs: Vec<DummyIf>,
    pub routes: Vec<Route>,
    /// Peer addresses used by reachability assertions, never provisioned.
    pub remotes: Vec<String>,
    /// Derived at build time, recomputed before use.
    pub kind: Option<DevKind>,
}

impl NetDev {
    /// Recompute and store the derived kind.
    pub fn derive_kind(&mut self) -> DevKind {
        let kind = DevKind::derive(self.is_bridge, self.vlan, &self.upper);
        self.kind = Some(kind);
        kind
    }
}

/// Ordered interface list for one virtual network under test.
#[derive(Debug, Clone, Default)]
pub struct Topology(pub Vec<NetDev>);

impl Topology {
    pub fn netdevs(&self) -> &[NetDev] {
        &self.0
    }

    /// Every remote address declared in the topology with its namespace,
    /// in listed order: the ping matrix of the network.
    pub fn remotes(&self) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .flat_map(|nd| {
                nd.remotes
                    .iter()
                    .map(move |addr| (nd.netns.as_str(), addr.as_str()))
            })
            .collect()
    }
}

impl From<Vec<NetDev>> for Topology {
    fn from(netdevs: Vec<NetDev>) -> Self {
        Self(netdevs)
    }
}
