//! Preset virtual networks used across the configuration test suites.
//!
//! Each preset is an ordered [`Topology`]; listed order is provisioning
//! order, and teardown unwinds it in reverse.

use crate::netport::{DummyIf, NetDev, Route, Topology};

/// Starting ifindex for preset bridges. A bridge ifindex is allocated
/// per-namespace and will collide with an unrelated device using the same
/// index in another namespace, so presets pin a ridiculously huge base.
pub const BRIDGE_INDEX_BASE: u32 = 2_000_000_000;

fn netdev(netns: &str, netport: &str, ifa: &str) -> NetDev {
    NetDev {
        netns: netns.to_string(),
        netport: netport.to_string(),
        ifa: ifa.to_string(),
        ..NetDev::default()
    }
}

/// One flat network:
///
///     h0:net0port0 <-> h1:net0port1
pub fn one_net() -> Topology {
    Topology(vec![
        NetDev {
            remotes: vec!["10.1.0.1".to_string()],
            ..netdev("h0", "net0port0", "10.1.0.0/31")
        },
        NetDev {
            remotes: vec!["10.1.0.0".to_string()],
            ..netdev("h1", "net0port1", "10.1.0.1/31")
        },
    ])
}

/// [`one_net`] over IPv6.
pub fn one_net_ip6() -> Topology {
    Topology(vec![
        NetDev {
            remotes: vec!["fc01:1:2:3:4:5:6:2".to_string()],
            ..netdev("h0", "net0port0", "fc01:1:2:3:4:5:6:1/64")
        },
        NetDev {
            remotes: vec!["fc01:1:2:3:4:5:6:1".to_string()],
            ..netdev("h1", "net0port1", "fc01:1:2:3:4:5:6:2/64")
        },
    ])
}

/// Two networks joined by a router namespace:
///
///     h1:net0port0 <-> r:net0port1
///     h2:net1port0 <-> r:net1port1
pub fn two_nets() -> Topology {
    Topology(vec![
        NetDev {
            routes: vec![Route::new("10.1.0.2/31", "10.1.0.1")],
            remotes: vec!["10.1.0.2".to_string()],
            ..netdev("h1", "net0port0", "10.1.0.0/31")
        },
        netdev("r", "net0port1", "10.1.0.1/31"),
        NetDev {
            routes: vec![Route::new("10.1.0.0/31", "10.1.0.3")],
            remotes: vec!["10.1.0.0".to_string()],
            ..netdev("h2", "net1port0", "10.1.0.2/31")
        },
        netdev("r", "net1port1", "10.1.0.3/31"),
    ])
}

/// [`two_nets`] with each link carried on a VLAN sub-interface:
///
///     h1:net0port0.1 <-> r:net0port1.1
///     h2:net1port0.2 <-> r:net1port1.2
pub fn two_vlan_nets() -> Topology {
    Topology(vec![
        NetDev {
            vlan: 1,
            routes: vec![Route::new("10.1.0.2/31", "10.1.0.1")],
            remotes: vec!["10.1.0.2".to_string()],
            ..netdev("h1", "net0port0", "10.1.0.0/31")
        },
        NetDev {
            vlan: 1,
            ..netdev("r", "net0port1", "10.1.0.1/31")
        },
        NetDev {
            vlan: 2,
            routes: vec![Route::new("10.1.0.0/31", "10.1.0.3")],
            remotes: vec!["10.1.0.0".to_string()],
            ..netdev("h2", "net1port0", "10.1.0.2/31")
        },
        NetDev {
            vlan: 2,
            ..netdev("r", "net1port1", "10.1.0.3/31")
        },
    ])
}

/// Four networks over two hosts and a router, with synthetic interfaces
/// reached only via routes.
pub fn four_nets() -> Topology {
    Topology(vec![
        NetDev {
            dummy_ifs: vec![DummyIf::new("dummy0", "10.5.5.5")],
            routes: vec![
                Route::new("10.1.0.2/31", "10.1.0.1"),
                Route::new("10.6.6.6", "10.1.0.1"),
            ],
            remotes: vec!["10.1.0.2".to_string(), "10.6.6.6".to_string()],
            ..netdev("h1", "net0port0", "10.1.0.0/31")
        },
        NetDev {
            routes: vec![Route::new("10.5.5.5", "10.1.0.0")],
            ..netdev("r", "net0port1", "10.1.0.1/31")
        },
        NetDev {
            dummy_ifs: vec![DummyIf::new("dummy0", "10.6.6.6")],
            routes: vec![
                Route::new("10.1.0.0/31", "10.1.0.3"),
                Route::new("10.5.5.5", "10.1.0.3"),
            ],
            remotes: vec!["10.1.0.0".to_string(), "10.5.5.5".to_string()],
            ..netdev("h2", "net1port0", "10.1.0.2/31")
        },
        NetDev {
            routes: vec![Route::new("10.6.6.6", "10.1.0.2")],
            ..netdev("r", "net1port1", "10.1.0.3/31")
        },
        NetDev {
            routes: vec![
                Route::new("10.2.0.2/31", "10.2.0.1"),
                Route::new("10.1.0.0/31", "10.2.0.1"),
                Route::new("10.6.6.6", "10.2.0.1"),
            ],
            remotes: vec!["10.2.0.2".to_string()],
            ..netdev("h1", "net2port0", "10.2.0.0/31")
        },
        NetDev {
            routes: vec![
                Route::new("10.5.5.5", "10.2.0.0"),
                Route::new("10.1.0.0/31", "10.2.0.0"),
            ],
            ..netdev("r", "net2port1", "10.2.0.1/31")
        },
        NetDev {
            routes: vec![
                Route::new("10.2.0.0/31", "10.2.0.3"),
                Route::new("10.1.0.2/31", "10.2.0.3"),
                Route::new("10.5.5.5", "10.2.0.3"),
            ],
            remotes: vec!["10.2.0.0".to_string()],
            ..netdev("h2", "net3port0", "10.2.0.2/31")
        },
        NetDev {
            routes: vec![Route::new("10.6.6.6", "10.2.0.2")],
            ..netdev("r", "net3port1", "10.2.0.3/31")
        },
    ])
}

/// Hosts on VLAN sub-interfaces switched through two routed bridges.
///
/// VLAN tags start at 100: a bridge's allocated tag must not overlap with
/// the tag of a configured VLAN interface or VLAN ingress is switched as
/// bridge ingress.
pub fn bridge_nets1() -> Topology {
    Topology(vec![
        NetDev {
            vlan: 100,
            routes: vec![Route::new("10.2.0.0/24", "10.1.0.1")],
            remotes: ["10.1.0.1", "10.2.0.1", "10.2.0.2"]
                .map(String::from)
                .to_vec(),
            ..netdev("h1", "net0port0", "10.1.0.2/24")
        },
        NetDev {
            is_bridge: true,
            bridge_ifindex: BRIDGE_INDEX_BASE,
            ifname: "tb1".to_string(),
            bridge_mac: "00:00:01:b1:b1:b1".to_string(),
            remotes: ["10.1.0.2", "10.2.0.2"].map(String::from).to_vec(),
            ..netdev("r", "", "10.1.0.1/24")
        },
        NetDev {
            vlan: 100,
            upper: "tb1".to_string(),
            ..netdev("r", "net0port1", "")
        },
        NetDev {
            is_bridge: true,
            bridge_ifindex: BRIDGE_INDEX_BASE + 1,
            ifname: "tb3".to_string(),
            bridge_mac: "00:00:01:b3:b3:b3".to_string(),
            remotes: ["10.1.0.2", "10.2.0.2"].map(String::from).to_vec(),
            ..netdev("r", "", "10.2.0.1/24")
        },
        NetDev {
            vlan: 200,
            upper: "tb3".to_string(),
            ..netdev("r", "net1port1", "")
        },
        NetDev {
            vlan: 200,
            routes: vec![Route::new("10.1.0.0/24", "10.2.0.1")],
            remotes: ["10.2.0.1", "10.1.0.1", "10.1.0.2"]
                .map(String::from)
                .to_vec(),
            ..netdev("h2", "net1port0", "10.2.0.2/24")
        },
    ])
}

/// An L2 bridge between the hosts plus an L3 bridge on the router.
pub fn bridge_nets2() -> Topology {
    Topology(vec![
        NetDev {
            vlan: 100,
            routes: vec![Route::new("10.2.0.0/24", "10.1.0.1")],
            remotes: ["10.1.0.1", "10.2.0.1", "10.2.0.2"]
                .map(String::from)
                .to_vec(),
            ..netdev("h1", "net0port1", "10.1.0.2/24")
        },
        // L2 bridge
        NetDev {
            is_bridge: true,
            bridge_ifindex: BRIDGE_INDEX_BASE,
            ifname: "tb1".to_string(),
            bridge_mac: "00:00:02:b1:b1:b1".to_string(),
            routes: vec![Route::new("default", "10.1.0.1")],
            ..netdev("b1", "", "10.1.0.20/24")
        },
        NetDev {
            vlan: 100,
            upper: "tb1".to_string(),
            ..netdev("b1", "net0port0", "")
        },
        NetDev {
            vlan: 200,
            upper: "tb1".to_string(),
            ..netdev("b1", "net1port0", "")
        },
        // L3 bridge
        NetDev {
            is_bridge: true,
            bridge_ifindex: BRIDGE_INDEX_BASE + 1,
            ifname: "tb2".to_string(),
            bridge_mac: "00:00:02:b2:b2:b2".to_string(),
            remotes: ["10.1.0.2", "10.2.0.2"].map(String::from).to_vec(),
            ..netdev("r2", "", "10.1.0.1/24")
        },
        NetDev {
            vlan: 200,
            upper: "tb2".to_string(),
            ..netdev("r2", "net1port1", "")
        },
        NetDev {
            vlan: 300,
            remotes: ["10.1.0.2", "10.2.0.2"].map(String::from).to_vec(),
            ..netdev("r2", "net2port0", "10.2.0.1/24")
        },
        NetDev {
            vlan: 300,
            routes: vec![Route::new("10.1.0.0/24", "10.2.0.1")],
            remotes: ["10.2.0.1", "10.1.0.2", "10.1.0.20"]
                .map(String::from)
                .to_vec(),
            ..netdev("h3", "net2port1", "10.2.0.2/24")
        },
    ])
}
