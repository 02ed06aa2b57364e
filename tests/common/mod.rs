//! Shared utilities for the namespace integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use switch_test_network::PortMap;

static NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Namespace manipulation needs root and the `ip` tool. Returns `true` if
/// the test should be skipped (prints the reason to stderr). Use at the
/// top of every test.
pub fn skip_unless_root() -> bool {
    let is_root = Command::new("id")
        .arg("-u")
        .output()
        .is_ok_and(|out| out.stdout == b"0\n");
    if !is_root {
        eprintln!("Skipping: requires root");
        return true;
    }
    let has_ip = Command::new("ip")
        .args(["netns", "list"])
        .output()
        .is_ok_and(|out| out.status.success());
    if !has_ip {
        eprintln!("Skipping: ip tool unavailable");
        return true;
    }
    false
}

/// Unique interface name, within the 15-char netdev limit.
pub fn unique(prefix: &str) -> String {
    let seq = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() % 0xffff;
    let name = format!("{prefix}{pid:x}_{seq}");
    if name.len() > 15 {
        name[..15].to_string()
    } else {
        name
    }
}

fn ip(args: &[&str]) {
    let output = Command::new("ip").args(args).output().expect("run ip");
    assert!(
        output.status.success(),
        "ip {}: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr).trim()
    );
}

/// Host-side stand-ins for patched switch ports: each "net" is a veth pair
/// whose ends play the two physical ports of that link. Deleted on drop.
pub struct PortFixture {
    pub ports: PortMap,
    a_ends: Vec<String>,
    _dir: tempfile::TempDir,
}

impl PortFixture {
    /// Create `nets` veth pairs and a port table mapping
    /// `net<i>port0`/`net<i>port1` onto their ends.
    pub fn new(nets: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut table = String::new();
        let mut a_ends = Vec::new();
        for net in 0..nets {
            let a = unique("va");
            let b = unique("vb");
            // stale pairs with these unique names can't exist; just create
            ip(&["link", "add", &a, "type", "veth", "peer", "name", &b]);
            table.push_str(&format!("net{net}port0 = \"{a}\"\n"));
            table.push_str(&format!("net{net}port1 = \"{b}\"\n"));
            a_ends.push(a);
        }
        let path = dir.path().join("netport.toml");
        let mut file = std::fs::File::create(&path).expect("write port table");
        file.write_all(table.as_bytes()).expect("write port table");
        let ports = PortMap::load_from(&path);
        Self {
            ports,
            a_ends,
            _dir: dir,
        }
    }
}

impl Drop for PortFixture {
    fn drop(&mut self) {
        for a in &self.a_ends {
            // deleting one end removes the pair; ignore already-gone pairs
            let _ = Command::new("ip")
                .args(["link", "del", a.as_str()])
                .output();
        }
    }
}

/// Namespaces listed by the kernel right now.
pub fn namespaces() -> Vec<String> {
    let output = Command::new("ip")
        .args(["netns", "list"])
        .output()
        .expect("ip netns list");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split_whitespace().next().map(String::from))
        .collect()
}

/// Does a link with this name exist in the default namespace?
pub fn link_exists(name: &str) -> bool {
    Command::new("ip")
        .args(["link", "show", name])
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Allow forwarding in a routing namespace.
pub fn enable_forwarding(netns: &str) {
    ip(&[
        "netns",
        "exec",
        netns,
        "sysctl",
        "-qw",
        "net.ipv4.ip_forward=1",
    ]);
}
