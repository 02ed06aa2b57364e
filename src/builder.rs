//! Build and teardown of virtual network topologies.
//!
//! The build walks the topology in listed order, derives each device kind,
//! and issues provisioning commands through the assertion layer. Every
//! successful step registers its inverse with the cleanup registry, so
//! teardown is exactly "drain the registry": interfaces leave their
//! namespaces before namespaces are deleted, members detach before their
//! bridge goes away, and a mid-build failure still unwinds whatever was
//! provisioned.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::assert::Assert;
use crate::cleanup::Cleanup;
use crate::netport::{DevKind, NetDev, PortMap, Topology};
use crate::program::ProgramSpec;
use crate::suite::{self, TestCtx, Tester};

/// Engine options for one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Engines predating bridge support skip bridge entries with a warning
    /// instead of failing, so older topologies stay loadable.
    pub supports_bridges: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            supports_bridges: true,
        }
    }
}

/// Provision every interface of `topology` in listed order, registering
/// rollback for each step.
///
/// Command failures are fatal through the assertion layer; rollback for
/// the steps already taken runs when the registry drains. An unknown
/// logical port name panics: the port table is a construction input, not
/// part of the test.
pub fn build(
    topology: &mut Topology,
    assert: Assert<'_>,
    cleanup: &mut Cleanup<'_>,
    ports: &PortMap,
    options: &BuildOptions,
) {
    for nd in &mut topology.0 {
        let kind = nd.derive_kind();
        if !options.supports_bridges
            && matches!(kind, DevKind::Bridge | DevKind::BridgeMember)
        {
            tracing::warn!(
                netns = %nd.netns,
                ifname = %nd.ifname,
                ?kind,
                "engine has no bridge support, skipping entry",
            );
            continue;
        }

        ensure_namespace(&nd.netns, assert, cleanup);
        match kind {
            DevKind::Bridge => add_bridge(nd, assert, cleanup),
            _ => attach_port(nd, assert, cleanup, ports),
        }

        let ns = nd.netns.as_str();
        let ifname = nd.ifname.as_str();
        if kind == DevKind::BridgeMember {
            let upper = nd.upper.as_str();
            assert.program(ip(["-n", ns, "link", "set", ifname, "master", upper]));
            cleanup.push(ip_args(["-n", ns, "link", "set", ifname, "nomaster"]));
        } else if !nd.ifa.is_empty() {
            add_address(ns, ifname, &nd.ifa, assert, cleanup);
            for route in &nd.routes {
                let family = family_flag(&route.gw);
                let prefix = route.prefix.as_str();
                let gw = route.gw.as_str();
                assert.program(ip(["-n", ns, family, "route", "add", prefix, "via", gw]));
            }
        }

        for dummy in &nd.dummy_ifs {
            let name = dummy.ifname.as_str();
            assert.program(ip(["-n", ns, "link", "add", name, "type", "dummy"]));
            cleanup.push(ip_args(["-n", ns, "link", "del", name]));
            assert.program(ip(["-n", ns, "link", "set", name, "up"]));
            if !dummy.ifa.is_empty() {
                add_address(ns, name, &dummy.ifa, assert, cleanup);
            }
        }

        assert.comment(&format!("{nd:?}"));
    }
}

/// Create the namespace if it doesn't exist yet and register its deletion.
fn ensure_namespace(ns: &str, assert: Assert<'_>, cleanup: &mut Cleanup<'_>) {
    if Path::new("/var/run/netns").join(ns).exists() {
        return;
    }
    assert.program(ip(["netns", "add", ns]));
    cleanup.push(ip_args(["netns", "del", ns]));
}

/// Create a bridge device inside the namespace, at a caller-fixed index
/// when one is pinned, and bring it up.
fn add_bridge(nd: &NetDev, assert: Assert<'_>, cleanup: &mut Cleanup<'_>) {
    let ns = nd.netns.as_str();
    let ifname = nd.ifname.as_str();
    if nd.bridge_ifindex != 0 {
        let index = nd.bridge_ifindex.to_string();
        let index = index.as_str();
        assert.program(ip([
            "-n", ns, "link", "add", ifname, "index", index, "type", "bridge",
        ]));
    } else {
        assert.program(ip(["-n", ns, "link", "add", ifname, "type", "bridge"]));
    }
    assert.program(ip(["-n", ns, "link", "set", ifname, "up"]));
    cleanup.push(ip_args(["-n", ns, "link", "del", ifname]));
}

/// Resolve the physical port, layer a VLAN sub-interface over it if one is
/// declared, and move the result into the namespace.
fn attach_port(
    nd: &mut NetDev,
    assert: Assert<'_>,
    cleanup: &mut Cleanup<'_>,
    ports: &PortMap,
) {
    let ns = nd.netns.clone();
    let ns = ns.as_str();
    let mut ifname = ports
        .port(&nd.netport)
        .unwrap_or_else(|| panic!("no port assignment for {:?}", nd.netport))
        .to_string();
    if nd.vlan != 0 {
        let link = ifname.clone();
        let link = link.as_str();
        let vlan = nd.vlan.to_string();
        let vlan = vlan.as_str();
        ifname = format!("{link}.{vlan}");
        let tagged = ifname.as_str();
        assert.program(ip(["link", "set", link, "up"]));
        assert.program(ip([
            "link", "add", tagged, "link", link, "type", "vlan", "id", vlan,
        ]));
        cleanup.push(ip_args(["link", "del", tagged]));
    }
    nd.ifname = ifname;
    let ifname = nd.ifname.as_str();

    // moving into a just-created namespace is transiently flaky
    retry(assert, ip_args(["link", "set", ifname, "up", "netns", ns]));
    cleanup.push(ip_args([
        "-n", ns, "link", "set", ifname, "down", "netns", "1",
    ]));
}

/// Assign an address, retried, and register its removal.
fn add_address(ns: &str, ifname: &str, ifa: &str, assert: Assert<'_>, cleanup: &mut Cleanup<'_>) {
    let family = family_flag(ifa);
    retry(
        assert,
        ip_args(["-n", ns, family, "address", "add", ifa, "dev", ifname]),
    );
    cleanup.push(ip_args([
        "-n", ns, family, "address", "del", ifa, "dev", ifname,
    ]));
}

/// Up to 3 quiet attempts a second apart, then one loud one that surfaces
/// the error. The retry is blind: the command is known to fail
/// transiently, not to be idempotent.
fn retry(assert: Assert<'_>, args: Vec<String>) {
    for tries in 0..3 {
        if tries > 0 {
            thread::sleep(Duration::from_secs(1));
        }
        if assert.program_non_fatal(ProgramSpec::new(args.iter().cloned())) {
            return;
        }
    }
    assert.program(ProgramSpec::new(args));
}

fn family_flag(addr: &str) -> &'static str {
    if crate::is_ipv6(addr) {
        "-6"
    } else {
        "-4"
    }
}

fn ip<'s>(args: impl IntoIterator<Item = &'s str>) -> ProgramSpec {
    ProgramSpec::new(ip_args(args))
}

fn ip_args<'s>(args: impl IntoIterator<Item = &'s str>) -> Vec<String> {
    std::iter::once("ip".to_string())
        .chain(args.into_iter().map(String::from))
        .collect()
}

/// A topology packaged with nested test units as one runnable tester.
///
/// Dry runs skip the build and the children; otherwise the topology is
/// built, the children run in order, and the registry drains on the way
/// out however the children ended.
pub struct NetTest {
    pub name: String,
    pub topology: Topology,
    pub ports: Arc<PortMap>,
    pub options: BuildOptions,
    pub tests: Vec<Box<dyn Tester>>,
}

impl NetTest {
    pub fn new(name: impl Into<String>, topology: Topology, ports: Arc<PortMap>) -> Self {
        Self {
            name: name.into(),
            topology,
            ports,
            options: BuildOptions::default(),
            tests: Vec::new(),
        }
    }

    pub fn with(mut self, test: Box<dyn Tester>) -> Self {
        self.tests.push(test);
        self
    }
}

impl Tester for NetTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, cx: &mut TestCtx<'_>) {
        if cx.config.dry_run {
            cx.report.skip_now("dry run");
        }
        let assert = Assert::new(cx.report, cx.config);
        let mut cleanup = Cleanup::new(cx.report, cx.config);
        let mut topology = self.topology.clone();
        build(&mut topology, assert, &mut cleanup, &self.ports, &self.options);
        // teardown happens when `cleanup` drops, even if a child unwinds
        suite::run_ordered(&mut self.tests, cx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netport::{DummyIf, Route};
    use crate::report::Recorder;
    use crate::suite::{run_unit, Outcome};
    use crate::HarnessConfig;

    #[test]
    fn net_test_is_skipped_on_dry_runs() {
        let report = Recorder::new();
        let config = HarnessConfig {
            dry_run: true,
            ..HarnessConfig::default()
        };
        let mut cx = TestCtx {
            report: &report,
            config: &config,
        };
        let mut net_test = NetTest::new(
            "dry",
            Topology::default(),
            Arc::new(PortMap::default()),
        );
        assert_eq!(run_unit(&mut net_test, &mut cx), Outcome::Skipped);
        assert!(!report.failed());
    }

    #[test]
    fn family_flag_follows_the_literal() {
        assert_eq!(family_flag("10.1.0.1"), "-4");
        assert_eq!(family_flag("fc01::1"), "-6");
    }

    #[test]
    fn ip_args_prefixes_the_command() {
        assert_eq!(
            ip_args(["netns", "add", "h1"]),
            vec!["ip", "netns", "add", "h1"]
        );
    }

    #[test]
    fn bridge_entries_are_skipped_without_bridge_support() {
        let report = Recorder::new();
        let config = HarnessConfig::default();
        let assert = Assert::new(&report, &config);
        let mut cleanup = Cleanup::new(&report, &config);
        let mut topology = Topology(vec![NetDev {
            netns: "skip1".to_string(),
            is_bridge: true,
            ifname: "tb1".to_string(),
            ..NetDev::default()
        }]);
        let options = BuildOptions {
            supports_bridges: false,
        };
        build(
            &mut topology,
            assert,
            &mut cleanup,
            &PortMap::default(),
            &options,
        );
        // nothing was provisioned, so nothing needs rolling back
        assert_eq!(cleanup.actions().len(), 0);
        assert!(!report.failed());
    }

    #[test]
    fn kinds_are_recomputed_during_build() {
        // no commands run when the only entry is skipped for bridge support
        let report = Recorder::new();
        let config = HarnessConfig::default();
        let assert = Assert::new(&report, &config);
        let mut cleanup = Cleanup::new(&report, &config);
        let mut topology = Topology(vec![NetDev {
            netns: "skip2".to_string(),
            vlan: 100,
            upper: "tb1".to_string(),
            ..NetDev::default()
        }]);
        let options = BuildOptions {
            supports_bridges: false,
        };
        build(
            &mut topology,
            assert,
            &mut cleanup,
            &PortMap::default(),
            &options,
        );
        assert_eq!(topology.0[0].kind, Some(DevKind::BridgeMember));
    }

    #[test]
    fn presets_round_trip_through_build_fields() {
        // a port entry with vlan and address carries everything the build
        // walk needs; exercised fully in the root-gated integration tests
        let nd = NetDev {
            netns: "h1".to_string(),
            vlan: 100,
            netport: "net0port0".to_string(),
            ifa: "10.1.0.2/24".to_string(),
            routes: vec![Route::new("10.2.0.0/24", "10.1.0.1")],
            dummy_ifs: vec![DummyIf::new("dummy0", "10.5.5.5")],
            ..NetDev::default()
        };
        assert_eq!(
            DevKind::derive(nd.is_bridge, nd.vlan, &nd.upper),
            DevKind::VlanPort
        );
    }
}
