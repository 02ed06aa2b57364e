//! Build the two-network preset against veth-backed ports, check
//! reachability, and verify teardown leaves no residue.

mod common;

use switch_test_network::report::Recorder;
use switch_test_network::{builder, nets, Assert, BuildOptions, Cleanup, HarnessConfig};

#[test]
fn two_nets_builds_pings_and_tears_down_clean() {
    if common::skip_unless_root() {
        return;
    }
    let _ = tracing_subscriber::fmt::try_init();
    let fixture = common::PortFixture::new(2);

    let report = Recorder::new();
    let config = HarnessConfig::default();
    let assert = Assert::new(&report, &config);

    let mut topology = nets::two_nets();
    {
        let mut cleanup = Cleanup::new(&report, &config);
        builder::build(
            &mut topology,
            assert,
            &mut cleanup,
            &fixture.ports,
            &BuildOptions::default(),
        );
        assert!(!report.failed(), "build failed: {:?}", report.messages());

        let live = common::namespaces();
        for ns in ["h1", "h2", "r"] {
            assert!(live.contains(&ns.to_string()), "{ns} missing from {live:?}");
        }

        // resolved interface names were filled in during the walk
        assert!(topology.0.iter().all(|nd| !nd.ifname.is_empty()));

        common::enable_forwarding("r");
        assert.ping("h1", "10.1.0.1");
        for (netns, addr) in topology.remotes() {
            assert.ping(netns, addr);
        }

        cleanup.drain();
    }

    assert!(!report.failed(), "teardown failed: {:?}", report.messages());
    let live = common::namespaces();
    for ns in ["h1", "h2", "r"] {
        assert!(!live.contains(&ns.to_string()), "{ns} survived teardown");
    }
    // the physical stand-ins came back to the default namespace
    for nd in topology.netdevs() {
        assert!(
            common::link_exists(&nd.ifname),
            "{} not returned to the default namespace",
            nd.ifname
        );
    }
}
