//! Container-backed topology provisioning.
//!
//! An alternate provisioner for topologies whose "namespaces" are
//! containerized routers. Each router runs privileged with networking
//! disabled; its network namespace is linked into the host's namespace
//! directory so the same `ip` commands the host builder issues work
//! against it. The container runtime itself is an opaque injected client:
//! image listing/pull, container lifecycle, and exec-with-captured-output
//! go through it, never around it.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::secret::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use serde::Deserialize;

use crate::assert::Assert;
use crate::program::ProgramSpec;
use crate::suite::{self, TestCtx, Tester};
use crate::{is_ipv6, Error, Result};

/// One interface injected into a containerized router.
///
/// The container variant derives its kind from `is_bridge` and `upper`
/// alone: a tagged member carries its VLAN in the sub-interface name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouterIntf {
    pub name: String,
    pub is_bridge: bool,
    /// VLAN id as text; empty for untagged.
    pub vlan: String,
    /// Upper bridge reference, only for members.
    pub upper: String,
    /// Addresses to assign; none for members.
    pub address: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntfKind {
    Port,
    Bridge,
    BridgeMember,
}

impl RouterIntf {
    fn kind(&self) -> IntfKind {
        if self.is_bridge {
            IntfKind::Bridge
        } else if !self.upper.is_empty() {
            IntfKind::BridgeMember
        } else {
            IntfKind::Port
        }
    }

    /// Name the interface has after VLAN tagging.
    fn tagged_name(&self) -> String {
        if self.vlan.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.vlan)
        }
    }
}

/// A containerized router and the interfaces to inject into it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouterSpec {
    pub image: String,
    /// Container name; doubles as the linked namespace name.
    pub hostname: String,
    pub cmd: String,
    pub intfs: Vec<RouterIntf>,
}

/// Declarative description of a container-backed topology.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Host directory bound into every router, relative to the working
    /// directory; empty disables the bind.
    pub volume: String,
    /// Mount point of `volume` inside the routers.
    pub mapping: String,
    pub routers: Vec<RouterSpec>,
}

impl ContainerConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }
}

/// Fixed settle delay after starting a router, before touching its
/// namespace.
const SETTLE: Duration = Duration::from_secs(2);

const CONTAINER_PATH: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:/root";

/// Live container-backed topology: the injected runtime client plus the
/// routers it started.
pub struct ContainerDriver {
    docker: Docker,
    config: ContainerConfig,
    ids: HashMap<String, String>,
}

impl ContainerDriver {
    /// Connect to the container runtime and verify it answers, preparing
    /// the host namespace directory.
    pub async fn connect() -> Result<Docker> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| Error::Other(anyhow!("container client: {err}")))?;
        docker
            .ping()
            .await
            .map_err(|err| Error::Other(anyhow!("container runtime ping: {err}")))?;
        if !Path::new("/var/run/netns").exists() {
            std::fs::create_dir("/var/run/netns")?;
        }
        Ok(docker)
    }

    /// Start every router and inject its interfaces.
    pub async fn launch(
        docker: Docker,
        config: ContainerConfig,
        assert: Assert<'_>,
    ) -> Result<Self> {
        let mut driver = Self {
            docker,
            config,
            ids: HashMap::new(),
        };
        let volume_dir = if driver.config.volume.is_empty() || driver.config.mapping.is_empty() {
            None
        } else {
            let pwd = std::env::current_dir()?;
            Some(format!("{}{}", pwd.display(), driver.config.volume))
        };

        let routers = driver.config.routers.clone();
        for router in &routers {
            if !driver.image_local(router).await? {
                tracing::info!(image = %router.image, "no local image, pulling");
                driver.pull_image(router).await?;
            }
            let id = driver.start_router(router, volume_dir.as_deref()).await?;
            driver.ids.insert(router.hostname.clone(), id);

            // give the routing daemon time to come up before adding interfaces
            tokio::time::sleep(SETTLE).await;

            driver.link_namespace(router, assert).await?;
            for sysctl in [
                "net/ipv4/conf/all/rp_filter=0",
                "net/ipv6/conf/all/disable_ipv6=0",
                "net/ipv6/conf/all/keep_addr_on_down=1",
            ] {
                lenient(
                    assert,
                    ns_exec(&router.hostname, ["sysctl", "-w", sysctl]),
                );
            }

            for intf in &router.intfs {
                inject_interface(&router.hostname, intf, assert);
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(driver)
    }

    /// The router named `hostname`, if the topology declares one.
    pub fn find(&self, hostname: &str) -> Option<&RouterSpec> {
        self.config
            .routers
            .iter()
            .find(|r| r.hostname == hostname)
    }

    /// Run a command inside a router, returning trimmed combined output.
    pub async fn exec<S: Into<String> + Clone>(
        &self,
        hostname: &str,
        cmd: &[S],
    ) -> Result<String> {
        let id = self
            .ids
            .get(hostname)
            .ok_or_else(|| Error::Config(format!("no such router {hostname:?}")))?;
        let cmd: Vec<String> = cmd.iter().cloned().map(Into::into).collect();
        tracing::debug!(%hostname, ?cmd, "container exec");

        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| Error::Other(anyhow!("create exec: {err}")))?;

        let mut out = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|err| Error::Other(anyhow!("start exec: {err}")))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(Ok(msg)) = output.next().await {
                    out.push_str(&String::from_utf8_lossy(&msg.into_bytes()));
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|err| Error::Other(anyhow!("inspect exec: {err}")))?;
        match inspect.exit_code {
            Some(0) | None => Ok(out.trim().to_string()),
            Some(code) => Err(Error::ExitStatus(code as i32)),
        }
    }

    /// Require a ping response from inside a router, retried up to 10
    /// times a second apart; `ping6` for IPv6 targets.
    pub async fn ping(&self, hostname: &str, target: &str) -> Result<()> {
        let binary = if is_ipv6(target) {
            "/bin/ping6"
        } else {
            "/bin/ping"
        };
        for attempt in 0..10 {
            match self.exec(hostname, &[binary, "-c1", "-W1", target]).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    tracing::debug!(%hostname, %target, attempt, %err, "ping attempt failed")
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(Error::NoResponse(target.to_string()))
    }

    /// Tear the topology down: interfaces out in reverse, bridges after
    /// their members, then the containers and their namespace links.
    pub async fn teardown(mut self, assert: Assert<'_>) {
        for router in self.config.routers.clone().iter().rev() {
            let ns = router.hostname.as_str();
            for intf in router.intfs.iter().rev() {
                if intf.kind() == IntfKind::Bridge {
                    continue;
                }
                let name = intf.tagged_name();
                eject_interface(ns, &name, assert);
                if !intf.vlan.is_empty() || intf.name.contains("dummy") {
                    lenient(assert, vec_of(["ip", "link", "del", name.as_str()]));
                }
            }
            // delete bridges after members moved out and deleted
            for intf in &router.intfs {
                if intf.kind() == IntfKind::Bridge {
                    lenient(
                        assert,
                        ns_exec(ns, ["ip", "link", "del", intf.name.as_str()]),
                    );
                }
            }
            if let Some(id) = self.ids.remove(ns) {
                if let Err(err) = self.stop_router(ns, &id).await {
                    tracing::warn!(hostname = %ns, %err, "stopping router failed");
                }
            }
            let link = format!("/var/run/netns/{ns}");
            lenient(assert, vec_of(["rm", link.as_str()]));
        }
    }

    async fn image_local(&self, router: &RouterSpec) -> Result<bool> {
        let images = self
            .docker
            .list_images(None::<ListImagesOptions<String>>)
            .await
            .map_err(|err| Error::Other(anyhow!("image list: {err}")))?;
        Ok(images
            .iter()
            .any(|image| image.repo_tags.iter().any(|tag| *tag == router.image)))
    }

    async fn pull_image(&self, router: &RouterSpec) -> Result<()> {
        let options = CreateImageOptions {
            from_image: format!("docker.io/{}", router.image),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            let info =
                progress.map_err(|err| Error::Other(anyhow!("pull {}: {err}", router.image)))?;
            if let Some(status) = info.status {
                tracing::debug!(image = %router.image, %status, "pull");
            }
        }
        tracing::info!(image = %router.image, "pulled from remote");
        Ok(())
    }

    async fn start_router(
        &self,
        router: &RouterSpec,
        volume_dir: Option<&str>,
    ) -> Result<String> {
        if self.container_running(&router.hostname).await? {
            return Err(Error::Config(format!(
                "container {} already running",
                router.hostname
            )));
        }
        tracing::info!(hostname = %router.hostname, image = %router.image, "starting router");

        let binds = volume_dir.map(|dir| {
            vec![format!(
                "{dir}volumes/{}:{}",
                router.hostname, self.config.mapping
            )]
        });
        let config = Config {
            image: Some(router.image.clone()),
            hostname: Some(router.hostname.clone()),
            cmd: Some(vec![router.cmd.clone()]),
            tty: Some(true),
            env: Some(vec![CONTAINER_PATH.to_string()]),
            host_config: Some(HostConfig {
                privileged: Some(true),
                network_mode: Some("none".to_string()),
                binds,
                ..Default::default()
            }),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: router.hostname.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|err| Error::Other(anyhow!("create {}: {err}", router.hostname)))?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|err| Error::Other(anyhow!("start {}: {err}", router.hostname)))?;
        Ok(created.id)
    }

    async fn stop_router(&self, hostname: &str, id: &str) -> Result<()> {
        tracing::info!(%hostname, "stopping router");
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(|err| Error::Other(anyhow!("stop {hostname}: {err}")))?;
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|err| Error::Other(anyhow!("remove {hostname}: {err}")))?;
        Ok(())
    }

    async fn container_running(&self, hostname: &str) -> Result<bool> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(|err| Error::Other(anyhow!("container list: {err}")))?;
        let wanted = format!("/{hostname}");
        Ok(containers.iter().any(|container| {
            container
                .names
                .iter()
                .flatten()
                .any(|name| *name == wanted)
        }))
    }

    /// Link the router's network namespace under `/var/run/netns` so
    /// namespace-scoped commands work against the container.
    async fn link_namespace(&self, router: &RouterSpec, assert: Assert<'_>) -> Result<()> {
        let id = &self.ids[&router.hostname];
        let pid = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|err| Error::Other(anyhow!("inspect {}: {err}", router.hostname)))?
            .state
            .and_then(|state| state.pid)
            .filter(|&pid| pid > 0)
            .ok_or_else(|| Error::Config(format!("{} has no pid", router.hostname)))?;
        let src = format!("/proc/{pid}/ns/net");
        let dst = format!("/var/run/netns/{}", router.hostname);
        assert.program(ProgramSpec::new(["ln", "-s", src.as_str(), dst.as_str()]));
        Ok(())
    }
}

impl Drop for ContainerDriver {
    fn drop(&mut self) {
        for (hostname, _) in self.ids.iter() {
            tracing::warn!(%hostname, "router not torn down");
        }
    }
}

/// Create the interface on the host side, move it into the router, attach
/// members to their bridge, and relax rp_filter for it.
fn inject_interface(ns: &str, intf: &RouterIntf, assert: Assert<'_>) {
    let kind = intf.kind();
    let mut name = intf.name.clone();
    if intf.name.contains("dummy") {
        let dev = name.as_str();
        lenient(assert, vec_of(["ip", "link", "add", dev, "type", "dummy"]));
        lenient(assert, vec_of(["ip", "link", "set", dev, "up"]));
    } else if !intf.vlan.is_empty() {
        let tagged = intf.tagged_name();
        let dev = name.as_str();
        let sub = tagged.as_str();
        let vlan = intf.vlan.as_str();
        lenient(assert, vec_of(["ip", "link", "set", dev, "up"]));
        lenient(
            assert,
            vec_of([
                "ip", "link", "add", sub, "link", dev, "type", "vlan", "id", vlan,
            ]),
        );
        lenient(assert, vec_of(["ip", "link", "set", sub, "up"]));
        name = tagged.clone();
    } else if kind == IntfKind::Bridge {
        let dev = name.as_str();
        lenient(
            assert,
            ns_exec(ns, ["ip", "link", "add", dev, "type", "bridge"]),
        );
        if let Some(ifa) = intf.address.first() {
            lenient(
                assert,
                ns_exec(ns, ["ip", "addr", "add", ifa.as_str(), "dev", dev]),
            );
        }
        lenient(assert, ns_exec(ns, ["ip", "link", "set", dev, "up"]));
    }

    if kind != IntfKind::Bridge {
        move_into_router(ns, &name, &intf.address, assert);
    }
    if kind == IntfKind::BridgeMember {
        let dev = name.as_str();
        lenient(assert, ns_exec(ns, ["ip", "link", "set", "up", dev]));
        lenient(
            assert,
            ns_exec(ns, ["ip", "link", "set", dev, "master", intf.upper.as_str()]),
        );
    }
    let rp_filter = format!("net/ipv4/conf/{name}/rp_filter=0");
    lenient(assert, ns_exec(ns, ["sysctl", "-w", rp_filter.as_str()]));
}

/// Move a host-side interface into the router namespace and address it.
fn move_into_router(ns: &str, name: &str, addrs: &[String], assert: Assert<'_>) {
    tracing::debug!(%name, %ns, ?addrs, "moving interface into router");
    assert.program(ProgramSpec::new(vec_of([
        "ip", "link", "set", name, "netns", ns,
    ])));
    assert.program(ProgramSpec::new(vec_of([
        "ip", "-n", ns, "link", "set", "up", "lo",
    ])));
    assert.program(ProgramSpec::new(vec_of([
        "ip", "-n", ns, "link", "set", "down", name,
    ])));
    assert.program(ProgramSpec::new(vec_of([
        "ip", "-n", ns, "link", "set", "up", name,
    ])));
    for addr in addrs {
        assert.program(ProgramSpec::new(vec_of([
            "ip",
            "-n",
            ns,
            "addr",
            "add",
            addr.as_str(),
            "dev",
            name,
        ])));
    }
}

/// Move a router interface back to the default namespace.
fn eject_interface(ns: &str, name: &str, assert: Assert<'_>) {
    tracing::debug!(%name, %ns, "moving interface back to default");
    lenient(assert, vec_of(["ip", "-n", ns, "link", "set", "down", name]));
    lenient(
        assert,
        vec_of(["ip", "-n", ns, "link", "set", name, "netns", "1"]),
    );
    lenient(assert, vec_of(["ip", "link", "set", name, "up"]));
}

/// Run a provisioning command, logging failure instead of failing: partial
/// container topologies should still tear down as far as they can.
fn lenient(assert: Assert<'_>, args: Vec<String>) {
    if !assert.program_non_fatal(ProgramSpec::new(args.iter().cloned())) {
        tracing::warn!(?args, "command failed");
    }
}

fn ns_exec<'s>(ns: &str, cmd: impl IntoIterator<Item = &'s str>) -> Vec<String> {
    let mut args = vec_of(["ip", "netns", "exec", ns]);
    args.extend(cmd.into_iter().map(String::from));
    args
}

fn vec_of<'s>(args: impl IntoIterator<Item = &'s str>) -> Vec<String> {
    args.into_iter().map(String::from).collect()
}

/// A container-backed topology packaged with nested test units.
///
/// Skips when the container runtime is unreachable and on dry runs; the
/// launched routers are torn down however the children end.
pub struct ContainerTest {
    pub name: String,
    pub config: ContainerConfig,
    pub tests: Vec<Box<dyn Tester>>,
}

impl ContainerTest {
    pub fn new(name: impl Into<String>, config: ContainerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            tests: Vec::new(),
        }
    }

    pub fn with(mut self, test: Box<dyn Tester>) -> Self {
        self.tests.push(test);
        self
    }
}

impl Tester for ContainerTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, cx: &mut TestCtx<'_>) {
        if cx.config.dry_run {
            cx.report.skip_now("dry run");
        }
        let assert = Assert::new(cx.report, cx.config);
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(err) => cx.report.fail_now(&format!("runtime: {err}")),
        };
        let docker = match runtime.block_on(ContainerDriver::connect()) {
            Ok(docker) => docker,
            Err(err) => cx.report.skip_now(&format!("container runtime unavailable: {err}")),
        };
        let driver =
            match runtime.block_on(ContainerDriver::launch(docker, self.config.clone(), assert)) {
                Ok(driver) => driver,
                Err(err) => cx.report.fail_now(&err.to_string()),
            };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            suite::run_ordered(&mut self.tests, cx)
        }));
        runtime.block_on(driver.teardown(assert));
        if let Err(payload) = outcome {
            std::panic::resume_unwind(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_kind_ignores_vlan() {
        let mut intf = RouterIntf {
            name: "eth0".to_string(),
            vlan: "100".to_string(),
            ..RouterIntf::default()
        };
        assert_eq!(intf.kind(), IntfKind::Port);
        intf.upper = "tb1".to_string();
        assert_eq!(intf.kind(), IntfKind::BridgeMember);
        intf.is_bridge = true;
        assert_eq!(intf.kind(), IntfKind::Bridge);
    }

    #[test]
    fn tagged_name_appends_the_vlan() {
        let intf = RouterIntf {
            name: "eth1".to_string(),
            vlan: "42".to_string(),
            ..RouterIntf::default()
        };
        assert_eq!(intf.tagged_name(), "eth1.42");
        let untagged = RouterIntf {
            name: "eth1".to_string(),
            ..RouterIntf::default()
        };
        assert_eq!(untagged.tagged_name(), "eth1");
    }

    #[test]
    fn config_parses_from_toml() {
        let config = ContainerConfig::from_toml(
            r#"
            volume = "/volumes"
            mapping = "/etc/frr"

            [[routers]]
            image = "frrouting/frr:latest"
            hostname = "R1"
            cmd = "/root/startup.sh"

            [[routers.intfs]]
            name = "eth0"
            address = ["10.1.0.1/24"]

            [[routers.intfs]]
            name = "eth1"
            vlan = "100"
            upper = "tb1"
            "#,
        )
        .expect("parse");
        assert_eq!(config.routers.len(), 1);
        let router = &config.routers[0];
        assert_eq!(router.hostname, "R1");
        assert_eq!(router.intfs[0].kind(), IntfKind::Port);
        assert_eq!(router.intfs[1].kind(), IntfKind::BridgeMember);
        assert_eq!(router.intfs[1].tagged_name(), "eth1.100");
    }

    #[test]
    fn bad_config_is_a_config_error() {
        let err = ContainerConfig::from_toml("routers = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
