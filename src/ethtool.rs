//! Apply per-port ethtool settings and private flags at process start.
//!
//! Settings come from `testdata/ethtool.toml` and
//! `testdata/ethtool_priv_flags.toml`: tables of physical device name →
//! argument list. Missing files are silently ignored; malformed files and
//! failing commands panic, since this runs before any supervisor or
//! assertion instance exists.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::program;

pub const SETTINGS_FILE: &str = "testdata/ethtool.toml";
pub const PRIV_FLAGS_FILE: &str = "testdata/ethtool_priv_flags.toml";

/// Load both tables and issue the respective commands.
pub fn init() {
    apply(SETTINGS_FILE, PRIV_FLAGS_FILE);
}

fn apply(settings_file: impl AsRef<Path>, priv_flags_file: impl AsRef<Path>) {
    if let Some(settings) = load(settings_file.as_ref()) {
        for (ifname, args) in &settings {
            let mut cmd = vec!["ethtool".to_string(), "-s".to_string(), ifname.clone()];
            cmd.extend(args.iter().cloned());
            program::run(cmd);
        }
    }
    if let Some(priv_flags) = load(priv_flags_file.as_ref()) {
        // the "option" key overrides the flag-setting switch itself
        let option = priv_flags
            .get("option")
            .and_then(|opt| opt.first())
            .map_or("--set-priv-flags", String::as_str)
            .to_string();
        for (ifname, args) in &priv_flags {
            if ifname == "option" {
                continue;
            }
            let mut cmd = vec!["ethtool".to_string(), option.clone(), ifname.clone()];
            cmd.extend(args.iter().cloned());
            program::run(cmd);
        }
    }
}

fn load(path: &Path) -> Option<HashMap<String, Vec<String>>> {
    let text = fs::read_to_string(path).ok()?;
    Some(toml::from_str(&text).unwrap_or_else(|err| panic!("{}: {err}", path.display())))
}
