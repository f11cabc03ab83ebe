//! Configuration loading: a flat properties file into a typed
//! `ReplicaConfig`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::*;
use crate::view::Host;

/// Validated, typed configuration for bootstrapping a replica.
///
/// Mirrors the teacher's `NodeConfig` typed-config-struct shape, but
/// carries only what SPEC_FULL §6's properties file specifies: this
/// crate has no TLS/socket configuration of its own (that lives behind
/// `communication::Transport`, an external collaborator).
pub struct ReplicaConfig {
    pub address: IpAddr,
    pub base_port: u16,
    pub initial_membership: Vec<Host>,
    pub reconnect_time: Duration,
    pub leader_timeout: Duration,
    pub crypto_name: String,
    pub truststore_path: String,
    pub truststore_password: String,
    pub keystore_path: String,
    pub keystore_password: String,
}

impl ReplicaConfig {
    /// Validates and converts a flat key/value map (as produced by
    /// `load_properties`) into a `ReplicaConfig`.
    ///
    /// Carries `truststore_path`/`truststore_password`/`keystore_path`/
    /// `keystore_password` through as opaque strings without reading or
    /// parsing the files they name — resolving those paths into a loaded
    /// `Truststore` stays the embedding application's concern (SPEC_FULL
    /// §4.11).
    pub fn from_properties(map: &HashMap<String, String>) -> Result<Self> {
        let address = get(map, "address")?
            .parse::<IpAddr>()
            .simple_msg(ErrorKind::Config, "address is not a valid IP")?;

        let base_port = get(map, "base_port")?
            .parse::<u16>()
            .simple_msg(ErrorKind::Config, "base_port is not a valid port")?;

        let initial_membership = get(map, "initial_membership")?
            .split(',')
            .map(|entry| parse_host(entry.trim()))
            .collect::<Result<Vec<Host>>>()?;

        if initial_membership.len() < 4 {
            return Err("initial_membership must list at least 3f+1 = 4 hosts")
                .simple_msg(ErrorKind::Config, "initial_membership too small");
        }

        let self_host = Host::new(address, base_port);
        if !initial_membership.contains(&self_host) {
            return Err("address:base_port must itself appear in initial_membership")
                .simple_msg(ErrorKind::Config, "self host missing from initial_membership");
        }

        let reconnect_time = Duration::from_millis(
            get(map, "reconnect_time")?
                .parse::<u64>()
                .simple_msg(ErrorKind::Config, "reconnect_time is not a valid integer")?,
        );

        let leader_timeout = Duration::from_millis(
            get(map, "leader_timeout")?
                .parse::<u64>()
                .simple_msg(ErrorKind::Config, "leader_timeout is not a valid integer")?,
        );

        let crypto_name = get(map, "crypto_name")?.to_owned();

        let truststore_path = get(map, "truststore_path")?.to_owned();
        let truststore_password = get(map, "truststore_password")?.to_owned();
        let keystore_path = get(map, "keystore_path")?.to_owned();
        let keystore_password = get(map, "keystore_password")?.to_owned();

        Ok(Self {
            address,
            base_port,
            initial_membership,
            reconnect_time,
            leader_timeout,
            crypto_name,
            truststore_path,
            truststore_password,
            keystore_path,
            keystore_password,
        })
    }
}

fn get<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    map.get(key)
        .map(String::as_str)
        .ok_or(())
        .simple_msg(ErrorKind::Config, &format!("missing key {}", key))
}

fn parse_host(entry: &str) -> Result<Host> {
    let (addr, port) = entry
        .rsplit_once(':')
        .ok_or(())
        .simple_msg(ErrorKind::Config, "membership entry is not ip:port")?;
    let addr = addr
        .parse::<IpAddr>()
        .simple_msg(ErrorKind::Config, "membership entry has an invalid IP")?;
    let port = port
        .parse::<u16>()
        .simple_msg(ErrorKind::Config, "membership entry has an invalid port")?;
    Ok(Host::new(addr, port))
}

/// Reads a flat `key=value` properties file: one assignment per line,
/// `#`-prefixed comments and blank lines skipped.
pub fn load_properties(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or(())
            .simple_msg(ErrorKind::Config, "malformed properties line, expected key=value")?;
        map.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    Ok(map)
}
