//! Cluster membership and printer address, loaded either from a JSON config
//! file shaped like the original `config.json` or derived from the
//! fixed convention `node<i>` at port `5000 + i`.

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddr {
    pub id: u8,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterAddr {
    pub host: String,
    pub port: u16,
}

/// Mirrors the original `{ "nos": [...], "servidor_impressao": {...} }`
/// shape; field names kept in Portuguese to match the config format the
/// reference implementation's binaries already read and write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nos: Vec<NodeAddr>,
    pub servidor_impressao: PrinterAddr,
}

impl ClusterConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("reading config {}: {err}", path.display()))?;
        let config: ClusterConfig = serde_json::from_str(&contents)
            .map_err(|err| anyhow::anyhow!("parsing config {}: {err}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Fixed-convention fallback used when no `--config` is given: `n` nodes
    /// named `node<i>` on ports `5000+i`, i in `1..=n`, and a printer at
    /// `printer:5001`.
    pub fn fixed_convention(n: u8) -> Self {
        ClusterConfig {
            nos: (1..=n)
                .map(|i| NodeAddr {
                    id: i,
                    host: format!("node{i}"),
                    port: 5000 + i as u16,
                })
                .collect(),
            servidor_impressao: PrinterAddr {
                host: "printer".to_string(),
                port: 5001,
            },
        }
    }

    pub fn peers_of(&self, id: u8) -> Vec<NodeAddr> {
        self.nos.iter().filter(|n| n.id != id).cloned().collect()
    }

    pub fn node(&self, id: u8) -> Option<&NodeAddr> {
        self.nos.iter().find(|n| n.id == id)
    }
}

impl NodeAddr {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        use std::net::ToSocketAddrs;
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("could not resolve {}:{}", self.host, self.port))
    }
}

impl PrinterAddr {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        use std::net::ToSocketAddrs;
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("could not resolve {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_convention_excludes_self_from_peers() {
        let config = ClusterConfig::fixed_convention(3);
        let peers = config.peers_of(2);
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|n| n.id != 2));
    }

    #[test]
    fn json_round_trips() {
        let config = ClusterConfig::fixed_convention(2);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ClusterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.nos.len(), config.nos.len());
        assert_eq!(parsed.servidor_impressao.port, 5001);
    }
}
