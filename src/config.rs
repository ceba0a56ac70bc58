//! Server & client configuration

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::error::{Result, RpcError};

pub const DEFAULT_PORT: u16 = 3000;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address. Default `::` (all interfaces, IPv6 dual-stack where the OS allows).
    pub host: String,
    pub port: u16,
    /// TCP_NODELAY on accepted connections
    pub nodelay: bool,
    /// Largest data2 accepted in a CALL
    pub max_payload_len: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "::".to_string(),
            port: DEFAULT_PORT,
            nodelay: true,
            max_payload_len: u32::MAX,
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Validasi port dan host, lalu hasilkan socket address untuk bind
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        check_port(self.port)?;
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| RpcError::InvalidAddress(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host: IP literal or resolvable hostname
    pub host: String,
    pub port: u16,
    pub nodelay: bool,
    /// Largest data2 accepted in a CALL response
    pub max_payload_len: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "::1".to_string(),
            port: DEFAULT_PORT,
            nodelay: true,
            max_payload_len: u32::MAX,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Cek input tanpa melakukan resolusi DNS
    pub fn validate(&self) -> Result<()> {
        check_port(self.port)?;
        let host = self.host.trim();
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(RpcError::InvalidAddress(self.host.clone()));
        }
        Ok(())
    }

    /// Resolve ke semua kandidat address, urut sesuai resolver
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        self.validate()?;
        let host = self.host.trim();
        let addrs: Vec<SocketAddr> = (host, self.port)
            .to_socket_addrs()
            .map_err(|_| RpcError::InvalidAddress(self.host.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(RpcError::InvalidAddress(self.host.clone()));
        }
        Ok(addrs)
    }
}

/// Port 0 is reserved and cannot be used for TCP
fn check_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(RpcError::InvalidPort(port as u32));
    }
    Ok(())
}
