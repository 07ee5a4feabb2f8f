//! Server identities, credentials and the persistable server record.

use {
    serde::{Deserialize, Serialize},
    std::{fmt, net::Ipv4Addr},
};

/// Convert a raw NetBIOS address (network byte order in memory) to an `Ipv4Addr`.
///
/// The least significant byte of `raw` is the first octet.
pub fn addr_from_raw(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_le_bytes())
}

/// Inverse of [`addr_from_raw`].
pub fn addr_to_raw(addr: Ipv4Addr) -> u32 {
    u32::from_le_bytes(addr.octets())
}

/// A server as seen on the network: its NetBIOS name and IPv4 address.
///
/// A session is reachable under both keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    pub address: Ipv4Addr,
}

impl ServerIdentity {
    pub fn new(name: impl Into<String>, address: Ipv4Addr) -> ServerIdentity {
        ServerIdentity {
            name: name.into(),
            address,
        }
    }

    pub fn from_raw(name: impl Into<String>, raw: u32) -> ServerIdentity {
        ServerIdentity::new(name, addr_from_raw(raw))
    }

    /// Dotted-quad form of the address, the second lookup key.
    pub fn address_key(&self) -> String {
        self.address.to_string()
    }

    /// Both registry keys, name first.
    pub fn keys(&self) -> [String; 2] {
        [self.name.clone(), self.address_key()]
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Login credentials. Empty username means anonymous/guest.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn anonymous() -> Credentials {
        Credentials::default()
    }

    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Saved server, kept by a presentation layer to reconnect later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    /// Raw NetBIOS address, see [`addr_from_raw`].
    pub ip: u32,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ServerEntry {
    pub fn new(identity: &ServerIdentity, credentials: &Credentials) -> ServerEntry {
        ServerEntry {
            name: identity.name.clone(),
            ip: addr_to_raw(identity.address),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }

    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::from_raw(self.name.clone(), self.ip)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}
