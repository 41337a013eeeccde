use crate::weak_error;
use once_cell::sync;
use regex::Regex;
use std::fmt::{Display, Formatter};

/// Version of the wire protocol spoken between a target and a proxy.
pub const PROTOCOL_VERSION: Version = Version(1, 0);

/// Version of the proxy-side api exposed to debugger clients.
pub const PROXY_API_VERSION: u32 = 3;

/// Two-component protocol version (`major.minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32, pub u32);

impl Version {
    /// Parse version from strings like "1.0" or "v2.13".
    pub fn parse(s: &str) -> Option<Self> {
        static V_RE: sync::Lazy<Regex> =
            sync::Lazy::new(|| Regex::new(r"^v?(\d+)\.(\d+)$").expect("must compile"));

        let (_, [major, minor]) = V_RE.captures(s.trim()).map(|c| c.extract())?;
        let major = weak_error!(major.parse::<u32>())?;
        let minor = weak_error!(minor.parse::<u32>())?;
        Some(Version(major, minor))
    }

    /// Peers with the same major version understand each other.
    pub fn compatible_with(&self, other: &Version) -> bool {
        self.0 == other.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

/// Version of this crate, reported as the server version in proxy info.
pub fn server_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
