//! Messages shared by the daemon and manager services.

use std::fmt;
use std::net::IpAddr;

/// The empty message (`google.protobuf.Empty` equivalent).
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Empty {}

/// An IP network in CIDR form.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct IpNet {
    /// 4 or 16 raw address bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub ip: Vec<u8>,
    /// Prefix length.
    #[prost(int32, tag = "2")]
    pub mask: i32,
}

impl IpNet {
    pub fn new(ip: IpAddr, mask: u8) -> Self {
        let ip = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        Self {
            ip,
            mask: i32::from(mask),
        }
    }

    /// Decode the address bytes. Returns `None` for a malformed length.
    pub fn addr(&self) -> Option<IpAddr> {
        match self.ip.len() {
            4 => <[u8; 4]>::try_from(self.ip.as_slice()).ok().map(IpAddr::from),
            16 => <[u8; 16]>::try_from(self.ip.as_slice()).ok().map(IpAddr::from),
            _ => None,
        }
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr() {
            Some(addr) => write!(f, "{addr}/{}", self.mask),
            None => write!(f, "<invalid>/{}", self.mask),
        }
    }
}

/// Identifies a client session registered with the traffic manager.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct SessionInfo {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub cluster_id: String,
}
