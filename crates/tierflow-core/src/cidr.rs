//! IPv4 CIDR blocks

use crate::error::TopologyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 address range in CIDR notation (`10.0.0.0/16`).
///
/// The base address must be aligned to the prefix; `10.0.1.5/24` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    /// The route destination matching every address.
    pub const ANYWHERE: Cidr = Cidr {
        addr: Ipv4Addr::UNSPECIFIED,
        prefix: 0,
    };

    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, TopologyError> {
        let invalid = |reason: &str| TopologyError::InvalidCidr {
            value: format!("{}/{}", addr, prefix),
            reason: reason.to_string(),
        };

        if prefix > 32 {
            return Err(invalid("prefix length must be between 0 and 32"));
        }
        if u32::from(addr) & !mask(prefix) != 0 {
            return Err(invalid("host bits are set for this prefix length"));
        }

        Ok(Self { addr, prefix })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    pub fn first(&self) -> u32 {
        u32::from(self.addr)
    }

    pub fn last(&self) -> u32 {
        self.first() | !mask(self.prefix)
    }

    /// Whether `other` lies entirely inside this block.
    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix && (other.first() & mask(self.prefix)) == self.first()
    }

    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        (u32::from(addr) & mask(self.prefix)) == self.first()
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    pub fn is_anywhere(&self) -> bool {
        self.prefix == 0
    }

    /// The `index`-th host address of the block (0 is the network address).
    pub fn host(&self, index: u32) -> Option<Ipv4Addr> {
        let candidate = self.first().checked_add(index)?;
        if candidate > self.last() {
            return None;
        }
        Some(Ipv4Addr::from(candidate))
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Cidr {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TopologyError::InvalidCidr {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected <address>/<prefix>"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| invalid("address is not a valid IPv4 address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| invalid("prefix length is not a number"))?;

        Cidr::new(addr, prefix).map_err(|_| {
            if prefix > 32 {
                invalid("prefix length must be between 0 and 32")
            } else {
                invalid("host bits are set for this prefix length")
            }
        })
    }
}

impl TryFrom<String> for Cidr {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}
