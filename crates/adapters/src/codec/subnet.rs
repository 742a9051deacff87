//! Trusted-subnet check on the agent-reported address.

use ipnet::IpNet;
use metricsd_shared::{ErrorCode, ErrorEnvelope, Result};
use std::net::IpAddr;

/// Header carrying the agent address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Allow-list of agent addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    net: IpNet,
}

impl TrustedSubnet {
    /// Allow addresses inside `net`.
    #[must_use]
    pub const fn new(net: IpNet) -> Self {
        Self { net }
    }

    /// Check a raw `X-Real-IP` value. Absent, unparsable, and outside
    /// addresses are all forbidden.
    pub fn check(&self, real_ip: Option<&str>) -> Result<IpAddr> {
        let raw = real_ip.map(str::trim).filter(|value| !value.is_empty()).ok_or_else(|| {
            ErrorEnvelope::expected(ErrorCode::forbidden(), "missing agent address")
        })?;
        let addr: IpAddr = raw.parse().map_err(|_| {
            ErrorEnvelope::expected(ErrorCode::forbidden(), "unparsable agent address")
                .with_metadata("realIp", raw.to_string())
        })?;
        if self.net.contains(&addr) {
            Ok(addr)
        } else {
            Err(
                ErrorEnvelope::expected(ErrorCode::forbidden(), "agent address not trusted")
                    .with_metadata("realIp", addr.to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet() -> Result<TrustedSubnet> {
        let net: IpNet = "10.0.0.0/8"
            .parse()
            .map_err(|_| ErrorEnvelope::invalid_input("bad test subnet"))?;
        Ok(TrustedSubnet::new(net))
    }

    #[test]
    fn inside_addresses_pass() -> Result<()> {
        let addr = subnet()?.check(Some("10.0.0.5"))?;
        assert_eq!(addr.to_string(), "10.0.0.5");
        Ok(())
    }

    #[test]
    fn outside_missing_and_garbage_are_forbidden() -> Result<()> {
        let subnet = subnet()?;
        for input in [Some("192.168.1.1"), None, Some(""), Some("ten.zero")] {
            let Err(error) = subnet.check(input) else {
                panic!("expected forbidden for {input:?}");
            };
            assert_eq!(error.code, ErrorCode::forbidden());
        }
        Ok(())
    }
}
