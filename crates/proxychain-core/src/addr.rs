/// Target address classification for the protocol encoders.
///
/// SOCKS5 picks its ATYP from the shape of the address string; SOCKS4 uses
/// the same classification to decide between plain SOCKS4 and SOCKS4a.

use crate::error::Error;

/// Shape of a target address string.
///
/// Classification is total over non-empty strings: dotted-quad IPv4 literals
/// (each octet 0..=255) are `Ipv4` and carry their octets; strings made of
/// hex digits and colons with at least one colon are `Ipv6` (the group-level
/// parse is deferred to [`ipv6_octets`]); everything else is a domain name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Ipv4([u8; 4]),
    Ipv6,
    Domain,
}

pub fn classify(host: &str) -> HostKind {
    if let Some(octets) = dotted_quad(host) {
        return HostKind::Ipv4(octets);
    }
    if host.contains(':') && host.chars().all(|c| c == ':' || c.is_ascii_hexdigit()) {
        return HostKind::Ipv6;
    }
    HostKind::Domain
}

/// Strict dotted-quad parse. Unlike `Ipv4Addr::from_str` this accepts
/// leading zeros ("1.2.3.04"), which proxies in the wild emit.
fn dotted_quad(host: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in host.split('.') {
        if count == 4 || part.is_empty() || part.len() > 3 {
            return None;
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u16 = part.parse().ok()?;
        if value > 255 {
            return None;
        }
        octets[count] = value as u8;
        count += 1;
    }
    if count == 4 {
        Some(octets)
    } else {
        None
    }
}

/// Parse a colon-separated IPv6 literal into 16 big-endian bytes.
///
/// Accepts 1..=8 groups, each at most 0xFFFF; a single `::` compression is
/// expanded. Without compression, missing trailing groups are zero-filled.
/// More than 8 groups, an oversized group, or an empty group outside the
/// compression marker is rejected.
pub fn ipv6_octets(host: &str) -> Result<[u8; 16], Error> {
    let bad = |detail: &str| Error::Protocol(format!("invalid IPv6 literal '{host}': {detail}"));

    if host.matches("::").count() > 1 {
        return Err(bad("more than one '::'"));
    }

    let (head, tail) = match host.find("::") {
        Some(pos) => (&host[..pos], &host[pos + 2..]),
        None => (host, ""),
    };

    let parse_groups = |s: &str| -> Result<Vec<u16>, Error> {
        if s.is_empty() {
            return Ok(Vec::new());
        }
        s.split(':')
            .map(|g| {
                if g.is_empty() || g.len() > 4 {
                    return Err(bad("empty or oversized group"));
                }
                u16::from_str_radix(g, 16).map_err(|_| bad("non-hex group"))
            })
            .collect()
    };

    let head_groups = parse_groups(head)?;
    let tail_groups = parse_groups(tail)?;

    if head_groups.len() + tail_groups.len() > 8 {
        return Err(bad("more than 8 groups"));
    }

    let mut out = [0u8; 16];
    for (i, g) in head_groups.iter().enumerate() {
        out[2 * i..2 * i + 2].copy_from_slice(&g.to_be_bytes());
    }
    let tail_start = 16 - 2 * tail_groups.len();
    for (i, g) in tail_groups.iter().enumerate() {
        out[tail_start + 2 * i..tail_start + 2 * i + 2].copy_from_slice(&g.to_be_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ipv4() {
        assert_eq!(classify("1.2.3.4"), HostKind::Ipv4([1, 2, 3, 4]));
        assert_eq!(classify("0.0.0.0"), HostKind::Ipv4([0, 0, 0, 0]));
        assert_eq!(classify("255.255.255.255"), HostKind::Ipv4([255; 4]));
        // Leading zeros are still dotted-quad.
        assert_eq!(classify("1.2.3.04"), HostKind::Ipv4([1, 2, 3, 4]));
    }

    #[test]
    fn classify_rejects_bad_quads_as_domain() {
        assert_eq!(classify("256.1.1.1"), HostKind::Domain);
        assert_eq!(classify("1.2.3"), HostKind::Domain);
        assert_eq!(classify("1.2.3.4.5"), HostKind::Domain);
        assert_eq!(classify("1.2.3."), HostKind::Domain);
        assert_eq!(classify("1.2.3.4a"), HostKind::Domain);
    }

    #[test]
    fn classify_ipv6() {
        assert_eq!(classify("::1"), HostKind::Ipv6);
        assert_eq!(classify("2001:db8::1"), HostKind::Ipv6);
        assert_eq!(classify("dead:beef"), HostKind::Ipv6);
        assert_eq!(classify("1:2:3:4:5:6:7:8:9"), HostKind::Ipv6); // shape only
    }

    #[test]
    fn classify_domain() {
        assert_eq!(classify("example.com"), HostKind::Domain);
        assert_eq!(classify("localhost"), HostKind::Domain);
        // 'g' is not a hex digit, so the colon does not make this IPv6.
        assert_eq!(classify("g::1"), HostKind::Domain);
    }

    #[test]
    fn ipv6_full_form() {
        let o = ipv6_octets("2001:db8:0:0:0:0:0:1").unwrap();
        assert_eq!(&o[..4], &[0x20, 0x01, 0x0d, 0xb8]);
        assert_eq!(o[15], 1);
    }

    #[test]
    fn ipv6_compressed() {
        let o = ipv6_octets("2001:db8::1").unwrap();
        assert_eq!(&o[..4], &[0x20, 0x01, 0x0d, 0xb8]);
        assert_eq!(&o[4..15], &[0u8; 11][..]);
        assert_eq!(o[15], 1);

        assert_eq!(ipv6_octets("::").unwrap(), [0u8; 16]);
        assert_eq!(ipv6_octets("::1").unwrap()[15], 1);
    }

    #[test]
    fn ipv6_short_form_fills_left() {
        let o = ipv6_octets("1:2:3").unwrap();
        assert_eq!(&o[..6], &[0, 1, 0, 2, 0, 3]);
        assert_eq!(&o[6..], &[0u8; 10][..]);
    }

    #[test]
    fn ipv6_rejects() {
        assert!(ipv6_octets("1:2:3:4:5:6:7:8:9").is_err());
        assert!(ipv6_octets("12345::").is_err());
        assert!(ipv6_octets("1::2::3").is_err());
        assert!(ipv6_octets(":1:2").is_err());
    }
}
