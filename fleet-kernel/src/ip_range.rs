/*!
PLAGES IP - Expansion des plages saisies pour la découverte

Formes : `192.168.1.0/24`, `192.168.1.1-10`, `192.168.1.1-192.168.1.10`,
adresses seules, mélangées et séparées par virgules ou espaces.
Résultat trié, sans doublons, borné à MAX_DISCOVERY_ADDRESSES.
*/

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

pub const MAX_DISCOVERY_ADDRESSES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("empty address range")]
    Empty,
    #[error("cannot parse {0:?} as an address, range or subnet")]
    Invalid(String),
    #[error("range covers {0} addresses, limit is 512")]
    TooMany(usize),
}

pub fn expand(spec: &str) -> Result<Vec<Ipv4Addr>, RangeError> {
    let mut found = BTreeSet::new();
    for part in spec.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty()) {
        let (start, end) = bounds(part).ok_or_else(|| RangeError::Invalid(part.to_string()))?;
        let span = (u32::from(end) - u32::from(start)) as usize + 1;
        if found.len() + span > MAX_DISCOVERY_ADDRESSES * 2 {
            // ordre de grandeur déjà hors limite, inutile de matérialiser
            return Err(RangeError::TooMany(found.len() + span));
        }
        found.extend((u32::from(start)..=u32::from(end)).map(Ipv4Addr::from));
    }
    match found.len() {
        0 => Err(RangeError::Empty),
        n if n > MAX_DISCOVERY_ADDRESSES => Err(RangeError::TooMany(n)),
        _ => Ok(found.into_iter().collect()),
    }
}

/// Bornes inclusives d'un morceau de spécification
fn bounds(part: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    if let Some((net, prefix)) = part.split_once('/') {
        let net: Ipv4Addr = net.trim().parse().ok()?;
        let prefix: u32 = prefix.trim().parse().ok().filter(|p| *p <= 32)?;
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        let first = u32::from(net) & mask;
        let last = first | !mask;
        // /31 et /32 n'ont pas d'adresses réseau/diffusion à exclure
        return Some(if prefix >= 31 {
            (first.into(), last.into())
        } else {
            ((first + 1).into(), (last - 1).into())
        });
    }
    if let Some((start, end)) = part.split_once('-') {
        let start: Ipv4Addr = start.trim().parse().ok()?;
        let end = end.trim();
        let end: Ipv4Addr = if end.contains('.') {
            end.parse().ok()?
        } else {
            let last: u8 = end.parse().ok()?;
            let [a, b, c, _] = start.octets();
            Ipv4Addr::new(a, b, c, last)
        };
        return Some(if start <= end { (start, end) } else { (end, start) });
    }
    let single: Ipv4Addr = part.trim().parse().ok()?;
    Some((single, single))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_excludes_network_and_broadcast() {
        let ips = expand("192.168.1.0/24").unwrap();
        assert_eq!(ips.len(), 254);
        assert_eq!(ips[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(ips[253], Ipv4Addr::new(192, 168, 1, 254));
        assert_eq!(expand("10.0.0.7/32").unwrap(), vec![Ipv4Addr::new(10, 0, 0, 7)]);
    }

    #[test]
    fn test_short_and_full_ranges() {
        assert_eq!(expand("192.168.1.1-10").unwrap().len(), 10);
        let full = expand("192.168.1.250-192.168.2.5").unwrap();
        assert_eq!(full.len(), 12);
        // bornes inversées
        assert_eq!(expand("10.0.0.9-3").unwrap().len(), 7);
    }

    #[test]
    fn test_mixed_list_deduplicates() {
        let ips = expand("10.0.0.1, 10.0.0.2 10.0.0.1-3\n10.0.0.3").unwrap();
        assert_eq!(ips.len(), 3);
    }

    #[test]
    fn test_limits_and_errors() {
        assert_eq!(expand("10.0.0.0/23").unwrap().len(), 510);
        assert!(matches!(expand("10.0.0.0/22"), Err(RangeError::TooMany(_))));
        assert!(matches!(expand("10.0.0.0/8"), Err(RangeError::TooMany(_))));
        assert_eq!(expand(" , "), Err(RangeError::Empty));
        assert!(matches!(expand("router.local"), Err(RangeError::Invalid(_))));
    }
}
