//! Port-forward normalization.
//!
//! Pure function over `{host, guest}` pairs: the gateway mapping leads,
//! exact duplicates collapse, a host port claimed for two different guest
//! ports is an error. Port 0 is invalid on either side.

use cf_common::{Error, PortMapping, Result};

/// Normalize the forward list for one instance.
pub fn normalize_port_forwards(
    gateway: PortMapping,
    extra: &[PortMapping],
) -> Result<Vec<PortMapping>> {
    validate_mapping(gateway)?;

    let mut out = vec![gateway];
    for &mapping in extra {
        validate_mapping(mapping)?;
        match out.iter().find(|m| m.host == mapping.host) {
            Some(existing) if existing.guest == mapping.guest => {} // exact duplicate
            Some(existing) => {
                return Err(Error::DuplicateHostPort {
                    host: mapping.host,
                    first_guest: existing.guest,
                    second_guest: mapping.guest,
                });
            }
            None => out.push(mapping),
        }
    }
    Ok(out)
}

fn validate_mapping(mapping: PortMapping) -> Result<()> {
    if mapping.host == 0 {
        return Err(Error::InvalidPort {
            port: mapping.host as u32,
        });
    }
    if mapping.guest == 0 {
        return Err(Error::InvalidPort {
            port: mapping.guest as u32,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GW: PortMapping = PortMapping {
        host: 8090,
        guest: 8080,
    };

    #[test]
    fn gateway_comes_first() {
        let out = normalize_port_forwards(GW, &[PortMapping::new(2222, 22)]).unwrap();
        assert_eq!(out[0], GW);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn exact_duplicates_collapse() {
        let out = normalize_port_forwards(
            GW,
            &[
                PortMapping::new(2222, 22),
                PortMapping::new(2222, 22),
                GW, // duplicating the gateway is also fine
            ],
        )
        .unwrap();
        assert_eq!(out, vec![GW, PortMapping::new(2222, 22)]);
    }

    #[test]
    fn conflicting_guest_is_an_error() {
        let err =
            normalize_port_forwards(GW, &[PortMapping::new(2222, 22), PortMapping::new(2222, 23)])
                .unwrap_err();
        assert_eq!(err.kind(), "duplicate_host_port");
    }

    #[test]
    fn conflict_with_gateway_is_an_error() {
        let err = normalize_port_forwards(GW, &[PortMapping::new(8090, 9999)]).unwrap_err();
        assert_eq!(err.kind(), "duplicate_host_port");
    }

    #[test]
    fn zero_ports_are_invalid() {
        assert_eq!(
            normalize_port_forwards(GW, &[PortMapping::new(0, 22)])
                .unwrap_err()
                .kind(),
            "invalid_port"
        );
        assert_eq!(
            normalize_port_forwards(GW, &[PortMapping::new(22, 0)])
                .unwrap_err()
                .kind(),
            "invalid_port"
        );
        assert_eq!(
            normalize_port_forwards(PortMapping::new(0, 8080), &[])
                .unwrap_err()
                .kind(),
            "invalid_port"
        );
    }

    proptest! {
        /// Any successful normalization leads with the gateway, contains no
        /// duplicate host ports, and preserves every requested mapping.
        #[test]
        fn normalized_output_invariants(
            extra in proptest::collection::vec((1u16..=u16::MAX, 1u16..=u16::MAX), 0..16)
        ) {
            let extra: Vec<PortMapping> =
                extra.into_iter().map(|(h, g)| PortMapping::new(h, g)).collect();

            match normalize_port_forwards(GW, &extra) {
                Ok(out) => {
                    prop_assert_eq!(out[0], GW);
                    let mut hosts: Vec<u16> = out.iter().map(|m| m.host).collect();
                    hosts.sort_unstable();
                    hosts.dedup();
                    prop_assert_eq!(hosts.len(), out.len(), "duplicate host ports survived");
                    for m in &extra {
                        prop_assert!(out.contains(m), "mapping {} dropped", m);
                    }
                }
                Err(Error::DuplicateHostPort { host, .. }) => {
                    // A conflict must actually exist in the input.
                    let guests: Vec<u16> = extra
                        .iter()
                        .chain(std::iter::once(&GW))
                        .filter(|m| m.host == host)
                        .map(|m| m.guest)
                        .collect();
                    let mut unique = guests.clone();
                    unique.sort_unstable();
                    unique.dedup();
                    prop_assert!(unique.len() > 1, "reported conflict on host {} without one", host);
                }
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }
    }
}
