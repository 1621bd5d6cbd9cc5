//! Handshake preamble and version negotiation (§4.2, §6).

use crate::constant::{BoltVersion, HANDSHAKE_PREAMBLE, SUPPORTED_VERSIONS};
use crate::error::{Error, Result};

/// Build the 20-byte handshake: the magic preamble followed by up to four version
/// proposals, most-preferred first. Unused proposal slots are zero-filled.
pub fn build_handshake(offered: &[BoltVersion]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out[..4].copy_from_slice(&HANDSHAKE_PREAMBLE);
    for (i, slot) in out[4..].chunks_exact_mut(4).enumerate() {
        if let Some(version) = offered.get(i) {
            slot.copy_from_slice(&version.to_proposal_bytes());
        }
    }
    out
}

/// The default handshake offering this core's fully-supported versions.
pub fn default_handshake() -> [u8; 20] {
    build_handshake(&SUPPORTED_VERSIONS)
}

/// Interpret the server's 4-byte chosen-version response.
pub fn parse_chosen_version(bytes: [u8; 4]) -> Result<BoltVersion> {
    BoltVersion::from_chosen_bytes(bytes)
        .ok_or_else(|| Error::ProtocolError("server rejected every proposed Bolt version".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_starts_with_magic_preamble() {
        let hs = default_handshake();
        assert_eq!(&hs[..4], &HANDSHAKE_PREAMBLE);
    }

    #[test]
    fn handshake_proposes_at_most_four_versions_most_preferred_first() {
        let hs = build_handshake(&SUPPORTED_VERSIONS);
        assert_eq!(&hs[4..8], &SUPPORTED_VERSIONS[0].to_proposal_bytes());
        assert_eq!(&hs[8..12], &SUPPORTED_VERSIONS[1].to_proposal_bytes());
    }

    #[test]
    fn never_proposes_a_minor_version_range() {
        for version in SUPPORTED_VERSIONS {
            let bytes = version.to_proposal_bytes();
            assert_eq!(bytes[1], 0, "range byte must always be zero");
        }
    }

    #[test]
    fn zero_response_is_rejection() {
        assert!(parse_chosen_version([0, 0, 0, 0]).is_err());
    }

    #[test]
    fn parses_chosen_version() {
        let v = parse_chosen_version([0, 0, 4, 5]).unwrap();
        assert_eq!(v, BoltVersion::new(5, 4));
    }
}
