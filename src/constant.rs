//! Wire-level constants: handshake magic, protocol versions, and message
//! structure signatures (§3, §6).

/// The four-byte magic that precedes every Bolt handshake.
pub const HANDSHAKE_PREAMBLE: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// A `(major, minor)` Bolt protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoltVersion {
    pub major: u8,
    pub minor: u8,
}

impl BoltVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Encode as the 4-byte big-endian handshake proposal: `[0, minor_range, minor, major]`.
    ///
    /// Per the REDESIGN FLAGS / Open Questions in the spec, this core never advertises a
    /// minor-version range: it always proposes exactly the versions it implements, so the
    /// range byte is always `0`.
    pub const fn to_proposal_bytes(self) -> [u8; 4] {
        [0, 0, self.minor, self.major]
    }

    /// Decode a chosen version from the server's 4-byte handshake response.
    pub fn from_chosen_bytes(bytes: [u8; 4]) -> Option<Self> {
        if bytes == [0, 0, 0, 0] {
            return None;
        }
        Some(Self {
            major: bytes[3],
            minor: bytes[2],
        })
    }
}

impl std::fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Versions this core fully implements, most-preferred first. The handshake proposes at
/// most four of these (§6); only the versions actually implemented are ever offered.
pub const SUPPORTED_VERSIONS: [BoltVersion; 4] = [
    BoltVersion::new(5, 7),
    BoltVersion::new(5, 4),
    BoltVersion::new(5, 1),
    BoltVersion::new(4, 4),
];

/// Message structure signatures, request side.
pub mod request {
    pub const HELLO: u8 = 0x01;
    pub const LOGON: u8 = 0x6A;
    pub const LOGOFF: u8 = 0x6B;
    pub const GOODBYE: u8 = 0x02;
    pub const RESET: u8 = 0x0F;
    pub const RUN: u8 = 0x10;
    pub const DISCARD: u8 = 0x2F;
    pub const PULL: u8 = 0x3F;
    pub const BEGIN: u8 = 0x11;
    pub const COMMIT: u8 = 0x12;
    pub const ROLLBACK: u8 = 0x13;
    pub const ROUTE: u8 = 0x66;
    pub const TELEMETRY: u8 = 0x54;
}

/// Message structure signatures, response side.
pub mod response {
    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;
}

/// Well-known structure signatures carried inside PackStream values (temporal/spatial
/// types, §3). The codec treats these opaquely as `(signature, fields)`; this table is
/// documentation for callers translating them, not something the codec branches on.
pub mod structure {
    pub const NODE: u8 = 0x4E;
    pub const RELATIONSHIP: u8 = 0x52;
    pub const UNBOUND_RELATIONSHIP: u8 = 0x72;
    pub const PATH: u8 = 0x50;
    pub const DATE: u8 = 0x44;
    pub const TIME: u8 = 0x54;
    pub const LOCAL_TIME: u8 = 0x74;
    pub const DATE_TIME: u8 = 0x49;
    pub const DATE_TIME_ZONE_ID: u8 = 0x69;
    pub const LOCAL_DATE_TIME: u8 = 0x64;
    pub const DURATION: u8 = 0x45;
    pub const POINT_2D: u8 = 0x58;
    pub const POINT_3D: u8 = 0x59;
}

/// Conformance-harness feature tags this core can truthfully claim (§6).
pub const FEATURE_TAGS: &[&str] = &[
    "Feature:Bolt:4.4",
    "Feature:Bolt:5.1",
    "Feature:Bolt:5.4",
    "Feature:Bolt:5.7",
    "Feature:Auth:Basic",
    "Feature:Auth:Bearer",
    "Feature:Auth:Custom",
    "Feature:Impersonation",
    "Optimization:PullPipelining",
    "Optimization:AuthPipelining",
];
