//! Bolt protocol version definitions.

use std::cmp::Ordering;
use std::fmt;

/// Bolt protocol versions accepted by the server.
///
/// On the wire a version is four bytes `[reserved, range, minor, major]`.
/// The discriminant is that layout read as a big-endian `u32` with a zero
/// range, so 4.3 is `0x0000_0304`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BoltVersion {
    V4_0 = 0x0000_0004,
    V4_1 = 0x0000_0104,
    V4_2 = 0x0000_0204,
    /// Adds ROUTE, HELLO hints and the `utc` patch
    V4_3 = 0x0000_0304,
    V4_4 = 0x0000_0404,
    /// Element ids and UTC DateTime
    V5_0 = 0x0000_0005,
    /// Authentication moves from HELLO to LOGON/LOGOFF
    V5_1 = 0x0000_0105,
}

impl BoltVersion {
    /// All supported versions, newest first.
    pub const ALL: [BoltVersion; 7] = [
        BoltVersion::V5_1,
        BoltVersion::V5_0,
        BoltVersion::V4_4,
        BoltVersion::V4_3,
        BoltVersion::V4_2,
        BoltVersion::V4_1,
        BoltVersion::V4_0,
    ];

    pub fn from_major_minor(major: u8, minor: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.major() == major && v.minor() == minor)
    }

    pub fn major(self) -> u8 {
        (self as u32 & 0xFF) as u8
    }

    pub fn minor(self) -> u8 {
        ((self as u32 >> 8) & 0xFF) as u8
    }

    /// Wire form used in the handshake response.
    pub fn to_bytes(self) -> [u8; 4] {
        [0, 0, self.minor(), self.major()]
    }

    pub fn supports_route(self) -> bool {
        self >= BoltVersion::V4_3
    }

    /// 4.3 ROUTE carries a bare database name, 4.4+ an extra map.
    pub fn route_has_extra_map(self) -> bool {
        self >= BoltVersion::V4_4
    }

    pub fn supports_noop(self) -> bool {
        self >= BoltVersion::V4_1
    }

    pub fn supports_hints(self) -> bool {
        self >= BoltVersion::V4_3
    }

    pub fn supports_utc_patch(self) -> bool {
        matches!(self, BoltVersion::V4_3 | BoltVersion::V4_4)
    }

    pub fn uses_utc_datetime(self) -> bool {
        self >= BoltVersion::V5_0
    }

    pub fn uses_element_ids(self) -> bool {
        self >= BoltVersion::V5_0
    }

    pub fn supports_logon(self) -> bool {
        self >= BoltVersion::V5_1
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl PartialOrd for BoltVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BoltVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major(), self.minor()).cmp(&(other.major(), other.minor()))
    }
}
