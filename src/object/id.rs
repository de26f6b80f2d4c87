// Interface identities
//
// 128-bit values naming an interface contract. Laid out like a GUID so that
// published identities read the same way everywhere they are documented.

use std::fmt;

/// Globally unique identifier of an interface contract (not of a concrete type).
///
/// Once published, an identity must never be reused for a different contract.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl InterfaceId {
    /// The all-zero identity, reserved for the base object contract.
    pub const ZERO: Self = Self::new(0, 0, 0, [0; 8]);

    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self { data1, data2, data3, data4 }
    }

    /// Builds an identity from its big-endian 128-bit form, i.e.
    /// `0xF554EEE4_57C2_4637_A508_85BE80DC657C`.
    pub const fn from_u128(value: u128) -> Self {
        let b = value.to_be_bytes();
        Self {
            data1: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            data2: u16::from_be_bytes([b[4], b[5]]),
            data3: u16::from_be_bytes([b[6], b[7]]),
            data4: [b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]],
        }
    }

    pub const fn as_u128(&self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceId({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_guid_form() {
        let id = InterfaceId::new(
            0xab8cf3a6,
            0xd959,
            0x41c1,
            [0xae, 0x00, 0xa5, 0x8a, 0xe9, 0x82, 0x0e, 0x6a],
        );
        assert_eq!(id.to_string(), "{AB8CF3A6-D959-41C1-AE00-A58AE9820E6A}");
    }

    #[test]
    fn test_u128_form_matches_fields() {
        let id = InterfaceId::from_u128(0xF554EEE4_57C2_4637_A508_85BE80DC657C);
        assert_eq!(id.data1, 0xf554eee4);
        assert_eq!(id.data2, 0x57c2);
        assert_eq!(id.data3, 0x4637);
        assert_eq!(id.data4, [0xa5, 0x08, 0x85, 0xbe, 0x80, 0xdc, 0x65, 0x7c]);
        assert_eq!(id.as_u128(), 0xF554EEE4_57C2_4637_A508_85BE80DC657C);
    }

    #[test]
    fn test_zero_is_distinct_from_published_ids() {
        assert_ne!(InterfaceId::ZERO, InterfaceId::from_u128(1));
        assert_eq!(InterfaceId::ZERO.as_u128(), 0);
    }
}
