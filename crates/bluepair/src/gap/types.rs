use std::fmt;

/// Top two bits of the most significant octet select the random address sub-type.
const RANDOM_SUBTYPE_MASK: u8 = 0xC0;
const RANDOM_SUBTYPE_RESOLVABLE: u8 = 0x40;

/// Address kinds as reported by the controller. Identity variants are what
/// a bonded peer's identity address information resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl AddressType {
    /// Whether the address is a random device address. This is the only
    /// distinction the Security Manager carries on the wire and feeds into
    /// its key generation functions.
    pub fn is_random(&self) -> bool {
        matches!(self, AddressType::Random | AddressType::RandomIdentity)
    }
}

/// Bluetooth device address, stored least significant byte first as it
/// appears on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    /// Builds an address from its 48-bit numeric value, e.g. `0xA1A2A3A4A5A6`.
    pub fn from_u64(value: u64) -> Self {
        let le = value.to_le_bytes();
        Self::new([le[0], le[1], le[2], le[3], le[4], le[5]])
    }

    /// Whether this random address is a resolvable private address.
    pub fn is_resolvable_private(&self) -> bool {
        self.bytes[5] & RANDOM_SUBTYPE_MASK == RANDOM_SUBTYPE_RESOLVABLE
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().rev().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Typed device address as exchanged during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: AddressType,
    pub addr: BdAddr,
}

impl Address {
    pub fn new(kind: AddressType, addr: BdAddr) -> Self {
        Self { kind, addr }
    }

    pub fn public(addr: BdAddr) -> Self {
        Self::new(AddressType::Public, addr)
    }

    pub fn random(addr: BdAddr) -> Self {
        Self::new(AddressType::Random, addr)
    }

    /// Address type octet used by the pairing PDUs and the key generation
    /// functions: 0 for public, 1 for random.
    pub fn type_octet(&self) -> u8 {
        u8::from(self.kind.is_random())
    }

    /// Address and type in the little-endian layout the toolbox takes:
    /// six address octets followed by the type octet.
    pub fn to_le_bytes(&self) -> [u8; 7] {
        let mut out = [0u8; 7];
        out[..6].copy_from_slice(&self.addr.bytes);
        out[6] = self.type_octet();
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.kind.is_random() { "random" } else { "public" };
        write!(f, "{} ({})", self.addr, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bdaddr_display_is_msb_first() {
        let addr = BdAddr::from_u64(0xA1A2A3A4A5A6);
        assert_eq!(addr.bytes, [0xA6, 0xA5, 0xA4, 0xA3, 0xA2, 0xA1]);
        assert_eq!(addr.to_string(), "A1:A2:A3:A4:A5:A6");
    }

    #[test]
    fn test_address_type_octet() {
        let addr = BdAddr::from_u64(0x56123737BFCE);
        assert_eq!(Address::public(addr).type_octet(), 0);
        assert_eq!(Address::random(addr).type_octet(), 1);
        assert_eq!(
            Address::new(AddressType::RandomIdentity, addr).type_octet(),
            1
        );
        assert_eq!(Address::random(addr).to_le_bytes()[6], 1);
    }

    #[test]
    fn test_resolvable_private_detection() {
        assert!(BdAddr::from_u64(0x4A0000000001).is_resolvable_private());
        assert!(!BdAddr::from_u64(0xCA0000000001).is_resolvable_private());
    }
}
