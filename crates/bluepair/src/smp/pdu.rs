//! SMP PDU codec
//!
//! Every SMP command is a one-octet opcode followed by a fixed-length
//! payload. Decoding rejects any buffer whose length is not exactly the one
//! defined for its opcode. Field values are kept raw so that a decoded PDU
//! re-encodes to the same octets; range checks belong to the state machine.

use super::constants::*;
use super::types::*;
use crate::gap::BdAddr;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// Parameters of a Pairing Request or Pairing Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingParams {
    /// IO capability
    pub io_capability: u8,
    /// OOB data flag
    pub oob_data_flag: u8,
    /// Authentication requirements
    pub auth_req: u8,
    /// Maximum encryption key size
    pub max_key_size: u8,
    /// Initiator key distribution
    pub initiator_key_dist: u8,
    /// Responder key distribution
    pub responder_key_dist: u8,
}

impl PairingParams {
    pub fn new(
        io_capability: IoCapability,
        oob_data_present: bool,
        auth_req: AuthRequirements,
        max_key_size: u8,
        initiator_key_dist: KeyDistribution,
        responder_key_dist: KeyDistribution,
    ) -> Self {
        Self {
            io_capability: io_capability.to_u8(),
            oob_data_flag: u8::from(oob_data_present),
            auth_req: auth_req.to_u8(),
            max_key_size,
            initiator_key_dist: initiator_key_dist.bits(),
            responder_key_dist: responder_key_dist.bits(),
        }
    }

    /// Check the fields against their valid ranges
    pub fn validate(&self) -> SmpResult<()> {
        if IoCapability::from_u8(self.io_capability).is_none()
            || self.oob_data_flag > SMP_OOB_AUTH_DATA_PRESENT
            || !(SMP_MIN_ENCRYPTION_KEY_SIZE..=SMP_MAX_ENCRYPTION_KEY_SIZE)
                .contains(&self.max_key_size)
        {
            return Err(SmpError::Pairing(PairingFailedReason::InvalidParameters));
        }
        Ok(())
    }

    pub fn io_capability(&self) -> IoCapability {
        IoCapability::from_u8(self.io_capability).unwrap_or(IoCapability::NoInputNoOutput)
    }

    pub fn oob_data_present(&self) -> bool {
        self.oob_data_flag == SMP_OOB_AUTH_DATA_PRESENT
    }

    pub fn auth_req(&self) -> AuthRequirements {
        AuthRequirements::from_u8(self.auth_req)
    }

    pub fn initiator_key_dist(&self) -> KeyDistribution {
        KeyDistribution::from_bits_truncate(self.initiator_key_dist)
    }

    pub fn responder_key_dist(&self) -> KeyDistribution {
        KeyDistribution::from_bits_truncate(self.responder_key_dist)
    }

    /// IOcap argument of f6: `[IO capability, OOB flag, AuthReq]`
    pub fn f6_io_cap(&self) -> [u8; 3] {
        [self.io_capability, self.oob_data_flag, self.auth_req]
    }

    fn write_to(&self, packet: &mut Vec<u8>) {
        packet.push(self.io_capability);
        packet.push(self.oob_data_flag);
        packet.push(self.auth_req);
        packet.push(self.max_key_size);
        packet.push(self.initiator_key_dist);
        packet.push(self.responder_key_dist);
    }

    fn read_from(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        Ok(Self {
            io_capability: cursor.read_u8()?,
            oob_data_flag: cursor.read_u8()?,
            auth_req: cursor.read_u8()?,
            max_key_size: cursor.read_u8()?,
            initiator_key_dist: cursor.read_u8()?,
            responder_key_dist: cursor.read_u8()?,
        })
    }
}

/// A decoded SMP command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpPdu {
    PairingRequest(PairingParams),
    PairingResponse(PairingParams),
    PairingConfirm([u8; 16]),
    PairingRandom([u8; 16]),
    PairingFailed(u8),
    EncryptionInformation([u8; 16]),
    MasterIdentification { ediv: u16, rand: [u8; 8] },
    IdentityInformation([u8; 16]),
    IdentityAddressInformation { addr_type: u8, addr: BdAddr },
    SigningInformation([u8; 16]),
    SecurityRequest(u8),
    /// X and Y coordinates, little-endian
    PairingPublicKey { x: [u8; 32], y: [u8; 32] },
    PairingDhKeyCheck([u8; 16]),
    KeypressNotification(u8),
}

/// Exact PDU length for a known opcode
pub fn pdu_length(opcode: u8) -> Option<usize> {
    let len = match opcode {
        SMP_PAIRING_REQUEST | SMP_PAIRING_RESPONSE => SMP_PAIRING_REQ_LEN,
        SMP_PAIRING_CONFIRM => SMP_PAIRING_CONFIRM_LEN,
        SMP_PAIRING_RANDOM => SMP_PAIRING_RANDOM_LEN,
        SMP_PAIRING_FAILED => SMP_PAIRING_FAILED_LEN,
        SMP_ENCRYPTION_INFORMATION => SMP_ENCRYPTION_INFORMATION_LEN,
        SMP_MASTER_IDENTIFICATION => SMP_MASTER_IDENTIFICATION_LEN,
        SMP_IDENTITY_INFORMATION => SMP_IDENTITY_INFORMATION_LEN,
        SMP_IDENTITY_ADDRESS_INFORMATION => SMP_IDENTITY_ADDRESS_INFORMATION_LEN,
        SMP_SIGNING_INFORMATION => SMP_SIGNING_INFORMATION_LEN,
        SMP_SECURITY_REQUEST => SMP_SECURITY_REQUEST_LEN,
        SMP_PAIRING_PUBLIC_KEY => SMP_PAIRING_PUBLIC_KEY_LEN,
        SMP_PAIRING_DHK_CHECK => SMP_PAIRING_DHK_CHECK_LEN,
        SMP_PAIRING_KEYPRESS_NOTIFICATION => SMP_PAIRING_KEYPRESS_NOTIFICATION_LEN,
        _ => return None,
    };
    Some(len)
}

fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[u8; N]> {
    let mut out = [0u8; N];
    cursor.read_exact(&mut out)?;
    Ok(out)
}

impl SmpPdu {
    /// Parse an SMP PDU from the raw L2CAP payload
    pub fn decode(data: &[u8]) -> SmpResult<Self> {
        let opcode = *data.first().ok_or(SmpError::InvalidPdu)?;
        let expected = pdu_length(opcode).ok_or(SmpError::CommandNotSupported(opcode))?;
        if data.len() != expected {
            return Err(SmpError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        Self::decode_payload(opcode, &mut cursor).map_err(|_| SmpError::InvalidPdu)
    }

    fn decode_payload(opcode: u8, cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let pdu = match opcode {
            SMP_PAIRING_REQUEST => SmpPdu::PairingRequest(PairingParams::read_from(cursor)?),
            SMP_PAIRING_RESPONSE => SmpPdu::PairingResponse(PairingParams::read_from(cursor)?),
            SMP_PAIRING_CONFIRM => SmpPdu::PairingConfirm(read_array(cursor)?),
            SMP_PAIRING_RANDOM => SmpPdu::PairingRandom(read_array(cursor)?),
            SMP_PAIRING_FAILED => SmpPdu::PairingFailed(cursor.read_u8()?),
            SMP_ENCRYPTION_INFORMATION => SmpPdu::EncryptionInformation(read_array(cursor)?),
            SMP_MASTER_IDENTIFICATION => SmpPdu::MasterIdentification {
                ediv: cursor.read_u16::<LittleEndian>()?,
                rand: read_array(cursor)?,
            },
            SMP_IDENTITY_INFORMATION => SmpPdu::IdentityInformation(read_array(cursor)?),
            SMP_IDENTITY_ADDRESS_INFORMATION => SmpPdu::IdentityAddressInformation {
                addr_type: cursor.read_u8()?,
                addr: BdAddr::new(read_array(cursor)?),
            },
            SMP_SIGNING_INFORMATION => SmpPdu::SigningInformation(read_array(cursor)?),
            SMP_SECURITY_REQUEST => SmpPdu::SecurityRequest(cursor.read_u8()?),
            SMP_PAIRING_PUBLIC_KEY => SmpPdu::PairingPublicKey {
                x: read_array(cursor)?,
                y: read_array(cursor)?,
            },
            SMP_PAIRING_DHK_CHECK => SmpPdu::PairingDhKeyCheck(read_array(cursor)?),
            _ => SmpPdu::KeypressNotification(cursor.read_u8()?),
        };
        Ok(pdu)
    }

    /// Serialize to raw packet
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(SMP_PAIRING_PUBLIC_KEY_LEN);
        packet.push(self.opcode());

        match self {
            SmpPdu::PairingRequest(params) | SmpPdu::PairingResponse(params) => {
                params.write_to(&mut packet)
            }
            SmpPdu::PairingConfirm(value)
            | SmpPdu::PairingRandom(value)
            | SmpPdu::EncryptionInformation(value)
            | SmpPdu::IdentityInformation(value)
            | SmpPdu::SigningInformation(value)
            | SmpPdu::PairingDhKeyCheck(value) => packet.extend_from_slice(value),
            SmpPdu::PairingFailed(code)
            | SmpPdu::SecurityRequest(code)
            | SmpPdu::KeypressNotification(code) => packet.push(*code),
            SmpPdu::MasterIdentification { ediv, rand } => {
                // Writing into a Vec cannot fail
                let _ = packet.write_u16::<LittleEndian>(*ediv);
                packet.extend_from_slice(rand);
            }
            SmpPdu::IdentityAddressInformation { addr_type, addr } => {
                packet.push(*addr_type);
                packet.extend_from_slice(&addr.bytes);
            }
            SmpPdu::PairingPublicKey { x, y } => {
                packet.extend_from_slice(x);
                packet.extend_from_slice(y);
            }
        }

        packet
    }

    pub fn opcode(&self) -> u8 {
        match self {
            SmpPdu::PairingRequest(_) => SMP_PAIRING_REQUEST,
            SmpPdu::PairingResponse(_) => SMP_PAIRING_RESPONSE,
            SmpPdu::PairingConfirm(_) => SMP_PAIRING_CONFIRM,
            SmpPdu::PairingRandom(_) => SMP_PAIRING_RANDOM,
            SmpPdu::PairingFailed(_) => SMP_PAIRING_FAILED,
            SmpPdu::EncryptionInformation(_) => SMP_ENCRYPTION_INFORMATION,
            SmpPdu::MasterIdentification { .. } => SMP_MASTER_IDENTIFICATION,
            SmpPdu::IdentityInformation(_) => SMP_IDENTITY_INFORMATION,
            SmpPdu::IdentityAddressInformation { .. } => SMP_IDENTITY_ADDRESS_INFORMATION,
            SmpPdu::SigningInformation(_) => SMP_SIGNING_INFORMATION,
            SmpPdu::SecurityRequest(_) => SMP_SECURITY_REQUEST,
            SmpPdu::PairingPublicKey { .. } => SMP_PAIRING_PUBLIC_KEY,
            SmpPdu::PairingDhKeyCheck(_) => SMP_PAIRING_DHK_CHECK,
            SmpPdu::KeypressNotification(_) => SMP_PAIRING_KEYPRESS_NOTIFICATION,
        }
    }

    /// Whether this PDU belongs to the key distribution phase
    pub fn is_key_distribution(&self) -> bool {
        matches!(
            self,
            SmpPdu::EncryptionInformation(_)
                | SmpPdu::MasterIdentification { .. }
                | SmpPdu::IdentityInformation(_)
                | SmpPdu::IdentityAddressInformation { .. }
                | SmpPdu::SigningInformation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(opcode: u8) -> Vec<u8> {
        let len = pdu_length(opcode).unwrap();
        let mut packet = vec![opcode];
        packet.extend((1..len).map(|i| (i as u8).wrapping_mul(37)));
        packet
    }

    #[test]
    fn test_encode_decode_all_opcodes() {
        for opcode in SMP_PAIRING_REQUEST..=SMP_PAIRING_KEYPRESS_NOTIFICATION {
            let bytes = sample(opcode);
            let pdu = SmpPdu::decode(&bytes).unwrap();
            assert_eq!(pdu.opcode(), opcode);
            assert_eq!(pdu.encode(), bytes, "opcode 0x{:02x}", opcode);
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        for opcode in SMP_PAIRING_REQUEST..=SMP_PAIRING_KEYPRESS_NOTIFICATION {
            let bytes = sample(opcode);

            let mut long = bytes.clone();
            long.push(0);
            assert_eq!(SmpPdu::decode(&long), Err(SmpError::InvalidPdu));

            let short = &bytes[..bytes.len() - 1];
            assert_eq!(SmpPdu::decode(short), Err(SmpError::InvalidPdu));
        }
    }

    #[test]
    fn test_decode_unknown_and_empty() {
        assert_eq!(SmpPdu::decode(&[]), Err(SmpError::InvalidPdu));
        assert_eq!(
            SmpPdu::decode(&[0x0F, 0x00]),
            Err(SmpError::CommandNotSupported(0x0F))
        );
    }

    #[test]
    fn test_pairing_request_fields() {
        let bytes = [SMP_PAIRING_REQUEST, 0x04, 0x00, 0x2D, 0x10, 0x0F, 0x0F];
        let pdu = SmpPdu::decode(&bytes).unwrap();
        let SmpPdu::PairingRequest(params) = pdu else {
            panic!("expected pairing request");
        };
        assert_eq!(params.io_capability(), IoCapability::KeyboardDisplay);
        assert!(!params.oob_data_present());
        let auth = params.auth_req();
        assert!(auth.bonding && auth.mitm && auth.secure_connections && auth.ct2);
        assert_eq!(params.max_key_size, 16);
        assert!(params.initiator_key_dist().contains(KeyDistribution::LINK_KEY));
        assert!(params.validate().is_ok());
        assert_eq!(params.f6_io_cap(), [0x04, 0x00, 0x2D]);
    }

    #[test]
    fn test_pairing_params_validation() {
        let mut params = PairingParams::new(
            IoCapability::DisplayYesNo,
            false,
            AuthRequirements::new(true, true, true),
            16,
            KeyDistribution::ENC_KEY,
            KeyDistribution::ENC_KEY,
        );
        assert!(params.validate().is_ok());

        params.max_key_size = 6;
        assert_eq!(
            params.validate(),
            Err(SmpError::Pairing(PairingFailedReason::InvalidParameters))
        );

        params.max_key_size = 16;
        params.io_capability = 0x05;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_master_identification_layout() {
        let pdu = SmpPdu::MasterIdentification {
            ediv: 0x1234,
            rand: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert_eq!(
            pdu.encode(),
            vec![SMP_MASTER_IDENTIFICATION, 0x34, 0x12, 1, 2, 3, 4, 5, 6, 7, 8]
        );
    }
}
