//! Security Manager configuration

use super::constants::*;
use super::crypto::generate_random_128;
use super::pdu::PairingParams;
use super::types::*;
use crate::gap::Address;
use std::time::Duration;

/// Local identity distributed in the Identity Information and Identity
/// Address Information PDUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Identity Resolving Key, little-endian
    pub irk: [u8; 16],
    /// Public or static random identity address
    pub address: Address,
}

/// Security Manager configuration
#[derive(Debug, Clone)]
pub struct SmConfig {
    /// Local IO capability
    pub io_capability: IoCapability,
    /// Request bonding
    pub bonding: bool,
    /// Request MITM protection
    pub mitm: bool,
    /// Support LE Secure Connections
    pub secure_connections: bool,
    /// Refuse LE legacy pairing
    pub secure_connections_only: bool,
    /// Support keypress notifications during passkey entry
    pub keypress_notifications: bool,
    /// Refuse pairings that would end up unauthenticated
    pub authenticated_pairing_only: bool,
    /// Maximum encryption key size (7-16)
    pub max_key_size: u8,
    /// Minimum acceptable encryption key size (7-16)
    pub min_key_size: u8,
    /// Keys the initiator distributes
    pub initiator_key_dist: KeyDistribution,
    /// Keys the responder distributes
    pub responder_key_dist: KeyDistribution,
    /// Time allowed for each expected peer PDU
    pub response_timeout: Duration,
    /// Time allowed for passkey, comparison and OOB input
    pub user_timeout: Duration,
    /// Delay before polling a pending ECC operation again
    pub ecc_retry_backoff: Duration,
    /// Pending ECC polls allowed before pairing fails
    pub ecc_max_retries: u32,
    /// Pairings that may reuse a generated key pair; 0 always regenerates
    pub ecc_key_recycle_limit: u32,
    /// Accept the Bluetooth SIG debug public key from peers
    pub allow_debug_keys: bool,
    /// Reject Pairing Requests this soon after a failed attempt with the
    /// same peer; zero disables the check
    pub repeated_attempts_interval: Duration,
    /// Start pairing as initiator when the peer sends a Security Request
    pub auto_pair_on_security_request: bool,
    /// Identity to distribute; identity keys are not distributed without it
    pub identity: Option<LocalIdentity>,
    /// Encryption root used to diversify distributed legacy LTKs
    pub encryption_root: [u8; 16],
}

impl Default for SmConfig {
    fn default() -> Self {
        Self {
            io_capability: IoCapability::NoInputNoOutput,
            bonding: true,
            mitm: false,
            secure_connections: true,
            secure_connections_only: false,
            keypress_notifications: false,
            authenticated_pairing_only: false,
            max_key_size: SMP_MAX_ENCRYPTION_KEY_SIZE,
            min_key_size: SMP_MIN_ENCRYPTION_KEY_SIZE,
            initiator_key_dist: KeyDistribution::le_keys(),
            responder_key_dist: KeyDistribution::le_keys(),
            response_timeout: Duration::from_millis(SMP_TIMEOUT_GENERAL),
            user_timeout: Duration::from_millis(SMP_TIMEOUT_USER_INPUT),
            ecc_retry_backoff: Duration::from_millis(SMP_ECC_RETRY_BACKOFF_MS),
            ecc_max_retries: SMP_ECC_MAX_RETRIES,
            ecc_key_recycle_limit: 0,
            allow_debug_keys: false,
            repeated_attempts_interval: Duration::ZERO,
            auto_pair_on_security_request: true,
            identity: None,
            encryption_root: generate_random_128(),
        }
    }
}

impl SmConfig {
    /// Check the configuration for values the protocol cannot carry
    pub fn validate(&self) -> SmpResult<()> {
        let range = SMP_MIN_ENCRYPTION_KEY_SIZE..=SMP_MAX_ENCRYPTION_KEY_SIZE;
        if !range.contains(&self.min_key_size)
            || !range.contains(&self.max_key_size)
            || self.min_key_size > self.max_key_size
        {
            return Err(SmpError::Pairing(PairingFailedReason::EncryptionKeySizeInsufficient));
        }
        if self.secure_connections_only && !self.secure_connections {
            return Err(SmpError::Pairing(PairingFailedReason::AuthReqNotMet));
        }
        Ok(())
    }

    /// AuthReq field for outgoing Pairing Request, Response and Security
    /// Request PDUs
    pub fn auth_requirements(&self) -> AuthRequirements {
        AuthRequirements {
            bonding: self.bonding,
            mitm: self.mitm,
            secure_connections: self.secure_connections,
            keypress_notifications: self.keypress_notifications,
            ct2: false,
        }
    }

    /// Keys this device can actually send when it plays `role`
    pub fn local_key_dist(&self, role: PairingRole) -> KeyDistribution {
        let mut dist = match role {
            PairingRole::Initiator => self.initiator_key_dist,
            PairingRole::Responder => self.responder_key_dist,
        };
        if self.identity.is_none() {
            dist.remove(KeyDistribution::ID_KEY);
        }
        if !self.bonding {
            dist = KeyDistribution::empty();
        }
        dist
    }

    /// Keys this device is willing to receive when it plays `role`
    pub fn remote_key_dist(&self, role: PairingRole) -> KeyDistribution {
        if !self.bonding {
            return KeyDistribution::empty();
        }
        match role {
            PairingRole::Initiator => self.responder_key_dist,
            PairingRole::Responder => self.initiator_key_dist,
        }
    }

    /// Parameters of the Pairing Request sent as initiator
    pub fn pairing_request(&self, oob_data_present: bool) -> PairingParams {
        PairingParams::new(
            self.io_capability,
            oob_data_present,
            self.auth_requirements(),
            self.max_key_size,
            self.local_key_dist(PairingRole::Initiator),
            self.remote_key_dist(PairingRole::Initiator),
        )
    }
}
