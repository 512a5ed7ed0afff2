//! Key management for Security Manager Protocol
//!
//! This module holds the keys produced by a pairing: the Long Term Key (LTK)
//! used to re-encrypt the link, the Identity Resolving Key (IRK) with its
//! identity address, and the Connection Signature Resolving Key (CSRK). It
//! also defines the bond store the engine saves bonded peers into.

use super::crypto::ah;
use super::types::*;
use crate::gap::{Address, BdAddr};
use log::debug;
use std::collections::HashMap;
use zeroize::Zeroize;

/// Long Term Key (LTK) information
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
pub struct LongTermKey {
    /// Key value, little-endian
    pub key: [u8; 16],
    /// EDIV (Encrypted Diversifier)
    pub ediv: u16,
    /// RAND (Random number)
    pub rand: [u8; 8],
    /// Encryption key size negotiated when the key was created
    pub key_size: u8,
    /// Whether this key was generated with Secure Connections pairing
    pub secure_connections: bool,
    /// Whether the pairing used a MITM-protected association model
    pub authenticated: bool,
}

impl LongTermKey {
    /// Create a new legacy Long Term Key
    pub fn new(key: [u8; 16], ediv: u16, rand: [u8; 8], key_size: u8, authenticated: bool) -> Self {
        Self {
            key,
            ediv,
            rand,
            key_size,
            secure_connections: false,
            authenticated,
        }
    }

    /// Create an LTK for Secure Connections; EDIV and RAND are zero
    pub fn new_secure_connections(key: [u8; 16], key_size: u8, authenticated: bool) -> Self {
        Self {
            key,
            ediv: 0,
            rand: [0; 8],
            key_size,
            secure_connections: true,
            authenticated,
        }
    }

    /// Get the security level provided by this key
    pub fn security_level(&self) -> SecurityLevel {
        if self.secure_connections && self.authenticated {
            SecurityLevel::SecureConnections
        } else if self.authenticated {
            SecurityLevel::EncryptionWithAuthentication
        } else {
            SecurityLevel::EncryptionOnly
        }
    }
}

/// Identity Resolving Key (IRK)
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
pub struct IdentityResolvingKey {
    /// Key value, little-endian
    pub key: [u8; 16],
}

impl IdentityResolvingKey {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    /// Whether `addr` is a resolvable private address generated from this key
    pub fn resolves(&self, addr: &BdAddr) -> bool {
        if !addr.is_resolvable_private() {
            return false;
        }
        let hash = [addr.bytes[0], addr.bytes[1], addr.bytes[2]];
        let prand = [addr.bytes[3], addr.bytes[4], addr.bytes[5]];
        ah(&self.key, &prand) == hash
    }
}

/// Connection Signature Resolving Key (CSRK)
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
pub struct ConnectionSignatureResolvingKey {
    /// Key value, little-endian
    pub key: [u8; 16],
    /// Counter for signed data
    pub sign_counter: u32,
    /// Authentication level
    pub authenticated: bool,
}

impl ConnectionSignatureResolvingKey {
    /// Create a new Connection Signature Resolving Key
    pub fn new(key: [u8; 16], authenticated: bool) -> Self {
        Self {
            key,
            sign_counter: 0,
            authenticated,
        }
    }
}

/// Keys distributed by one side during the key distribution phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributedKeys {
    pub ltk: Option<LongTermKey>,
    pub irk: Option<IdentityResolvingKey>,
    pub identity: Option<Address>,
    pub csrk: Option<ConnectionSignatureResolvingKey>,
}

impl DistributedKeys {
    /// Check if any keys are present
    pub fn has_keys(&self) -> bool {
        self.ltk.is_some() || self.irk.is_some() || self.identity.is_some() || self.csrk.is_some()
    }

    pub fn scrub(&mut self) {
        if let Some(ltk) = self.ltk.as_mut() {
            ltk.zeroize();
        }
        if let Some(irk) = self.irk.as_mut() {
            irk.zeroize();
        }
        if let Some(csrk) = self.csrk.as_mut() {
            csrk.zeroize();
        }
        *self = Self::default();
    }
}

/// Long-term keys resulting from a completed pairing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingKeys {
    /// LTK derived by Secure Connections pairing, shared by both sides
    pub ltk: Option<LongTermKey>,
    /// Keys this device sent
    pub local: DistributedKeys,
    /// Keys the peer sent
    pub peer: DistributedKeys,
}

/// A bonded peer as persisted in the bond store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondRecord {
    /// Address the peer used on the connection that bonded
    pub peer: Address,
    pub auth_state: AuthState,
    pub keys: PairingKeys,
}

impl BondRecord {
    /// Identity address of the peer, falling back to its connection address
    pub fn identity(&self) -> Address {
        self.keys.peer.identity.unwrap_or(self.peer)
    }
}

/// Bond store trait for persistent storage of security keys
pub trait BondStore {
    /// Save keys for a device, replacing any previous bond
    fn save(&mut self, record: BondRecord) -> SmpResult<()>;

    /// Load the bond of a device by identity or connection address
    fn load(&self, address: &Address) -> Option<BondRecord>;

    /// Delete the bond of a device; returns whether one existed
    fn delete(&mut self, address: &Address) -> bool;

    /// Look up the bond whose IRK resolves a resolvable private address
    fn resolve_identity(&self, random_address: &BdAddr) -> Option<BondRecord>;

    /// Identity addresses of all bonded devices
    fn bonded_peers(&self) -> Vec<Address>;
}

/// In-memory implementation of BondStore
#[derive(Debug, Default)]
pub struct MemoryBondStore {
    bonds: HashMap<Address, BondRecord>,
}

impl MemoryBondStore {
    /// Create a new empty in-memory bond store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }
}

impl BondStore for MemoryBondStore {
    fn save(&mut self, record: BondRecord) -> SmpResult<()> {
        let identity = record.identity();
        debug!("Storing bond for {}", identity);
        self.bonds.insert(identity, record);
        Ok(())
    }

    fn load(&self, address: &Address) -> Option<BondRecord> {
        self.bonds.get(address).cloned().or_else(|| {
            self.bonds
                .values()
                .find(|record| record.peer == *address)
                .cloned()
        })
    }

    fn delete(&mut self, address: &Address) -> bool {
        let key = self.load(address).map(|record| record.identity());
        key.and_then(|key| self.bonds.remove(&key)).is_some()
    }

    fn resolve_identity(&self, random_address: &BdAddr) -> Option<BondRecord> {
        self.bonds
            .values()
            .find(|record| {
                record
                    .keys
                    .peer
                    .irk
                    .as_ref()
                    .is_some_and(|irk| irk.resolves(random_address))
            })
            .cloned()
    }

    fn bonded_peers(&self) -> Vec<Address> {
        self.bonds.keys().copied().collect()
    }
}
