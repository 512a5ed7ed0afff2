//! P-256 key agreement for LE Secure Connections
//!
//! Key generation and DHKey computation may take long on constrained
//! controllers, so the [`EccEngine`] seam lets either step answer
//! [`EccPoll::Pending`]. The pairing state machine then retries after a
//! backoff instead of blocking. [`P256Engine`] is the synchronous software
//! engine used by default.

use super::constants::*;
use super::types::OobData;
use crate::error::CryptoError;
use log::{debug, trace};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes, SecretKey};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Result of an ECC operation that may still be running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EccPoll<T> {
    Ready(T),
    Pending,
}

/// P-256 public key, both coordinates little-endian as carried in the
/// Pairing Public Key PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroize)]
pub struct PublicKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl PublicKey {
    /// The Bluetooth SIG debug public key
    pub fn debug() -> Self {
        Self {
            x: SMP_DEBUG_PUBLIC_KEY_X,
            y: SMP_DEBUG_PUBLIC_KEY_Y,
        }
    }

    pub fn is_debug(&self) -> bool {
        *self == Self::debug()
    }

    fn to_p256(&self) -> Result<p256::PublicKey, CryptoError> {
        let mut x = self.x;
        let mut y = self.y;
        x.reverse();
        y.reverse();
        let point =
            EncodedPoint::from_affine_coordinates(&FieldBytes::from(x), &FieldBytes::from(y), false);
        Option::from(p256::PublicKey::from_encoded_point(&point))
            .ok_or(CryptoError::InvalidPublicKey)
    }

    fn from_p256(key: &p256::PublicKey) -> Result<Self, CryptoError> {
        let point = key.to_encoded_point(false);
        let (Some(px), Some(py)) = (point.x(), point.y()) else {
            return Err(CryptoError::KeyGeneration);
        };
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(px);
        y.copy_from_slice(py);
        x.reverse();
        y.reverse();
        Ok(Self { x, y })
    }
}

/// Local key pair; the private scalar is little-endian and wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EccKeyPair {
    pub private_key: [u8; 32],
    pub public_key: PublicKey,
}

impl std::fmt::Debug for EccKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EccKeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Shared secret from ECDH, little-endian, wiped on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DhKey(pub [u8; 32]);

impl std::fmt::Debug for DhKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DhKey(..)")
    }
}

/// Elliptic-curve engine collaborator
pub trait EccEngine {
    /// Generate a fresh P-256 key pair
    fn generate_keypair(&mut self) -> Result<EccPoll<EccKeyPair>, CryptoError>;

    /// Compute the DHKey of a local private key and a peer public key
    fn compute_dhkey(
        &mut self,
        private_key: &[u8; 32],
        remote: &PublicKey,
    ) -> Result<EccPoll<DhKey>, CryptoError>;
}

/// Synchronous software engine built on the `p256` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct P256Engine;

impl P256Engine {
    /// Rebuild a key pair from a known private key, e.g. the debug key
    pub fn keypair_from_private(private_key: &[u8; 32]) -> Result<EccKeyPair, CryptoError> {
        let secret = Self::secret_key(private_key)?;
        Ok(EccKeyPair {
            private_key: *private_key,
            public_key: PublicKey::from_p256(&secret.public_key())?,
        })
    }

    fn secret_key(private_key: &[u8; 32]) -> Result<SecretKey, CryptoError> {
        let mut be = *private_key;
        be.reverse();
        let bytes = FieldBytes::from(be);
        be.zeroize();
        SecretKey::from_bytes(&bytes).map_err(|_| CryptoError::KeyGeneration)
    }
}

impl EccEngine for P256Engine {
    fn generate_keypair(&mut self) -> Result<EccPoll<EccKeyPair>, CryptoError> {
        let secret = SecretKey::random(&mut OsRng);
        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(&secret.to_bytes());
        private_key.reverse();

        let public_key = PublicKey::from_p256(&secret.public_key())?;
        Ok(EccPoll::Ready(EccKeyPair {
            private_key,
            public_key,
        }))
    }

    fn compute_dhkey(
        &mut self,
        private_key: &[u8; 32],
        remote: &PublicKey,
    ) -> Result<EccPoll<DhKey>, CryptoError> {
        let secret = Self::secret_key(private_key)?;
        let peer = remote.to_p256()?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());

        let mut dhkey = [0u8; 32];
        dhkey.copy_from_slice(shared.raw_secret_bytes());
        dhkey.reverse();
        Ok(EccPoll::Ready(DhKey(dhkey)))
    }
}

/// Check a peer public key before it is used for key agreement
///
/// Rejects points that are not on the curve, a reflection of the local key,
/// and the debug key unless `allow_debug` is set.
pub fn validate_public_key(
    remote: &PublicKey,
    local: &PublicKey,
    allow_debug: bool,
) -> Result<(), CryptoError> {
    if remote.is_debug() && !allow_debug {
        return Err(CryptoError::DebugKeyRejected);
    }
    if remote.x == local.x {
        return Err(CryptoError::InvalidPublicKey);
    }
    remote.to_p256().map(|_| ())
}

/// Key pair committed to by OOB data this side handed out
#[derive(Debug, Clone)]
pub struct PinnedKeyPair {
    pub keypair: EccKeyPair,
    pub oob: OobData,
}

/// Front end over an [`EccEngine`] applying the key recycling policy
pub struct EccManager {
    engine: Box<dyn EccEngine + Send>,
    cached: Option<EccKeyPair>,
    reuses: u32,
    recycle_limit: u32,
    /// Held for the OOB pairing of the peer that got our OOB data
    pinned: Option<PinnedKeyPair>,
}

impl EccManager {
    /// `recycle_limit` is how many further pairings may reuse a generated
    /// key pair. Zero regenerates for every pairing.
    pub fn new(engine: Box<dyn EccEngine + Send>, recycle_limit: u32) -> Self {
        Self {
            engine,
            cached: None,
            reuses: 0,
            recycle_limit,
            pinned: None,
        }
    }

    pub fn set_recycle_limit(&mut self, recycle_limit: u32) {
        self.recycle_limit = recycle_limit;
    }

    /// Key pair for a new pairing: either a recycled one or a fresh one from
    /// the engine. A pinned key pair is never handed out here.
    pub fn generate_keypair(&mut self) -> Result<EccPoll<EccKeyPair>, CryptoError> {
        if let Some(keypair) = &self.cached {
            if self.reuses < self.recycle_limit {
                self.reuses += 1;
                trace!("Recycling key pair ({}/{})", self.reuses, self.recycle_limit);
                return Ok(EccPoll::Ready(keypair.clone()));
            }
        }

        match self.engine.generate_keypair()? {
            EccPoll::Ready(keypair) => {
                debug!("Generated local P-256 key pair");
                self.reuses = 0;
                self.cached = (self.recycle_limit > 0).then(|| keypair.clone());
                Ok(EccPoll::Ready(keypair))
            }
            EccPoll::Pending => Ok(EccPoll::Pending),
        }
    }

    /// Generate a key pair for local OOB data and hold it together with the
    /// data `commit` derives from it. Replaces any earlier pin.
    pub fn pin_keypair<F>(&mut self, commit: F) -> Result<EccPoll<OobData>, CryptoError>
    where
        F: FnOnce(&EccKeyPair) -> OobData,
    {
        match self.engine.generate_keypair()? {
            EccPoll::Ready(keypair) => {
                let oob = commit(&keypair);
                if self.pinned.is_some() {
                    debug!("Replacing key pair pinned by earlier OOB data");
                }
                self.pinned = Some(PinnedKeyPair {
                    keypair,
                    oob: oob.clone(),
                });
                Ok(EccPoll::Ready(oob))
            }
            EccPoll::Pending => Ok(EccPoll::Pending),
        }
    }

    /// OOB data of the pinned key pair, if one is held
    pub fn pinned_oob(&self) -> Option<&OobData> {
        self.pinned.as_ref().map(|pinned| &pinned.oob)
    }

    /// Hand the pinned key pair to the pairing that uses it
    pub fn take_pinned(&mut self) -> Option<PinnedKeyPair> {
        let pinned = self.pinned.take();
        if pinned.is_some() {
            trace!("Using key pair pinned by local OOB data");
        }
        pinned
    }

    pub fn compute_dhkey(
        &mut self,
        private_key: &[u8; 32],
        remote: &PublicKey,
    ) -> Result<EccPoll<DhKey>, CryptoError> {
        self.engine.compute_dhkey(private_key, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u256_le(hi: u128, lo: u128) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..16].copy_from_slice(&lo.to_le_bytes());
        out[16..].copy_from_slice(&hi.to_le_bytes());
        out
    }

    fn ready<T>(poll: EccPoll<T>) -> T {
        match poll {
            EccPoll::Ready(value) => value,
            EccPoll::Pending => panic!("engine returned pending"),
        }
    }

    #[test]
    fn test_debug_key_pair() {
        let keypair = P256Engine::keypair_from_private(&SMP_DEBUG_PRIVATE_KEY).unwrap();
        assert!(keypair.public_key.is_debug());
    }

    #[test]
    fn test_dhkey_sample_data() {
        let sk_b = u256_le(
            0x55188b3d32f6bb9a900afcfbeed4e72a,
            0x59cb9ac2f19d7cfb6b4fdd49f47fc5fd,
        );
        let pk_b = PublicKey {
            x: u256_le(
                0x1ea1f0f01faf1d9609592284f19e4c00,
                0x47b58afd8615a69f559077b22faaa190,
            ),
            y: u256_le(
                0x4c55f33e429dad377356703a9ab85160,
                0x472d1130e28e36765f89aff915b1214a,
            ),
        };
        let expected = u256_le(
            0xec0234a357c8ad05341010a60a397d9b,
            0x99796b13b4f866f1868d34f373bfa698,
        );

        assert_eq!(P256Engine::keypair_from_private(&sk_b).unwrap().public_key, pk_b);

        let mut engine = P256Engine;
        let ab = ready(engine.compute_dhkey(&SMP_DEBUG_PRIVATE_KEY, &pk_b).unwrap());
        let ba = ready(engine.compute_dhkey(&sk_b, &PublicKey::debug()).unwrap());
        assert_eq!(ab.0, expected);
        assert_eq!(ba.0, expected);
    }

    #[test]
    fn test_generated_keys_agree() {
        let mut engine = P256Engine;
        let a = ready(engine.generate_keypair().unwrap());
        let b = ready(engine.generate_keypair().unwrap());
        let ab = ready(engine.compute_dhkey(&a.private_key, &b.public_key).unwrap());
        let ba = ready(engine.compute_dhkey(&b.private_key, &a.public_key).unwrap());
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_validate_public_key() {
        let mut engine = P256Engine;
        let local = ready(engine.generate_keypair().unwrap()).public_key;
        let remote = ready(engine.generate_keypair().unwrap()).public_key;

        assert!(validate_public_key(&remote, &local, false).is_ok());
        assert_eq!(
            validate_public_key(&local, &local, false),
            Err(CryptoError::InvalidPublicKey)
        );
        assert_eq!(
            validate_public_key(&PublicKey::debug(), &local, false),
            Err(CryptoError::DebugKeyRejected)
        );
        assert!(validate_public_key(&PublicKey::debug(), &local, true).is_ok());

        let mut off_curve = remote;
        off_curve.y[0] ^= 0x01;
        assert_eq!(
            validate_public_key(&off_curve, &local, false),
            Err(CryptoError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_default_policy_always_regenerates() {
        let mut manager = EccManager::new(Box::new(P256Engine), 0);
        let a = ready(manager.generate_keypair().unwrap());
        let b = ready(manager.generate_keypair().unwrap());
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn test_recycle_limit() {
        let mut manager = EccManager::new(Box::new(P256Engine), 2);
        let a = ready(manager.generate_keypair().unwrap());
        let b = ready(manager.generate_keypair().unwrap());
        let c = ready(manager.generate_keypair().unwrap());
        let d = ready(manager.generate_keypair().unwrap());
        assert_eq!(a.public_key, b.public_key);
        assert_eq!(a.public_key, c.public_key);
        assert_ne!(a.public_key, d.public_key);
    }

    #[test]
    fn test_pinned_keypair_kept_apart_from_recycling() {
        let mut manager = EccManager::new(Box::new(P256Engine), 0);
        let oob = ready(
            manager
                .pin_keypair(|keypair| OobData {
                    r: [0x11; 16],
                    c: keypair.public_key.x[..16].try_into().unwrap(),
                })
                .unwrap(),
        );
        let other = ready(manager.generate_keypair().unwrap());
        assert_eq!(manager.pinned_oob(), Some(&oob));

        let pinned = manager.take_pinned().unwrap();
        assert_ne!(pinned.keypair.public_key, other.public_key);
        assert_eq!(pinned.oob.c[..], pinned.keypair.public_key.x[..16]);
        assert!(manager.take_pinned().is_none());
        assert!(manager.pinned_oob().is_none());
    }
}
