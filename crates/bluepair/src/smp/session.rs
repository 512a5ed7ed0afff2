//! Pairing sessions and the per-connection session store

use super::ecc::{DhKey, EccKeyPair, PublicKey};
use super::keys::PairingKeys;
use super::pdu::{PairingParams, SmpPdu};
use super::state::PairingState;
use super::types::*;
use crate::gap::Address;
use log::trace;
use std::collections::HashMap;
use std::time::Instant;
use zeroize::Zeroize;

/// Confirm value and random nonce contributed by one side
#[derive(Debug, Clone, Default, PartialEq, Eq, Zeroize)]
pub struct PairingComponent {
    pub confirm: [u8; 16],
    pub random: [u8; 16],
}

/// Secure Connections key material of a session
#[derive(Debug, Default, Zeroize)]
pub struct ScKeys {
    pub local_keypair: Option<EccKeyPair>,
    pub remote_public_key: Option<PublicKey>,
    pub dhkey: Option<DhKey>,
    pub mac_key: Option<[u8; 16]>,
    pub ltk: Option<[u8; 16]>,
}

/// State of one pairing on one connection
#[derive(Debug)]
pub struct PairingSession {
    pub handle: ConnHandle,
    pub role: PairingRole,
    state: PairingState,
    pairing_type: PairingType,
    pub auth_state: AuthState,
    /// Both sides set the Secure Connections bit
    pub secure_connections: bool,
    pub local_addr: Address,
    pub peer_addr: Address,
    /// Pairing Request/Response parameters this side sent
    pub local_params: Option<PairingParams>,
    /// Pairing Request/Response parameters the peer sent
    pub remote_params: Option<PairingParams>,
    /// Negotiated encryption key size
    pub key_size: u8,
    /// Keys this side distributes
    pub local_dist: KeyDistribution,
    /// Keys the peer distributes
    pub remote_dist: KeyDistribution,
    /// Both sides support keypress notifications
    pub keypress: bool,
    /// Legacy temporary key: zero, the passkey, or OOB data
    pub tk: [u8; 16],
    pub passkey: Option<u32>,
    pub local_component: PairingComponent,
    pub remote_component: PairingComponent,
    pub sc: ScKeys,
    /// Our own OOB data, when the peer holds it
    pub local_oob: Option<OobData>,
    /// The peer's OOB data, when we hold it
    pub remote_oob: Option<OobData>,
    /// Secure Connections passkey round, 0..20
    pub passkey_bit_counter: u8,
    /// Key the link gets encrypted with at the end of the pairing phase
    pub encryption_key: Option<[u8; 16]>,
    /// Distributed keys, sent and received
    pub keys: PairingKeys,
    /// Expiry of the current wait
    pub deadline: Option<Instant>,
    /// When to poll a pending ECC operation again
    pub ecc_retry_at: Option<Instant>,
    pub ecc_retries: u32,
    /// A DHKey computation is outstanding
    pub dhkey_pending: bool,
    /// Peer PDU that arrived while a local step was still pending
    pub parked: Option<SmpPdu>,
}

impl PairingSession {
    pub fn new(handle: ConnHandle, role: PairingRole, local_addr: Address, peer_addr: Address) -> Self {
        Self {
            handle,
            role,
            state: PairingState::Initialize,
            pairing_type: PairingType::Uninitialized,
            auth_state: AuthState::empty(),
            secure_connections: false,
            local_addr,
            peer_addr,
            local_params: None,
            remote_params: None,
            key_size: 0,
            local_dist: KeyDistribution::empty(),
            remote_dist: KeyDistribution::empty(),
            keypress: false,
            tk: [0; 16],
            passkey: None,
            local_component: PairingComponent::default(),
            remote_component: PairingComponent::default(),
            sc: ScKeys::default(),
            local_oob: None,
            remote_oob: None,
            passkey_bit_counter: 0,
            encryption_key: None,
            keys: PairingKeys::default(),
            deadline: None,
            ecc_retry_at: None,
            ecc_retries: 0,
            dhkey_pending: false,
            parked: None,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Move along a legal edge of the state machine
    pub fn advance(&mut self, next: PairingState) -> SmpResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(SmpError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        trace!("SMP [{:#06x}] {} -> {}", self.handle, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Mark the session failed. Always legal from a live state.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            trace!("SMP [{:#06x}] {} -> Fail", self.handle, self.state);
            self.state = PairingState::Fail;
        }
    }

    pub fn pairing_type(&self) -> PairingType {
        self.pairing_type
    }

    /// Record the negotiated pairing type; it cannot change afterwards
    pub fn set_pairing_type(&mut self, pairing_type: PairingType) -> SmpResult<()> {
        if self.pairing_type != PairingType::Uninitialized {
            return Err(SmpError::InvalidState);
        }
        self.pairing_type = pairing_type;
        Ok(())
    }

    /// Pairing Request parameters, whichever side sent them
    pub fn pairing_request(&self) -> Option<&PairingParams> {
        match self.role {
            PairingRole::Initiator => self.local_params.as_ref(),
            PairingRole::Responder => self.remote_params.as_ref(),
        }
    }

    /// Pairing Response parameters, whichever side sent them
    pub fn pairing_response(&self) -> Option<&PairingParams> {
        match self.role {
            PairingRole::Initiator => self.remote_params.as_ref(),
            PairingRole::Responder => self.local_params.as_ref(),
        }
    }

    /// Initiator and responder addresses, in that order
    pub fn addresses(&self) -> (Address, Address) {
        match self.role {
            PairingRole::Initiator => (self.local_addr, self.peer_addr),
            PairingRole::Responder => (self.peer_addr, self.local_addr),
        }
    }

    /// Wipe every secret held by the session
    pub fn scrub(&mut self) {
        self.tk.zeroize();
        self.passkey = None;
        self.local_component.zeroize();
        self.remote_component.zeroize();
        self.sc.zeroize();
        self.local_oob.zeroize();
        self.remote_oob.zeroize();
        self.encryption_key.zeroize();
        self.keys.local.scrub();
        self.keys.peer.scrub();
        self.keys.ltk.zeroize();
        self.parked = None;
    }

    /// Whether any key material or secret input is still held
    pub fn holds_secrets(&self) -> bool {
        self.tk != [0; 16]
            || self.passkey.is_some()
            || self.local_component != PairingComponent::default()
            || self.remote_component != PairingComponent::default()
            || self.sc.local_keypair.is_some()
            || self.sc.dhkey.is_some()
            || self.sc.mac_key.is_some()
            || self.sc.ltk.is_some()
            || self.local_oob.is_some()
            || self.remote_oob.is_some()
            || self.encryption_key.is_some()
            || self.keys.ltk.is_some()
            || self.keys.local.has_keys()
            || self.keys.peer.has_keys()
            || self.parked.is_some()
    }
}

impl Drop for PairingSession {
    fn drop(&mut self) {
        self.scrub();
    }
}

/// Arena of pairing sessions keyed by connection handle
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<ConnHandle, PairingSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session; a connection holds at most one
    pub fn create(&mut self, session: PairingSession) -> SmpResult<&mut PairingSession> {
        let handle = session.handle;
        if self.sessions.contains_key(&handle) {
            return Err(SmpError::PairingInProgress);
        }
        Ok(self.sessions.entry(handle).or_insert(session))
    }

    pub fn get(&self, handle: ConnHandle) -> Option<&PairingSession> {
        self.sessions.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnHandle) -> Option<&mut PairingSession> {
        self.sessions.get_mut(&handle)
    }

    pub fn contains(&self, handle: ConnHandle) -> bool {
        self.sessions.contains_key(&handle)
    }

    /// Remove a session, wiping its secrets
    pub fn release(&mut self, handle: ConnHandle) -> bool {
        match self.sessions.remove(&handle) {
            Some(mut session) => {
                session.scrub();
                debug_assert!(!session.holds_secrets());
                true
            }
            None => false,
        }
    }

    pub fn handles(&self) -> Vec<ConnHandle> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::BdAddr;
    use crate::smp::ecc::{EccEngine, EccPoll, P256Engine};
    use crate::smp::keys::LongTermKey;

    fn session(handle: ConnHandle) -> PairingSession {
        PairingSession::new(
            handle,
            PairingRole::Initiator,
            Address::public(BdAddr::from_u64(0x111111111111)),
            Address::random(BdAddr::from_u64(0xC22222222222)),
        )
    }

    #[test]
    fn test_one_session_per_handle() {
        let mut store = SessionStore::new();
        assert!(store.create(session(0x40)).is_ok());
        assert_eq!(
            store.create(session(0x40)).err(),
            Some(SmpError::PairingInProgress)
        );
        assert!(store.create(session(0x41)).is_ok());
        assert_eq!(store.len(), 2);

        assert!(store.release(0x40));
        assert!(!store.release(0x40));
        assert!(store.create(session(0x40)).is_ok());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut s = session(1);
        assert!(s.advance(PairingState::PairingReqSent).is_ok());
        assert_eq!(
            s.advance(PairingState::Done),
            Err(SmpError::InvalidTransition {
                from: PairingState::PairingReqSent,
                to: PairingState::Done
            })
        );
        assert_eq!(s.state(), PairingState::PairingReqSent);
        s.fail();
        assert_eq!(s.state(), PairingState::Fail);
        assert!(s.advance(PairingState::WaitConfirm).is_err());
    }

    #[test]
    fn test_pairing_type_set_once() {
        let mut s = session(1);
        assert!(s.set_pairing_type(PairingType::JustWorks).is_ok());
        assert_eq!(
            s.set_pairing_type(PairingType::Oob),
            Err(SmpError::InvalidState)
        );
        assert_eq!(s.pairing_type(), PairingType::JustWorks);
    }

    #[test]
    fn test_scrub_wipes_secrets() {
        let mut s = session(1);
        let EccPoll::Ready(keypair) = P256Engine.generate_keypair().unwrap() else {
            panic!("software engine is synchronous");
        };
        s.sc.remote_public_key = Some(keypair.public_key);
        s.sc.local_keypair = Some(keypair);
        s.sc.dhkey = Some(DhKey([0x5A; 32]));
        s.sc.mac_key = Some([0x33; 16]);
        s.tk = [0x44; 16];
        s.local_component.random = [0x55; 16];
        s.keys.peer.ltk = Some(LongTermKey::new([0x66; 16], 1, [1; 8], 16, false));
        assert!(s.holds_secrets());

        s.scrub();
        assert!(!s.holds_secrets());

        assert!(s.sc.local_keypair.is_none());
        assert!(s.sc.remote_public_key.is_none());
        assert!(s.sc.dhkey.is_none());
        assert!(s.sc.mac_key.is_none());
        assert_eq!(s.tk, [0; 16]);
        assert_eq!(s.local_component.random, [0; 16]);
        assert!(s.keys.peer.ltk.is_none());
    }

    #[test]
    fn test_role_views() {
        let mut s = session(1);
        let params = crate::smp::SmConfig::default().pairing_request(false);
        s.local_params = Some(params);
        assert_eq!(s.pairing_request(), Some(&params));
        assert!(s.pairing_response().is_none());
        let (initiator, responder) = s.addresses();
        assert_eq!(initiator, s.local_addr);
        assert_eq!(responder, s.peer_addr);
    }
}
