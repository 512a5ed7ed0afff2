//! Security Manager front end
//!
//! [`SmpManager`] owns the pairing sessions of all connections and routes
//! PDUs, controller events, application replies and timer ticks to the role
//! handler of each session. Every failure goes through one path: the peer is
//! told with a Pairing Failed PDU (unless it started the failure or the link
//! is gone), the session is scrubbed and released, and the application gets
//! the outcome.

use super::config::{LocalIdentity, SmConfig};
use super::crypto::{f4, generate_random_128};
use super::ecc::{EccEngine, EccManager, EccPoll, P256Engine};
use super::initiator::Initiator;
use super::keys::{BondRecord, BondStore, MemoryBondStore};
use super::pdu::SmpPdu;
use super::responder::Responder;
use super::role::{accept_passkey, dispatch, poll_ecc, Context, RoleHandler};
use super::session::{PairingSession, SessionStore};
use super::state::PairingState;
use super::types::*;
use crate::gap::{Address, BdAddr};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::time::Instant;

/// Outgoing side of the SMP fixed channel and the controller
pub trait SmpTransport {
    /// Send one SMP PDU to the peer of `handle` on L2CAP channel
    /// [`SMP_CID`](super::constants::SMP_CID)
    fn send(&mut self, handle: ConnHandle, pdu: &[u8]) -> SmpResult<()>;

    /// Start link encryption with `key`. Only used by the initiator.
    fn start_encryption(
        &mut self,
        handle: ConnHandle,
        key: &[u8; 16],
        ediv: u16,
        rand: &[u8; 8],
    ) -> SmpResult<()>;
}

/// Application side of pairing
///
/// Questions may be answered immediately or later: returning
/// [`UserResponse::Pending`] parks the session until the matching
/// `SmpManager` reply method is called.
pub trait PairingDelegate {
    /// Show a six-digit passkey the peer's user must type in
    fn display_passkey(&mut self, _handle: ConnHandle, _passkey: u32) {}

    fn request_passkey(&mut self, _handle: ConnHandle) -> UserResponse<u32> {
        UserResponse::Rejected
    }

    /// Ask the user whether `value` matches the one shown on the peer
    fn confirm_numeric_comparison(
        &mut self,
        _handle: ConnHandle,
        _value: u32,
    ) -> UserResponse<bool> {
        UserResponse::Rejected
    }

    /// Whether OOB data from `peer` can be supplied
    fn has_oob_data(&mut self, _handle: ConnHandle, _peer: &Address) -> bool {
        false
    }

    fn request_oob_data(&mut self, _handle: ConnHandle, _peer: &Address) -> UserResponse<OobData> {
        UserResponse::Rejected
    }

    fn notify(&mut self, _event: SmpEvent) {}

    /// Final result of a pairing. Called exactly once per session.
    fn pairing_complete(&mut self, handle: ConnHandle, outcome: PairingOutcome);
}

#[derive(Debug, Clone, Copy)]
struct Link {
    local: Address,
    peer: Address,
}

fn role_handler(role: PairingRole) -> &'static dyn RoleHandler {
    match role {
        PairingRole::Initiator => &Initiator,
        PairingRole::Responder => &Responder,
    }
}

/// Security Manager Protocol manager
pub struct SmpManager<T: SmpTransport, D: PairingDelegate> {
    config: SmConfig,
    transport: T,
    delegate: D,
    ecc: EccManager,
    bond_store: Box<dyn BondStore + Send>,
    sessions: SessionStore,
    links: HashMap<ConnHandle, Link>,
    /// OOB data received from peers
    remote_oob: HashMap<Address, OobData>,
    /// When pairing with a peer last failed
    last_failure: HashMap<Address, Instant>,
}

impl<T: SmpTransport, D: PairingDelegate> SmpManager<T, D> {
    /// Create a manager using the software P-256 engine and an in-memory
    /// bond store
    pub fn new(config: SmConfig, transport: T, delegate: D) -> SmpResult<Self> {
        config.validate()?;
        let ecc = EccManager::new(Box::new(P256Engine), config.ecc_key_recycle_limit);
        Ok(Self {
            config,
            transport,
            delegate,
            ecc,
            bond_store: Box::new(MemoryBondStore::new()),
            sessions: SessionStore::new(),
            links: HashMap::new(),
            remote_oob: HashMap::new(),
            last_failure: HashMap::new(),
        })
    }

    /// Replace the ECC engine
    pub fn with_ecc_engine(mut self, engine: Box<dyn EccEngine + Send>) -> Self {
        self.ecc = EccManager::new(engine, self.config.ecc_key_recycle_limit);
        self
    }

    /// Replace the bond store
    pub fn with_bond_store(mut self, bond_store: Box<dyn BondStore + Send>) -> Self {
        self.bond_store = bond_store;
        self
    }

    pub fn config(&self) -> &SmConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    pub fn bond_store(&self) -> &dyn BondStore {
        self.bond_store.as_ref()
    }

    pub fn bond_store_mut(&mut self) -> &mut dyn BondStore {
        self.bond_store.as_mut()
    }

    /// Set the local IO capability used by future pairings
    pub fn set_io_capability(&mut self, io_capability: IoCapability) {
        self.config.io_capability = io_capability;
    }

    /// Set the authentication requirements used by future pairings
    pub fn set_auth_requirements(&mut self, auth_req: AuthRequirements) {
        self.config.bonding = auth_req.bonding;
        self.config.mitm = auth_req.mitm;
        self.config.secure_connections = auth_req.secure_connections;
        self.config.keypress_notifications = auth_req.keypress_notifications;
    }

    /// Set the keys offered in each role
    pub fn set_key_distribution(&mut self, initiator: KeyDistribution, responder: KeyDistribution) {
        self.config.initiator_key_dist = initiator;
        self.config.responder_key_dist = responder;
    }

    /// Set the identity distributed in the Identity Information phase
    pub fn set_identity(&mut self, identity: Option<LocalIdentity>) {
        self.config.identity = identity;
    }

    pub fn set_ecc_key_recycle_limit(&mut self, limit: u32) {
        self.config.ecc_key_recycle_limit = limit;
        self.ecc.set_recycle_limit(limit);
    }

    /// Register a new connection and the addresses used on it
    pub fn connection_created(&mut self, handle: ConnHandle, local: Address, peer: Address) {
        debug!("SMP [{:#06x}] connection to {}", handle, peer);
        self.links.insert(handle, Link { local, peer });
    }

    /// The connection is gone. A pairing in progress fails without a PDU.
    pub fn disconnected(&mut self, handle: ConnHandle) {
        self.links.remove(&handle);
        if self.sessions.contains(handle) {
            let err = SmpError::Transport("link disconnected".into());
            self.fail(handle, &err, false, Instant::now());
        }
    }

    /// Current pairing state of a connection
    pub fn state(&self, handle: ConnHandle) -> Option<PairingState> {
        self.sessions.get(handle).map(PairingSession::state)
    }

    pub fn pairing_type(&self, handle: ConnHandle) -> Option<PairingType> {
        self.sessions.get(handle).map(PairingSession::pairing_type)
    }

    pub fn is_pairing(&self, handle: ConnHandle) -> bool {
        self.sessions.contains(handle)
    }

    /// Start pairing as initiator
    pub fn start_pairing(&mut self, handle: ConnHandle) -> SmpResult<()> {
        self.open_session(handle, PairingRole::Initiator)?;
        self.drive(handle, Instant::now(), |handler, ctx, session| {
            handler.start(ctx, session)
        })
    }

    /// Ask the central to pair by sending a Security Request
    pub fn request_security(&mut self, handle: ConnHandle) -> SmpResult<()> {
        self.open_session(handle, PairingRole::Responder)?;
        self.drive(handle, Instant::now(), |handler, ctx, session| {
            handler.start(ctx, session)
        })
    }

    fn open_session(&mut self, handle: ConnHandle, role: PairingRole) -> SmpResult<()> {
        let link = *self.links.get(&handle).ok_or(SmpError::ConnectionNotFound)?;
        if self.sessions.contains(handle) {
            return Err(SmpError::PairingInProgress);
        }
        self.sessions
            .create(PairingSession::new(handle, role, link.local, link.peer))?;
        Ok(())
    }

    /// Process a PDU received on the SMP channel of `handle`
    ///
    /// Protocol failures are handled here and are not returned; the error
    /// result only reports misuse such as an unknown connection.
    pub fn handle_pdu(&mut self, handle: ConnHandle, data: &[u8]) -> SmpResult<()> {
        let now = Instant::now();
        let pdu = match SmpPdu::decode(data) {
            Ok(pdu) => pdu,
            Err(err) => {
                warn!("SMP [{:#06x}] rejecting PDU: {}", handle, err);
                if self.sessions.contains(handle) {
                    self.fail(handle, &err, true, now);
                } else {
                    self.send_failed(handle, err.failure_reason());
                }
                return Ok(());
            }
        };
        trace!("SMP [{:#06x}] received {:?}", handle, pdu);

        if !self.sessions.contains(handle) {
            match pdu {
                SmpPdu::PairingRequest(_) => {
                    if !self.accept_pairing_request(handle, now)? {
                        return Ok(());
                    }
                }
                SmpPdu::SecurityRequest(auth_req) => {
                    return self.on_security_request(handle, auth_req);
                }
                pdu => {
                    debug!(
                        "SMP [{:#06x}] ignoring opcode {:#04x} outside pairing",
                        handle,
                        pdu.opcode()
                    );
                    return Ok(());
                }
            }
        }

        self.drive(handle, now, |handler, ctx, session| {
            dispatch(handler, ctx, session, pdu)
        })
    }

    /// Open a responder session, unless the peer is retrying too soon
    fn accept_pairing_request(&mut self, handle: ConnHandle, now: Instant) -> SmpResult<bool> {
        let link = *self.links.get(&handle).ok_or(SmpError::ConnectionNotFound)?;
        let interval = self.config.repeated_attempts_interval;
        if !interval.is_zero() {
            if let Some(failed_at) = self.last_failure.get(&link.peer) {
                if now < *failed_at + interval {
                    info!("SMP [{:#06x}] {} retried pairing too soon", handle, link.peer);
                    self.send_failed(handle, PairingFailedReason::RepeatedAttempts);
                    return Ok(false);
                }
            }
        }
        self.open_session(handle, PairingRole::Responder)?;
        Ok(true)
    }

    fn on_security_request(&mut self, handle: ConnHandle, auth_req: u8) -> SmpResult<()> {
        let auth_req = AuthRequirements::from_u8(auth_req);
        debug!("SMP [{:#06x}] security request {:?}", handle, auth_req);
        self.delegate
            .notify(SmpEvent::SecurityRequested { handle, auth_req });
        if self.config.auto_pair_on_security_request {
            self.start_pairing(handle)
        } else {
            Ok(())
        }
    }

    /// Answer a passkey request. `None` means the user gave up.
    pub fn passkey_reply(&mut self, handle: ConnHandle, passkey: Option<u32>) -> SmpResult<()> {
        self.expect_state(handle, &[PairingState::WaitPasskey, PairingState::WaitConfirmPasskey])?;
        self.drive(handle, Instant::now(), |handler, ctx, session| match passkey {
            Some(passkey) => {
                accept_passkey(session, passkey)?;
                handler.passkey_ready(ctx, session)
            }
            None => Err(PairingFailedReason::PasskeyEntryFailed.into()),
        })
    }

    /// Answer a numeric comparison question
    pub fn numeric_comparison_reply(&mut self, handle: ConnHandle, accepted: bool) -> SmpResult<()> {
        self.expect_state(handle, &[PairingState::WaitNumericComparison])?;
        self.drive(handle, Instant::now(), |handler, ctx, session| {
            if accepted {
                handler.numeric_comparison_accepted(ctx, session)
            } else {
                Err(PairingFailedReason::NumericComparisonFailed.into())
            }
        })
    }

    /// Answer an OOB data request. `None` means no data is available.
    pub fn oob_data_reply(&mut self, handle: ConnHandle, data: Option<OobData>) -> SmpResult<()> {
        self.expect_state(handle, &[PairingState::WaitOob])?;
        self.drive(handle, Instant::now(), |handler, ctx, session| match data {
            Some(data) => {
                session.remote_oob = Some(data);
                handler.oob_ready(ctx, session)
            }
            None => Err(PairingFailedReason::OobNotAvailable.into()),
        })
    }

    fn expect_state(&self, handle: ConnHandle, states: &[PairingState]) -> SmpResult<()> {
        let state = self.state(handle).ok_or(SmpError::ConnectionNotFound)?;
        if states.contains(&state) {
            Ok(())
        } else {
            Err(SmpError::InvalidState)
        }
    }

    /// Store OOB data received from `peer` over another channel
    pub fn set_remote_oob_data(&mut self, peer: Address, data: OobData) {
        self.remote_oob.insert(peer, data);
    }

    pub fn clear_remote_oob_data(&mut self, peer: &Address) {
        if let Some(mut data) = self.remote_oob.remove(peer) {
            zeroize::Zeroize::zeroize(&mut data);
        }
    }

    /// Create Secure Connections OOB data for the peer. The key pair it
    /// commits to is held for the next OOB pairing with a peer that reports
    /// having our data; generating again invalidates the previous data.
    pub fn generate_local_oob_data(&mut self) -> SmpResult<EccPoll<OobData>> {
        let poll = self.ecc.pin_keypair(|keypair| {
            let r = generate_random_128();
            let x = keypair.public_key.x;
            OobData {
                r,
                c: f4(&x, &x, &r, 0),
            }
        })?;
        if let EccPoll::Ready(data) = &poll {
            debug!("Generated local OOB data, C = {}", hex::encode(data.c));
        }
        Ok(poll)
    }

    /// Encryption Change from the controller
    pub fn encryption_changed(&mut self, handle: ConnHandle, encrypted: bool) -> SmpResult<()> {
        match self.state(handle) {
            Some(PairingState::WaitStk | PairingState::WaitEncrypt) => {}
            // Re-encryption of a bonded link
            _ => return Ok(()),
        }
        self.drive(handle, Instant::now(), |handler, ctx, session| {
            if encrypted {
                handler.encrypted(ctx, session)
            } else {
                Err(PairingFailedReason::Unspecified.into())
            }
        })
    }

    /// LTK Request from the controller while this side is the peripheral
    pub fn ltk_request(&self, handle: ConnHandle, ediv: u16, rand: &[u8; 8]) -> Option<[u8; 16]> {
        let session = self.sessions.get(handle)?;
        match session.state() {
            PairingState::WaitStk | PairingState::WaitEncrypt if ediv == 0 && *rand == [0; 8] => {
                session.encryption_key
            }
            _ => None,
        }
    }

    /// Send a keypress notification while the local user types the passkey
    pub fn send_keypress_notification(
        &mut self,
        handle: ConnHandle,
        notification: KeypressNotificationType,
    ) -> SmpResult<()> {
        let session = self.sessions.get(handle).ok_or(SmpError::ConnectionNotFound)?;
        let entering = matches!(
            session.state(),
            PairingState::WaitPasskey | PairingState::WaitConfirmPasskey
        );
        if !session.keypress || !entering {
            return Err(SmpError::InvalidState);
        }
        self.transport.send(
            handle,
            &SmpPdu::KeypressNotification(notification.to_u8()).encode(),
        )
    }

    /// Abort a pairing in progress
    pub fn cancel(&mut self, handle: ConnHandle) -> SmpResult<()> {
        if !self.sessions.contains(handle) {
            return Err(SmpError::ConnectionNotFound);
        }
        info!("SMP [{:#06x}] pairing cancelled", handle);
        let err = SmpError::Pairing(PairingFailedReason::Unspecified);
        self.fail(handle, &err, true, Instant::now());
        Ok(())
    }

    /// Expire timers, retry pending ECC operations and forget failures
    /// older than the repeated attempts interval
    pub fn process_timeouts(&mut self, now: Instant) {
        let interval = self.config.repeated_attempts_interval;
        self.last_failure
            .retain(|_, failed_at| now < *failed_at + interval);

        for handle in self.sessions.handles() {
            let Some(session) = self.sessions.get(handle) else {
                continue;
            };
            if session.deadline.is_some_and(|deadline| now >= deadline) {
                self.fail(handle, &SmpError::Timeout, true, now);
                continue;
            }
            if session.ecc_retry_at.is_some_and(|at| now >= at) {
                // Failures are handled inside drive
                let _ = self.drive(handle, now, |handler, ctx, session| {
                    poll_ecc(handler, ctx, session)
                });
            }
        }
    }

    /// Earliest instant `process_timeouts` has work to do
    pub fn next_timeout(&self) -> Option<Instant> {
        self.sessions
            .handles()
            .into_iter()
            .filter_map(|handle| self.sessions.get(handle))
            .flat_map(|session| [session.deadline, session.ecc_retry_at])
            .flatten()
            .min()
    }

    /// Peers currently barred from pairing again
    #[cfg(test)]
    pub(super) fn failures_tracked(&self) -> usize {
        self.last_failure.len()
    }

    /// Identity of a peer using a resolvable private address
    pub fn resolve_peer(&self, addr: &BdAddr) -> Option<Address> {
        self.bond_store
            .resolve_identity(addr)
            .map(|record| record.identity())
    }

    /// Run one step of a session's state machine and settle the outcome
    fn drive<F>(&mut self, handle: ConnHandle, now: Instant, step: F) -> SmpResult<()>
    where
        F: FnOnce(&dyn RoleHandler, &mut Context, &mut PairingSession) -> SmpResult<()>,
    {
        let result = {
            let Self {
                config,
                transport,
                delegate,
                ecc,
                sessions,
                remote_oob,
                ..
            } = self;
            let session = sessions.get_mut(handle).ok_or(SmpError::ConnectionNotFound)?;
            let mut ctx = Context {
                config,
                transport,
                delegate,
                ecc,
                remote_oob,
                now,
            };
            step(role_handler(session.role), &mut ctx, session)
        };

        match result {
            Ok(()) => {
                if self.state(handle) == Some(PairingState::Done) {
                    self.complete(handle);
                }
            }
            Err(err) => {
                let notify_peer = !err.is_remote();
                self.fail(handle, &err, notify_peer, now);
            }
        }
        Ok(())
    }

    fn send_failed(&mut self, handle: ConnHandle, reason: PairingFailedReason) {
        let pdu = SmpPdu::PairingFailed(reason.wire_code());
        if let Err(err) = self.transport.send(handle, &pdu.encode()) {
            warn!("SMP [{:#06x}] could not send Pairing Failed: {}", handle, err);
        }
    }

    fn fail(&mut self, handle: ConnHandle, err: &SmpError, notify_peer: bool, now: Instant) {
        let reason = err.failure_reason();
        let Some(session) = self.sessions.get_mut(handle) else {
            return;
        };
        if err.is_remote() {
            warn!("SMP [{:#06x}] peer aborted pairing: {}", handle, reason);
        } else {
            warn!(
                "SMP [{:#06x}] pairing failed in {}: {}",
                handle,
                session.state(),
                err
            );
        }
        session.fail();
        let peer = session.peer_addr;

        if notify_peer {
            self.send_failed(handle, reason);
        }
        self.sessions.release(handle);
        if !self.config.repeated_attempts_interval.is_zero() {
            self.last_failure.insert(peer, now);
        }
        self.delegate
            .pairing_complete(handle, PairingOutcome::Failure(reason));
    }

    fn complete(&mut self, handle: ConnHandle) {
        let Some(session) = self.sessions.get(handle) else {
            return;
        };
        let peer = session.peer_addr;
        let auth_state = session.auth_state;
        let keys = session.keys.clone();

        if auth_state.contains(AuthState::BONDING) {
            let record = BondRecord {
                peer,
                auth_state,
                keys: keys.clone(),
            };
            if let Err(err) = self.bond_store.save(record) {
                warn!("SMP [{:#06x}] could not store bond: {}", handle, err);
            }
        }

        info!(
            "SMP [{:#06x}] paired with {}, security level {:?}",
            handle,
            peer,
            auth_state.security_level()
        );
        self.sessions.release(handle);
        self.last_failure.remove(&peer);
        self.delegate
            .pairing_complete(handle, PairingOutcome::Success { auth_state, keys });
    }
}
