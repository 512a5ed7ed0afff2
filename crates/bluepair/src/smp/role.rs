//! Shared machinery of the initiator and responder state machines
//!
//! Both roles implement [`RoleHandler`]. The manager looks up the session's
//! role and hands every event to the matching handler together with a
//! [`Context`] borrowing the collaborators. Steps that are the same for both
//! roles (feature negotiation, confirm value checks, DHKey checks, ECC
//! polling) live here as free functions.

use super::config::SmConfig;
use super::constants::*;
use super::crypto::*;
use super::ecc::{validate_public_key, EccManager, EccPoll, PinnedKeyPair, PublicKey};
use super::keydist;
use super::keys::LongTermKey;
use super::manager::{PairingDelegate, SmpTransport};
use super::negotiation::{select_pairing_type, NegotiationInput};
use super::pdu::SmpPdu;
use super::session::PairingSession;
use super::state::PairingState;
use super::types::*;
use crate::gap::Address;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Instant;

/// Collaborators a role handler works with while processing one event
pub struct Context<'a> {
    pub config: &'a SmConfig,
    pub transport: &'a mut dyn SmpTransport,
    pub delegate: &'a mut dyn PairingDelegate,
    pub ecc: &'a mut EccManager,
    /// OOB data received from peers, keyed by peer address
    pub remote_oob: &'a HashMap<Address, OobData>,
    pub now: Instant,
}

/// Role-specific half of the pairing state machine
pub trait RoleHandler {
    /// Open the procedure: a Pairing Request from the initiator, a Security
    /// Request from the responder
    fn start(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()>;

    /// Process a pairing-phase PDU
    fn handle_pdu(&self, ctx: &mut Context, session: &mut PairingSession, pdu: SmpPdu)
        -> SmpResult<()>;

    /// The passkey became available after `WaitPasskey`
    fn passkey_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()>;

    /// The peer's OOB data became available after `WaitOob`
    fn oob_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()>;

    /// The user accepted the numeric comparison value
    fn numeric_comparison_accepted(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
    ) -> SmpResult<()>;

    /// The local key pair is stored in the session after `WaitLocalPublicKey`
    fn local_keypair_ready(&self, ctx: &mut Context, session: &mut PairingSession)
        -> SmpResult<()>;

    /// The DHKey is stored in the session after `WaitLocalDhKey`
    fn dhkey_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()>;

    /// The link is now encrypted with the STK or LTK
    fn encrypted(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        match session.state() {
            PairingState::WaitStk | PairingState::WaitEncrypt => keydist::begin(ctx, session),
            _ => Err(SmpError::InvalidState),
        }
    }
}

/// Route a PDU: the failure, keypress and key distribution PDUs are handled
/// the same way by both roles
pub fn dispatch(
    handler: &dyn RoleHandler,
    ctx: &mut Context,
    session: &mut PairingSession,
    pdu: SmpPdu,
) -> SmpResult<()> {
    match pdu {
        SmpPdu::PairingFailed(code) => Err(SmpError::RemoteFailure(
            PairingFailedReason::from_wire(code),
        )),
        SmpPdu::KeypressNotification(code) => {
            if !session.keypress {
                return Err(SmpError::UnexpectedCommand(SMP_PAIRING_KEYPRESS_NOTIFICATION));
            }
            let notification = KeypressNotificationType::from_u8(code)
                .ok_or(SmpError::Pairing(PairingFailedReason::InvalidParameters))?;
            ctx.delegate.notify(SmpEvent::KeypressNotification {
                handle: session.handle,
                notification,
            });
            Ok(())
        }
        pdu if pdu.is_key_distribution() => keydist::receive(ctx, session, pdu),
        pdu => handler.handle_pdu(ctx, session, pdu),
    }
}

/// Poll the ECC engine for a pending key pair or DHKey
pub fn poll_ecc(
    handler: &dyn RoleHandler,
    ctx: &mut Context,
    session: &mut PairingSession,
) -> SmpResult<()> {
    session.ecc_retry_at = None;

    if session.state() == PairingState::WaitLocalPublicKey {
        if request_keypair(ctx, session)? {
            handler.local_keypair_ready(ctx, session)?;
        }
        return Ok(());
    }

    if session.dhkey_pending {
        request_dhkey(ctx, session)?;
        if session.sc.dhkey.is_some() && session.state() == PairingState::WaitLocalDhKey {
            handler.dhkey_ready(ctx, session)?;
        }
    }
    Ok(())
}

pub fn send_pdu(ctx: &mut Context, session: &PairingSession, pdu: SmpPdu) -> SmpResult<()> {
    ctx.transport.send(session.handle, &pdu.encode())
}

/// Advance the session and arm the timer of the new state
pub fn enter(ctx: &Context, session: &mut PairingSession, next: PairingState) -> SmpResult<()> {
    session.advance(next)?;
    session.deadline = if next.is_terminal() {
        None
    } else if next.awaits_user() {
        Some(ctx.now + ctx.config.user_timeout)
    } else {
        Some(ctx.now + ctx.config.response_timeout)
    };
    Ok(())
}

/// OOB data flag this side advertises to the peer
pub fn local_oob_flag(ctx: &mut Context, session: &PairingSession) -> bool {
    ctx.remote_oob.contains_key(&session.peer_addr)
        || ctx.delegate.has_oob_data(session.handle, &session.peer_addr)
}

fn oob_flags(session: &PairingSession) -> (bool, bool) {
    let local = session
        .local_params
        .map(|p| p.oob_data_present())
        .unwrap_or(false);
    let peer = session
        .remote_params
        .map(|p| p.oob_data_present())
        .unwrap_or(false);
    (local, peer)
}

/// Combine both sides' pairing features once request and response are known
pub fn negotiate(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
    let (req, res) = match (session.pairing_request(), session.pairing_response()) {
        (Some(req), Some(res)) => (*req, *res),
        _ => return Err(SmpError::InvalidState),
    };
    req.validate()?;
    res.validate()?;

    // The responder may only narrow what the initiator proposed
    if res.initiator_key_dist & !req.initiator_key_dist != 0
        || res.responder_key_dist & !req.responder_key_dist != 0
    {
        return Err(PairingFailedReason::InvalidParameters.into());
    }

    let key_size = req.max_key_size.min(res.max_key_size);
    if key_size < ctx.config.min_key_size {
        return Err(PairingFailedReason::EncryptionKeySizeInsufficient.into());
    }

    let req_auth = req.auth_req();
    let res_auth = res.auth_req();
    let secure_connections = req_auth.secure_connections && res_auth.secure_connections;
    if ctx.config.secure_connections_only && !secure_connections {
        return Err(PairingFailedReason::AuthReqNotMet.into());
    }

    let (local_flag, peer_flag) = oob_flags(session);
    let local_oob_available = if secure_connections {
        !peer_flag || ctx.ecc.pinned_oob().is_some()
    } else {
        local_flag
    };

    let input = NegotiationInput {
        initiator_io: req.io_capability(),
        responder_io: res.io_capability(),
        initiator_oob: req.oob_data_present(),
        responder_oob: res.oob_data_present(),
        initiator_mitm: req_auth.mitm,
        responder_mitm: res_auth.mitm,
        secure_connections,
        local_oob_available,
        authenticated_only: ctx.config.authenticated_pairing_only,
    };
    let pairing_type = select_pairing_type(&input)?;
    session.set_pairing_type(pairing_type)?;

    let bonding = req_auth.bonding && res_auth.bonding;
    let mut initiator_dist = res.initiator_key_dist() - KeyDistribution::LINK_KEY;
    let mut responder_dist = res.responder_key_dist() - KeyDistribution::LINK_KEY;
    if secure_connections {
        initiator_dist.remove(KeyDistribution::ENC_KEY);
        responder_dist.remove(KeyDistribution::ENC_KEY);
    }
    if !bonding {
        initiator_dist = KeyDistribution::empty();
        responder_dist = KeyDistribution::empty();
    }
    let (local_dist, remote_dist) = match session.role {
        PairingRole::Initiator => (initiator_dist, responder_dist),
        PairingRole::Responder => (responder_dist, initiator_dist),
    };
    // The identity may have been cleared since the Pairing Request went out
    if local_dist.contains(KeyDistribution::ID_KEY) && ctx.config.identity.is_none() {
        warn!(
            "SMP [{:#06x}] identity key negotiated but no local identity is set",
            session.handle
        );
        return Err(PairingFailedReason::Unspecified.into());
    }

    session.secure_connections = secure_connections;
    session.key_size = key_size;
    session.keypress = req_auth.keypress_notifications && res_auth.keypress_notifications;
    session.local_dist = local_dist;
    session.remote_dist = remote_dist;

    let mut auth_state = AuthState::empty();
    auth_state.set(AuthState::BONDING, bonding);
    auth_state.set(AuthState::AUTHENTICATED, pairing_type.is_authenticated());
    auth_state.set(AuthState::SECURE_CONNECTION, secure_connections);
    session.auth_state = auth_state;

    info!(
        "SMP [{:#06x}] {} pairing as {} using {}, key size {}",
        session.handle,
        if secure_connections { "LE Secure Connections" } else { "LE legacy" },
        session.role,
        pairing_type,
        key_size
    );
    ctx.delegate.notify(SmpEvent::PairingStarted {
        handle: session.handle,
        role: session.role,
        pairing_type,
        secure_connections,
    });
    Ok(())
}

fn set_passkey(session: &mut PairingSession, passkey: u32) {
    session.passkey = Some(passkey);
    session.tk = u128::from(passkey).to_le_bytes();
}

/// Record a passkey supplied by the application
pub fn accept_passkey(session: &mut PairingSession, passkey: u32) -> SmpResult<()> {
    if passkey > SMP_PASSKEY_MAX {
        return Err(PairingFailedReason::PasskeyEntryFailed.into());
    }
    set_passkey(session, passkey);
    Ok(())
}

/// Get the passkey: generate and display it, or ask the application for it.
/// Returns `false` while the application has not answered yet.
pub fn obtain_passkey(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<bool> {
    if session.passkey.is_some() {
        return Ok(true);
    }
    if session.pairing_type().local_inputs_passkey(session.role) {
        match ctx.delegate.request_passkey(session.handle) {
            UserResponse::Ready(passkey) => {
                accept_passkey(session, passkey)?;
                Ok(true)
            }
            UserResponse::Pending => Ok(false),
            UserResponse::Rejected => Err(PairingFailedReason::PasskeyEntryFailed.into()),
        }
    } else {
        let passkey = generate_passkey();
        ctx.delegate.display_passkey(session.handle, passkey);
        set_passkey(session, passkey);
        Ok(true)
    }
}

/// Get the OOB data this side needs. Returns `false` while the application
/// has not answered yet.
pub fn obtain_oob(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<bool> {
    let (local_flag, peer_flag) = oob_flags(session);

    // Filled in with the pinned key pair by request_keypair
    if session.secure_connections && peer_flag && session.local_oob.is_none() {
        return Err(PairingFailedReason::OobNotAvailable.into());
    }

    let needed = !session.secure_connections || local_flag;
    if !needed || session.remote_oob.is_some() {
        return Ok(true);
    }
    if let Some(data) = ctx.remote_oob.get(&session.peer_addr) {
        session.remote_oob = Some(data.clone());
        return Ok(true);
    }

    match ctx.delegate.request_oob_data(session.handle, &session.peer_addr) {
        UserResponse::Ready(data) => {
            session.remote_oob = Some(data);
            Ok(true)
        }
        UserResponse::Pending => Ok(false),
        UserResponse::Rejected => Err(PairingFailedReason::OobNotAvailable.into()),
    }
}

/// Load the legacy TK from the negotiated association model
pub fn load_legacy_tk(session: &mut PairingSession) -> SmpResult<()> {
    match session.pairing_type() {
        PairingType::JustWorks => session.tk = [0; 16],
        PairingType::Oob => {
            let data = session
                .remote_oob
                .as_ref()
                .ok_or(SmpError::Pairing(PairingFailedReason::OobNotAvailable))?;
            session.tk = data.r;
        }
        // Set with the passkey
        _ => {}
    }
    Ok(())
}

/// Legacy confirm value c1 of a random value
pub fn legacy_confirm(session: &PairingSession, random: &[u8; 16]) -> SmpResult<[u8; 16]> {
    let (preq, pres) = match (session.pairing_request(), session.pairing_response()) {
        (Some(req), Some(res)) => (
            SmpPdu::PairingRequest(*req).encode(),
            SmpPdu::PairingResponse(*res).encode(),
        ),
        _ => return Err(SmpError::InvalidState),
    };
    let (initiator, responder) = session.addresses();
    Ok(c1(&session.tk, random, &preq, &pres, &initiator, &responder)?)
}

pub fn check_legacy_confirm(session: &PairingSession) -> SmpResult<()> {
    let expected = legacy_confirm(session, &session.remote_component.random)?;
    if expected != session.remote_component.confirm {
        warn!("SMP [{:#06x}] legacy confirm value mismatch", session.handle);
        return Err(PairingFailedReason::ConfirmValueMismatch.into());
    }
    Ok(())
}

/// STK = s1(TK, Srand, Mrand), shortened to the key size
pub fn legacy_stk(session: &PairingSession) -> [u8; 16] {
    let (mrand, srand) = match session.role {
        PairingRole::Initiator => (
            &session.local_component.random,
            &session.remote_component.random,
        ),
        PairingRole::Responder => (
            &session.remote_component.random,
            &session.local_component.random,
        ),
    };
    mask_key(&s1(&session.tk, srand, mrand), session.key_size)
}

/// Public keys of the initiator and the responder, in that order
pub fn public_keys(session: &PairingSession) -> SmpResult<(PublicKey, PublicKey)> {
    let local = session
        .sc
        .local_keypair
        .as_ref()
        .map(|keypair| keypair.public_key)
        .ok_or(SmpError::InvalidState)?;
    let remote = session.sc.remote_public_key.ok_or(SmpError::InvalidState)?;
    Ok(match session.role {
        PairingRole::Initiator => (local, remote),
        PairingRole::Responder => (remote, local),
    })
}

/// Na and Nb
pub fn nonces(session: &PairingSession) -> ([u8; 16], [u8; 16]) {
    match session.role {
        PairingRole::Initiator => (
            session.local_component.random,
            session.remote_component.random,
        ),
        PairingRole::Responder => (
            session.remote_component.random,
            session.local_component.random,
        ),
    }
}

/// `z` input of f4 for the current passkey round
pub fn passkey_z(session: &PairingSession) -> SmpResult<u8> {
    let passkey = session.passkey.ok_or(SmpError::InvalidState)?;
    let bit = (passkey >> session.passkey_bit_counter) & 1;
    Ok(SMP_PASSKEY_Z_PREFIX | bit as u8)
}

/// Secure Connections confirm value of the local side: f4(own PKx, peer PKx, own nonce, z)
pub fn local_sc_confirm(session: &PairingSession, z: u8) -> SmpResult<[u8; 16]> {
    let (pka, pkb) = public_keys(session)?;
    let (own, peer) = match session.role {
        PairingRole::Initiator => (pka, pkb),
        PairingRole::Responder => (pkb, pka),
    };
    Ok(f4(&own.x, &peer.x, &session.local_component.random, z))
}

pub fn check_remote_sc_confirm(session: &PairingSession, z: u8) -> SmpResult<()> {
    let (pka, pkb) = public_keys(session)?;
    let (own, peer) = match session.role {
        PairingRole::Initiator => (pka, pkb),
        PairingRole::Responder => (pkb, pka),
    };
    let expected = f4(&peer.x, &own.x, &session.remote_component.random, z);
    if expected != session.remote_component.confirm {
        warn!("SMP [{:#06x}] confirm value mismatch", session.handle);
        return Err(PairingFailedReason::ConfirmValueMismatch.into());
    }
    Ok(())
}

/// Six-digit value g2(PKax, PKbx, Na, Nb) shown for numeric comparison
pub fn numeric_comparison_value(session: &PairingSession) -> SmpResult<u32> {
    let (pka, pkb) = public_keys(session)?;
    let (na, nb) = nonces(session);
    Ok(g2(&pka.x, &pkb.x, &na, &nb))
}

/// Check the peer's OOB commitment against its public key
pub fn verify_remote_oob(session: &PairingSession) -> SmpResult<()> {
    let (local_flag, _) = oob_flags(session);
    if !local_flag {
        return Ok(());
    }
    let data = session
        .remote_oob
        .as_ref()
        .ok_or(SmpError::Pairing(PairingFailedReason::OobNotAvailable))?;
    let peer = session.sc.remote_public_key.ok_or(SmpError::InvalidState)?;
    if f4(&peer.x, &peer.x, &data.r, 0) != data.c {
        warn!("SMP [{:#06x}] OOB confirm value mismatch", session.handle);
        return Err(PairingFailedReason::ConfirmValueMismatch.into());
    }
    Ok(())
}

/// Validate the peer's public key against the local one
pub fn validate_remote_key(ctx: &Context, session: &PairingSession) -> SmpResult<()> {
    let (pka, pkb) = public_keys(session)?;
    let (own, peer) = match session.role {
        PairingRole::Initiator => (pka, pkb),
        PairingRole::Responder => (pkb, pka),
    };
    validate_public_key(&peer, &own, ctx.config.allow_debug_keys).map_err(|err| {
        warn!("SMP [{:#06x}] rejecting peer public key: {}", session.handle, err);
        SmpError::Pairing(PairingFailedReason::DhKeyCheckFailed)
    })
}

fn schedule_ecc_retry(ctx: &Context, session: &mut PairingSession) -> SmpResult<()> {
    session.ecc_retries += 1;
    if session.ecc_retries > ctx.config.ecc_max_retries {
        warn!(
            "SMP [{:#06x}] ECC engine still busy after {} retries",
            session.handle, ctx.config.ecc_max_retries
        );
        return Err(PairingFailedReason::Unspecified.into());
    }
    debug!(
        "SMP [{:#06x}] ECC operation pending, retry {} in {:?}",
        session.handle, session.ecc_retries, ctx.config.ecc_retry_backoff
    );
    session.ecc_retry_at = Some(ctx.now + ctx.config.ecc_retry_backoff);
    Ok(())
}

/// Whether the peer holds our OOB data, so the public key we send must be the
/// one that data commits to
fn uses_pinned_keypair(session: &PairingSession) -> bool {
    let (_, peer_flag) = oob_flags(session);
    session.secure_connections && session.pairing_type() == PairingType::Oob && peer_flag
}

/// Ask the ECC manager for the local key pair. Returns `false` while pending.
pub fn request_keypair(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<bool> {
    if uses_pinned_keypair(session) {
        let PinnedKeyPair { keypair, oob } = ctx
            .ecc
            .take_pinned()
            .ok_or(SmpError::Pairing(PairingFailedReason::OobNotAvailable))?;
        debug!(
            "SMP [{:#06x}] using the key pair committed to by local OOB data",
            session.handle
        );
        session.sc.local_keypair = Some(keypair);
        session.local_oob = Some(oob);
        session.ecc_retries = 0;
        return Ok(true);
    }

    match ctx.ecc.generate_keypair()? {
        EccPoll::Ready(keypair) => {
            session.sc.local_keypair = Some(keypair);
            session.ecc_retries = 0;
            Ok(true)
        }
        EccPoll::Pending => {
            schedule_ecc_retry(ctx, session)?;
            Ok(false)
        }
    }
}

/// Start (or poll) the DHKey computation. The DHKey lands in the session
/// when ready.
pub fn request_dhkey(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
    let remote = session.sc.remote_public_key.ok_or(SmpError::InvalidState)?;
    let poll = {
        let keypair = session
            .sc
            .local_keypair
            .as_ref()
            .ok_or(SmpError::InvalidState)?;
        ctx.ecc.compute_dhkey(&keypair.private_key, &remote)?
    };
    match poll {
        EccPoll::Ready(dhkey) => {
            session.sc.dhkey = Some(dhkey);
            session.dhkey_pending = false;
            session.ecc_retries = 0;
        }
        EccPoll::Pending => {
            session.dhkey_pending = true;
            schedule_ecc_retry(ctx, session)?;
        }
    }
    Ok(())
}

pub fn send_public_key(ctx: &mut Context, session: &PairingSession) -> SmpResult<()> {
    let public_key = session
        .sc
        .local_keypair
        .as_ref()
        .map(|keypair| keypair.public_key)
        .ok_or(SmpError::InvalidState)?;
    send_pdu(
        ctx,
        session,
        SmpPdu::PairingPublicKey {
            x: public_key.x,
            y: public_key.y,
        },
    )
}

/// ra and rb inputs of f6
fn check_randoms(session: &PairingSession) -> ([u8; 16], [u8; 16]) {
    match session.pairing_type() {
        PairingType::Oob => {
            let (local_flag, peer_flag) = oob_flags(session);
            let local_r = match (&session.local_oob, peer_flag) {
                (Some(data), true) => data.r,
                _ => [0; 16],
            };
            let remote_r = match (&session.remote_oob, local_flag) {
                (Some(data), true) => data.r,
                _ => [0; 16],
            };
            match session.role {
                PairingRole::Initiator => (local_r, remote_r),
                PairingRole::Responder => (remote_r, local_r),
            }
        }
        pairing_type if pairing_type.is_passkey() => (session.tk, session.tk),
        _ => ([0; 16], [0; 16]),
    }
}

/// DHKey check values Ea and Eb, deriving MacKey and LTK on first use
pub fn dhkey_check_values(session: &mut PairingSession) -> SmpResult<([u8; 16], [u8; 16])> {
    let (na, nb) = nonces(session);
    let (a, b) = session.addresses();
    let (a, b) = (a.to_le_bytes(), b.to_le_bytes());

    if session.sc.mac_key.is_none() {
        let dhkey = session.sc.dhkey.as_ref().ok_or(SmpError::InvalidState)?;
        let (mac_key, ltk) = f5(&dhkey.0, &na, &nb, &a, &b);
        session.sc.mac_key = Some(mac_key);
        session.sc.ltk = Some(ltk);
    }

    let mac_key = session.sc.mac_key.ok_or(SmpError::InvalidState)?;
    let (io_a, io_b) = match (session.pairing_request(), session.pairing_response()) {
        (Some(req), Some(res)) => (req.f6_io_cap(), res.f6_io_cap()),
        _ => return Err(SmpError::InvalidState),
    };
    let (ra, rb) = check_randoms(session);

    let ea = f6(&mac_key, &na, &nb, &rb, &io_a, &a, &b);
    let eb = f6(&mac_key, &nb, &na, &ra, &io_b, &b, &a);
    Ok((ea, eb))
}

/// Record the Secure Connections LTK once the DHKey checks passed
pub fn finish_sc_check(session: &mut PairingSession) -> SmpResult<[u8; 16]> {
    let ltk = session.sc.ltk.ok_or(SmpError::InvalidState)?;
    let ltk = mask_key(&ltk, session.key_size);
    session.encryption_key = Some(ltk);
    session.keys.ltk = Some(LongTermKey::new_secure_connections(
        ltk,
        session.key_size,
        session.auth_state.contains(AuthState::AUTHENTICATED),
    ));
    Ok(ltk)
}
