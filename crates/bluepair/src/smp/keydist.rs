//! Key distribution phase
//!
//! Runs once the link is encrypted. The responder sends its keys first, then
//! the initiator. Within one side the order is fixed: EncInfo, MasterIdent,
//! IdentityInfo, IdentityAddrInfo, SigningInfo. Only negotiated keys are
//! exchanged and the LTK is never distributed after Secure Connections.

use super::crypto::{d1, fill_random, generate_random_128, mask_key};
use super::keys::{ConnectionSignatureResolvingKey, IdentityResolvingKey, LongTermKey};
use super::pdu::SmpPdu;
use super::role::{enter, send_pdu, Context};
use super::session::PairingSession;
use super::state::PairingState;
use super::types::*;
use crate::gap::{Address, AddressType};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

/// States a side walks while receiving `dist` from its peer
fn receive_states(dist: KeyDistribution, from_responder: bool) -> Vec<PairingState> {
    let mut states = Vec::new();
    if dist.contains(KeyDistribution::ENC_KEY) {
        if from_responder {
            states.push(PairingState::WaitSlaveEncInfo);
            states.push(PairingState::WaitSlaveMasterIdent);
        } else {
            states.push(PairingState::WaitMasterEncInfo);
            states.push(PairingState::WaitMasterMasterIdent);
        }
    }
    if dist.contains(KeyDistribution::ID_KEY) {
        if from_responder {
            states.push(PairingState::WaitSlaveIdentityInfo);
            states.push(PairingState::WaitSlaveIdentityAddrInfo);
        } else {
            states.push(PairingState::WaitMasterIdentityInfo);
            states.push(PairingState::WaitMasterIdentityAddrInfo);
        }
    }
    if dist.contains(KeyDistribution::SIGN_KEY) {
        states.push(if from_responder {
            PairingState::WaitSlaveSigningInfo
        } else {
            PairingState::WaitMasterSigningInfo
        });
    }
    states
}

fn next_receive_state(session: &PairingSession) -> Option<PairingState> {
    let from_responder = session.role == PairingRole::Initiator;
    let current = session.state().key_distribution_index();
    receive_states(session.remote_dist, from_responder)
        .into_iter()
        .find(|state| match current {
            Some(index) => state.key_distribution_index() > Some(index),
            None => true,
        })
}

/// Start distribution on an encrypted link
pub fn begin(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
    debug!(
        "SMP [{:#06x}] link encrypted, distributing keys (local {:?}, remote {:?})",
        session.handle, session.local_dist, session.remote_dist
    );
    if session.role == PairingRole::Responder {
        send_local_keys(ctx, session)?;
    }
    advance(ctx, session)
}

/// Process one key distribution PDU from the peer
pub fn receive(ctx: &mut Context, session: &mut PairingSession, pdu: SmpPdu) -> SmpResult<()> {
    use PairingState::*;

    let authenticated = session.auth_state.contains(AuthState::AUTHENTICATED);
    match (session.state(), pdu) {
        (WaitSlaveEncInfo | WaitMasterEncInfo, SmpPdu::EncryptionInformation(ltk)) => {
            session.keys.peer.ltk = Some(LongTermKey::new(
                ltk,
                0,
                [0; 8],
                session.key_size,
                authenticated,
            ));
        }
        (
            WaitSlaveMasterIdent | WaitMasterMasterIdent,
            SmpPdu::MasterIdentification { ediv, rand },
        ) => {
            if let Some(ltk) = session.keys.peer.ltk.as_mut() {
                ltk.ediv = ediv;
                ltk.rand = rand;
            }
        }
        (WaitSlaveIdentityInfo | WaitMasterIdentityInfo, SmpPdu::IdentityInformation(irk)) => {
            session.keys.peer.irk = Some(IdentityResolvingKey::new(irk));
        }
        (
            WaitSlaveIdentityAddrInfo | WaitMasterIdentityAddrInfo,
            SmpPdu::IdentityAddressInformation { addr_type, addr },
        ) => {
            let kind = match addr_type {
                0x00 => AddressType::PublicIdentity,
                0x01 => AddressType::RandomIdentity,
                _ => return Err(PairingFailedReason::InvalidParameters.into()),
            };
            let identity = Address::new(kind, addr);
            debug!("SMP [{:#06x}] peer identity {}", session.handle, identity);
            session.keys.peer.identity = Some(identity);
            ctx.delegate.notify(SmpEvent::IdentityReceived {
                handle: session.handle,
                identity,
            });
        }
        (WaitSlaveSigningInfo | WaitMasterSigningInfo, SmpPdu::SigningInformation(csrk)) => {
            session.keys.peer.csrk = Some(ConnectionSignatureResolvingKey::new(csrk, authenticated));
        }
        (_, pdu) => return Err(SmpError::UnexpectedCommand(pdu.opcode())),
    }
    advance(ctx, session)
}

/// Wait for the next expected key, or finish this side's part
fn advance(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
    if let Some(next) = next_receive_state(session) {
        return enter(ctx, session, next);
    }
    if session.role == PairingRole::Initiator {
        send_local_keys(ctx, session)?;
    }
    info!("SMP [{:#06x}] key distribution complete", session.handle);
    enter(ctx, session, PairingState::Done)
}

fn send_local_keys(ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
    let dist = session.local_dist;
    let authenticated = session.auth_state.contains(AuthState::AUTHENTICATED);

    if dist.contains(KeyDistribution::ENC_KEY) && !session.secure_connections {
        // EDIV carries the diversifier so the LTK can be rebuilt from ER
        let mut div_bytes = [0u8; 2];
        fill_random(&mut div_bytes);
        let div = LittleEndian::read_u16(&div_bytes);
        let mut rand = [0u8; 8];
        fill_random(&mut rand);
        let ltk = legacy_ltk(&ctx.config.encryption_root, div, session.key_size);

        send_pdu(ctx, session, SmpPdu::EncryptionInformation(ltk))?;
        send_pdu(ctx, session, SmpPdu::MasterIdentification { ediv: div, rand })?;
        session.keys.local.ltk = Some(LongTermKey::new(
            ltk,
            div,
            rand,
            session.key_size,
            authenticated,
        ));
    }

    if dist.contains(KeyDistribution::ID_KEY) {
        // The peer waits for both identity PDUs, so skipping them would stall it
        let identity = ctx.config.identity.clone().ok_or_else(|| {
            warn!("SMP [{:#06x}] local identity removed during pairing", session.handle);
            SmpError::Pairing(PairingFailedReason::Unspecified)
        })?;
        send_pdu(ctx, session, SmpPdu::IdentityInformation(identity.irk))?;
        send_pdu(
            ctx,
            session,
            SmpPdu::IdentityAddressInformation {
                addr_type: identity.address.type_octet(),
                addr: identity.address.addr,
            },
        )?;
        session.keys.local.irk = Some(IdentityResolvingKey::new(identity.irk));
        session.keys.local.identity = Some(identity.address);
    }

    if dist.contains(KeyDistribution::SIGN_KEY) {
        let csrk = generate_random_128();
        send_pdu(ctx, session, SmpPdu::SigningInformation(csrk))?;
        session.keys.local.csrk = Some(ConnectionSignatureResolvingKey::new(csrk, authenticated));
    }
    Ok(())
}

/// Legacy LTK a peripheral hands out for `ediv`, rebuilt from the
/// encryption root
pub fn legacy_ltk(encryption_root: &[u8; 16], ediv: u16, key_size: u8) -> [u8; 16] {
    mask_key(&d1(encryption_root, ediv, 0), key_size)
}
