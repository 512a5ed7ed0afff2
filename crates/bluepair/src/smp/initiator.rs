//! Initiator (central) side of the pairing state machine

use super::constants::SMP_PASSKEY_BITS;
use super::crypto::generate_random_128;
use super::pdu::{PairingParams, SmpPdu};
use super::role::*;
use super::session::PairingSession;
use super::state::PairingState;
use super::types::*;
use log::debug;

/// Drives pairings this device initiates
#[derive(Debug, Clone, Copy, Default)]
pub struct Initiator;

impl Initiator {
    fn on_pairing_response(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
        params: PairingParams,
    ) -> SmpResult<()> {
        session.remote_params = Some(params);
        negotiate(ctx, session)?;

        if session.secure_connections {
            if request_keypair(ctx, session)? {
                send_public_key(ctx, session)?;
                enter(ctx, session, PairingState::WaitRemotePublicKey)
            } else {
                enter(ctx, session, PairingState::WaitLocalPublicKey)
            }
        } else {
            self.legacy_begin(ctx, session)
        }
    }

    fn legacy_begin(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        match session.pairing_type() {
            PairingType::JustWorks => self.legacy_send_confirm(ctx, session),
            PairingType::Oob => {
                if obtain_oob(ctx, session)? {
                    self.legacy_send_confirm(ctx, session)
                } else {
                    enter(ctx, session, PairingState::WaitOob)
                }
            }
            pairing_type if pairing_type.is_passkey() => {
                if obtain_passkey(ctx, session)? {
                    self.legacy_send_confirm(ctx, session)
                } else {
                    enter(ctx, session, PairingState::WaitPasskey)
                }
            }
            _ => Err(SmpError::InvalidState),
        }
    }

    /// Mconfirm = c1(TK, Mrand, ...)
    fn legacy_send_confirm(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        load_legacy_tk(session)?;
        session.local_component.random = generate_random_128();
        session.local_component.confirm = legacy_confirm(session, &session.local_component.random)?;
        send_pdu(
            ctx,
            session,
            SmpPdu::PairingConfirm(session.local_component.confirm),
        )?;
        enter(ctx, session, PairingState::WaitConfirm)
    }

    fn legacy_random(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        check_legacy_confirm(session)?;
        let stk = legacy_stk(session);
        session.encryption_key = Some(stk);
        ctx.transport.start_encryption(session.handle, &stk, 0, &[0; 8])?;
        enter(ctx, session, PairingState::WaitStk)
    }

    /// Phase 2 of Secure Connections, once both public keys are known
    fn sc_stage1(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        match session.pairing_type() {
            PairingType::JustWorks | PairingType::NumericComparison => {
                enter(ctx, session, PairingState::WaitConfirm)
            }
            PairingType::Oob => {
                if obtain_oob(ctx, session)? {
                    self.sc_oob_start(ctx, session)
                } else {
                    enter(ctx, session, PairingState::WaitOob)
                }
            }
            pairing_type if pairing_type.is_passkey() => {
                if obtain_passkey(ctx, session)? {
                    self.passkey_round(ctx, session)
                } else {
                    enter(ctx, session, PairingState::WaitPasskey)
                }
            }
            _ => Err(SmpError::InvalidState),
        }
    }

    /// Send Cai for the current passkey bit
    fn passkey_round(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        let z = passkey_z(session)?;
        session.local_component.random = generate_random_128();
        session.local_component.confirm = local_sc_confirm(session, z)?;
        send_pdu(
            ctx,
            session,
            SmpPdu::PairingConfirm(session.local_component.confirm),
        )?;
        enter(ctx, session, PairingState::WaitPasskeyEntry)
    }

    fn sc_oob_start(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        verify_remote_oob(session)?;
        session.local_component.random = generate_random_128();
        send_pdu(
            ctx,
            session,
            SmpPdu::PairingRandom(session.local_component.random),
        )?;
        enter(ctx, session, PairingState::WaitRandom)
    }

    fn sc_random(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        match session.pairing_type() {
            PairingType::JustWorks => {
                check_remote_sc_confirm(session, 0)?;
                self.send_dhkey_check(ctx, session)
            }
            PairingType::NumericComparison => {
                check_remote_sc_confirm(session, 0)?;
                let value = numeric_comparison_value(session)?;
                match ctx
                    .delegate
                    .confirm_numeric_comparison(session.handle, value)
                {
                    UserResponse::Ready(true) => self.send_dhkey_check(ctx, session),
                    UserResponse::Pending => {
                        enter(ctx, session, PairingState::WaitNumericComparison)
                    }
                    UserResponse::Ready(false) | UserResponse::Rejected => {
                        Err(PairingFailedReason::NumericComparisonFailed.into())
                    }
                }
            }
            PairingType::Oob => self.send_dhkey_check(ctx, session),
            pairing_type if pairing_type.is_passkey() => {
                let z = passkey_z(session)?;
                check_remote_sc_confirm(session, z)?;
                session.passkey_bit_counter += 1;
                if session.passkey_bit_counter < SMP_PASSKEY_BITS {
                    self.passkey_round(ctx, session)
                } else {
                    self.send_dhkey_check(ctx, session)
                }
            }
            _ => Err(SmpError::InvalidState),
        }
    }

    /// Ea, once the DHKey is available
    fn send_dhkey_check(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        if session.sc.dhkey.is_none() {
            debug!("SMP [{:#06x}] waiting for DHKey", session.handle);
            return enter(ctx, session, PairingState::WaitLocalDhKey);
        }
        let (ea, _) = dhkey_check_values(session)?;
        send_pdu(ctx, session, SmpPdu::PairingDhKeyCheck(ea))?;
        enter(ctx, session, PairingState::WaitDhKeyCheck)
    }
}

impl RoleHandler for Initiator {
    fn start(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        let oob = local_oob_flag(ctx, session);
        let params = ctx.config.pairing_request(oob);
        session.local_params = Some(params);
        send_pdu(ctx, session, SmpPdu::PairingRequest(params))?;
        enter(ctx, session, PairingState::PairingReqSent)
    }

    fn handle_pdu(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
        pdu: SmpPdu,
    ) -> SmpResult<()> {
        match (session.state(), pdu) {
            (PairingState::PairingReqSent, SmpPdu::PairingResponse(params)) => {
                self.on_pairing_response(ctx, session, params)
            }
            (PairingState::WaitConfirm, SmpPdu::PairingConfirm(confirm)) => {
                session.remote_component.confirm = confirm;
                if session.secure_connections {
                    session.local_component.random = generate_random_128();
                }
                send_pdu(
                    ctx,
                    session,
                    SmpPdu::PairingRandom(session.local_component.random),
                )?;
                enter(ctx, session, PairingState::WaitRandom)
            }
            (PairingState::WaitPasskeyEntry, SmpPdu::PairingConfirm(confirm)) => {
                session.remote_component.confirm = confirm;
                send_pdu(
                    ctx,
                    session,
                    SmpPdu::PairingRandom(session.local_component.random),
                )?;
                enter(ctx, session, PairingState::WaitRandom)
            }
            (PairingState::WaitRandom, SmpPdu::PairingRandom(random)) => {
                session.remote_component.random = random;
                if session.secure_connections {
                    self.sc_random(ctx, session)
                } else {
                    self.legacy_random(ctx, session)
                }
            }
            (PairingState::WaitRemotePublicKey, SmpPdu::PairingPublicKey { x, y }) => {
                session.sc.remote_public_key = Some(super::ecc::PublicKey { x, y });
                validate_remote_key(ctx, session)?;
                request_dhkey(ctx, session)?;
                self.sc_stage1(ctx, session)
            }
            (PairingState::WaitDhKeyCheck, SmpPdu::PairingDhKeyCheck(eb)) => {
                let (_, expected) = dhkey_check_values(session)?;
                if eb != expected {
                    return Err(PairingFailedReason::DhKeyCheckFailed.into());
                }
                let ltk = finish_sc_check(session)?;
                ctx.transport.start_encryption(session.handle, &ltk, 0, &[0; 8])?;
                enter(ctx, session, PairingState::WaitEncrypt)
            }
            // Already pairing
            (_, SmpPdu::SecurityRequest(_)) => Ok(()),
            (_, pdu) => Err(SmpError::UnexpectedCommand(pdu.opcode())),
        }
    }

    fn passkey_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        if session.secure_connections {
            self.passkey_round(ctx, session)
        } else {
            self.legacy_send_confirm(ctx, session)
        }
    }

    fn oob_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        if session.secure_connections {
            self.sc_oob_start(ctx, session)
        } else {
            self.legacy_send_confirm(ctx, session)
        }
    }

    fn numeric_comparison_accepted(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
    ) -> SmpResult<()> {
        self.send_dhkey_check(ctx, session)
    }

    fn local_keypair_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        send_public_key(ctx, session)?;
        enter(ctx, session, PairingState::WaitRemotePublicKey)
    }

    fn dhkey_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        self.send_dhkey_check(ctx, session)
    }
}
