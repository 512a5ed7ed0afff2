//! Responder (peripheral) side of the pairing state machine
//!
//! PDUs that arrive while the responder still waits on the application or
//! the ECC engine are parked in the session and replayed once the wait ends.

use super::constants::SMP_PASSKEY_BITS;
use super::crypto::generate_random_128;
use super::ecc::PublicKey;
use super::pdu::{PairingParams, SmpPdu};
use super::role::*;
use super::session::PairingSession;
use super::state::PairingState;
use super::types::*;
use log::debug;

/// Drives pairings the peer initiates
#[derive(Debug, Clone, Copy, Default)]
pub struct Responder;

impl Responder {
    fn on_pairing_request(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
        request: PairingParams,
    ) -> SmpResult<()> {
        request.validate()?;
        session.remote_params = Some(request);

        let oob = local_oob_flag(ctx, session);
        let (initiator_dist, responder_dist) = if request.auth_req().bonding && ctx.config.bonding {
            (
                request.initiator_key_dist()
                    & ctx.config.remote_key_dist(PairingRole::Responder),
                request.responder_key_dist()
                    & ctx.config.local_key_dist(PairingRole::Responder),
            )
        } else {
            (KeyDistribution::empty(), KeyDistribution::empty())
        };
        let response = PairingParams::new(
            ctx.config.io_capability,
            oob,
            ctx.config.auth_requirements(),
            ctx.config.max_key_size,
            initiator_dist,
            responder_dist,
        );
        session.local_params = Some(response);

        negotiate(ctx, session)?;
        send_pdu(ctx, session, SmpPdu::PairingResponse(response))?;

        if session.secure_connections {
            enter(ctx, session, PairingState::WaitRemotePublicKey)
        } else {
            self.legacy_begin(ctx, session)
        }
    }

    fn legacy_begin(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        let ready = match session.pairing_type() {
            PairingType::JustWorks => true,
            PairingType::Oob => {
                if !obtain_oob(ctx, session)? {
                    return enter(ctx, session, PairingState::WaitOob);
                }
                true
            }
            pairing_type if pairing_type.is_passkey() => {
                if !obtain_passkey(ctx, session)? {
                    return enter(ctx, session, PairingState::WaitPasskey);
                }
                true
            }
            _ => false,
        };
        if !ready {
            return Err(SmpError::InvalidState);
        }
        load_legacy_tk(session)?;
        enter(ctx, session, PairingState::WaitConfirm)
    }

    /// Sconfirm in answer to Mconfirm
    fn legacy_send_confirm(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        session.local_component.random = generate_random_128();
        session.local_component.confirm = legacy_confirm(session, &session.local_component.random)?;
        send_pdu(
            ctx,
            session,
            SmpPdu::PairingConfirm(session.local_component.confirm),
        )?;
        enter(ctx, session, PairingState::WaitRandom)
    }

    fn legacy_random(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        check_legacy_confirm(session)?;
        send_pdu(
            ctx,
            session,
            SmpPdu::PairingRandom(session.local_component.random),
        )?;
        session.encryption_key = Some(legacy_stk(session));
        enter(ctx, session, PairingState::WaitStk)
    }

    /// Take a Pairing Confirm parked while the application was busy
    fn take_parked_confirm(session: &mut PairingSession) -> bool {
        match session.parked.take() {
            Some(SmpPdu::PairingConfirm(confirm)) => {
                session.remote_component.confirm = confirm;
                true
            }
            other => {
                session.parked = other;
                false
            }
        }
    }

    /// Both public keys are known: answer with ours and start authentication
    fn public_keys_exchanged(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        validate_remote_key(ctx, session)?;
        send_public_key(ctx, session)?;
        request_dhkey(ctx, session)?;
        self.sc_stage1(ctx, session)
    }

    fn sc_stage1(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        match session.pairing_type() {
            PairingType::JustWorks | PairingType::NumericComparison => {
                // Cb = f4(PKbx, PKax, Nb, 0)
                session.local_component.random = generate_random_128();
                session.local_component.confirm = local_sc_confirm(session, 0)?;
                send_pdu(
                    ctx,
                    session,
                    SmpPdu::PairingConfirm(session.local_component.confirm),
                )?;
                enter(ctx, session, PairingState::WaitRandom)
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
                    enter(ctx, session, PairingState::WaitPasskeyEntry)
                } else {
                    enter(ctx, session, PairingState::WaitPasskey)
                }
            }
            _ => Err(SmpError::InvalidState),
        }
    }

    fn sc_oob_start(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        verify_remote_oob(session)?;
        enter(ctx, session, PairingState::WaitRandom)
    }

    /// Cbi in answer to Cai
    fn passkey_round(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        let z = passkey_z(session)?;
        session.local_component.random = generate_random_128();
        session.local_component.confirm = local_sc_confirm(session, z)?;
        send_pdu(
            ctx,
            session,
            SmpPdu::PairingConfirm(session.local_component.confirm),
        )?;
        enter(ctx, session, PairingState::WaitRandom)
    }

    fn sc_random(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        match session.pairing_type() {
            PairingType::JustWorks => {
                self.send_nonce(ctx, session)?;
                self.await_dhkey_check(ctx, session)
            }
            PairingType::NumericComparison => {
                self.send_nonce(ctx, session)?;
                let value = numeric_comparison_value(session)?;
                match ctx
                    .delegate
                    .confirm_numeric_comparison(session.handle, value)
                {
                    UserResponse::Ready(true) => self.await_dhkey_check(ctx, session),
                    UserResponse::Pending => {
                        enter(ctx, session, PairingState::WaitNumericComparison)
                    }
                    UserResponse::Ready(false) | UserResponse::Rejected => {
                        Err(PairingFailedReason::NumericComparisonFailed.into())
                    }
                }
            }
            PairingType::Oob => {
                session.local_component.random = generate_random_128();
                self.send_nonce(ctx, session)?;
                self.await_dhkey_check(ctx, session)
            }
            pairing_type if pairing_type.is_passkey() => {
                let z = passkey_z(session)?;
                check_remote_sc_confirm(session, z)?;
                self.send_nonce(ctx, session)?;
                session.passkey_bit_counter += 1;
                if session.passkey_bit_counter < SMP_PASSKEY_BITS {
                    enter(ctx, session, PairingState::WaitPasskeyEntry)
                } else {
                    self.await_dhkey_check(ctx, session)
                }
            }
            _ => Err(SmpError::InvalidState),
        }
    }

    fn send_nonce(&self, ctx: &mut Context, session: &PairingSession) -> SmpResult<()> {
        send_pdu(
            ctx,
            session,
            SmpPdu::PairingRandom(session.local_component.random),
        )
    }

    /// Wait for Ea, or process one parked while the DHKey or the user was
    /// still pending
    fn await_dhkey_check(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        if session.sc.dhkey.is_none() {
            debug!("SMP [{:#06x}] waiting for DHKey", session.handle);
            return enter(ctx, session, PairingState::WaitLocalDhKey);
        }
        match session.parked.take() {
            Some(SmpPdu::PairingDhKeyCheck(ea)) => self.check_dhkey(ctx, session, ea),
            _ => enter(ctx, session, PairingState::WaitDhKeyCheck),
        }
    }

    /// Verify Ea and answer with Eb
    fn check_dhkey(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
        ea: [u8; 16],
    ) -> SmpResult<()> {
        let (expected, eb) = dhkey_check_values(session)?;
        if ea != expected {
            return Err(PairingFailedReason::DhKeyCheckFailed.into());
        }
        send_pdu(ctx, session, SmpPdu::PairingDhKeyCheck(eb))?;
        finish_sc_check(session)?;
        enter(ctx, session, PairingState::WaitEncrypt)
    }
}

impl RoleHandler for Responder {
    fn start(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        let auth_req = ctx.config.auth_requirements().to_u8();
        send_pdu(ctx, session, SmpPdu::SecurityRequest(auth_req))?;
        enter(ctx, session, PairingState::WaitPairingReq)
    }

    fn handle_pdu(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
        pdu: SmpPdu,
    ) -> SmpResult<()> {
        let secure_connections = session.secure_connections;
        match (session.state(), pdu) {
            (
                PairingState::Initialize | PairingState::WaitPairingReq,
                SmpPdu::PairingRequest(params),
            ) => self.on_pairing_request(ctx, session, params),

            // LE legacy
            (PairingState::WaitConfirm, SmpPdu::PairingConfirm(confirm)) if !secure_connections => {
                session.remote_component.confirm = confirm;
                self.legacy_send_confirm(ctx, session)
            }
            (PairingState::WaitOob, pdu @ SmpPdu::PairingConfirm(_)) if !secure_connections => {
                session.parked = Some(pdu);
                Ok(())
            }
            (PairingState::WaitOob, pdu @ SmpPdu::PairingRandom(_)) if secure_connections => {
                session.parked = Some(pdu);
                Ok(())
            }

            (PairingState::WaitPasskey, pdu @ SmpPdu::PairingConfirm(_)) => {
                session.parked = Some(pdu);
                enter(ctx, session, PairingState::WaitConfirmPasskey)
            }
            (PairingState::WaitRandom, SmpPdu::PairingRandom(random)) => {
                session.remote_component.random = random;
                if secure_connections {
                    self.sc_random(ctx, session)
                } else {
                    self.legacy_random(ctx, session)
                }
            }

            // LE Secure Connections
            (PairingState::WaitRemotePublicKey, SmpPdu::PairingPublicKey { x, y }) => {
                session.sc.remote_public_key = Some(PublicKey { x, y });
                if request_keypair(ctx, session)? {
                    self.public_keys_exchanged(ctx, session)
                } else {
                    enter(ctx, session, PairingState::WaitLocalPublicKey)
                }
            }
            (PairingState::WaitPasskeyEntry, SmpPdu::PairingConfirm(confirm)) => {
                session.remote_component.confirm = confirm;
                self.passkey_round(ctx, session)
            }
            (PairingState::WaitDhKeyCheck, SmpPdu::PairingDhKeyCheck(ea)) => {
                self.check_dhkey(ctx, session, ea)
            }
            (
                PairingState::WaitNumericComparison | PairingState::WaitLocalDhKey,
                pdu @ SmpPdu::PairingDhKeyCheck(_),
            ) => {
                session.parked = Some(pdu);
                Ok(())
            }

            (_, pdu) => Err(SmpError::UnexpectedCommand(pdu.opcode())),
        }
    }

    fn passkey_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        let parked = Self::take_parked_confirm(session);
        match (session.secure_connections, parked) {
            (false, true) => self.legacy_send_confirm(ctx, session),
            (false, false) => enter(ctx, session, PairingState::WaitConfirm),
            (true, true) => self.passkey_round(ctx, session),
            (true, false) => enter(ctx, session, PairingState::WaitPasskeyEntry),
        }
    }

    fn oob_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        if session.secure_connections {
            self.sc_oob_start(ctx, session)?;
            return match session.parked.take() {
                Some(SmpPdu::PairingRandom(random)) => {
                    session.remote_component.random = random;
                    self.sc_random(ctx, session)
                }
                other => {
                    session.parked = other;
                    Ok(())
                }
            };
        }
        load_legacy_tk(session)?;
        if Self::take_parked_confirm(session) {
            self.legacy_send_confirm(ctx, session)
        } else {
            enter(ctx, session, PairingState::WaitConfirm)
        }
    }

    fn numeric_comparison_accepted(
        &self,
        ctx: &mut Context,
        session: &mut PairingSession,
    ) -> SmpResult<()> {
        self.await_dhkey_check(ctx, session)
    }

    fn local_keypair_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        self.public_keys_exchanged(ctx, session)
    }

    fn dhkey_ready(&self, ctx: &mut Context, session: &mut PairingSession) -> SmpResult<()> {
        self.await_dhkey_check(ctx, session)
    }
}
