//! Pairing state machine states and the legal edges between them

use std::fmt;

/// State of a pairing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingState {
    Initialize,
    /// Initiator sent a Pairing Request
    PairingReqSent,
    /// Responder sent a Security Request and awaits the Pairing Request
    WaitPairingReq,
    WaitConfirm,
    /// Waiting for the application to supply a passkey
    WaitPasskey,
    /// Passkey still pending but the peer's confirm value already arrived
    WaitConfirmPasskey,
    WaitRandom,
    /// Legacy pairing finished; link encryption with the STK in progress
    WaitStk,
    WaitSlaveEncInfo,
    WaitSlaveMasterIdent,
    WaitSlaveIdentityInfo,
    WaitSlaveIdentityAddrInfo,
    WaitSlaveSigningInfo,
    WaitMasterEncInfo,
    WaitMasterMasterIdent,
    WaitMasterIdentityInfo,
    WaitMasterIdentityAddrInfo,
    WaitMasterSigningInfo,
    /// Secure Connections pairing finished; link encryption with the LTK in progress
    WaitEncrypt,
    WaitLocalPublicKey,
    WaitRemotePublicKey,
    WaitLocalDhKey,
    WaitDhKeyCheck,
    WaitNumericComparison,
    /// Secure Connections passkey round awaiting the peer's confirm value
    WaitPasskeyEntry,
    WaitOob,
    Done,
    Fail,
}

impl PairingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PairingState::Done | PairingState::Fail)
    }

    /// States blocked on the application rather than the peer
    pub fn awaits_user(&self) -> bool {
        matches!(
            self,
            PairingState::WaitPasskey
                | PairingState::WaitConfirmPasskey
                | PairingState::WaitNumericComparison
                | PairingState::WaitOob
        )
    }

    /// Position in the key distribution phase, in distribution order
    pub fn key_distribution_index(&self) -> Option<usize> {
        let index = match self {
            PairingState::WaitSlaveEncInfo => 0,
            PairingState::WaitSlaveMasterIdent => 1,
            PairingState::WaitSlaveIdentityInfo => 2,
            PairingState::WaitSlaveIdentityAddrInfo => 3,
            PairingState::WaitSlaveSigningInfo => 4,
            PairingState::WaitMasterEncInfo => 5,
            PairingState::WaitMasterMasterIdent => 6,
            PairingState::WaitMasterIdentityInfo => 7,
            PairingState::WaitMasterIdentityAddrInfo => 8,
            PairingState::WaitMasterSigningInfo => 9,
            _ => return None,
        };
        Some(index)
    }

    /// Whether `next` is a legal successor of this state
    ///
    /// Every non-terminal state may fail. Terminal states have no successors.
    pub fn can_advance_to(&self, next: PairingState) -> bool {
        use PairingState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Fail {
            return true;
        }

        match self {
            Initialize => matches!(
                next,
                PairingReqSent | WaitPairingReq | WaitConfirm | WaitPasskey | WaitOob
                    | WaitRemotePublicKey
            ),
            WaitPairingReq => matches!(
                next,
                WaitConfirm | WaitPasskey | WaitOob | WaitRemotePublicKey
            ),
            PairingReqSent => matches!(
                next,
                WaitConfirm | WaitPasskey | WaitOob | WaitLocalPublicKey | WaitRemotePublicKey
            ),
            WaitPasskey => matches!(
                next,
                WaitConfirm | WaitConfirmPasskey | WaitPasskeyEntry
            ),
            WaitConfirmPasskey => next == WaitRandom,
            WaitOob => matches!(next, WaitConfirm | WaitRandom),
            WaitConfirm => next == WaitRandom,
            WaitRandom => matches!(
                next,
                WaitRandom
                    | WaitStk
                    | WaitPasskeyEntry
                    | WaitNumericComparison
                    | WaitDhKeyCheck
                    | WaitLocalDhKey
            ),
            WaitLocalPublicKey | WaitRemotePublicKey => matches!(
                next,
                WaitLocalPublicKey
                    | WaitRemotePublicKey
                    | WaitConfirm
                    | WaitRandom
                    | WaitPasskey
                    | WaitConfirmPasskey
                    | WaitPasskeyEntry
                    | WaitOob
            ) && next != *self,
            WaitPasskeyEntry => next == WaitRandom,
            WaitNumericComparison | WaitLocalDhKey => {
                matches!(next, WaitDhKeyCheck | WaitLocalDhKey | WaitEncrypt) && next != *self
            }
            WaitDhKeyCheck => next == WaitEncrypt,
            WaitStk | WaitEncrypt => next == Done || next.key_distribution_index().is_some(),
            _ => match (self.key_distribution_index(), next.key_distribution_index()) {
                (Some(from), Some(to)) => to > from,
                (Some(_), None) => next == Done,
                _ => false,
            },
        }
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
