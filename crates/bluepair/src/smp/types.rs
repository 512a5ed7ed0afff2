//! Type definitions for the Security Manager Protocol
use super::constants::*;
use super::keys::PairingKeys;
use super::state::PairingState;
use crate::error::CryptoError;
use crate::gap::Address;
use bitflags::bitflags;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// Connection handle identifying the link a pairing runs on
pub type ConnHandle = u16;

/// Reason carried by a Pairing Failed PDU
///
/// Every variant except [`PairingFailedReason::LocalKeyFailure`] maps 1:1 to
/// a wire code. A local key failure is reported to the application as such
/// but goes on the wire as "unspecified reason".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingFailedReason {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthReqNotMet,
    ConfirmValueMismatch,
    PairingNotSupported,
    EncryptionKeySizeInsufficient,
    CommandNotSupported,
    Unspecified,
    RepeatedAttempts,
    InvalidParameters,
    DhKeyCheckFailed,
    NumericComparisonFailed,
    BrEdrPairingInProgress,
    CrossTransportKeyDerivationNotAllowed,
    /// Local key generation or key agreement failed. Never sent as such.
    LocalKeyFailure,
}

impl PairingFailedReason {
    /// Code sent in the Pairing Failed PDU
    pub fn wire_code(&self) -> u8 {
        match self {
            PairingFailedReason::PasskeyEntryFailed => SMP_REASON_PASSKEY_ENTRY_FAILED,
            PairingFailedReason::OobNotAvailable => SMP_REASON_OOB_NOT_AVAILABLE,
            PairingFailedReason::AuthReqNotMet => SMP_REASON_AUTHENTICATION_REQUIREMENTS,
            PairingFailedReason::ConfirmValueMismatch => SMP_REASON_CONFIRM_VALUE_FAILED,
            PairingFailedReason::PairingNotSupported => SMP_REASON_PAIRING_NOT_SUPPORTED,
            PairingFailedReason::EncryptionKeySizeInsufficient => SMP_REASON_ENCRYPTION_KEY_SIZE,
            PairingFailedReason::CommandNotSupported => SMP_REASON_COMMAND_NOT_SUPPORTED,
            PairingFailedReason::Unspecified => SMP_REASON_UNSPECIFIED_REASON,
            PairingFailedReason::RepeatedAttempts => SMP_REASON_REPEATED_ATTEMPTS,
            PairingFailedReason::InvalidParameters => SMP_REASON_INVALID_PARAMETERS,
            PairingFailedReason::DhKeyCheckFailed => SMP_REASON_DHKEY_CHECK_FAILED,
            PairingFailedReason::NumericComparisonFailed => SMP_REASON_NUMERIC_COMPARISON_FAILED,
            PairingFailedReason::BrEdrPairingInProgress => SMP_REASON_BR_EDR_PAIRING_IN_PROGRESS,
            PairingFailedReason::CrossTransportKeyDerivationNotAllowed => {
                SMP_REASON_CROSS_TRANSPORT_KEY_NOT_ALLOWED
            }
            PairingFailedReason::LocalKeyFailure => SMP_REASON_UNSPECIFIED_REASON,
        }
    }

    /// Decode a wire code. Unknown codes are reported as unspecified.
    pub fn from_wire(code: u8) -> Self {
        match code {
            SMP_REASON_PASSKEY_ENTRY_FAILED => PairingFailedReason::PasskeyEntryFailed,
            SMP_REASON_OOB_NOT_AVAILABLE => PairingFailedReason::OobNotAvailable,
            SMP_REASON_AUTHENTICATION_REQUIREMENTS => PairingFailedReason::AuthReqNotMet,
            SMP_REASON_CONFIRM_VALUE_FAILED => PairingFailedReason::ConfirmValueMismatch,
            SMP_REASON_PAIRING_NOT_SUPPORTED => PairingFailedReason::PairingNotSupported,
            SMP_REASON_ENCRYPTION_KEY_SIZE => PairingFailedReason::EncryptionKeySizeInsufficient,
            SMP_REASON_COMMAND_NOT_SUPPORTED => PairingFailedReason::CommandNotSupported,
            SMP_REASON_REPEATED_ATTEMPTS => PairingFailedReason::RepeatedAttempts,
            SMP_REASON_INVALID_PARAMETERS => PairingFailedReason::InvalidParameters,
            SMP_REASON_DHKEY_CHECK_FAILED => PairingFailedReason::DhKeyCheckFailed,
            SMP_REASON_NUMERIC_COMPARISON_FAILED => PairingFailedReason::NumericComparisonFailed,
            SMP_REASON_BR_EDR_PAIRING_IN_PROGRESS => PairingFailedReason::BrEdrPairingInProgress,
            SMP_REASON_CROSS_TRANSPORT_KEY_NOT_ALLOWED => {
                PairingFailedReason::CrossTransportKeyDerivationNotAllowed
            }
            _ => PairingFailedReason::Unspecified,
        }
    }
}

impl fmt::Display for PairingFailedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PairingFailedReason::PasskeyEntryFailed => "passkey entry failed",
            PairingFailedReason::OobNotAvailable => "OOB data not available",
            PairingFailedReason::AuthReqNotMet => "authentication requirements not met",
            PairingFailedReason::ConfirmValueMismatch => "confirm value failed",
            PairingFailedReason::PairingNotSupported => "pairing not supported",
            PairingFailedReason::EncryptionKeySizeInsufficient => {
                "encryption key size insufficient"
            }
            PairingFailedReason::CommandNotSupported => "command not supported",
            PairingFailedReason::Unspecified => "unspecified reason",
            PairingFailedReason::RepeatedAttempts => "repeated attempts",
            PairingFailedReason::InvalidParameters => "invalid parameters",
            PairingFailedReason::DhKeyCheckFailed => "DHKey check failed",
            PairingFailedReason::NumericComparisonFailed => "numeric comparison failed",
            PairingFailedReason::BrEdrPairingInProgress => "BR/EDR pairing in progress",
            PairingFailedReason::CrossTransportKeyDerivationNotAllowed => {
                "cross-transport key derivation not allowed"
            }
            PairingFailedReason::LocalKeyFailure => "local key failure",
        };
        write!(f, "{} (0x{:02x})", text, self.wire_code())
    }
}

/// SMP Error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmpError {
    #[error("Pairing failed: {0}")]
    Pairing(PairingFailedReason),

    #[error("Remote reported pairing failure: {0}")]
    RemoteFailure(PairingFailedReason),

    #[error("Malformed SMP PDU")]
    InvalidPdu,

    #[error("Unexpected SMP command 0x{0:02x}")]
    UnexpectedCommand(u8),

    #[error("SMP command 0x{0:02x} not supported")]
    CommandNotSupported(u8),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Illegal state transition {from:?} -> {to:?}")]
    InvalidTransition { from: PairingState, to: PairingState },

    #[error("Invalid state for operation")]
    InvalidState,

    #[error("Pairing already in progress on this connection")]
    PairingInProgress,

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation timeout")]
    Timeout,
}

impl SmpError {
    /// Reason to report when this error terminates a pairing
    pub fn failure_reason(&self) -> PairingFailedReason {
        match self {
            SmpError::Pairing(reason) | SmpError::RemoteFailure(reason) => *reason,
            SmpError::InvalidPdu => PairingFailedReason::InvalidParameters,
            SmpError::CommandNotSupported(_) => PairingFailedReason::CommandNotSupported,
            SmpError::Crypto(_) => PairingFailedReason::LocalKeyFailure,
            SmpError::UnexpectedCommand(_)
            | SmpError::InvalidTransition { .. }
            | SmpError::InvalidState
            | SmpError::PairingInProgress
            | SmpError::ConnectionNotFound
            | SmpError::Transport(_)
            | SmpError::Timeout => PairingFailedReason::Unspecified,
        }
    }

    /// Whether the failure came from a Pairing Failed PDU sent by the peer
    pub fn is_remote(&self) -> bool {
        matches!(self, SmpError::RemoteFailure(_))
    }
}

impl From<PairingFailedReason> for SmpError {
    fn from(reason: PairingFailedReason) -> Self {
        SmpError::Pairing(reason)
    }
}

/// Result type for SMP operations
pub type SmpResult<T> = Result<T, SmpError>;

/// IO Capability types for pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoCapability {
    /// Display only capability
    DisplayOnly,
    /// Display with yes/no capability
    DisplayYesNo,
    /// Keyboard only
    KeyboardOnly,
    /// No input, no output
    NoInputNoOutput,
    /// Both keyboard and display
    KeyboardDisplay,
}

impl IoCapability {
    pub const ALL: [IoCapability; 5] = [
        IoCapability::DisplayOnly,
        IoCapability::DisplayYesNo,
        IoCapability::KeyboardOnly,
        IoCapability::NoInputNoOutput,
        IoCapability::KeyboardDisplay,
    ];

    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        match self {
            IoCapability::DisplayOnly => SMP_IO_CAPABILITY_DISPLAY_ONLY,
            IoCapability::DisplayYesNo => SMP_IO_CAPABILITY_DISPLAY_YES_NO,
            IoCapability::KeyboardOnly => SMP_IO_CAPABILITY_KEYBOARD_ONLY,
            IoCapability::NoInputNoOutput => SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT,
            IoCapability::KeyboardDisplay => SMP_IO_CAPABILITY_KEYBOARD_DISPLAY,
        }
    }

    /// Convert from u8 value from protocol
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SMP_IO_CAPABILITY_DISPLAY_ONLY => Some(IoCapability::DisplayOnly),
            SMP_IO_CAPABILITY_DISPLAY_YES_NO => Some(IoCapability::DisplayYesNo),
            SMP_IO_CAPABILITY_KEYBOARD_ONLY => Some(IoCapability::KeyboardOnly),
            SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT => Some(IoCapability::NoInputNoOutput),
            SMP_IO_CAPABILITY_KEYBOARD_DISPLAY => Some(IoCapability::KeyboardDisplay),
            _ => None,
        }
    }
}

impl fmt::Display for IoCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoCapability::DisplayOnly => write!(f, "Display Only"),
            IoCapability::DisplayYesNo => write!(f, "Display Yes/No"),
            IoCapability::KeyboardOnly => write!(f, "Keyboard Only"),
            IoCapability::NoInputNoOutput => write!(f, "No Input No Output"),
            IoCapability::KeyboardDisplay => write!(f, "Keyboard Display"),
        }
    }
}

/// Association model selected for a pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PairingType {
    /// Not negotiated yet
    #[default]
    Uninitialized,
    /// No user interaction, unauthenticated
    JustWorks,
    /// Initiator enters the passkey shown by the responder
    PasskeyInitiatorInputs,
    /// Responder enters the passkey shown by the initiator
    PasskeyResponderInputs,
    /// Both sides enter the same passkey
    PasskeyBothInputs,
    /// Out of band data
    Oob,
    /// User confirms matching six-digit values (Secure Connections only)
    NumericComparison,
}

impl PairingType {
    pub fn is_passkey(&self) -> bool {
        matches!(
            self,
            PairingType::PasskeyInitiatorInputs
                | PairingType::PasskeyResponderInputs
                | PairingType::PasskeyBothInputs
        )
    }

    /// Whether the model protects against a man-in-the-middle
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, PairingType::JustWorks | PairingType::Uninitialized)
    }

    /// Whether the local side must type the passkey in
    pub fn local_inputs_passkey(&self, role: PairingRole) -> bool {
        match self {
            PairingType::PasskeyBothInputs => true,
            PairingType::PasskeyInitiatorInputs => role == PairingRole::Initiator,
            PairingType::PasskeyResponderInputs => role == PairingRole::Responder,
            _ => false,
        }
    }
}

impl fmt::Display for PairingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingType::Uninitialized => write!(f, "Uninitialized"),
            PairingType::JustWorks => write!(f, "Just Works"),
            PairingType::PasskeyInitiatorInputs => write!(f, "Passkey Entry (initiator inputs)"),
            PairingType::PasskeyResponderInputs => write!(f, "Passkey Entry (responder inputs)"),
            PairingType::PasskeyBothInputs => write!(f, "Passkey Entry (both input)"),
            PairingType::Oob => write!(f, "Out of Band"),
            PairingType::NumericComparison => write!(f, "Numeric Comparison"),
        }
    }
}

/// Authentication requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthRequirements {
    /// Whether bonding is required
    pub bonding: bool,
    /// Whether MITM protection is required
    pub mitm: bool,
    /// Whether Secure Connections is supported
    pub secure_connections: bool,
    /// Whether keypress notifications are supported
    pub keypress_notifications: bool,
    /// Whether the h7 CT2 function is supported
    pub ct2: bool,
}

impl AuthRequirements {
    /// Create new authentication requirements
    pub fn new(bonding: bool, mitm: bool, secure_connections: bool) -> Self {
        Self {
            bonding,
            mitm,
            secure_connections,
            keypress_notifications: false,
            ct2: false,
        }
    }

    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        let mut value = 0;

        if self.bonding {
            value |= SMP_AUTH_REQ_BONDING;
        }

        if self.mitm {
            value |= SMP_AUTH_REQ_MITM;
        }

        if self.secure_connections {
            value |= SMP_AUTH_REQ_SC;
        }

        if self.keypress_notifications {
            value |= SMP_AUTH_REQ_KEYPRESS;
        }

        if self.ct2 {
            value |= SMP_AUTH_REQ_CT2;
        }

        value
    }

    /// Convert from u8 value from protocol. RFU bits are ignored.
    pub fn from_u8(value: u8) -> Self {
        Self {
            bonding: (value & SMP_AUTH_REQ_BONDING_MASK) == SMP_AUTH_REQ_BONDING,
            mitm: (value & SMP_AUTH_REQ_MITM) != 0,
            secure_connections: (value & SMP_AUTH_REQ_SC) != 0,
            keypress_notifications: (value & SMP_AUTH_REQ_KEYPRESS) != 0,
            ct2: (value & SMP_AUTH_REQ_CT2) != 0,
        }
    }
}

bitflags! {
    /// Key distribution field of the Pairing Request/Response
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyDistribution: u8 {
        /// LTK, EDIV and RAND (ignored under Secure Connections)
        const ENC_KEY = SMP_KEY_DIST_ENC_KEY;
        /// IRK and identity address
        const ID_KEY = SMP_KEY_DIST_ID_KEY;
        /// CSRK
        const SIGN_KEY = SMP_KEY_DIST_SIGN_KEY;
        /// BR/EDR link key derivation, parsed and echoed only
        const LINK_KEY = SMP_KEY_DIST_LINK_KEY;
    }
}

impl KeyDistribution {
    /// Keys this engine can actually distribute over LE
    pub fn le_keys() -> Self {
        KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY | KeyDistribution::SIGN_KEY
    }
}

bitflags! {
    /// Security properties reached by a pairing
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AuthState: u8 {
        /// MITM-protected association model was used
        const AUTHENTICATED = 0x01;
        /// Both sides asked for bonding
        const BONDING = 0x02;
        /// LE Secure Connections was used
        const SECURE_CONNECTION = 0x04;
    }
}

impl AuthState {
    /// Security level of a link encrypted with keys of this pairing
    pub fn security_level(&self) -> SecurityLevel {
        if self.contains(AuthState::SECURE_CONNECTION | AuthState::AUTHENTICATED) {
            SecurityLevel::SecureConnections
        } else if self.contains(AuthState::AUTHENTICATED) {
            SecurityLevel::EncryptionWithAuthentication
        } else {
            SecurityLevel::EncryptionOnly
        }
    }
}

/// SMP OOB (Out of Band) data
#[derive(Debug, Clone, Default, PartialEq, Eq, Zeroize)]
pub struct OobData {
    /// Random value (r); the legacy TK when no confirm value is used
    pub r: [u8; 16],
    /// Confirm value (c = f4(PKx, PKx, r, 0))
    pub c: [u8; 16],
}

impl OobData {
    /// Legacy OOB pairing carries only a 128-bit TK
    pub fn legacy(tk: [u8; 16]) -> Self {
        Self { r: tk, c: [0; 16] }
    }
}

/// Pairing Role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingRole {
    /// Initiator of the pairing (typically Central device)
    Initiator,
    /// Responder to pairing (typically Peripheral device)
    Responder,
}

impl fmt::Display for PairingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingRole::Initiator => write!(f, "initiator"),
            PairingRole::Responder => write!(f, "responder"),
        }
    }
}

/// Security level for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// Encryption without authentication (Just Works)
    EncryptionOnly = 1,
    /// Encryption with authentication (MITM protection)
    EncryptionWithAuthentication = 2,
    /// Secure Connections with encryption and authentication
    SecureConnections = 3,
}

/// Keypress notification type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypressNotificationType {
    /// Entry started
    EntryStarted,
    /// Digit entered
    DigitEntered,
    /// Digit erased
    DigitErased,
    /// Cleared
    Cleared,
    /// Entry completed
    EntryCompleted,
}

impl KeypressNotificationType {
    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        match self {
            KeypressNotificationType::EntryStarted => SMP_KEYPRESS_ENTRY_STARTED,
            KeypressNotificationType::DigitEntered => SMP_KEYPRESS_DIGIT_ENTERED,
            KeypressNotificationType::DigitErased => SMP_KEYPRESS_DIGIT_ERASED,
            KeypressNotificationType::Cleared => SMP_KEYPRESS_CLEARED,
            KeypressNotificationType::EntryCompleted => SMP_KEYPRESS_ENTRY_COMPLETED,
        }
    }

    /// Convert from u8 value from protocol
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SMP_KEYPRESS_ENTRY_STARTED => Some(KeypressNotificationType::EntryStarted),
            SMP_KEYPRESS_DIGIT_ENTERED => Some(KeypressNotificationType::DigitEntered),
            SMP_KEYPRESS_DIGIT_ERASED => Some(KeypressNotificationType::DigitErased),
            SMP_KEYPRESS_CLEARED => Some(KeypressNotificationType::Cleared),
            SMP_KEYPRESS_ENTRY_COMPLETED => Some(KeypressNotificationType::EntryCompleted),
            _ => None,
        }
    }
}

/// Answer to a request made of the application
///
/// `Pending` means the answer will be supplied later through the matching
/// `SmpManager` reply method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserResponse<T> {
    Ready(T),
    Pending,
    Rejected,
}

/// Informational events reported to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpEvent {
    /// The peer sent a Security Request
    SecurityRequested {
        handle: ConnHandle,
        auth_req: AuthRequirements,
    },
    /// Pairing features were exchanged and an association model chosen
    PairingStarted {
        handle: ConnHandle,
        role: PairingRole,
        pairing_type: PairingType,
        secure_connections: bool,
    },
    /// The peer reported a keypress during passkey entry
    KeypressNotification {
        handle: ConnHandle,
        notification: KeypressNotificationType,
    },
    /// The peer distributed its identity
    IdentityReceived { handle: ConnHandle, identity: Address },
}

/// Final result of a pairing, as seen by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Success {
        auth_state: AuthState,
        keys: PairingKeys,
    },
    Failure(PairingFailedReason),
}

impl PairingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PairingOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_reason_wire_codes() {
        for code in 0x01..=0x0E {
            let reason = PairingFailedReason::from_wire(code);
            assert_eq!(reason.wire_code(), code);
        }
        assert_eq!(PairingFailedReason::from_wire(0x7F), PairingFailedReason::Unspecified);
        assert_eq!(PairingFailedReason::LocalKeyFailure.wire_code(), 0x08);
        assert_eq!(
            PairingFailedReason::from_wire(0x06),
            PairingFailedReason::EncryptionKeySizeInsufficient
        );
        assert_eq!(
            PairingFailedReason::from_wire(0x0E),
            PairingFailedReason::CrossTransportKeyDerivationNotAllowed
        );
    }

    #[test]
    fn test_error_failure_reason() {
        assert_eq!(
            SmpError::from(CryptoError::KeyGeneration).failure_reason(),
            PairingFailedReason::LocalKeyFailure
        );
        assert_eq!(SmpError::InvalidPdu.failure_reason(), PairingFailedReason::InvalidParameters);
        assert_eq!(
            SmpError::UnexpectedCommand(SMP_PAIRING_RANDOM).failure_reason(),
            PairingFailedReason::Unspecified
        );
        assert!(SmpError::RemoteFailure(PairingFailedReason::Unspecified).is_remote());
    }

    #[test]
    fn test_auth_requirements_conversion() {
        let auth = AuthRequirements::from_u8(0x0D);
        assert!(auth.bonding);
        assert!(auth.mitm);
        assert!(auth.secure_connections);
        assert!(!auth.keypress_notifications);
        assert_eq!(auth.to_u8(), 0x0D);

        // RFU bits and reserved bonding values are dropped
        let auth = AuthRequirements::from_u8(0xC3);
        assert!(!auth.bonding);
        assert_eq!(auth.to_u8(), 0x00);
    }

    #[test]
    fn test_key_distribution_bits() {
        let dist = KeyDistribution::from_bits_truncate(0xF5);
        assert!(dist.contains(KeyDistribution::ENC_KEY));
        assert!(!dist.contains(KeyDistribution::ID_KEY));
        assert!(dist.contains(KeyDistribution::SIGN_KEY));
        assert_eq!(dist.bits(), 0x05);
    }

    #[test]
    fn test_auth_state_security_level() {
        assert_eq!(AuthState::empty().security_level(), SecurityLevel::EncryptionOnly);
        assert_eq!(
            AuthState::AUTHENTICATED.security_level(),
            SecurityLevel::EncryptionWithAuthentication
        );
        assert_eq!(
            (AuthState::AUTHENTICATED | AuthState::SECURE_CONNECTION).security_level(),
            SecurityLevel::SecureConnections
        );
    }
}
