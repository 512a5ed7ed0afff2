//! Association model selection
//!
//! Picks the pairing type from both sides' Pairing Request/Response
//! parameters following the IO capability mapping of the Bluetooth Core
//! Specification (Vol 3, Part H, 2.3.5.1, Table 2.8).

use super::types::{IoCapability, PairingFailedReason, PairingType};

/// Everything the association model depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationInput {
    pub initiator_io: IoCapability,
    pub responder_io: IoCapability,
    pub initiator_oob: bool,
    pub responder_oob: bool,
    pub initiator_mitm: bool,
    pub responder_mitm: bool,
    /// Both sides set the Secure Connections bit
    pub secure_connections: bool,
    /// The local side holds the OOB data it would need if OOB is selected
    pub local_oob_available: bool,
    /// The local side refuses unauthenticated pairing
    pub authenticated_only: bool,
}

/// Select the pairing type, or the reason pairing cannot proceed
pub fn select_pairing_type(input: &NegotiationInput) -> Result<PairingType, PairingFailedReason> {
    let oob = if input.secure_connections {
        input.initiator_oob || input.responder_oob
    } else {
        input.initiator_oob && input.responder_oob
    };

    let pairing_type = if oob {
        if !input.local_oob_available {
            return Err(PairingFailedReason::OobNotAvailable);
        }
        PairingType::Oob
    } else if !input.initiator_mitm && !input.responder_mitm {
        PairingType::JustWorks
    } else {
        io_capability_mapping(
            input.initiator_io,
            input.responder_io,
            input.secure_connections,
        )
    };

    if pairing_type == PairingType::JustWorks && input.authenticated_only {
        return Err(PairingFailedReason::AuthReqNotMet);
    }

    Ok(pairing_type)
}

/// IO capability mapping when MITM protection is requested
pub fn io_capability_mapping(
    initiator: IoCapability,
    responder: IoCapability,
    secure_connections: bool,
) -> PairingType {
    use IoCapability::*;
    use PairingType::*;

    // Legacy fallback of the cells where Secure Connections uses Numeric
    // Comparison
    let nc_or = |legacy: PairingType| {
        if secure_connections {
            NumericComparison
        } else {
            legacy
        }
    };

    match (responder, initiator) {
        (NoInputNoOutput, _) | (_, NoInputNoOutput) => JustWorks,

        (DisplayOnly, DisplayOnly | DisplayYesNo) => JustWorks,
        (DisplayOnly, KeyboardOnly | KeyboardDisplay) => PasskeyInitiatorInputs,

        (DisplayYesNo, DisplayOnly) => JustWorks,
        (DisplayYesNo, DisplayYesNo) => nc_or(JustWorks),
        (DisplayYesNo, KeyboardOnly) => PasskeyInitiatorInputs,
        (DisplayYesNo, KeyboardDisplay) => nc_or(PasskeyInitiatorInputs),

        (KeyboardOnly, DisplayOnly | DisplayYesNo | KeyboardDisplay) => PasskeyResponderInputs,
        (KeyboardOnly, KeyboardOnly) => PasskeyBothInputs,

        (KeyboardDisplay, DisplayOnly) => PasskeyResponderInputs,
        (KeyboardDisplay, DisplayYesNo) => nc_or(PasskeyResponderInputs),
        (KeyboardDisplay, KeyboardOnly) => PasskeyInitiatorInputs,
        (KeyboardDisplay, KeyboardDisplay) => nc_or(PasskeyInitiatorInputs),
    }
}
