//! Security Manager Protocol (SMP) pairing engine
//!
//! This module implements LE pairing:
//! - LE legacy pairing (Just Works, Passkey Entry, OOB)
//! - LE Secure Connections (Just Works, Numeric Comparison, Passkey Entry, OOB)
//! - Key distribution and bonding
//!
//! [`SmpManager`] is the entry point. It is driven by the embedder through
//! [`SmpTransport`] and [`PairingDelegate`].

pub mod constants;
pub mod crypto;
pub mod ecc;
pub mod pdu;
pub mod state;

mod config;
mod initiator;
mod keydist;
mod keys;
mod manager;
mod negotiation;
mod responder;
mod role;
mod session;
mod types;


// Re-export public API
pub use self::config::{LocalIdentity, SmConfig};
pub use self::ecc::{DhKey, EccEngine, EccKeyPair, EccPoll, P256Engine, PublicKey};
pub use self::keys::*;
pub use self::manager::{PairingDelegate, SmpManager, SmpTransport};
pub use self::negotiation::{io_capability_mapping, select_pairing_type, NegotiationInput};
pub use self::pdu::{PairingParams, SmpPdu};
pub use self::state::PairingState;
pub use self::types::*;
