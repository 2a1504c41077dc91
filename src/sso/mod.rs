//! Ticket protocol and ephemeral login state.

pub mod clock;
pub mod counter;
pub mod gate;
pub mod store;
pub mod sweeper;
pub mod ticket;

pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::ManualClock;
pub use gate::{GateConfig, GateState, TwoFactorGate};
pub use store::{ForbiddenStore, SessionStore, StoreError, TrustIpStore};
pub use sweeper::SweeperSet;
pub use ticket::{Fingerprint, TicketCodec, TicketError, VerifyMode};
