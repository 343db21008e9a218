//! # Dispute
//!
//! The on-chain fallback when cooperation stops. The participant who
//! stopped hearing from their counterparty runs the [`challenger`] side;
//! the participant a challenge is raised against runs the [`responder`]
//! side. Neither side ever self-declares a timeout: expiry arrives as an
//! adjudicator event or not at all.

pub mod challenger;
pub mod responder;

pub use challenger::Challenger;
pub use responder::Responder;

use crate::actions::ProtocolAction;
use crate::shared_data::SharedData;

/// Which dispute role a channel's process is currently playing.
#[derive(Debug, Clone)]
pub enum Dispute {
    Challenger(Challenger),
    Responder(Responder),
}

impl Dispute {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Challenger(c) => c.is_terminal(),
            Self::Responder(r) => r.is_terminal(),
        }
    }

    /// A terminal dispute either left the channel open (a response landed)
    /// or closed it (the challenge expired).
    pub fn channel_closed(&self) -> bool {
        match self {
            Self::Challenger(c) => matches!(c, Challenger::SuccessClosed { .. }),
            Self::Responder(r) => matches!(
                r,
                Responder::Failure {
                    reason: responder::ResponderFailureReason::TimedOut,
                    ..
                }
            ),
        }
    }
}

pub fn reduce(state: Dispute, shared: &mut SharedData, action: &ProtocolAction) -> Dispute {
    match state {
        Dispute::Challenger(inner) => Dispute::Challenger(challenger::reduce(inner, shared, action)),
        Dispute::Responder(inner) => Dispute::Responder(responder::reduce(inner, shared, action)),
    }
}
