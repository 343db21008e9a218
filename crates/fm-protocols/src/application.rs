//! Running application channel: commitment exchange after funding.
//!
//! The application layer produces moves; this machine signs and relays
//! them, absorbs opponent moves, and hands the channel to [`dispute`]
//! when cooperation stops. A completed conclude round or an on-chain
//! conclusion closes it out.
//!
//! [`dispute`]: crate::dispute

use shared_types::{ChannelId, CommitmentType, SignedCommitment};
use tracing::{debug, info, warn};

use crate::actions::ProtocolAction;
use crate::dispute::{self, challenger, responder, Dispute};
use crate::locator::ProtocolLocator;
use crate::shared_data::{ChallengeRecord, ChannelKind, SharedData, StoreError};

#[derive(Debug, Clone)]
pub enum Application {
    /// Channel not yet registered; the first pre-fund commitment may be
    /// ours or the opponent's.
    WaitForFirstCommitment { process_id: String },
    Ongoing {
        process_id: String,
        channel_id: ChannelId,
    },
    WaitForDispute {
        process_id: String,
        channel_id: ChannelId,
        dispute: Dispute,
    },
    Success {
        channel_id: ChannelId,
    },
}

impl Application {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Self::WaitForFirstCommitment { .. } => None,
            Self::Ongoing { channel_id, .. }
            | Self::WaitForDispute { channel_id, .. }
            | Self::Success { channel_id } => Some(*channel_id),
        }
    }
}

pub fn initialize(process_id: &str) -> Application {
    Application::WaitForFirstCommitment {
        process_id: process_id.to_string(),
    }
}

pub fn reduce(state: Application, shared: &mut SharedData, action: &ProtocolAction) -> Application {
    match (state, action) {
        (
            Application::WaitForFirstCommitment { process_id },
            ProtocolAction::OwnCommitment { commitment, .. },
        ) => match shared.sign_and_initialize(commitment.clone(), ChannelKind::Application) {
            Ok(_) => {
                let channel_id = commitment.channel_id();
                shared.subscribe(channel_id, process_id.clone());
                relay(&channel_id, &process_id, shared);
                Application::Ongoing {
                    process_id,
                    channel_id,
                }
            }
            Err(e) => {
                warn!(error = %e, "opening commitment rejected");
                Application::WaitForFirstCommitment { process_id }
            }
        },
        (
            Application::WaitForFirstCommitment { process_id },
            ProtocolAction::OpponentCommitment {
                commitment,
                signature,
                ..
            },
        ) => {
            let signed = SignedCommitment {
                commitment: commitment.clone(),
                signature: *signature,
            };
            match shared.check_and_initialize(signed, ChannelKind::Application) {
                Ok(()) => {
                    let channel_id = commitment.channel_id();
                    shared.subscribe(channel_id, process_id.clone());
                    Application::Ongoing {
                        process_id,
                        channel_id,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "opponent opening commitment rejected");
                    Application::WaitForFirstCommitment { process_id }
                }
            }
        }
        (
            Application::Ongoing {
                process_id,
                channel_id,
            },
            ProtocolAction::OwnCommitment { commitment, .. },
        ) => match shared.sign_and_store(commitment.clone()) {
            Ok(_) => {
                relay(&channel_id, &process_id, shared);
                after_move(process_id, channel_id, shared)
            }
            Err(e) => {
                warn!(error = %e, "own commitment rejected");
                Application::Ongoing {
                    process_id,
                    channel_id,
                }
            }
        },
        (
            Application::Ongoing {
                process_id,
                channel_id,
            },
            ProtocolAction::OpponentCommitment {
                commitment,
                signature,
                ..
            },
        ) => {
            let signed = SignedCommitment {
                commitment: commitment.clone(),
                signature: *signature,
            };
            match shared.check_and_store(signed) {
                Ok(()) => {}
                Err(StoreError::StaleTurnNum { received, stored }) => {
                    debug!(received, stored, "redelivered commitment skipped");
                }
                Err(e) => warn!(error = %e, "opponent commitment rejected"),
            }
            after_move(process_id, channel_id, shared)
        }
        (
            Application::WaitForFirstCommitment { process_id },
            ProtocolAction::CommitmentsReceived {
                signed_commitments, ..
            },
        ) => {
            let Some(first) = signed_commitments.first() else {
                return Application::WaitForFirstCommitment { process_id };
            };
            let channel_id = first.commitment.channel_id();
            if let Err(e) =
                shared.check_and_initialize(first.clone(), ChannelKind::Application)
            {
                warn!(error = %e, "opponent opening commitment rejected");
                return Application::WaitForFirstCommitment { process_id };
            }
            shared.subscribe(channel_id, process_id.clone());
            store_relayed(&signed_commitments[1..], shared);
            after_move(process_id, channel_id, shared)
        }
        (
            Application::Ongoing {
                process_id,
                channel_id,
            },
            ProtocolAction::CommitmentsReceived {
                signed_commitments, ..
            },
        ) => {
            store_relayed(signed_commitments, shared);
            after_move(process_id, channel_id, shared)
        }
        (
            Application::Ongoing {
                process_id,
                channel_id,
            },
            ProtocolAction::ChallengeRequested { .. },
        ) => {
            let dispute = Dispute::Challenger(challenger::initialize(
                &process_id,
                channel_id,
                shared,
            ));
            Application::WaitForDispute {
                process_id,
                channel_id,
                dispute,
            }
        }
        (
            Application::Ongoing {
                process_id,
                channel_id,
            },
            ProtocolAction::ChallengeRegisteredEvent {
                challenge_commitment,
                expires_at,
                ..
            },
        ) => {
            let dispute = Dispute::Responder(responder::initialize(
                &process_id,
                channel_id,
                ChallengeRecord {
                    challenge_commitment: challenge_commitment.clone(),
                    expires_at: *expires_at,
                },
                shared,
            ));
            Application::WaitForDispute {
                process_id,
                channel_id,
                dispute,
            }
        }
        (Application::Ongoing { channel_id, .. }, ProtocolAction::ConcludedEvent { .. }) => {
            info!(channel_id = %hex::encode(channel_id), "channel concluded on chain");
            Application::Success { channel_id }
        }
        (
            Application::WaitForDispute {
                process_id,
                channel_id,
                dispute,
            },
            action,
        ) => {
            let dispute = dispute::reduce(dispute, shared, action);
            if !dispute.is_terminal() {
                return Application::WaitForDispute {
                    process_id,
                    channel_id,
                    dispute,
                };
            }
            if dispute.channel_closed() {
                Application::Success { channel_id }
            } else {
                Application::Ongoing {
                    process_id,
                    channel_id,
                }
            }
        }
        (state, action) => {
            warn!(process_id = action.process_id(), "application ignored action");
            state
        }
    }
}

/// Store a relayed history slice, skipping what we already hold.
fn store_relayed(signed_commitments: &[SignedCommitment], shared: &mut SharedData) {
    for signed in signed_commitments {
        match shared.check_and_store(signed.clone()) {
            Ok(()) => {}
            Err(StoreError::StaleTurnNum { received, stored }) => {
                debug!(received, stored, "redelivered commitment skipped");
            }
            Err(e) => warn!(error = %e, "opponent commitment rejected"),
        }
    }
}

fn relay(channel_id: &ChannelId, process_id: &str, shared: &mut SharedData) {
    if let Err(e) = shared.send_commitments(channel_id, process_id, ProtocolLocator::empty()) {
        warn!(error = %e, "could not relay commitments");
    }
}

/// Success once a full conclude round sits at the top of the history.
fn after_move(
    process_id: String,
    channel_id: ChannelId,
    shared: &SharedData,
) -> Application {
    let concluded = shared
        .channel(&channel_id)
        .ok()
        .and_then(|state| {
            let last = state.last_commitment()?;
            Some(
                last.commitment.commitment_type == CommitmentType::Conclude
                    && last.commitment.commitment_count
                        == state.channel.num_participants() as u32 - 1,
            )
        })
        .unwrap_or(false);
    if concluded {
        Application::Success { channel_id }
    } else {
        Application::Ongoing {
            process_id,
            channel_id,
        }
    }
}
