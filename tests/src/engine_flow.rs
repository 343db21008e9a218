//! Two full orchestrators driving a channel from opening to cooperative
//! conclusion, with every commitment crossing the wire as a real message.

use primitive_types::U256;
use shared_types::{Commitment, CommitmentType};

use fm_engine::orchestrator::{Effects, EngineRequest, Orchestrator};
use fm_engine::process::ProcessState;
use fm_protocols::{MessagePayload, OutboundMessage, ProtocolAction};

use crate::fixtures::{create_channel, create_keys, create_prefund};

/// Hand a wire message to the recipient's process, as its transport would.
fn deliver(orchestrator: &mut Orchestrator, process_id: &str, message: &OutboundMessage) -> Effects {
    assert_eq!(message.recipient, orchestrator.address());
    match &message.payload {
        MessagePayload::Commitments {
            protocol_locator,
            signed_commitments,
        } => orchestrator.dispatch(ProtocolAction::CommitmentsReceived {
            process_id: process_id.to_string(),
            protocol_locator: protocol_locator.clone(),
            signed_commitments: signed_commitments.clone(),
        }),
        other => panic!("unexpected payload: {other:?}"),
    }
}

/// Open an application channel across both engines and finish the setup
/// rounds. Returns the two process ids and the opening commitment.
fn open_channel(a: &mut Orchestrator, b: &mut Orchestrator) -> (String, String, Commitment) {
    let (pid_a, _) = a.handle_request(EngineRequest::InitializeChannel);
    let (pid_b, _) = b.handle_request(EngineRequest::InitializeChannel);

    let channel = create_channel_for(a, b);
    let opening = create_prefund(&channel, vec![U256::from(5), U256::from(5)], vec![]);

    // Turn 0: A signs and relays.
    let effects = a.dispatch(ProtocolAction::OwnCommitment {
        process_id: pid_a.clone(),
        commitment: opening.clone(),
    });
    deliver(b, &pid_b, &effects.messages[0]);

    // Turns 1..=3 alternate movers, each relaying the full history.
    let mut latest = opening.clone();
    for _ in 1..=3 {
        latest = latest.next_setup().unwrap();
        let (mover, mover_pid, other, other_pid) = if latest.turn_num % 2 == 0 {
            (&mut *a, &pid_a, &mut *b, &pid_b)
        } else {
            (&mut *b, &pid_b, &mut *a, &pid_a)
        };
        let effects = mover.dispatch(ProtocolAction::OwnCommitment {
            process_id: mover_pid.clone(),
            commitment: latest.clone(),
        });
        deliver(other, other_pid, &effects.messages[0]);
    }
    (pid_a, pid_b, opening)
}

fn create_channel_for(a: &Orchestrator, b: &Orchestrator) -> shared_types::Channel {
    let (key_a, key_b) = create_keys();
    assert_eq!(key_a.address(), a.address());
    assert_eq!(key_b.address(), b.address());
    create_channel(&key_a, &key_b, 42)
}

fn create_engines() -> (Orchestrator, Orchestrator) {
    let (key_a, key_b) = create_keys();
    (Orchestrator::new(key_a), Orchestrator::new(key_b))
}

#[test]
fn test_channel_opens_across_two_engines() {
    let (mut a, mut b) = create_engines();
    let (pid_a, pid_b, opening) = open_channel(&mut a, &mut b);
    let channel_id = opening.channel_id();

    for (engine, pid) in [(&a, &pid_a), (&b, &pid_b)] {
        assert!(matches!(
            engine.process(pid),
            Some(ProcessState::Application(_))
        ));
        let state = engine.shared().channel(&channel_id).unwrap();
        assert_eq!(state.turn_num(), Some(3));
        assert_eq!(
            state.last_commitment().unwrap().commitment.commitment_type,
            CommitmentType::PostFundSetup
        );
    }
}

#[test]
fn test_cooperative_conclusion() {
    let (mut a, mut b) = create_engines();
    let (_, _, opening) = open_channel(&mut a, &mut b);
    let channel_id = opening.channel_id();

    // A starts the conclude round; turn 4 is its move, so the commitment
    // goes out immediately.
    let (pid_a, effects) = a.handle_request(EngineRequest::ConcludeRequested { channel_id });
    assert_eq!(effects.messages.len(), 1);

    // B joins the round, countersigns turn 5, and relays back.
    let (pid_b, _) = b.handle_request(EngineRequest::ConcludeRequested { channel_id });
    let effects = deliver(&mut b, &pid_b, &effects.messages[0]);
    assert!(b.process(&pid_b).is_none());
    assert_eq!(effects.messages.len(), 1);

    let effects = deliver(&mut a, &pid_a, &effects.messages[0]);
    assert!(effects.is_empty());
    assert!(a.process(&pid_a).is_none());

    for engine in [&a, &b] {
        let state = engine.shared().channel(&channel_id).unwrap();
        let last = state.last_commitment().unwrap();
        assert_eq!(last.commitment.commitment_type, CommitmentType::Conclude);
        assert_eq!(last.commitment.turn_num, 5);
        assert_eq!(last.commitment.commitment_count, 1);
    }
}

#[test]
fn test_chain_conclusion_finishes_the_application_process() {
    let (mut a, mut b) = create_engines();
    let (pid_a, _, opening) = open_channel(&mut a, &mut b);
    let channel_id = opening.channel_id();

    a.dispatch(ProtocolAction::ConcludedEvent {
        process_id: "chain-watcher".into(),
        channel_id,
    });
    assert!(a.process(&pid_a).is_none());
    drop(b);
}
