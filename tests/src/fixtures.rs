//! Shared scenario builders: deterministic keys, two-party channels, and
//! stores populated with a complete setup history.

use primitive_types::U256;
use shared_crypto::PrivateKey;
use shared_types::{Channel, ChannelId, Commitment, CommitmentType};

use fm_protocols::shared_data::{ChannelKind, SharedData};

pub fn create_keys() -> (PrivateKey, PrivateKey) {
    (
        PrivateKey::from_bytes([1u8; 32]).unwrap(),
        PrivateKey::from_bytes([2u8; 32]).unwrap(),
    )
}

pub fn create_channel(key_a: &PrivateKey, key_b: &PrivateKey, nonce: u64) -> Channel {
    Channel::new(
        [0xaa; 20],
        U256::from(nonce),
        vec![key_a.address(), key_b.address()],
    )
    .unwrap()
}

pub fn create_prefund(channel: &Channel, allocation: Vec<U256>, app_attributes: Vec<u8>) -> Commitment {
    Commitment {
        channel: channel.clone(),
        turn_num: 0,
        commitment_count: 0,
        allocation,
        destination: vec![channel.participants[0], channel.participants[1]],
        commitment_type: CommitmentType::PreFundSetup,
        app_attributes,
    }
}

/// Both stores with the four setup commitments (pre-fund and post-fund
/// rounds) signed by their movers and verified by the counterparty.
pub fn create_funded_pair(
    key_a: PrivateKey,
    key_b: PrivateKey,
    allocation: Vec<U256>,
    app_attributes: Vec<u8>,
    kind: ChannelKind,
) -> (SharedData, SharedData, ChannelId) {
    let channel = create_channel(&key_a, &key_b, 42);
    let channel_id = channel.id();
    let keys = [key_a.clone(), key_b.clone()];
    let mut shared_a = SharedData::new(key_a);
    let mut shared_b = SharedData::new(key_b);

    let base = create_prefund(&channel, allocation, app_attributes);
    for (turn, count, commitment_type) in [
        (0, 0, CommitmentType::PreFundSetup),
        (1, 1, CommitmentType::PreFundSetup),
        (2, 0, CommitmentType::PostFundSetup),
        (3, 1, CommitmentType::PostFundSetup),
    ] {
        let commitment = Commitment {
            turn_num: turn,
            commitment_count: count,
            commitment_type,
            ..base.clone()
        };
        let mover = (turn % 2) as usize;
        let signature = keys[mover].sign(&commitment.encode().unwrap()).unwrap();
        let signed = shared_types::SignedCommitment {
            commitment,
            signature: signature.0,
        };
        for (index, shared) in [&mut shared_a, &mut shared_b].into_iter().enumerate() {
            let result = if turn == 0 {
                if index == mover {
                    shared
                        .sign_and_initialize(signed.commitment.clone(), kind)
                        .map(|_| ())
                } else {
                    shared.check_and_initialize(signed.clone(), kind)
                }
            } else if index == mover {
                shared.sign_and_store(signed.commitment.clone()).map(|_| ())
            } else {
                shared.check_and_store(signed.clone())
            };
            result.unwrap();
        }
    }
    (shared_a, shared_b, channel_id)
}
