use alloy_primitives::B256;
use alloy_rlp::{BufMut, Decodable, Encodable, Header, RlpDecodable, RlpEncodable};

use crate::{BlockIdx, Epoch, EventLocator, ValidatorId};

/// A validator's vote on a light-client record: the hash of a block's or an epoch's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct LlrVote {
    /// Voting validator.
    pub validator: ValidatorId,
    /// Epoch the vote was cast in.
    pub epoch: Epoch,
    /// Voted hash.
    pub hash: B256,
}

/// Evidence of validator misbehaviour carried by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MisbehaviourProof {
    /// Two distinct events with the same creator, epoch and sequence number.
    EventsDoublesign {
        /// The conflicting events.
        pair: [EventLocator; 2],
    },
    /// Two different votes of one validator for the same block.
    BlockVoteDoublesign {
        /// Voted block.
        block: BlockIdx,
        /// The conflicting votes.
        pair: [LlrVote; 2],
    },
    /// Votes for a block that disagree with its decided result.
    WrongBlockVote {
        /// Voted block.
        block: BlockIdx,
        /// The wrong votes. Every voter is an accomplice.
        pals: Vec<LlrVote>,
    },
    /// Two different votes of one validator for the same epoch.
    EpochVoteDoublesign {
        /// Voted epoch.
        epoch: Epoch,
        /// The conflicting votes.
        pair: [LlrVote; 2],
    },
    /// Votes for an epoch that disagree with its decided result.
    WrongEpochVote {
        /// Voted epoch.
        epoch: Epoch,
        /// The wrong votes. Every voter is an accomplice.
        pals: Vec<LlrVote>,
    },
}

impl MisbehaviourProof {
    const EVENTS_DOUBLESIGN: u8 = 0;
    const BLOCK_VOTE_DOUBLESIGN: u8 = 1;
    const WRONG_BLOCK_VOTE: u8 = 2;
    const EPOCH_VOTE_DOUBLESIGN: u8 = 3;
    const WRONG_EPOCH_VOTE: u8 = 4;

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Self::EventsDoublesign { pair } => {
                Self::EVENTS_DOUBLESIGN.encode(out);
                pair[0].encode(out);
                pair[1].encode(out);
            }
            Self::BlockVoteDoublesign { block, pair } => {
                Self::BLOCK_VOTE_DOUBLESIGN.encode(out);
                block.encode(out);
                pair[0].encode(out);
                pair[1].encode(out);
            }
            Self::WrongBlockVote { block, pals } => {
                Self::WRONG_BLOCK_VOTE.encode(out);
                block.encode(out);
                pals.encode(out);
            }
            Self::EpochVoteDoublesign { epoch, pair } => {
                Self::EPOCH_VOTE_DOUBLESIGN.encode(out);
                epoch.encode(out);
                pair[0].encode(out);
                pair[1].encode(out);
            }
            Self::WrongEpochVote { epoch, pals } => {
                Self::WRONG_EPOCH_VOTE.encode(out);
                epoch.encode(out);
                pals.encode(out);
            }
        }
    }
}

/// Encoded as a list whose first item is the proof kind.
impl Encodable for MisbehaviourProof {
    fn encode(&self, out: &mut dyn BufMut) {
        let mut payload = Vec::new();
        self.encode_payload(&mut payload);
        Header { list: true, payload_length: payload.len() }.encode(out);
        out.put_slice(&payload);
    }
}

impl Decodable for MisbehaviourProof {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        if buf.len() < header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        let (mut body, rest) = buf.split_at(header.payload_length);
        *buf = rest;

        let body = &mut body;
        let proof = match u8::decode(body)? {
            Self::EVENTS_DOUBLESIGN => {
                Self::EventsDoublesign { pair: [Decodable::decode(body)?, Decodable::decode(body)?] }
            }
            Self::BLOCK_VOTE_DOUBLESIGN => Self::BlockVoteDoublesign {
                block: Decodable::decode(body)?,
                pair: [Decodable::decode(body)?, Decodable::decode(body)?],
            },
            Self::WRONG_BLOCK_VOTE => Self::WrongBlockVote {
                block: Decodable::decode(body)?,
                pals: Decodable::decode(body)?,
            },
            Self::EPOCH_VOTE_DOUBLESIGN => Self::EpochVoteDoublesign {
                epoch: Decodable::decode(body)?,
                pair: [Decodable::decode(body)?, Decodable::decode(body)?],
            },
            Self::WRONG_EPOCH_VOTE => Self::WrongEpochVote {
                epoch: Decodable::decode(body)?,
                pals: Decodable::decode(body)?,
            },
            _ => return Err(alloy_rlp::Error::Custom("unknown misbehaviour proof")),
        };
        if !body.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        Ok(proof)
    }
}
