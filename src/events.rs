use crate::abi;
use crate::error::{ConfigError, DecodeError, LogLocation};
use alloy::json_abi::JsonAbi;
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, Bytes, U256};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);

    function symbol() external view returns (string);
    function decimals() external view returns (uint8);
}

/// One log record as returned by the node's filtered log query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLog {
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl RawLog {
    pub fn location(&self) -> LogLocation {
        LogLocation {
            block_number: self.block_number,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    /// `(transaction hash, log index)` uniquely identifies an on-chain log.
    pub fn delivery_key(&self) -> Option<(B256, u64)> {
        Some((self.transaction_hash?, self.log_index?))
    }
}

impl From<&Log> for RawLog {
    fn from(log: &Log) -> Self {
        RawLog {
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        RawLog::from(&log)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than the three topics a Transfer carries.
    MissingTopics,
    /// Three or more topics but a different event signature.
    ForeignEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Transfer(TransferEvent),
    Skipped(SkipReason),
}

/// Turns raw logs into transfers. Holds no mutable state, so one decoder can
/// be shared by any number of concurrent scans.
#[derive(Debug, Clone)]
pub struct TransferDecoder {
    signature: B256,
}

impl TransferDecoder {
    /// Builds a decoder from the token's interface description, failing if
    /// its Transfer event is not the ERC20 layout.
    pub fn from_abi(abi: &JsonAbi) -> Result<Self, ConfigError> {
        let event = abi::transfer_event(abi)?;
        Ok(TransferDecoder {
            signature: event.selector(),
        })
    }

    pub fn signature(&self) -> B256 {
        self.signature
    }

    pub fn decode(&self, log: &RawLog) -> Result<Decoded, DecodeError> {
        if log.topics.len() < 3 {
            return Ok(Decoded::Skipped(SkipReason::MissingTopics));
        }
        if log.topics[0] != self.signature {
            return Ok(Decoded::Skipped(SkipReason::ForeignEvent));
        }

        // A single uint256 is exactly one word; the ABI decoder tolerates
        // trailing bytes, so check the width first.
        if log.data.len() != 32 {
            return Err(DecodeError::SchemaMismatch {
                location: log.location(),
                reason: format!("expected a 32 byte payload, got {} bytes", log.data.len()),
            });
        }

        let decoded = Transfer::decode_raw_log(log.topics.as_slice(), &log.data).map_err(
            |e| DecodeError::SchemaMismatch {
                location: log.location(),
                reason: e.to_string(),
            },
        )?;

        Ok(Decoded::Transfer(TransferEvent {
            from: decoded.from,
            to: decoded.to,
            value: decoded.value,
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use alloy::primitives::{LogData, address, b256};

    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

    #[test]
    fn signature_comes_from_the_abi() {
        assert_eq!(decoder().signature(), Transfer::SIGNATURE_HASH);
        assert_eq!(
            Transfer::SIGNATURE_HASH,
            b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
    }

    #[test]
    fn decodes_transfer_and_strips_topic_padding() {
        let log = transfer_log(ALICE, BOB, 1_000);
        let decoded = decoder().decode(&log).unwrap();
        assert_eq!(
            decoded,
            Decoded::Transfer(TransferEvent {
                from: ALICE,
                to: BOB,
                value: U256::from(1_000u64),
            })
        );
    }

    #[test]
    fn short_topic_lists_are_skipped_without_error() {
        let decoder = decoder();
        let full = transfer_log(ALICE, BOB, 5);
        for count in 0..3 {
            let log = RawLog {
                topics: full.topics[..count].to_vec(),
                ..full.clone()
            };
            assert_eq!(
                decoder.decode(&log).unwrap(),
                Decoded::Skipped(SkipReason::MissingTopics)
            );
        }
    }

    #[test]
    fn other_events_with_three_topics_are_skipped() {
        let approval = b256!("0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");
        let mut log = transfer_log(ALICE, BOB, 5);
        log.topics[0] = approval;
        assert_eq!(
            decoder().decode(&log).unwrap(),
            Decoded::Skipped(SkipReason::ForeignEvent)
        );
    }

    #[test]
    fn payload_mismatch_is_fatal() {
        let decoder = decoder();
        let mut log = transfer_log(ALICE, BOB, 5);
        log.transaction_hash = Some(B256::repeat_byte(0x11));
        log.log_index = Some(7);

        log.data = Bytes::new();
        let err = decoder.decode(&log).unwrap_err();
        let DecodeError::SchemaMismatch { location, .. } = err;
        assert_eq!(location.log_index, Some(7));

        log.data = Bytes::from(vec![0u8; 64]);
        assert!(decoder.decode(&log).is_err());
    }

    #[test]
    fn converts_rpc_logs() {
        let inner = alloy::primitives::Log {
            address: Address::repeat_byte(0x42),
            data: LogData::new_unchecked(
                vec![Transfer::SIGNATURE_HASH, word(ALICE), word(BOB)],
                Bytes::from(U256::from(9u64).to_be_bytes::<32>().to_vec()),
            ),
        };
        let log = Log {
            inner,
            block_number: Some(17081001),
            log_index: Some(2),
            transaction_hash: Some(B256::repeat_byte(0x01)),
            ..Log::default()
        };

        let raw = RawLog::from(&log);
        assert_eq!(raw.delivery_key(), Some((B256::repeat_byte(0x01), 2)));
        assert_eq!(raw.block_number, Some(17081001));
        assert!(matches!(
            decoder().decode(&raw).unwrap(),
            Decoded::Transfer(TransferEvent { from, to, .. }) if from == ALICE && to == BOB
        ));
    }
}
