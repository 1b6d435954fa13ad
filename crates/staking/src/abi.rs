//! Minimal ABI encoding for the staking contract interface.
//!
//! Only static argument types are needed: every call takes at most one `address` and
//! every view returns a tuple of 32-byte words.

use alloy_core::primitives::{Address, Bytes, U256, keccak256};

use crate::error::ChainError;

/// `Error(string)` selector used by `require`/`revert` with a message.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)` selector used for assertion failures and arithmetic errors.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Function signatures of the staking contract.
pub mod staking {
    pub const STAKE: &str = "stake()";
    pub const CLAIM_REWARDS: &str = "claimRewards()";
    pub const REQUEST_UNSTAKE: &str = "requestUnstake()";
    pub const WITHDRAW: &str = "withdraw()";
    pub const SET_BENEFICIARY: &str = "setBeneficiary(address)";
    pub const POSITION_OF: &str = "positionOf(address)";
    pub const LOCK_DURATION: &str = "lockDuration()";
    pub const BENEFICIARY_OF: &str = "beneficiaryOf(address)";
}

/// A single static ABI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
}

impl Token {
    fn to_word(self) -> [u8; 32] {
        match self {
            Token::Address(address) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(address.as_slice());
                word
            }
            Token::Uint(value) => value.to_be_bytes::<32>(),
        }
    }
}

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode a call to `signature` with static arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(&arg.to_word());
    }
    Bytes::from(data)
}

/// Split return data into exactly `count` words.
pub fn decode_words(data: &[u8], count: usize) -> Result<Vec<U256>, ChainError> {
    if data.len() < count * 32 {
        return Err(ChainError::Malformed(format!(
            "expected {} return word(s), got {} byte(s)",
            count,
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(32)
        .take(count)
        .map(U256::from_be_slice)
        .collect())
}

/// Interpret a word as an `address`.
pub fn word_to_address(word: U256) -> Address {
    let bytes = word.to_be_bytes::<32>();
    Address::from_slice(&bytes[12..])
}

/// Interpret a word as a `uint64`, rejecting values that do not fit.
pub fn word_to_u64(word: U256) -> Result<u64, ChainError> {
    let limbs = word.as_limbs();
    if limbs[1..].iter().any(|limb| *limb != 0) {
        return Err(ChainError::Malformed(format!("value {} does not fit in u64", word)));
    }
    Ok(limbs[0])
}

/// Decode the reason carried by revert data, if it follows a standard encoding.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, payload) = data.split_at(4);

    if selector == ERROR_STRING_SELECTOR {
        // (offset, length, bytes...)
        let words = decode_words(payload, 2).ok()?;
        let offset = usize::try_from(word_to_u64(words[0]).ok()?).ok()?;
        let start = offset.checked_add(32)?;
        let length = word_to_u64(U256::from_be_slice(payload.get(offset..start)?)).ok()?;
        let end = start.checked_add(usize::try_from(length).ok()?)?;
        let message = payload.get(start..end)?;
        return Some(String::from_utf8_lossy(message).into_owned());
    }

    if selector == PANIC_SELECTOR {
        let code = decode_words(payload, 1).ok()?[0];
        return Some(format!("panic: 0x{:x}", code));
    }

    None
}
