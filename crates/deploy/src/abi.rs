//! Minimal ABI word codec for the static calls issued against the hyperswap contracts.
//!
//! Only static types are needed: every argument and return value is a single 32-byte word.

use alloy_core::primitives::{Address, Bytes, U256, keccak256};

/// Size of an ABI word in bytes.
pub const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("expected at least {expected} bytes of return data, got {actual}")]
    ShortData { expected: usize, actual: usize },
    #[error("word {index} is not a valid {kind}")]
    InvalidWord { index: usize, kind: &'static str },
    #[error("calldata is shorter than a selector")]
    MissingSelector,
}

/// A static ABI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Bool(bool),
    Uint(U256),
}

impl Token {
    fn to_word(self) -> [u8; WORD] {
        let mut word = [0u8; WORD];
        match self {
            Token::Address(address) => word[12..].copy_from_slice(address.as_slice()),
            Token::Bool(value) => word[WORD - 1] = value as u8,
            Token::Uint(value) => word = value.to_be_bytes::<WORD>(),
        }
        word
    }
}

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Head-encode a list of static tokens.
pub fn encode_params(tokens: &[Token]) -> Vec<u8> {
    tokens.iter().flat_map(|t| t.to_word()).collect()
}

/// Build calldata for `signature` called with `tokens`.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(encode_params(tokens));
    data.into()
}

/// Append ABI-encoded constructor arguments to contract creation bytecode.
pub fn encode_constructor(bytecode: &Bytes, tokens: &[Token]) -> Bytes {
    let mut data = bytecode.to_vec();
    data.extend(encode_params(tokens));
    data.into()
}

/// Split calldata into its selector and argument words.
pub fn split_selector(data: &[u8]) -> Result<([u8; 4], &[u8]), AbiError> {
    if data.len() < 4 {
        return Err(AbiError::MissingSelector);
    }
    let (head, rest) = data.split_at(4);
    Ok(([head[0], head[1], head[2], head[3]], rest))
}

fn word(data: &[u8], index: usize) -> Result<&[u8], AbiError> {
    let end = (index + 1) * WORD;
    data.get(index * WORD..end).ok_or(AbiError::ShortData {
        expected: end,
        actual: data.len(),
    })
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address, AbiError> {
    let word = word(data, index)?;
    if word[..12].iter().any(|b| *b != 0) {
        return Err(AbiError::InvalidWord {
            index,
            kind: "address",
        });
    }
    Ok(Address::from_slice(&word[12..]))
}

pub fn decode_bool(data: &[u8], index: usize) -> Result<bool, AbiError> {
    let word = word(data, index)?;
    match (word[..WORD - 1].iter().all(|b| *b == 0), word[WORD - 1]) {
        (true, 0) => Ok(false),
        (true, 1) => Ok(true),
        _ => Err(AbiError::InvalidWord { index, kind: "bool" }),
    }
}

pub fn decode_u32(data: &[u8], index: usize) -> Result<u32, AbiError> {
    let value = U256::from_be_slice(word(data, index)?);
    u32::try_from(value).map_err(|_| AbiError::InvalidWord {
        index,
        kind: "uint32",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector() {
        // transfer(address,uint256) is the canonical ERC-20 selector.
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("owner()"), [0x8d, 0xa5, 0xcb, 0x5b]);
    }

    #[test]
    fn test_encode_call_layout() {
        let address: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();
        let data = encode_call(
            "initialize(address,address,address,bool)",
            &[
                Token::Address(address),
                Token::Address(Address::ZERO),
                Token::Address(address),
                Token::Bool(true),
            ],
        );

        // Selector + 4 words.
        assert_eq!(data.len(), 4 + 4 * WORD);
        let (sel, args) = split_selector(&data).unwrap();
        assert_eq!(sel, selector("initialize(address,address,address,bool)"));
        assert_eq!(
            hex::encode(&args[..WORD]),
            "00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8"
        );
        assert_eq!(decode_address(args, 1).unwrap(), Address::ZERO);
        assert!(decode_bool(args, 3).unwrap());
    }

    #[test]
    fn test_constructor_args_follow_bytecode() {
        let bytecode = Bytes::from_static(&[0x60, 0x80]);
        let data = encode_constructor(&bytecode, &[Token::Uint(U256::from(13371u32))]);

        assert_eq!(&data[..2], &[0x60, 0x80]);
        assert_eq!(decode_u32(&data[2..], 0).unwrap(), 13371);
    }

    #[test]
    fn test_decode_rejects_malformed_words() {
        assert_eq!(
            decode_address(&[0u8; 16], 0),
            Err(AbiError::ShortData {
                expected: 32,
                actual: 16
            })
        );

        let mut dirty = [0u8; WORD];
        dirty[0] = 1;
        assert!(decode_address(&dirty, 0).is_err());
        assert!(decode_bool(&dirty, 0).is_err());

        let too_big = Token::Uint(U256::from(u64::MAX)).to_word();
        assert!(decode_u32(&too_big, 0).is_err());

        assert_eq!(split_selector(&[1, 2]), Err(AbiError::MissingSelector));
    }
}
