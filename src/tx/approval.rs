//! ERC-20 `approve(spender, amount)` encoding

use crate::error::{EngineError, EngineResult};

use ethers::types::{Address, U256};
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};

lazy_static! {
    /// First four bytes of keccak256("approve(address,uint256)")
    static ref APPROVE_SELECTOR: [u8; 4] = {
        let hash = Keccak256::digest(b"approve(address,uint256)");
        [hash[0], hash[1], hash[2], hash[3]]
    };
}

/// `0x`-prefixed calldata for `approve(spender, amount)`
pub fn encode_approve(spender: &str, amount: U256) -> EngineResult<String> {
    let spender: Address = spender
        .parse()
        .map_err(|e| EngineError::Validation(format!("Invalid spender {}: {}", spender, e)))?;

    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&APPROVE_SELECTOR[..]);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(spender.as_bytes());

    let mut word = [0u8; 32];
    amount.to_big_endian(&mut word);
    data.extend_from_slice(&word);

    Ok(format!("0x{}", hex::encode(data)))
}
