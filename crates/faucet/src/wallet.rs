//! Funding wallet: key handling and legacy (EIP-155) transfer signing

use crate::address::Address;
use crate::error::{FaucetError, FaucetResult};
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use std::fmt;

/// Unsigned native-token transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub chain_id: u64,
}

/// RLP-encoded signed transaction ready for `eth_sendRawTransaction`
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransfer {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

pub struct FundingWallet {
    signing_key: SigningKey,
    address: Address,
}

impl FundingWallet {
    pub fn from_private_key(private_key: &str) -> FaucetResult<Self> {
        let hex_key = private_key.trim();
        let hex_key = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let key_bytes = hex::decode(hex_key)
            .map_err(|e| FaucetError::Config(format!("Invalid private key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(FaucetError::Config(format!(
                "Invalid private key: expected 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|e| FaucetError::Config(format!("Invalid signing key: {}", e)))?;

        // address = last 20 bytes of keccak(uncompressed pubkey without 0x04 prefix)
        let public_key = signing_key.verifying_key().to_encoded_point(false);
        let hash = keccak_hash::keccak(&public_key.as_bytes()[1..]);
        let mut addr_bytes = [0u8; 20];
        addr_bytes.copy_from_slice(&hash.0[12..]);

        Ok(Self {
            signing_key,
            address: Address(addr_bytes),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign_transfer(&self, tx: &TransferRequest) -> FaucetResult<SignedTransfer> {
        let mut unsigned = RlpStream::new_list(9);
        append_fields(&mut unsigned, tx);
        unsigned.append(&tx.chain_id);
        unsigned.append_empty_data();
        unsigned.append_empty_data();

        let sighash = keccak_hash::keccak(unsigned.out());
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&sighash.0)
            .map_err(|e| FaucetError::InternalError(format!("Signing failed: {}", e)))?;

        let v = u64::from(recovery_id.to_byte()) + tx.chain_id * 2 + 35;
        let sig_bytes = signature.to_bytes();
        let (r, s) = sig_bytes.split_at(32);

        let mut signed = RlpStream::new_list(9);
        append_fields(&mut signed, tx);
        signed.append(&v);
        signed.append(&trim_leading_zeros(r));
        signed.append(&trim_leading_zeros(s));

        let raw = signed.out().to_vec();
        let hash = keccak_hash::keccak(&raw).0;
        Ok(SignedTransfer { raw, hash })
    }
}

impl fmt::Debug for FundingWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FundingWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn append_fields(stream: &mut RlpStream, tx: &TransferRequest) {
    stream.append(&tx.nonce);
    stream.append(&trim_leading_zeros(&tx.gas_price.to_be_bytes()));
    stream.append(&tx.gas_limit);
    stream.append(&tx.to.0.to_vec());
    stream.append(&trim_leading_zeros(&tx.value.to_be_bytes()));
    stream.append_empty_data();
}

/// RLP integers are big-endian without leading zeros
fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
