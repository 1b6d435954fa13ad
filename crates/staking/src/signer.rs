//! Signing capability handed to the chain client.
//!
//! The core only ever sees a [`TransactionSigner`]; key material stays inside the
//! implementation.

use std::fmt;

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    rlp::{BufMut, EMPTY_STRING_CODE, Encodable, Header},
};
use anyhow::Context;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};

use crate::error::ChainError;

/// A legacy (EIP-155) transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl UnsignedTransaction {
    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        match &self.to {
            Some(to) => to.encode(out),
            None => out.put_u8(EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.data.encode(out);
    }

    /// The transaction fields followed by `trailer`, as one RLP list.
    fn encode_list(&self, trailer: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        trailer(&mut payload);

        let mut out = Vec::with_capacity(payload.len() + 9);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    /// RLP payload whose keccak hash is signed: `[..fields, chain_id, 0, 0]`.
    pub fn signing_payload(&self) -> Vec<u8> {
        self.encode_list(|out| {
            self.chain_id.encode(out);
            0u8.encode(out);
            0u8.encode(out);
        })
    }

    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    /// Raw signed transaction: `[..fields, v, r, s]`.
    fn encode_signed(&self, v: u64, r: U256, s: U256) -> Vec<u8> {
        self.encode_list(|out| {
            v.encode(out);
            r.encode(out);
            s.encode(out);
        })
    }
}

/// A signed transaction and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: B256,
}

/// Capability to sign transactions for one account.
pub trait TransactionSigner: Send + Sync {
    /// The account the signatures are produced for.
    fn address(&self) -> Address;

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, ChainError>;
}

/// A signer backed by an in-memory secp256k1 key.
#[derive(Clone)]
pub struct LocalKeySigner {
    key: SigningKey,
    address: Address,
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalKeySigner {
    pub fn from_signing_key(key: SigningKey) -> Self {
        let public_key = key.verifying_key().to_encoded_point(false);
        // Skip the 0x04 uncompressed marker, the address is the last 20 bytes of the hash.
        let hash = keccak256(&public_key.as_bytes()[1..]);
        let address = Address::from_slice(&hash[12..]);
        Self { key, address }
    }

    /// Create a signer from a 32-byte hex private key (with or without 0x prefix).
    pub fn from_private_key(private_key_hex: &str) -> anyhow::Result<Self> {
        let private_key_hex = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or(private_key_hex.trim());

        let private_key_bytes: [u8; 32] = hex::decode(private_key_hex)
            .context("Private key is not valid hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("Private key must be exactly 32 bytes"))?;

        let key = SigningKey::from_bytes(&private_key_bytes.into())
            .map_err(|e| anyhow::anyhow!("Invalid secp256k1 private key: {}", e))?;

        Ok(Self::from_signing_key(key))
    }

    /// Derive the signer at `m/44'/60'/0'/0/<index>` from a BIP-39 mnemonic.
    pub fn from_mnemonic(phrase: &str, index: u32) -> anyhow::Result<Self> {
        use alloy_signer_local::{MnemonicBuilder, coins_bip39::English};

        let wallet = MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(index)
            .context("Invalid derivation index")?
            .build()
            .context("Failed to derive key from mnemonic")?;

        Ok(Self::from_signing_key(wallet.credential().clone()))
    }

    fn sign_hash(&self, hash: &B256) -> Result<(Signature, RecoveryId), ChainError> {
        self.key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| ChainError::Signer(e.to_string()))
    }
}

impl TransactionSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, ChainError> {
        let (signature, recovery_id) = self.sign_hash(&tx.signing_hash())?;

        let v = tx
            .chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + u64::from(recovery_id.to_byte())))
            .ok_or_else(|| ChainError::Signer(format!("chain id {} too large", tx.chain_id)))?;

        let rs = signature.to_bytes();
        let raw = tx.encode_signed(
            v,
            U256::from_be_slice(&rs[..32]),
            U256::from_be_slice(&rs[32..]),
        );
        let hash = keccak256(&raw);

        Ok(SignedTransaction {
            raw: Bytes::from(raw),
            hash,
        })
    }
}
