//! Content addressing for kernels.
//!
//! A kernel's identity is the BLAKE3 hash of its canonical text form plus
//! the signatures of the fields it is bound to. Two kernels that print the
//! same and see the same field shapes hash the same, which is what lets the
//! gradient registry and the launch queue share work between them.

use std::collections::BTreeMap;

use super::KernelIr;
use crate::field::FieldSig;

const HASH_VERSION: u8 = 1;

/// A 256-bit BLAKE3 content hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Display as full hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Display as short base-32 (8 characters, 40 bits).
    pub fn to_short(&self) -> String {
        const ALPHABET: &[u8] = b"0123456789abcdefghjkmnpqrstuvwxyz";
        let val = u64::from_be_bytes([
            0, 0, 0, self.0[0], self.0[1], self.0[2], self.0[3], self.0[4],
        ]);
        let mut result = String::with_capacity(8);
        for i in (0..8).rev() {
            let idx = ((val >> (i * 5)) & 0x1F) as usize;
            result.push(ALPHABET[idx] as char);
        }
        result
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

/// Hash a kernel's text form alone.
pub fn hash_ir(ir: &KernelIr) -> ContentHash {
    hash_kernel(ir, &BTreeMap::new())
}

/// Hash a kernel together with the field signatures it was bound against.
pub fn hash_kernel(ir: &KernelIr, fields: &BTreeMap<String, FieldSig>) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[HASH_VERSION]);
    hasher.update(ir.to_string().as_bytes());
    // BTreeMap iteration keeps the signature block in a fixed order.
    for (name, sig) in fields {
        hasher.update(format!("field {}: {}\n", name, sig).as_bytes());
    }
    ContentHash(*hasher.finalize().as_bytes())
}
