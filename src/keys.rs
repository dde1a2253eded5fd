//! Session key derivation, [RFC4253](https://tools.ietf.org/html/rfc4253) section 7.2

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use subtle::ConstantTimeEq;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::*;
use catalog::{CompressionMode, HashAlg};
use negotiate::Chosen;
use sshwire::hash_mpint;

/// Largest exchange hash, sha512
pub const MAX_SESSID: usize = 64;
pub type SessId = heapless::Vec<u8, MAX_SESSID>;

/// The result of a completed exchange, before the keys are derived.
pub struct KexOutput {
    /// `H` for this exchange, the first becomes the session id
    pub h: SessId,
    /// The shared secret `K`, unsigned big-endian
    k: Zeroizing<Vec<u8>>,
    hash: HashAlg,
}

impl fmt::Debug for KexOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexOutput").field("hash", &self.hash).finish_non_exhaustive()
    }
}

impl KexOutput {
    pub fn new(h: SessId, k: Zeroizing<Vec<u8>>, hash: HashAlg) -> Self {
        Self { h, k, hash }
    }

    /// Derives both directions' keys, returning `(out, in)`.
    ///
    /// Consumes the output so `K` is cleared.
    pub fn new_sets(self, chosen: &Chosen, sess_id: &SessId)
        -> Result<(NegotiatedSet, NegotiatedSet)> {
        let out = KeyLengths::new(chosen.enc_out, chosen.mac_out)?;
        let inn = KeyLengths::new(chosen.enc_in, chosen.mac_in)?;
        let (c2s, s2c) = if chosen.is_client { (&out, &inn) } else { (&inn, &out) };
        let lens = [
            c2s.iv_len, s2c.iv_len,
            c2s.key_len, s2c.key_len,
            c2s.mac_key_len, s2c.mac_key_len,
        ];
        let [a, b, c, d, e, f] = derive_keys(self.hash, &self.k, &self.h, sess_id, &lens);

        let s_c2s = NegotiatedSet::new(chosen, true, a, c, e)?;
        let s_s2c = NegotiatedSet::new(chosen, false, b, d, f)?;
        if chosen.is_client {
            Ok((s_c2s, s_s2c))
        } else {
            Ok((s_s2c, s_c2s))
        }
    }
}

struct KeyLengths {
    key_len: usize,
    iv_len: usize,
    mac_key_len: usize,
}

impl KeyLengths {
    fn new(enc: &catalog::Algorithm, mac: Option<&catalog::Algorithm>) -> Result<Self> {
        let c = enc.cipher().trap()?;
        let mac_key_len = match mac {
            Some(m) => m.mac().trap()?.key_len,
            None => 0,
        };
        Ok(Self { key_len: c.key_len, iv_len: c.iv_len, mac_key_len })
    }
}

/// `K1 = HASH(K || H || letter || session_id)`, extended with
/// `Kn = HASH(K || H || K1 || ... || Kn-1)` until `len` bytes are available.
pub fn derive_key(
    hash: HashAlg,
    k: &[u8],
    h: &[u8],
    letter: u8,
    sess_id: &[u8],
    len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(len + hash.output_len()));
    let mut ctx = hash.new_ctx();

    hash_mpint(&mut *ctx, k);
    ctx.update(h);
    ctx.update(&[letter]);
    ctx.update(sess_id);
    out.extend_from_slice(&Zeroizing::new(ctx.finalize_reset()));

    while out.len() < len {
        hash_mpint(&mut *ctx, k);
        ctx.update(h);
        ctx.update(&out);
        out.extend_from_slice(&Zeroizing::new(ctx.finalize_reset()));
    }
    out.truncate(len);
    out
}

/// Derives blocks `A` to `F` with the given lengths
pub fn derive_keys(
    hash: HashAlg,
    k: &[u8],
    h: &[u8],
    sess_id: &[u8],
    lens: &[usize; 6],
) -> [Zeroizing<Vec<u8>>; 6] {
    core::array::from_fn(|i| derive_key(hash, k, h, b'A' + i as u8, sess_id, lens[i]))
}

/// Cipher blocks allowed under one key, for a given block size in bytes.
pub fn max_blocks(block_size: usize) -> u64 {
    if block_size >= 16 {
        1u64 << (block_size * 2).min(63)
    } else {
        (1u64 << 30) / block_size.max(1) as u64
    }
}

/// Algorithms and key material for one direction of traffic.
///
/// Handed to the transport, which owns it from then on. Key material
/// is cleared on drop.
#[derive(ZeroizeOnDrop)]
pub struct NegotiatedSet {
    #[zeroize(skip)]
    pub cipher: &'static str,
    pub cipher_key_len: usize,
    pub iv_len: usize,
    pub block_size: usize,
    /// `None` when the cipher is AEAD
    #[zeroize(skip)]
    pub mac: Option<&'static str>,
    pub mac_key_len: usize,
    #[zeroize(skip)]
    pub compression: CompressionMode,

    key: Vec<u8>,
    iv: Vec<u8>,
    mac_key: Vec<u8>,
}

impl NegotiatedSet {
    fn new(
        chosen: &Chosen,
        c2s: bool,
        iv: Zeroizing<Vec<u8>>,
        key: Zeroizing<Vec<u8>>,
        mac_key: Zeroizing<Vec<u8>>,
    ) -> Result<Self> {
        let outgoing = c2s == chosen.is_client;
        let (enc, mac, comp) = if outgoing {
            (chosen.enc_out, chosen.mac_out, chosen.comp_out)
        } else {
            (chosen.enc_in, chosen.mac_in, chosen.comp_in)
        };
        let c = enc.cipher().trap()?;
        Ok(Self {
            cipher: enc.name,
            cipher_key_len: c.key_len,
            iv_len: c.iv_len,
            block_size: c.block_size,
            mac: mac.map(|m| m.name),
            mac_key_len: mac_key.len(),
            compression: comp.compression().trap()?,
            key: key.to_vec(),
            iv: iv.to_vec(),
            mac_key: mac_key.to_vec(),
        })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn mac_key(&self) -> &[u8] {
        &self.mac_key
    }

    /// Number of cipher blocks that may be sent before rekeying,
    /// [RFC4344](https://tools.ietf.org/html/rfc4344) section 3.2
    pub fn max_blocks(&self) -> u64 {
        max_blocks(self.block_size)
    }
}

impl PartialEq for NegotiatedSet {
    fn eq(&self, other: &Self) -> bool {
        let material = self.key.as_slice().ct_eq(other.key.as_slice())
            & self.iv.as_slice().ct_eq(other.iv.as_slice())
            & self.mac_key.as_slice().ct_eq(other.mac_key.as_slice());
        self.cipher == other.cipher
            && self.mac == other.mac
            && self.compression == other.compression
            && bool::from(material)
    }
}

impl fmt::Debug for NegotiatedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedSet")
            .field("cipher", &self.cipher)
            .field("mac", &self.mac)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::keys::*;
    use crate::negotiate::select;
    use crate::proposal::Proposal;
    use crate::sunsetlog::init_test_log;

    const K: &[u8] = &[0x00, 0x9a, 0x31, 0x07, 0x44, 0xfe];

    #[test]
    fn deterministic() {
        let h = [7u8; 32];
        let sess = [9u8; 32];
        let lens = [16, 16, 32, 32, 64, 64];
        let a = derive_keys(HashAlg::Sha256, K, &h, &sess, &lens);
        let b = derive_keys(HashAlg::Sha256, K, &h, &sess, &lens);
        for i in 0..6 {
            assert_eq!(*a[i], *b[i]);
            assert_eq!(a[i].len(), lens[i]);
            for j in i + 1..6 {
                assert_ne!(a[i][..16], a[j][..16], "{i} {j}");
            }
        }
        // a different session id changes everything
        let c = derive_keys(HashAlg::Sha256, K, &h, &[8u8; 32], &lens);
        assert!(a.iter().zip(c.iter()).all(|(x, y)| **x != **y));
    }

    #[test]
    fn extension() {
        use digest::Digest;
        use sha2::Sha256;
        let h = [1u8; 32];
        let sess = [2u8; 32];
        let long = derive_key(HashAlg::Sha256, K, &h, b'C', &sess, 64);
        let short = derive_key(HashAlg::Sha256, K, &h, b'C', &sess, 20);
        assert_eq!(long[..20], short[..]);

        // second block is HASH(K || H || K1)
        let mut ctx = Sha256::new();
        hash_mpint(&mut ctx, K);
        Digest::update(&mut ctx, h);
        Digest::update(&mut ctx, &long[..32]);
        assert_eq!(ctx.finalize()[..], long[32..]);
    }

    fn chosen(client: bool) -> Chosen {
        let p = Proposal::from_strs([
            "curve25519-sha256", "ssh-ed25519", "aes256-ctr", "aes128-ctr",
            "hmac-sha2-512", "hmac-sha2-256", "none", "none", "", "",
        ])
        .unwrap();
        select(&p, &p, false, !client, true).unwrap()
    }

    #[test]
    fn sets_match() {
        init_test_log();
        let h = SessId::from_slice(&[3u8; 32]).unwrap();
        let k = Zeroizing::new(vec![0x55u8; 32]);
        let (c_out, c_in) = KexOutput::new(h.clone(), k.clone(), HashAlg::Sha256)
            .new_sets(&chosen(true), &h)
            .unwrap();
        let (s_out, s_in) =
            KexOutput::new(h.clone(), k, HashAlg::Sha256).new_sets(&chosen(false), &h).unwrap();

        assert_eq!(c_out, s_in);
        assert_eq!(c_in, s_out);
        assert_ne!(c_out, c_in);

        assert_eq!(c_out.cipher, "aes256-ctr");
        assert_eq!(c_out.key().len(), 32);
        assert_eq!(c_out.iv().len(), 16);
        assert_eq!(c_out.mac_key().len(), 64);
        assert_eq!(c_in.cipher, "aes128-ctr");
        assert_eq!(c_in.key().len(), 16);
        assert_eq!(c_in.mac_key().len(), 32);
        assert_eq!(c_out.max_blocks(), 1u64 << 32);
    }

    #[test]
    /// The derived lengths suit the primitives
    fn primitives_accept_keys() {
        use aes::cipher::KeyIvInit;
        use hmac::Mac;
        type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
        type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

        let h = SessId::from_slice(&[4u8; 32]).unwrap();
        let k = Zeroizing::new(vec![0x66u8; 256]);
        let (out, inn) =
            KexOutput::new(h.clone(), k, HashAlg::Sha256).new_sets(&chosen(true), &h).unwrap();
        Aes256Ctr::new_from_slices(out.key(), out.iv()).unwrap();
        Aes128Ctr::new_from_slices(inn.key(), inn.iv()).unwrap();
        hmac::Hmac::<sha2::Sha512>::new_from_slice(out.mac_key()).unwrap();
        hmac::Hmac::<sha2::Sha256>::new_from_slice(inn.mac_key()).unwrap();
    }
}
