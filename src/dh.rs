//! Finite field Diffie-Hellman over the MODP groups.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use num_bigint::BigUint;
use num_traits::One;
use zeroize::Zeroizing;

use crate::*;
use groups::DhGroup;
use negotiate::Chosen;
use sshwire::MpInt;

/// Smallest group we will use, or accept from a server
pub const DH_GRP_MIN: u32 = 2048;
/// Largest group we have
pub const DH_GRP_MAX: u32 = 8192;

/// An ephemeral private exponent and its public value
pub struct DhKeypair {
    x: Zeroizing<Vec<u8>>,
    public: BigUint,
}

impl fmt::Debug for DhKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhKeypair")
            .field("public_bits", &self.public.bits())
            .finish_non_exhaustive()
    }
}

impl DhKeypair {
    /// Generates a random exponent sized for `need_bits` of security.
    pub fn generate(group: &DhGroup, need_bits: u32) -> Result<Self> {
        let bits = private_bits(need_bits, group.bits()) as usize;
        let nbytes = bits.div_ceil(8);
        let mut x = Zeroizing::new(vec![0u8; nbytes]);
        random::fill_random(&mut x)?;

        // exactly `bits` long
        let extra = nbytes * 8 - bits;
        x[0] &= 0xff >> extra;
        x[0] |= 0x80 >> extra;

        let xb = BigUint::from_bytes_be(&x);
        let public = group.g.modpow(&xb, &group.p);
        Ok(Self { x, public })
    }

    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Computes `peer^x mod p`, after checking the peer's value is in range.
    ///
    /// Returns the unsigned big-endian bytes of the shared secret.
    pub fn shared_secret(&self, group: &DhGroup, peer: &BigUint) -> Result<Zeroizing<Vec<u8>>> {
        validate_public(group, peer)?;
        let x = BigUint::from_bytes_be(&self.x);
        let k = peer.modpow(&x, &group.p);
        if k <= BigUint::one() {
            return Err(Error::BadKexValue);
        }
        Ok(Zeroizing::new(k.to_bytes_be()))
    }
}

/// Checks `1 < v < p-1`.
pub fn validate_public(group: &DhGroup, v: &BigUint) -> Result<()> {
    let one = BigUint::one();
    if *v <= one || *v >= &group.p - &one {
        warn!("Diffie-Hellman public value out of range");
        return Err(Error::BadKexValue);
    }
    Ok(())
}

/// Private exponent length in bits.
///
/// Twice the security strength, less than the prime size.
pub fn private_bits(need_bits: u32, p_bits: u32) -> u32 {
    (2 * need_bits).min(p_bits - 1)
}

/// Group size estimate for a symmetric security strength,
/// NIST SP 800-57 part 1.
pub fn estimate_group_bits(need_bits: u32) -> u32 {
    if need_bits <= 112 {
        2048
    } else if need_bits <= 128 {
        3072
    } else if need_bits <= 192 {
        7680
    } else {
        8192
    }
}

/// Security strength in bits that the negotiated algorithms need
/// from the key exchange.
pub fn need_bits(chosen: &Chosen) -> Result<u32> {
    let mut need = chosen.hash_alg()?.output_len();
    for enc in [chosen.enc_out, chosen.enc_in] {
        let c = enc.cipher().trap()?;
        need = need.max(c.key_len).max(c.iv_len).max(c.block_size);
    }
    for mac in [chosen.mac_out, chosen.mac_in].into_iter().flatten() {
        need = need.max(mac.mac().trap()?.key_len);
    }
    Ok(need as u32 * 8)
}

pub fn mpint_value(m: &MpInt) -> BigUint {
    BigUint::from_bytes_be(m.0)
}

/// The contents of a SSH mpint string, with a leading zero byte
/// if the high bit is set.
pub fn mpint_content(v: &BigUint) -> Vec<u8> {
    let b = v.to_bytes_be();
    if b.first().is_some_and(|c| c & 0x80 != 0) {
        let mut p = Vec::with_capacity(b.len() + 1);
        p.push(0);
        p.extend_from_slice(&b);
        p
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use crate::dh::*;
    use crate::groups::Modp;
    use crate::sunsetlog::init_test_log;

    #[test]
    fn agree() {
        init_test_log();
        let g = Modp::Group14.group().unwrap();
        let a = DhKeypair::generate(&g, 128).unwrap();
        let b = DhKeypair::generate(&g, 128).unwrap();
        let ka = a.shared_secret(&g, b.public()).unwrap();
        let kb = b.shared_secret(&g, a.public()).unwrap();
        assert_eq!(*ka, *kb);
        assert_eq!(BigUint::from_bytes_be(&a.x).bits(), 256);
    }

    #[test]
    fn bad_public() {
        let g = Modp::Group14.group().unwrap();
        let a = DhKeypair::generate(&g, 112).unwrap();
        let one = BigUint::one();
        let pm1 = &g.p - &one;
        for v in [BigUint::from(0u32), one.clone(), pm1.clone(), g.p.clone(), &g.p + &one] {
            assert!(matches!(a.shared_secret(&g, &v), Err(Error::BadKexValue)));
        }
        assert!(validate_public(&g, &(&pm1 - &one)).is_ok());
        assert!(validate_public(&g, &BigUint::from(2u32)).is_ok());
    }

    #[test]
    fn sizes() {
        assert_eq!(private_bits(256, 2048), 512);
        assert_eq!(private_bits(4096, 2048), 2047);
        assert_eq!(estimate_group_bits(112), 2048);
        assert_eq!(estimate_group_bits(128), 3072);
        assert_eq!(estimate_group_bits(192), 7680);
        assert_eq!(estimate_group_bits(256), 8192);
    }

    #[test]
    fn content_padding() {
        assert_eq!(mpint_content(&BigUint::from(0x80u32)), [0, 0x80]);
        assert_eq!(mpint_content(&BigUint::from(0x7fu32)), [0x7f]);
    }
}
