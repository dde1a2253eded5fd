//! The table of algorithms this implementation knows about.
//!
//! The catalog is static and shared read-only between all sessions.
//! Order within each category is our default preference order.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use digest::DynDigest;
use sha2::{Sha256, Sha512};

use crate::*;
use groups::Modp;
use sign::SigType;
use sshnames::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Kex,
    HostKey,
    Cipher,
    Mac,
    Compression,
}

/// Hash function used for the exchange hash and key derivation,
/// or by a MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha512,
}

impl HashAlg {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha512 => 64,
        }
    }

    pub fn new_ctx(&self) -> Box<dyn DynDigest + Send> {
        match self {
            HashAlg::Sha256 => Box::new(Sha256::default()),
            HashAlg::Sha512 => Box::new(Sha512::default()),
        }
    }
}

/// The key exchange methods. Each catalog kex entry maps to one of these,
/// and the exchange itself is selected by matching on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexMethod {
    /// [RFC8731](https://tools.ietf.org/html/rfc8731)
    Curve25519,
    /// Fixed MODP group, [RFC8268](https://tools.ietf.org/html/rfc8268)
    DhGroup(Modp),
    /// [RFC4419](https://tools.ietf.org/html/rfc4419)
    DhGex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherInfo {
    pub key_len: usize,
    pub iv_len: usize,
    pub block_size: usize,
    /// Authenticated encryption, the MAC negotiation is skipped.
    pub aead: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacInfo {
    pub key_len: usize,
    pub out_len: usize,
    /// encrypt-then-mac
    pub etm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    None,
    /// Compression starts after user authentication succeeds
    Delayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoKind {
    Kex { method: KexMethod, hash: HashAlg },
    HostKey(SigType),
    Cipher(CipherInfo),
    Mac { info: MacInfo, hash: HashAlg },
    Compression(CompressionMode),
}

/// A catalog entry
#[derive(Debug, PartialEq, Eq)]
pub struct Algorithm {
    pub name: &'static str,
    pub kind: AlgoKind,
}

impl Algorithm {
    pub fn category(&self) -> Category {
        match self.kind {
            AlgoKind::Kex { .. } => Category::Kex,
            AlgoKind::HostKey(_) => Category::HostKey,
            AlgoKind::Cipher(_) => Category::Cipher,
            AlgoKind::Mac { .. } => Category::Mac,
            AlgoKind::Compression(_) => Category::Compression,
        }
    }

    pub fn hash_alg(&self) -> Option<HashAlg> {
        match self.kind {
            AlgoKind::Kex { hash, .. } | AlgoKind::Mac { hash, .. } => Some(hash),
            _ => None,
        }
    }

    /// The RFC3526 group number, for fixed group kex methods
    pub fn group_id(&self) -> Option<u32> {
        match self.kind {
            AlgoKind::Kex { method: KexMethod::DhGroup(g), .. } => Some(g.id()),
            _ => None,
        }
    }

    pub fn kex_method(&self) -> Option<KexMethod> {
        match self.kind {
            AlgoKind::Kex { method, .. } => Some(method),
            _ => None,
        }
    }

    pub fn sig_type(&self) -> Option<SigType> {
        match self.kind {
            AlgoKind::HostKey(s) => Some(s),
            _ => None,
        }
    }

    pub fn cipher(&self) -> Option<&CipherInfo> {
        match &self.kind {
            AlgoKind::Cipher(c) => Some(c),
            _ => None,
        }
    }

    pub fn mac(&self) -> Option<&MacInfo> {
        match &self.kind {
            AlgoKind::Mac { info, .. } => Some(info),
            _ => None,
        }
    }

    pub fn compression(&self) -> Option<CompressionMode> {
        match self.kind {
            AlgoKind::Compression(c) => Some(c),
            _ => None,
        }
    }
}

const fn kex(name: &'static str, method: KexMethod, hash: HashAlg) -> Algorithm {
    Algorithm { name, kind: AlgoKind::Kex { method, hash } }
}

const fn cipher(
    name: &'static str,
    key_len: usize,
    iv_len: usize,
    block_size: usize,
    aead: bool,
) -> Algorithm {
    Algorithm { name, kind: AlgoKind::Cipher(CipherInfo { key_len, iv_len, block_size, aead }) }
}

const fn mac(name: &'static str, hash: HashAlg, etm: bool) -> Algorithm {
    let len = match hash {
        HashAlg::Sha256 => 32,
        HashAlg::Sha512 => 64,
    };
    Algorithm {
        name,
        kind: AlgoKind::Mac { info: MacInfo { key_len: len, out_len: len, etm }, hash },
    }
}

static CATALOG: &[Algorithm] = &[
    kex(SSH_NAME_CURVE25519, KexMethod::Curve25519, HashAlg::Sha256),
    kex(SSH_NAME_CURVE25519_LIBSSH, KexMethod::Curve25519, HashAlg::Sha256),
    kex(SSH_NAME_DH_GEX_SHA256, KexMethod::DhGex, HashAlg::Sha256),
    kex(SSH_NAME_DH_GROUP16_SHA512, KexMethod::DhGroup(Modp::Group16), HashAlg::Sha512),
    kex(SSH_NAME_DH_GROUP18_SHA512, KexMethod::DhGroup(Modp::Group18), HashAlg::Sha512),
    kex(SSH_NAME_DH_GROUP14_SHA256, KexMethod::DhGroup(Modp::Group14), HashAlg::Sha256),

    Algorithm { name: SSH_NAME_ED25519, kind: AlgoKind::HostKey(SigType::Ed25519) },

    // chacha20-poly1305 takes two 256 bit keys, the nonce is the sequence number
    cipher(SSH_NAME_CHAPOLY, 64, 0, 8, true),
    cipher(SSH_NAME_AES256_GCM, 32, 12, 16, true),
    cipher(SSH_NAME_AES128_GCM, 16, 12, 16, true),
    cipher(SSH_NAME_AES256_CTR, 32, 16, 16, false),
    cipher(SSH_NAME_AES192_CTR, 24, 16, 16, false),
    cipher(SSH_NAME_AES128_CTR, 16, 16, 16, false),

    mac(SSH_NAME_HMAC_SHA256_ETM, HashAlg::Sha256, true),
    mac(SSH_NAME_HMAC_SHA512_ETM, HashAlg::Sha512, true),
    mac(SSH_NAME_HMAC_SHA256, HashAlg::Sha256, false),
    mac(SSH_NAME_HMAC_SHA512, HashAlg::Sha512, false),

    Algorithm { name: SSH_NAME_NONE, kind: AlgoKind::Compression(CompressionMode::None) },
    Algorithm {
        name: SSH_NAME_ZLIB_OPENSSH,
        kind: AlgoKind::Compression(CompressionMode::Delayed),
    },
];

/// Names that may appear in the kex list but are only capability markers,
/// never negotiated.
pub const MARKER_ONLY_KEXS: &[&str] = &[
    SSH_NAME_EXT_INFO_C,
    SSH_NAME_EXT_INFO_S,
    SSH_NAME_KEXGUESS2,
    SSH_NAME_STRICT_KEX_C,
    SSH_NAME_STRICT_KEX_S,
];

/// Finds an algorithm by its SSH name. Absence is not an error.
pub fn lookup_by_name(name: &str) -> Option<&'static Algorithm> {
    CATALOG.iter().find(|a| a.name == name)
}

/// All algorithms of a category, in default preference order.
pub fn enumerate(cat: Category) -> impl Iterator<Item = &'static Algorithm> {
    CATALOG.iter().filter(move |a| a.category() == cat)
}

#[cfg(test)]
mod tests {
    use crate::catalog::*;

    #[test]
    fn lookup() {
        let a = lookup_by_name("diffie-hellman-group-exchange-sha256").unwrap();
        assert_eq!(a.category(), Category::Kex);
        assert_eq!(a.hash_alg(), Some(HashAlg::Sha256));
        assert_eq!(a.kex_method(), Some(KexMethod::DhGex));
        assert_eq!(a.group_id(), None);

        let a = lookup_by_name("diffie-hellman-group16-sha512").unwrap();
        assert_eq!(a.hash_alg(), Some(HashAlg::Sha512));
        assert_eq!(a.group_id(), Some(16));

        let a = lookup_by_name("aes256-ctr").unwrap();
        assert_eq!(a.cipher().unwrap().key_len, 32);
        assert_eq!(a.cipher().unwrap().iv_len, 16);

        assert!(lookup_by_name("3des-cbc").is_none());
        assert!(lookup_by_name(SSH_NAME_EXT_INFO_C).is_none());
    }

    #[test]
    fn enumerate_order() {
        let k: Vec<&str> = enumerate(Category::Kex).map(|a| a.name).collect();
        assert_eq!(k[0], SSH_NAME_CURVE25519);
        assert_eq!(k.len(), 6);
        assert!(enumerate(Category::HostKey).all(|a| a.sig_type().is_some()));
        assert!(enumerate(Category::Cipher).all(|a| a.cipher().is_some()));
        assert!(enumerate(Category::Mac).all(|a| a.mac().is_some()));
        assert!(enumerate(Category::Compression).all(|a| a.compression().is_some()));
    }

    #[test]
    fn names_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            assert!(CATALOG[i + 1..].iter().all(|b| b.name != a.name), "{}", a.name);
        }
    }

    #[test]
    fn hash_lengths() {
        for h in [HashAlg::Sha256, HashAlg::Sha512] {
            assert_eq!(h.new_ctx().output_size(), h.output_len());
        }
    }
}
