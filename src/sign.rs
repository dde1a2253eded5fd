//! Host key signing and verification.

#[allow(unused_imports)]
use {
    crate::error::*,
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use ed25519_dalek as dalek;
use rand_core::OsRng;
use signature::{Signer, Verifier};

use crate::*;
use packets::{Ed25519PubKey, Ed25519Sig, PubKey, Signature};
use sshnames::*;
use sshwire::BinString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigType {
    Ed25519,
}

impl SigType {
    /// Must be a valid name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_ED25519 => Ok(SigType::Ed25519),
            _ => Err(Error::bug()),
        }
    }

    /// Returns a valid name
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            SigType::Ed25519 => SSH_NAME_ED25519,
        }
    }

    /// Verifies `sig` over `msg`. Returns `Ok(())` on success
    pub fn verify(&self, pubkey: &PubKey, msg: &[u8], sig: &Signature) -> Result<()> {
        match (self, pubkey, sig) {
            (SigType::Ed25519, PubKey::Ed25519(k), Signature::Ed25519(s)) => {
                let k: &[u8; 32] = k.key.0.try_into().map_err(|_| Error::BadKey)?;
                let k = dalek::VerifyingKey::from_bytes(k).map_err(|_| Error::BadKey)?;
                let s: &[u8; 64] = s.sig.0.try_into().map_err(|_| Error::BadSig)?;
                let s = dalek::Signature::from_bytes(s);
                k.verify(msg, &s).map_err(|_| Error::BadSig)
            }

            _ => {
                warn!(
                    "Signature \"{:?}\" doesn't match key type \"{:?}\"",
                    sig.algorithm_name(),
                    pubkey.algorithm_name(),
                );
                Err(Error::BadSig)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Ed25519,
}

/// A signature produced by [`SignKey::sign`]
pub enum OwnedSig {
    Ed25519([u8; 64]),
}

impl<'a> From<&'a OwnedSig> for Signature<'a> {
    fn from(s: &'a OwnedSig) -> Self {
        match s {
            OwnedSig::Ed25519(e) => Signature::Ed25519(Ed25519Sig { sig: BinString(e) }),
        }
    }
}

/// A host key with its private part
pub enum SignKey {
    Ed25519(dalek::SigningKey),
}

impl SignKey {
    pub fn generate(ty: KeyType) -> Result<Self> {
        match ty {
            KeyType::Ed25519 => Ok(Self::Ed25519(dalek::SigningKey::generate(&mut OsRng))),
        }
    }

    pub fn from_ed25519_seed(seed: &[u8; 32]) -> Self {
        Self::Ed25519(dalek::SigningKey::from_bytes(seed))
    }

    pub fn pubkey(&self) -> PubKey<'_> {
        match self {
            SignKey::Ed25519(k) => {
                let vk: &dalek::VerifyingKey = k.as_ref();
                PubKey::Ed25519(Ed25519PubKey { key: BinString(vk.as_bytes()) })
            }
        }
    }

    /// Returns whether this key can produce signatures of `sig_type`
    pub fn can_sign(&self, sig_type: SigType) -> bool {
        match self {
            SignKey::Ed25519(_) => matches!(sig_type, SigType::Ed25519),
        }
    }

    pub fn sign(&self, msg: &[u8]) -> Result<OwnedSig> {
        match self {
            SignKey::Ed25519(k) => {
                let s = k.try_sign(msg).map_err(|_| Error::msg("Signing failed"))?;
                Ok(OwnedSig::Ed25519(s.to_bytes()))
            }
        }
    }
}

impl fmt::Debug for SignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ed25519(_) => "Ed25519",
        };
        write!(f, "SignKey::{s}")
    }
}

#[cfg(test)]
mod tests {
    use crate::packets::{PubKey, Signature};
    use crate::sign::*;
    use crate::sunsetlog::init_test_log;

    #[test]
    fn sign_verify() {
        init_test_log();
        let k = SignKey::generate(KeyType::Ed25519).unwrap();
        assert!(k.can_sign(SigType::Ed25519));
        let msg = b"exchange hash";
        let sig = k.sign(msg).unwrap();
        let sig: Signature = (&sig).into();
        SigType::Ed25519.verify(&k.pubkey(), msg, &sig).unwrap();

        let r = SigType::Ed25519.verify(&k.pubkey(), b"other", &sig);
        assert!(matches!(r, Err(Error::BadSig)));

        let other = SignKey::generate(KeyType::Ed25519).unwrap();
        let r = SigType::Ed25519.verify(&other.pubkey(), msg, &sig);
        assert!(matches!(r, Err(Error::BadSig)));
    }

    #[test]
    fn short_key() {
        let k = PubKey::Ed25519(Ed25519PubKey { key: BinString(&[1, 2, 3]) });
        let s = OwnedSig::Ed25519([0u8; 64]);
        let r = SigType::Ed25519.verify(&k, b"x", &(&s).into());
        assert!(matches!(r, Err(Error::BadKey)));
    }

    #[test]
    #[should_panic]
    fn test_unknown_sig() {
        SigType::from_name("bad").unwrap();
    }
}
