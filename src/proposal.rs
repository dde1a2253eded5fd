//! The ten algorithm name-lists of a KEXINIT message.
//!
//! [RFC4253](https://tools.ietf.org/html/rfc4253) section 7.1

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::ops::Index;

use pretty_hex::PrettyHex;

use crate::*;
use namelist::NameList;
use packets::{KexInit, Packet, ParseContext};
use sshwire::{SSHDecode, SSHEncode, SSHSink, SSHSource, WireResult};

/// Position of a name-list within a proposal, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Kex,
    /// RFC4253 calls these host key algorithms, they are
    /// actually signature algorithms.
    HostKey,
    CipherC2S,
    CipherS2C,
    MacC2S,
    MacS2C,
    CompC2S,
    CompS2C,
    LangC2S,
    LangS2C,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Kex,
        Field::HostKey,
        Field::CipherC2S,
        Field::CipherS2C,
        Field::MacC2S,
        Field::MacS2C,
        Field::CompC2S,
        Field::CompS2C,
        Field::LangC2S,
        Field::LangS2C,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// An algorithm proposal, either ours or the peer's.
///
/// Each list is in the sender's preference order. Names we don't know
/// are kept, they never match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    lists: [NameList; 10],
}

impl Proposal {
    /// Builds a proposal from ten comma separated lists, in wire order.
    pub fn from_strs(lists: [&str; 10]) -> Result<Self> {
        let mut p = Self::default();
        for (f, l) in Field::ALL.iter().zip(lists) {
            p.set(*f, l.try_into()?);
        }
        Ok(p)
    }

    pub fn get(&self, field: Field) -> &NameList {
        &self.lists[field.index()]
    }

    pub fn set(&mut self, field: Field, list: NameList) {
        self.lists[field.index()] = list
    }

    /// Serializes a complete KEXINIT message payload, including the
    /// message number. A new random cookie is used each time.
    ///
    /// The same bytes are sent and fed to the exchange hash.
    pub fn encode(&self, first_follows: bool) -> Result<Vec<u8>> {
        let p: Packet = KexInit {
            cookie: random::cookie()?,
            proposal: self.clone(),
            first_follows,
            reserved: 0,
        }
        .into();
        sshwire::write_ssh(&p)
    }

    /// Parses a KEXINIT message payload, returning the proposal and
    /// the `first_kex_packet_follows` flag.
    ///
    /// The cookie is not checked.
    pub fn decode(payload: &[u8]) -> Result<(Self, bool)> {
        let p = sshwire::packet_from_bytes(payload, &ParseContext::default())
            .map_err(|e| {
                debug!("Malformed KEXINIT: {e}");
                trace!("{:?}", payload.hex_dump());
                Error::MalformedProposal
            })?;
        match p {
            Packet::KexInit(k) => Ok((k.proposal, k.first_follows)),
            _ => Err(Error::MalformedProposal),
        }
    }
}

impl Index<Field> for Proposal {
    type Output = NameList;

    fn index(&self, field: Field) -> &NameList {
        self.get(field)
    }
}

impl SSHEncode for Proposal {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        for l in self.lists.iter() {
            l.enc(s)?;
        }
        Ok(())
    }
}

impl<'de> SSHDecode<'de> for Proposal {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let mut p = Self::default();
        for l in p.lists.iter_mut() {
            *l = NameList::dec(s)?;
        }
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use crate::proposal::*;
    use crate::sunsetlog::init_test_log;

    fn sample() -> Proposal {
        Proposal::from_strs([
            "curve25519-sha256,ext-info-c",
            "ssh-ed25519",
            "aes256-ctr",
            "aes256-ctr",
            "hmac-sha2-256",
            "hmac-sha2-256",
            "none",
            "none",
            "",
            "",
        ])
        .unwrap()
    }

    #[test]
    fn roundtrip_proposal() {
        init_test_log();
        let p = sample();
        for follows in [false, true] {
            let b = p.encode(follows).unwrap();
            assert_eq!(b[0], 20);
            let (p2, f2) = Proposal::decode(&b).unwrap();
            assert_eq!(p, p2);
            assert_eq!(f2, follows);
        }
    }

    #[test]
    fn fresh_cookie() {
        let p = sample();
        let a = p.encode(false).unwrap();
        let b = p.encode(false).unwrap();
        assert_ne!(a[1..17], b[1..17]);
        assert_eq!(a[17..], b[17..]);
    }

    #[test]
    fn unknown_names_kept() {
        let mut p = sample();
        p.set(Field::CipherC2S, "future-cipher@example.com,aes256-ctr".try_into().unwrap());
        let b = p.encode(false).unwrap();
        let (p2, _) = Proposal::decode(&b).unwrap();
        assert_eq!(p2[Field::CipherC2S].first(), "future-cipher@example.com");
    }

    #[test]
    fn malformed() {
        init_test_log();
        let b = sample().encode(false).unwrap();

        // truncated in the lists, and missing the reserved field
        for l in [10, 40, b.len() - 2] {
            let r = Proposal::decode(&b[..l]);
            assert!(matches!(r, Err(Error::MalformedProposal)), "len {l}");
        }

        // trailing garbage
        let mut t = b.clone();
        t.push(0);
        assert!(matches!(Proposal::decode(&t), Err(Error::MalformedProposal)));

        // not a KEXINIT
        let mut n = b.clone();
        n[0] = 21;
        assert!(matches!(Proposal::decode(&n), Err(Error::MalformedProposal)));
    }
}
