//! SSH transport packets used by the key exchange.
//!
//! A [`Packet`] can be encoded/decoded to the
//! SSH Binary Packet Protocol using [`sshwire`].
//! SSH packet format is described in [RFC4253](https://tools.ietf.org/html/rfc4253) SSH Transport

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use pretty_hex::PrettyHex;

use crate::*;
use namelist::NameList;
use proposal::Proposal;
use sshnames::*;
use sshwire::{sshwire_struct, BinString, Blob, MpInt, TextString};
use sshwire::{SSHDecode, SSHEncode, SSHSink, SSHSource, WireError, WireResult};

#[derive(Debug)]
pub struct KexInit {
    pub cookie: [u8; 16],
    pub proposal: Proposal,
    pub first_follows: bool,
    pub reserved: u32,
}
sshwire_struct!(KexInit { cookie, proposal, first_follows, reserved });

#[derive(Debug)]
pub struct NewKeys {}
sshwire_struct!(NewKeys {});

#[derive(Debug)]
pub struct Ignore<'a> {
    pub data: BinString<'a>,
}
sshwire_struct!(Ignore<'a> { data });

/// Named to avoid clashing with [`fmt::Debug`]
#[derive(Debug)]
pub struct DebugPacket<'a> {
    pub always_display: bool,
    pub message: TextString<'a>,
    pub lang: &'a str,
}
sshwire_struct!(DebugPacket<'a> { always_display, message, lang });

#[derive(Debug)]
pub struct Disconnect<'a> {
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: TextString<'a>,
}
sshwire_struct!(Disconnect<'a> { reason, desc, lang });

#[derive(Debug)]
pub struct Unimplemented {
    pub seq: u32,
}
sshwire_struct!(Unimplemented { seq });

/// [RFC8308](https://tools.ietf.org/html/rfc8308) extension information.
///
/// Only `server-sig-algs` is understood, other extensions are skipped.
#[derive(Debug, Default)]
pub struct ExtInfo {
    pub server_sig_algs: Option<NameList>,
}

impl SSHEncode for ExtInfo {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let count = self.server_sig_algs.is_some() as u32;
        count.enc(s)?;
        if let Some(algs) = &self.server_sig_algs {
            SSH_EXT_SERVER_SIG_ALGS.enc(s)?;
            algs.enc(s)?;
        }
        Ok(())
    }
}

impl<'de> SSHDecode<'de> for ExtInfo {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let mut r = ExtInfo::default();
        let count = u32::dec(s)?;
        for _ in 0..count {
            let name = BinString::dec(s)?;
            if name.0 == SSH_EXT_SERVER_SIG_ALGS.as_bytes() {
                r.server_sig_algs = Some(NameList::dec(s)?);
            } else {
                let v = BinString::dec(s)?;
                trace!("Ignoring extension {}, {} bytes", Unknown(name.0), v.0.len());
            }
        }
        Ok(r)
    }
}

/// Used for both curve25519 ([RFC8731](https://tools.ietf.org/html/rfc8731))
/// and fixed group Diffie-Hellman.
///
/// For Diffie-Hellman `q_c` holds the content of the `e` mpint.
#[derive(Debug)]
pub struct KexDHInit<'a> {
    pub q_c: BinString<'a>,
}
sshwire_struct!(KexDHInit<'a> { q_c });

#[derive(Debug)]
pub struct KexDHReply<'a> {
    pub k_s: Blob<PubKey<'a>>,
    pub q_s: BinString<'a>,
    pub sig: Blob<Signature<'a>>,
}
sshwire_struct!(KexDHReply<'a> { k_s, q_s, sig });

/// [RFC4419](https://tools.ietf.org/html/rfc4419) `SSH_MSG_KEX_DH_GEX_REQUEST`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexGexRequest {
    pub min: u32,
    pub preferred: u32,
    pub max: u32,
}
sshwire_struct!(KexGexRequest { min, preferred, max });

#[derive(Debug)]
pub struct KexGexGroup<'a> {
    pub p: MpInt<'a>,
    pub g: MpInt<'a>,
}
sshwire_struct!(KexGexGroup<'a> { p, g });

#[derive(Debug)]
pub struct KexGexInit<'a> {
    pub e: MpInt<'a>,
}
sshwire_struct!(KexGexInit<'a> { e });

#[derive(Debug)]
pub struct KexGexReply<'a> {
    pub k_s: Blob<PubKey<'a>>,
    pub f: MpInt<'a>,
    pub sig: Blob<Signature<'a>>,
}
sshwire_struct!(KexGexReply<'a> { k_s, f, sig });

/// Message number 31 is either `SSH_MSG_KEXDH_REPLY` or
/// `SSH_MSG_KEX_DH_GEX_GROUP`, depending on the negotiated method.
#[derive(Debug)]
pub enum Kex31<'a> {
    DhReply(KexDHReply<'a>),
    GexGroup(KexGexGroup<'a>),
}

impl SSHEncode for Kex31<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        match self {
            Kex31::DhReply(p) => p.enc(s),
            Kex31::GexGroup(p) => p.enc(s),
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Kex31<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        if s.ctx().kex_gex {
            Ok(Self::GexGroup(SSHDecode::dec(s)?))
        } else {
            Ok(Self::DhReply(SSHDecode::dec(s)?))
        }
    }
}

impl<'a> From<KexDHReply<'a>> for Packet<'a> {
    fn from(p: KexDHReply<'a>) -> Self {
        Packet::Kex31(Kex31::DhReply(p))
    }
}

impl<'a> From<KexGexGroup<'a>> for Packet<'a> {
    fn from(p: KexGexGroup<'a>) -> Self {
        Packet::Kex31(Kex31::GexGroup(p))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PubKey<'a> {
    Ed25519(Ed25519PubKey<'a>),
    Unknown(Unknown<'a>),
}

impl PubKey<'_> {
    /// The algorithm name presented. May be invalid.
    pub fn algorithm_name(&self) -> Result<&str, &Unknown<'_>> {
        match self {
            PubKey::Ed25519(_) => Ok(SSH_NAME_ED25519),
            PubKey::Unknown(u) => Err(u),
        }
    }
}

impl SSHEncode for PubKey<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        match self {
            PubKey::Ed25519(k) => {
                SSH_NAME_ED25519.enc(s)?;
                k.enc(s)
            }
            PubKey::Unknown(u) => {
                debug!("Can't encode unknown key {u}");
                Err(WireError::PacketWrong)
            }
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for PubKey<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let name = BinString::dec(s)?;
        if name.0 == SSH_NAME_ED25519.as_bytes() {
            Ok(PubKey::Ed25519(SSHDecode::dec(s)?))
        } else {
            // remainder is skipped by the enclosing Blob
            s.ctx().seen_unknown = true;
            Ok(PubKey::Unknown(Unknown(name.0)))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ed25519PubKey<'a> {
    pub key: BinString<'a>,
}
sshwire_struct!(Ed25519PubKey<'a> { key });

#[derive(Debug)]
pub enum Signature<'a> {
    Ed25519(Ed25519Sig<'a>),
    Unknown(Unknown<'a>),
}

impl<'a> Signature<'a> {
    /// The algorithm name presented. May be invalid.
    pub fn algorithm_name(&self) -> Result<&'a str, &Unknown<'a>> {
        match self {
            Signature::Ed25519(_) => Ok(SSH_NAME_ED25519),
            Signature::Unknown(u) => Err(u),
        }
    }
}

impl SSHEncode for Signature<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        match self {
            Signature::Ed25519(k) => {
                SSH_NAME_ED25519.enc(s)?;
                k.enc(s)
            }
            Signature::Unknown(u) => {
                debug!("Can't encode unknown signature {u}");
                Err(WireError::PacketWrong)
            }
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Signature<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let name = BinString::dec(s)?;
        if name.0 == SSH_NAME_ED25519.as_bytes() {
            Ok(Signature::Ed25519(SSHDecode::dec(s)?))
        } else {
            s.ctx().seen_unknown = true;
            Ok(Signature::Unknown(Unknown(name.0)))
        }
    }
}

#[derive(Debug)]
pub struct Ed25519Sig<'a> {
    pub sig: BinString<'a>,
}
sshwire_struct!(Ed25519Sig<'a> { sig });

/// Placeholder for unknown method names, for example newly invented
/// key types. Only ever received.
#[derive(Clone, PartialEq)]
pub struct Unknown<'a>(pub &'a [u8]);

impl fmt::Display for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = sshwire::try_as_ascii_str(self.0) {
            f.write_str(s)
        } else {
            write!(f, "non-ascii {:?}", self.0.hex_dump())
        }
    }
}

impl fmt::Debug for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// State to be passed to decoding.
/// Use this so the parser can select the correct enum variant to decode.
#[derive(Default, Clone, Debug)]
pub struct ParseContext {
    /// Message 31 is `SSH_MSG_KEX_DH_GEX_GROUP` rather than `SSH_MSG_KEXDH_REPLY`
    pub kex_gex: bool,

    // Set to true if an unknown variant is encountered.
    // Packet length checks should be omitted in that case.
    pub(crate) seen_unknown: bool,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// We have repeated `match` statements for the various packet types, use a macro
macro_rules! messagetypes {
    (
        $( ( $message_num:literal,
            $SpecificPacketVariant:ident,
            $SpecificPacketType:ty,
            $SSH_MESSAGE_NAME:ident,
            $category:ident
            ),
             )*
    ) => {

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum MessageNumber {
    // variants are eg
    // SSH_MSG_KEXINIT = 20,
    $(
    $SSH_MESSAGE_NAME = $message_num,
    )*
}

impl TryFrom<u8> for MessageNumber {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            $(
            $message_num => Ok(MessageNumber::$SSH_MESSAGE_NAME),
            )*
            _ => Err(Error::UnknownPacket { number: v }),
        }
    }
}

impl SSHEncode for Packet<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where S: SSHSink {
        let t = self.message_num() as u8;
        t.enc(s)?;
        match self {
            $(
            Packet::$SpecificPacketVariant(p) => p.enc(s),
            )*
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Packet<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where S: SSHSource<'de> {
        let msg_num = u8::dec(s)?;
        let ty = MessageNumber::try_from(msg_num)
            .map_err(|_| WireError::UnknownPacket { number: msg_num })?;

        let p = match ty {
            $(
            MessageNumber::$SSH_MESSAGE_NAME => Packet::$SpecificPacketVariant(SSHDecode::dec(s)?),
            )*
        };
        Ok(p)
    }
}

/// Top level SSH packet enum
#[derive(Debug)]
pub enum Packet<'a> {
    $(
    $SpecificPacketVariant($SpecificPacketType),
    )*
}

impl<'a> Packet<'a> {
    pub fn message_num(&self) -> MessageNumber {
        match self {
            $(
            Packet::$SpecificPacketVariant(_) => MessageNumber::$SSH_MESSAGE_NAME,
            )*
        }
    }

    pub fn category(&self) -> Category {
        match self {
            $(
            Packet::$SpecificPacketVariant(_) => Category::$category,
            )*
        }
    }
}

$(
impl<'a> From<$SpecificPacketType> for Packet<'a> {
    fn from(s: $SpecificPacketType) -> Packet<'a> {
        Packet::$SpecificPacketVariant(s)
    }
}
)*

} } // macro

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Allowed at any time.
    All,
    /// After kexinit, before newkeys complete. Other packets are not
    /// allowed during that time.
    Kex,
}

messagetypes![
(1, Disconnect, Disconnect<'a>, SSH_MSG_DISCONNECT, All),
(2, Ignore, Ignore<'a>, SSH_MSG_IGNORE, All),
(3, Unimplemented, Unimplemented, SSH_MSG_UNIMPLEMENTED, All),
(4, DebugPacket, DebugPacket<'a>, SSH_MSG_DEBUG, All),
(7, ExtInfo, ExtInfo, SSH_MSG_EXT_INFO, All),
(20, KexInit, KexInit, SSH_MSG_KEXINIT, All),
(21, NewKeys, NewKeys, SSH_MSG_NEWKEYS, Kex),
// 30 is also SSH_MSG_KEX_DH_GEX_REQUEST_OLD, not supported
(30, KexDHInit, KexDHInit<'a>, SSH_MSG_KEXDH_INIT, Kex),
// SSH_MSG_KEXDH_REPLY or SSH_MSG_KEX_DH_GEX_GROUP
(31, Kex31, Kex31<'a>, SSH_MSG_KEX_31, Kex),
(32, KexGexInit, KexGexInit<'a>, SSH_MSG_KEX_DH_GEX_INIT, Kex),
(33, KexGexReply, KexGexReply<'a>, SSH_MSG_KEX_DH_GEX_REPLY, Kex),
(34, KexGexRequest, KexGexRequest, SSH_MSG_KEX_DH_GEX_REQUEST, Kex),
];
