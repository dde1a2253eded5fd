//! SSH wire format reading/writing.
//!
//! Used with the [`packet`](crate::packets) format definitions.
//! Plain structs get their implementations from [`sshwire_struct!`].

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt::{self, Debug};
use pretty_hex::PrettyHex;

use ascii::{AsAsciiStr, AsciiChar, AsciiStr};

use crate::*;
use packets::{Packet, ParseContext};

/// A generic destination for serializing, used similarly to `serde::Serializer`
pub trait SSHSink {
    fn push(&mut self, v: &[u8]) -> WireResult<()>;
}

/// A generic source for a packet, used similarly to `serde::Deserializer`
pub trait SSHSource<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]>;
    fn pos(&self) -> usize;
    fn ctx(&mut self) -> &mut ParseContext;
}

/// Encodes the type in SSH wire format
pub trait SSHEncode {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink;
}

/// Decodes `struct` and `enum`s
pub trait SSHDecode<'de>: Sized {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>;
}

/// A subset of [`Error`] for `SSHEncode` and `SSHDecode`.
#[derive(Debug)]
pub enum WireError {
    NoRoom,

    RanOut,

    BadString,

    BadName,

    BadNumber,

    PacketWrong,

    SSHProtoError,

    UnknownPacket { number: u8 },
}

impl From<WireError> for Error {
    fn from(w: WireError) -> Self {
        match w {
            WireError::NoRoom => Error::NoRoom,
            WireError::RanOut => Error::RanOut,
            WireError::BadString => Error::BadString,
            WireError::BadName => Error::BadName,
            WireError::BadNumber => Error::BadNumber,
            WireError::SSHProtoError => Error::SSHProtoError,
            WireError::PacketWrong => Error::PacketWrong,
            WireError::UnknownPacket { number } => Error::UnknownPacket { number },
        }
    }
}

pub type WireResult<T> = core::result::Result<T, WireError>;

/// Implements [`SSHEncode`] and [`SSHDecode`] for a plain struct.
///
/// Fields are listed in wire order.
macro_rules! sshwire_struct {
    ($name:ident $(<$lt:lifetime>)? { $($field:ident),* $(,)? }) => {
        impl$(<$lt>)? $crate::sshwire::SSHEncode for $name$(<$lt>)? {
            #[allow(unused_variables)]
            fn enc<S>(&self, s: &mut S) -> $crate::sshwire::WireResult<()>
            where
                S: $crate::sshwire::SSHSink,
            {
                $( $crate::sshwire::SSHEncode::enc(&self.$field, s)?; )*
                Ok(())
            }
        }

        impl<'de $(: $lt, $lt)?> $crate::sshwire::SSHDecode<'de> for $name$(<$lt>)? {
            #[allow(unused_variables)]
            fn dec<S>(s: &mut S) -> $crate::sshwire::WireResult<Self>
            where
                S: $crate::sshwire::SSHSource<'de>,
            {
                Ok(Self {
                    $( $field: $crate::sshwire::SSHDecode::dec(s)?, )*
                })
            }
        }
    };
}
pub(crate) use sshwire_struct;

///////////////////////////////////////////////

/// Parses a [`Packet`] from a borrowed `&[u8]` byte buffer.
pub fn packet_from_bytes<'a>(b: &'a [u8], ctx: &ParseContext) -> Result<Packet<'a>> {
    let ctx = ParseContext { seen_unknown: false, ..ctx.clone() };
    let mut s = DecodeBytes { input: b, pos: 0, parse_ctx: ctx };
    let p = Packet::dec(&mut s)?;

    if s.pos() != b.len() && !s.ctx().seen_unknown {
        // No length check if the packet had an unknown variant
        // - it skipped parsing the remainder of the packet.
        Err(Error::WrongPacketLength)
    } else {
        Ok(p)
    }
}

/// Decodes a `T`. Trailing input is not an error.
pub fn read_ssh<'a, T: SSHDecode<'a>>(b: &'a [u8], ctx: Option<ParseContext>) -> Result<T> {
    let mut s = DecodeBytes { input: b, pos: 0, parse_ctx: ctx.unwrap_or_default() };
    Ok(T::dec(&mut s)?)
}

/// Serializes `value` into a new `Vec`
pub fn write_ssh<T>(value: &T) -> Result<Vec<u8>>
where
    T: SSHEncode,
{
    let len = length_enc(value)? as usize;
    let mut s = EncodeVec { target: Vec::with_capacity(len) };
    value.enc(&mut s)?;
    Ok(s.target)
}

/// Hashes the SSH wire format representation of `value`, with a `u32` length prefix.
pub fn hash_ser_length<T>(hash_ctx: &mut dyn digest::DynDigest, value: &T) -> Result<()>
where
    T: SSHEncode,
{
    let len: u32 = length_enc(value)?;
    hash_ctx.update(&len.to_be_bytes());
    hash_ser(hash_ctx, value)
}

/// Hashes the SSH wire format representation of `value`
pub fn hash_ser<T>(hash_ctx: &mut dyn digest::DynDigest, value: &T) -> Result<()>
where
    T: SSHEncode,
{
    let mut s = EncodeHash { hash_ctx };
    value.enc(&mut s)?;
    Ok(())
}

/// Returns `WireError::NoRoom` if larger than `u32`
pub(crate) fn length_enc<T>(value: &T) -> WireResult<u32>
where
    T: SSHEncode,
{
    let mut s = EncodeLen { pos: 0 };
    value.enc(&mut s)?;
    s.pos.try_into().map_err(|_| WireError::NoRoom)
}

struct EncodeVec {
    target: Vec<u8>,
}

impl SSHSink for EncodeVec {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.target.extend_from_slice(v);
        Ok(())
    }
}

struct EncodeLen {
    pos: usize,
}

impl SSHSink for EncodeLen {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.pos += v.len();
        Ok(())
    }
}

struct EncodeHash<'a> {
    hash_ctx: &'a mut dyn digest::DynDigest,
}

impl SSHSink for EncodeHash<'_> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.hash_ctx.update(v);
        Ok(())
    }
}

struct DecodeBytes<'a> {
    input: &'a [u8],
    pos: usize,
    parse_ctx: ParseContext,
}

impl<'de> SSHSource<'de> for DecodeBytes<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]> {
        if len > self.input.len() {
            return Err(WireError::RanOut);
        }
        let t;
        (t, self.input) = self.input.split_at(len);
        self.pos += len;
        Ok(t)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn ctx(&mut self) -> &mut ParseContext {
        &mut self.parse_ctx
    }
}

/// Strips leading zero bytes, leaving the minimal unsigned magnitude.
pub fn mpint_trim(m: &[u8]) -> &[u8] {
    let z = m.iter().take_while(|b| **b == 0).count();
    &m[z..]
}

// Hashes a slice to be treated as a mpint. Has u32 length prefix
// and an extra 0x00 byte if the MSB is set.
pub fn hash_mpint(hash_ctx: &mut dyn digest::DynDigest, m: &[u8]) {
    let m = mpint_trim(m);
    let pad = !m.is_empty() && (m[0] & 0x80) != 0;
    let l = m.len() as u32 + pad as u32;
    hash_ctx.update(&l.to_be_bytes());
    if pad {
        hash_ctx.update(&[0x00]);
    }
    hash_ctx.update(m);
}

///////////////////////////////////////////////

/// A SSH style binary string. Serialized as `u32` length followed by the bytes
/// of the slice.
#[derive(Clone, PartialEq)]
pub struct BinString<'a>(pub &'a [u8]);

impl<'a> AsRef<[u8]> for BinString<'a> {
    fn as_ref(&self) -> &'a [u8] {
        self.0
    }
}

impl Debug for BinString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinString(len={})", self.0.len())
    }
}

impl SSHEncode for BinString<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        (self.0.len() as u32).enc(s)?;
        self.0.enc(s)
    }
}

impl<'de> SSHDecode<'de> for BinString<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let len = u32::dec(s)? as usize;
        Ok(BinString(s.take(len)?))
    }
}

/// A text string that may be presented to a user, such as a
/// disconnect or debug message.
///
/// The SSH protocol defines it to be UTF-8, the library treats it
/// as opaque `&[u8]`.
#[derive(Clone, PartialEq, Copy)]
pub struct TextString<'a>(pub &'a [u8]);

impl<'a> TextString<'a> {
    /// Returns the UTF-8 decoded string, using [`core::str::from_utf8`]
    pub fn as_str(&self) -> Result<&'a str> {
        core::str::from_utf8(self.0).map_err(|_| Error::BadString)
    }
}

impl<'a> From<&'a str> for TextString<'a> {
    fn from(s: &'a str) -> Self {
        TextString(s.as_bytes())
    }
}

impl Debug for TextString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = core::str::from_utf8(self.0);
        if let Ok(s) = s {
            write!(f, "TextString(\"{}\")", s.escape_default())
        } else {
            write!(f, "TextString(not utf8!, {:#?})", self.0.hex_dump())
        }
    }
}

impl fmt::Display for TextString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(self.0) {
            Ok(s) => write!(f, "{}", s.escape_default()),
            Err(_) => write!(f, "(not utf8)"),
        }
    }
}

impl SSHEncode for TextString<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        BinString(self.0).enc(s)
    }
}

impl<'de> SSHDecode<'de> for TextString<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        Ok(TextString(BinString::dec(s)?.0))
    }
}

/// Largest mpint accepted from the wire, 8192 bits plus a sign byte.
pub const MAX_MPINT_LEN: usize = 8192 / 8 + 1;

/// An unsigned SSH `mpint`.
///
/// Holds the big-endian magnitude with leading zeros removed. Encoding
/// adds a `0x00` byte when the high bit is set. Decoding rejects negative,
/// non-minimal and oversized values.
#[derive(Clone, PartialEq)]
pub struct MpInt<'a>(pub &'a [u8]);

impl<'a> MpInt<'a> {
    /// Interprets the contents of a SSH `string` as an mpint.
    pub fn from_content(b: &'a [u8]) -> WireResult<Self> {
        if b.len() > MAX_MPINT_LEN {
            return Err(WireError::BadNumber);
        }
        if b.first().is_some_and(|c| c & 0x80 != 0) {
            trace!("negative mpint");
            return Err(WireError::BadNumber);
        }
        // a zero byte is only allowed as sign padding
        if b.len() > 1 && b[0] == 0 && b[1] & 0x80 == 0 {
            trace!("non-minimal mpint");
            return Err(WireError::BadNumber);
        }
        Ok(MpInt(mpint_trim(b)))
    }

    pub fn bits(&self) -> u32 {
        let m = mpint_trim(self.0);
        match m.first() {
            Some(c) => (m.len() as u32 - 1) * 8 + (8 - c.leading_zeros()),
            None => 0,
        }
    }
}

impl Debug for MpInt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MpInt(bits={})", self.bits())
    }
}

impl SSHEncode for MpInt<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let m = mpint_trim(self.0);
        let pad = !m.is_empty() && (m[0] & 0x80) != 0;
        (m.len() as u32 + pad as u32).enc(s)?;
        if pad {
            0u8.enc(s)?;
        }
        m.enc(s)
    }
}

impl<'de> SSHDecode<'de> for MpInt<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        MpInt::from_content(BinString::dec(s)?.0)
    }
}

/// A wrapper for a `u32` length prefixed data structure `B`, such as a public key blob
pub struct Blob<B>(pub B);

impl<B> AsRef<B> for Blob<B> {
    fn as_ref(&self) -> &B {
        &self.0
    }
}

impl<B: Clone> Clone for Blob<B> {
    fn clone(&self) -> Self {
        Blob(self.0.clone())
    }
}

impl<B: SSHEncode + Debug> Debug for Blob<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(len) = length_enc(&self.0) {
            write!(f, "Blob(len={len}, {:?})", self.0)
        } else {
            write!(f, "Blob(len>u32, {:?})", self.0)
        }
    }
}

impl<B: SSHEncode> SSHEncode for Blob<B> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let len: u32 = length_enc(&self.0)?;
        len.enc(s)?;
        self.0.enc(s)
    }
}

impl<'de, B: SSHDecode<'de>> SSHDecode<'de> for Blob<B> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let len = u32::dec(s)? as usize;
        let pos1 = s.pos();
        let inner = SSHDecode::dec(s)?;
        let pos2 = s.pos();

        // Sanity check the length matched
        let used_len = pos2 - pos1;
        if used_len == len {
            Ok(Blob(inner))
        } else {
            let extra = len.checked_sub(used_len).ok_or_else(|| {
                trace!(
                    "inner consumed past length of SSH Blob. \
                    Expected {} bytes, got {} bytes {}..{}",
                    len,
                    pos2 - pos1,
                    pos1,
                    pos2
                );
                WireError::SSHProtoError
            })?;
            // Skip over unconsumed bytes in the blob.
            // This can occur with Unknown variants
            s.take(extra)?;
            Ok(Blob(inner))
        }
    }
}

///////////////////////////////////////////////

impl SSHEncode for u8 {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(&[*self])
    }
}

impl SSHEncode for bool {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        (*self as u8).enc(s)
    }
}

impl SSHEncode for u32 {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(&self.to_be_bytes())
    }
}

// no length prefix
impl SSHEncode for &[u8] {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(self)
    }
}

// no length prefix
impl<const N: usize> SSHEncode for [u8; N] {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(self)
    }
}

impl SSHEncode for &str {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        BinString(self.as_bytes()).enc(s)
    }
}

impl<T: SSHEncode> SSHEncode for Option<T> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        if let Some(t) = self.as_ref() {
            t.enc(s)?;
        }
        Ok(())
    }
}

impl<'de> SSHDecode<'de> for bool {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        Ok(u8::dec(s)? != 0)
    }
}

impl<'de> SSHDecode<'de> for u8 {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let t = s.take(1)?;
        Ok(t[0])
    }
}

impl<'de> SSHDecode<'de> for u32 {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let t = take_array::<S, 4>(s)?;
        Ok(u32::from_be_bytes(t))
    }
}

impl<'de, const N: usize> SSHDecode<'de> for [u8; N] {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        take_array::<S, N>(s)
    }
}

fn take_array<'de, S, const N: usize>(s: &mut S) -> WireResult<[u8; N]>
where
    S: SSHSource<'de>,
{
    let mut l = [0u8; N];
    l.copy_from_slice(s.take(N)?);
    Ok(l)
}

/// Decodes a SSH name string. Must be ASCII
/// without control characters. RFC4251 section 6.
pub fn try_as_ascii(t: &[u8]) -> WireResult<&AsciiStr> {
    let n = t.as_ascii_str().map_err(|_| WireError::BadName)?;
    if n.chars().any(|ch| ch.is_ascii_control() || ch == AsciiChar::DEL) {
        return Err(WireError::BadName);
    }
    Ok(n)
}

pub fn try_as_ascii_str(t: &[u8]) -> WireResult<&str> {
    try_as_ascii(t).map(AsciiStr::as_str)
}

impl<'de: 'a, 'a> SSHDecode<'de> for &'a str {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let b = BinString::dec(s)?;
        try_as_ascii_str(b.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::sshwire::*;
    use crate::sunsetlog::init_test_log;

    /// Checks that two items serialize the same
    pub fn assert_serialize_equal<T: SSHEncode>(p1: &T, p2: &T) {
        assert_eq!(write_ssh(p1).unwrap(), write_ssh(p2).unwrap());
    }

    #[test]
    /// check that hash_ser_length() matches hashing a serialized message
    fn test_hash_packet() {
        use digest::Digest;
        use sha2::Sha256;
        let input = "hello";
        let buf = write_ssh(&input).unwrap();
        let w1 = buf.len();

        // hash_ser_length
        let mut hash_ctx = Sha256::new();
        hash_ser_length(&mut hash_ctx, &input).unwrap();
        let digest1 = hash_ctx.finalize();

        let mut hash_ctx = Sha256::new();
        Digest::update(&mut hash_ctx, (w1 as u32).to_be_bytes());
        Digest::update(&mut hash_ctx, &buf);
        let digest2 = hash_ctx.finalize();

        assert_eq!(digest1, digest2);

        // hash_ser
        let mut hash_ctx = Sha256::new();
        Digest::update(&mut hash_ctx, (w1 as u32).to_be_bytes());
        hash_ser(&mut hash_ctx, &input).unwrap();
        let digest3 = hash_ctx.finalize();
        assert_eq!(digest3, digest2);
    }

    #[test]
    fn mpint_encoding() {
        init_test_log();
        // RFC4251 section 5 examples
        assert_eq!(write_ssh(&MpInt(&[])).unwrap(), [0, 0, 0, 0]);
        assert_eq!(
            write_ssh(&MpInt(&[0x09, 0xa3, 0x78, 0xf9, 0xb2, 0xe3, 0x32, 0xa7])).unwrap(),
            [0, 0, 0, 8, 0x09, 0xa3, 0x78, 0xf9, 0xb2, 0xe3, 0x32, 0xa7]
        );
        assert_eq!(write_ssh(&MpInt(&[0x80])).unwrap(), [0, 0, 0, 2, 0x00, 0x80]);
        // leading zeros are dropped
        assert_eq!(write_ssh(&MpInt(&[0, 0, 0x7f])).unwrap(), [0, 0, 0, 1, 0x7f]);

        let m: MpInt = read_ssh(&[0, 0, 0, 2, 0x00, 0x80], None).unwrap();
        assert_eq!(m.0, &[0x80]);
        assert_eq!(m.bits(), 8);

        // negative
        let r: Result<MpInt> = read_ssh(&[0, 0, 0, 2, 0xed, 0xcc], None);
        assert!(matches!(r, Err(Error::BadNumber)));

        // redundant leading zeros
        let r: Result<MpInt> = read_ssh(&[0, 0, 0, 2, 0x00, 0x7f], None);
        assert!(matches!(r, Err(Error::BadNumber)));
        let r: Result<MpInt> = read_ssh(&[0, 0, 0, 3, 0x00, 0x00, 0x80], None);
        assert!(matches!(r, Err(Error::BadNumber)));
        assert!(MpInt::from_content(&[0x00, 0x01]).is_err());

        // too long
        let mut big = vec![0u8; 4 + MAX_MPINT_LEN + 1];
        big[..4].copy_from_slice(&((MAX_MPINT_LEN + 1) as u32).to_be_bytes());
        big[5] = 1;
        let r: Result<MpInt> = read_ssh(&big, None);
        assert!(matches!(r, Err(Error::BadNumber)));
    }

    #[test]
    fn hash_mpint_matches_encoding() {
        use digest::Digest;
        use sha2::Sha256;
        for v in [&[0x00u8, 0x00, 0x12][..], &[0xff, 0x01], &[]] {
            let mut h1 = Sha256::new();
            hash_mpint(&mut h1, v);
            let mut h2 = Sha256::new();
            Digest::update(&mut h2, write_ssh(&MpInt(v)).unwrap());
            assert_eq!(h1.finalize(), h2.finalize());
        }
    }

    #[test]
    fn ascii_names() {
        assert!(try_as_ascii_str(b"aes256-ctr").is_ok());
        assert!(try_as_ascii_str(b"bad\nname").is_err());
        assert!(try_as_ascii_str(&[0xc3, 0xa9]).is_err());
    }

    #[test]
    fn truncated() {
        let r: Result<BinString> = read_ssh(&[0, 0, 0, 5, 1, 2], None);
        assert!(matches!(r, Err(Error::RanOut)));
    }
}
