#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use core::fmt::Arguments;

use snafu::prelude::*;

use crate::namelist::NameList;
use crate::sshnames::*;

/// The key exchange error type.
///
/// Any error returned from [`KexSession`](crate::KexSession) ends the
/// current pass and the connection with it, see [`Runner`](crate::Runner).
#[non_exhaustive]
#[derive(Snafu, Debug)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum Error {
    /// Output buffer ran out of room
    NoRoom,

    /// Input buffer ran out
    RanOut,

    /// Not a UTF-8 string
    BadString,

    /// Not a valid SSH ASCII string
    BadName,

    /// Integer overflow, or a negative or oversized mpint
    BadNumber,

    /// SSH packet contents doesn't match length
    WrongPacketLength,

    #[snafu(display("Unknown packet type {number}"))]
    UnknownPacket { number: u8 },

    /// A KEXINIT proposal is truncated or has trailing data
    MalformedProposal,

    #[snafu(display("No matching kex algorithm (client {client}, server {server})"))]
    NoKexAlgMatch { client: NameList, server: NameList },

    #[snafu(display("No matching hostkey algorithm (client {client}, server {server})"))]
    NoHostkeyAlgMatch { client: NameList, server: NameList },

    #[snafu(display("No matching cipher algorithm (client {client}, server {server})"))]
    NoCipherAlgMatch { client: NameList, server: NameList },

    #[snafu(display("No matching mac algorithm (client {client}, server {server})"))]
    NoMacAlgMatch { client: NameList, server: NameList },

    #[snafu(display("No matching compression algorithm (client {client}, server {server})"))]
    NoCompressAlgMatch { client: NameList, server: NameList },

    #[snafu(display("DH group exchange range out of bounds ({min}, {preferred}, {max})"))]
    DhGexOutOfRange { min: u32, preferred: u32, max: u32 },

    /// A key exchange public value or shared secret is out of range
    BadKexValue,

    /// Packet integrity failed
    BadDecrypt,

    /// Signature is incorrect
    BadSig,

    /// Received a key with invalid structure
    BadKey,

    /// Host key was rejected by the application
    HostKeyRejected,

    /// Error in received SSH protocol. Will disconnect.
    SSHProtoError,

    /// Received packet at a disallowed time.
    ///
    /// Internal to the key exchange, [`KexSession`](crate::KexSession)
    /// reports it as [`Error::ProtocolError`].
    PacketWrong,

    #[snafu(display("Unexpected message {msg} (sequence {seq})"))]
    ProtocolError { msg: u8, seq: u32 },

    #[snafu(display("Peer disconnected, reason {reason}"))]
    PeerDisconnected { reason: u32 },

    /// The session has already ended
    SessionClosed,

    /// An unknown SSH name is provided, for a key type, signature type etc.
    #[snafu(display("Unknown {kind} method"))]
    UnknownMethod { kind: &'static str },

    #[snafu(display("Failure from application: {msg}"))]
    BehaviourError { msg: &'static str },

    #[snafu(display("{msg}"))]
    Custom { msg: &'static str },

    // This state should not be reached, previous logic should have prevented it.
    // Create this using [`Error::bug()`] or [`.trap()`](TrapBug::trap).
    /// Program bug
    Bug,
}

impl Error {
    pub fn msg(m: &'static str) -> Error {
        Error::Custom { msg: m }
    }

    #[cold]
    #[track_caller]
    /// Panics in debug builds, returns [`Error::Bug`] in release.
    pub fn bug() -> Error {
        // Easier to track the source of errors in development,
        // but release builds shouldn't panic.
        if cfg!(debug_assertions) {
            panic!("Hit a bug");
        } else {
            Error::Bug
        }
    }

    /// Like [`bug()`](Error::bug) but with a message
    ///
    /// The message can be used instead of a code comment, is logged at `debug` level.
    #[cold]
    #[track_caller]
    pub fn bug_fmt(args: Arguments) -> Error {
        if cfg!(debug_assertions) {
            panic!("Hit a bug: {args}");
        } else {
            debug!("Hit a bug: {args}");
            Error::Bug
        }
    }

    #[cold]
    #[track_caller]
    pub fn bug_msg<T>(msg: &str) -> Result<T, Error> {
        Err(Self::bug_fmt(format_args!("{}", msg)))
    }

    /// The SSH disconnect reason code to send for this error.
    ///
    /// [RFC4253](https://tools.ietf.org/html/rfc4253) section 11.1
    pub fn disconnect_reason(&self) -> u32 {
        match self {
            Error::NoKexAlgMatch { .. }
            | Error::NoHostkeyAlgMatch { .. }
            | Error::NoCipherAlgMatch { .. }
            | Error::NoMacAlgMatch { .. }
            | Error::NoCompressAlgMatch { .. }
            | Error::DhGexOutOfRange { .. }
            | Error::BadKexValue
            | Error::BadSig => SSH_DISCONNECT_KEY_EXCHANGE_FAILED,

            Error::BadDecrypt => SSH_DISCONNECT_MAC_ERROR,

            Error::HostKeyRejected | Error::BadKey => {
                SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE
            }

            Error::RanOut
            | Error::BadString
            | Error::BadName
            | Error::BadNumber
            | Error::WrongPacketLength
            | Error::UnknownPacket { .. }
            | Error::MalformedProposal
            | Error::SSHProtoError
            | Error::PacketWrong
            | Error::ProtocolError { .. } => SSH_DISCONNECT_PROTOCOL_ERROR,

            _ => SSH_DISCONNECT_BY_APPLICATION,
        }
    }
}

/// A key exchange Result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub trait TrapBug<T> {
    /// `.trap()` should be used like `.unwrap()`, in situations
    /// never expected to fail. Instead it calls [`Error::bug()`].
    /// (or debug builds may panic)
    fn trap(self) -> Result<T, Error>;

    /// Like `trap()` but with a message, calls [`Error::bug_fmt()`]
    fn trap_msg(self, args: Arguments) -> Result<T, Error>;
}

impl<T, E> TrapBug<T> for Result<T, E> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        // call directly so that Location::caller() works
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }

    #[track_caller]
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug_fmt(args))
        }
    }
}

impl<T> TrapBug<T> for Option<T> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }

    #[track_caller]
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug_fmt(args))
        }
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(_e: core::str::Utf8Error) -> Error {
        Error::BadString
    }
}

#[cfg(test)]
mod tests {
    use crate::error::*;
    use crate::sunsetlog::init_test_log;

    #[test]
    fn disconnect_reasons() {
        init_test_log();
        let e = Error::DhGexOutOfRange { min: 100, preferred: 50, max: 200 };
        assert_eq!(e.disconnect_reason(), SSH_DISCONNECT_KEY_EXCHANGE_FAILED);
        assert_eq!(e.to_string(), "DH group exchange range out of bounds (100, 50, 200)");

        let e = Error::ProtocolError { msg: 50, seq: 3 };
        assert_eq!(e.disconnect_reason(), SSH_DISCONNECT_PROTOCOL_ERROR);

        assert_eq!(Error::HostKeyRejected.disconnect_reason(),
            SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE);
        assert_eq!(Error::msg("stop").disconnect_reason(),
            SSH_DISCONNECT_BY_APPLICATION);
    }

    #[test]
    fn nomatch_display() {
        let e = Error::NoCipherAlgMatch {
            client: "aes256-ctr".try_into().unwrap(),
            server: "aes128-ctr,aes192-ctr".try_into().unwrap(),
        };
        assert_eq!(e.to_string(),
            "No matching cipher algorithm (client \"aes256-ctr\", server \"aes128-ctr,aes192-ctr\")");
    }

    #[test]
    #[should_panic]
    fn trap_none() {
        let n: Option<u8> = None;
        let _ = n.trap();
    }
}
