//! SSH transport layer key exchange.
//!
//! Negotiates algorithms from KEXINIT proposals, runs curve25519,
//! fixed group or group exchange Diffie-Hellman, derives session keys
//! and handles rekeying. Packet framing and encryption are left to the
//! caller's [`Transport`].

#![forbid(unsafe_code)]

// avoids headscratching
#![deny(unused_must_use)]

pub mod sshwire;
pub mod packets;
pub mod sshnames;
pub mod config;
// exported so that error variants can be matched and created with .fail().
pub mod error;
pub mod random;

pub mod catalog;
pub mod namelist;
pub mod proposal;
pub mod negotiate;
pub mod groups;
pub mod dh;
pub mod gex;
pub mod keys;
pub mod traffic;

mod behaviour;
mod conn;
mod kex;
mod runner;
mod sign;
mod sunsetlog;

// Application API
pub use sshwire::TextString;

pub use behaviour::{Behaviour, BhError, BhResult, CliBehaviour, ServBehaviour};
pub use behaviour::{UnusedCli, UnusedServ};
pub use sign::{KeyType, OwnedSig, SigType, SignKey};
pub use packets::{PubKey, Signature};
pub use error::{Error, Result};

pub use config::{GexConfig, GroupPolicy, KexConfig, RekeyLimits};
pub use conn::{DispatchEvent, KexSession};
pub use keys::NegotiatedSet;
pub use runner::Runner;
pub use traffic::{MemMessage, MemTransport, Transport};
