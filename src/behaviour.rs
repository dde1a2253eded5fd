#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::convert::Infallible;

use snafu::prelude::*;

use crate::*;
use namelist::NameList;
use packets::PubKey;
use sign::SignKey;
use sshwire::TextString;

pub type BhResult<T> = core::result::Result<T, BhError>;

/// At present only a single failure type is implemented
#[derive(Debug, Snafu)]
pub enum BhError {
    Fail,
}

/// Provides either client or server application behaviour
///
/// The actual behaviour is provided by [`CliBehaviour`] or [`ServBehaviour`].
pub enum Behaviour<'a, C: CliBehaviour, S: ServBehaviour> {
    Client(&'a mut C),
    Server(&'a mut S),
}

impl<'a, C: CliBehaviour> From<&'a mut C> for Behaviour<'a, C, UnusedServ> {
    fn from(b: &'a mut C) -> Self {
        Self::Client(b)
    }
}

impl<'a, S: ServBehaviour> From<&'a mut S> for Behaviour<'a, UnusedCli, S> {
    fn from(b: &'a mut S) -> Self {
        Self::Server(b)
    }
}

impl<'a, C, S> Behaviour<'a, C, S>
where
    C: CliBehaviour,
    S: ServBehaviour,
{
    /// Create a new client `Behaviour` instance
    pub fn new_client(b: &'a mut C) -> Behaviour<'a, C, UnusedServ> {
        Behaviour::<C, UnusedServ>::Client(b)
    }

    /// Create a new server `Behaviour` instance
    pub fn new_server(b: &'a mut S) -> Behaviour<'a, UnusedCli, S> {
        Behaviour::<UnusedCli, S>::Server(b)
    }

    /// Calls either client or server
    pub(crate) fn disconnected(&mut self, reason: u32, desc: TextString) {
        match self {
            Self::Client(b) => b.disconnected(reason, desc),
            Self::Server(b) => b.disconnected(reason, desc),
        }
    }

    pub(crate) fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    pub(crate) fn client(&mut self) -> Result<&mut C> {
        match self {
            Self::Client(c) => Ok(*c),
            _ => error::PacketWrong.fail(),
        }
    }

    pub(crate) fn server(&mut self) -> Result<&mut S> {
        match self {
            Self::Server(c) => Ok(*c),
            _ => error::PacketWrong.fail(),
        }
    }
}

/// Defines application behaviour as a client
pub trait CliBehaviour {
    /// Check that a server's hostkey is valid, the host key policy.
    ///
    /// Called before the server's signature is checked. Returning
    /// `Ok(false)` ends the connection.
    fn valid_hostkey(&mut self, key: &PubKey) -> BhResult<bool>;

    /// Called when the server sends `SSH_MSG_EXT_INFO` after the first exchange
    #[allow(unused_variables)]
    fn server_sig_algs(&mut self, algs: &NameList) {}

    /// Called when the connection has been ended by the server or locally.
    #[allow(unused_variables)]
    fn disconnected(&mut self, reason: u32, desc: TextString) {
        info!("Disconnect reason {reason}: {desc}");
    }
}

/// Defines application behaviour as a server
pub trait ServBehaviour {
    /// Provide the list of available host keys.
    ///
    /// One of them must be able to sign with the negotiated host key
    /// algorithm.
    fn hostkeys(&mut self) -> BhResult<heapless::Vec<&SignKey, 2>>;

    #[allow(unused_variables)]
    fn disconnected(&mut self, reason: u32, desc: TextString) {
        info!("Disconnect reason {reason}: {desc}");
    }
}

pub struct UnusedCli(Infallible);
impl CliBehaviour for UnusedCli {
    fn valid_hostkey(&mut self, _key: &PubKey) -> BhResult<bool> {
        match self.0 {}
    }
}

pub struct UnusedServ(Infallible);
impl ServBehaviour for UnusedServ {
    fn hostkeys(&mut self) -> BhResult<heapless::Vec<&SignKey, 2>> {
        match self.0 {}
    }
}
