//! Drives key exchange passes for one SSH connection.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::time::Duration;

use pretty_hex::PrettyHex;

use crate::*;
use behaviour::{Behaviour, CliBehaviour, ServBehaviour};
use config::KexConfig;
use kex::{Kex, KexCtx};
use keys::SessId;
use namelist::NameList;
use negotiate::Chosen;
use packets::{Category, Kex31, Packet, ParseContext};
use traffic::{TrafSend, Transport};

// must_use so return values can't be forgotten in KexSession::dispatch_packet
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// Both directions have switched to new keys.
    ///
    /// `first` is set for the initial exchange, the session id is
    /// available from then on.
    KexDone { first: bool },
    /// The server sent `SSH_MSG_EXT_INFO`, see [`KexSession::server_sig_algs()`]
    ExtInfo,
    /// Not a transport layer message, the caller should pass it on.
    Forward,
    /// No event
    None,
}

impl Default for DispatchEvent {
    fn default() -> Self {
        Self::None
    }
}

/// Key exchange state for a connection.
///
/// Created before any binary packet is read and kept for the lifetime of
/// the connection. Each received payload is passed to [`handle_payload()`](Self::handle_payload),
/// responses are written to the [`Transport`].
pub struct KexSession {
    // State of any current Key Exchange
    kex: Kex,

    ctx: KexCtx,

    sess_id: Option<SessId>,

    /// The initial exchange has completed
    first_done: bool,

    parse_ctx: ParseContext,

    server_sig_algs: Option<NameList>,

    /// Traffic allowed before a rekey is due, in bytes
    rekey_bytes: u64,
}

impl core::fmt::Debug for KexSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KexSession")
            .field("kex", &self.kex)
            .field("is_client", &self.ctx.is_client)
            .field("first_done", &self.first_done)
            .finish_non_exhaustive()
    }
}

impl KexSession {
    /// `client_ident` and `server_ident` are the identification strings
    /// exchanged before binary packets, without the trailing CR LF.
    pub fn new_client(conf: KexConfig, client_ident: &[u8], server_ident: &[u8]) -> Result<Self> {
        Self::new(conf, true, client_ident, server_ident)
    }

    pub fn new_server(conf: KexConfig, client_ident: &[u8], server_ident: &[u8]) -> Result<Self> {
        Self::new(conf, false, client_ident, server_ident)
    }

    fn new(conf: KexConfig, is_client: bool, client_ident: &[u8], server_ident: &[u8]) -> Result<Self> {
        conf.validate()?;
        let rekey_bytes = conf.rekey.bytes;
        let ctx = KexCtx {
            conf,
            is_client,
            client_ident: client_ident.to_vec(),
            server_ident: server_ident.to_vec(),
            strict_kex: false,
        };
        Ok(Self {
            kex: Kex::new(),
            ctx,
            sess_id: None,
            first_done: false,
            parse_ctx: ParseContext::new(),
            server_sig_algs: None,
            rekey_bytes,
        })
    }

    /// Sends our initial KEXINIT.
    ///
    /// Optional, a KEXINIT is sent in reply to the peer's otherwise.
    /// Sending early avoids a round trip.
    pub fn start(&mut self, t: &mut dyn Transport) -> Result<()> {
        if self.first_done || !self.kex.is_idle() {
            trace!("Initial KEXINIT already sent");
            return Ok(());
        }
        let p = self.ctx.conf.local_proposal(self.ctx.is_client, true)?;
        self.kex.send_kexinit(p, &mut TrafSend::new(t))
    }

    /// Begins a new key exchange on an established connection.
    ///
    /// Only valid when [`done()`](Self::done), calling it during an
    /// exchange is a program bug.
    pub fn start_rekex(&mut self, t: &mut dyn Transport) -> Result<()> {
        if !self.done() {
            return Err(Error::bug_fmt(format_args!("Rekey requested during key exchange")));
        }
        info!("Starting rekey");
        let p = self.ctx.conf.local_proposal(self.ctx.is_client, false)?;
        self.kex.send_kexinit(p, &mut TrafSend::new(t))
    }

    /// The initial exchange has completed and no other is in progress.
    pub fn done(&self) -> bool {
        self.first_done && self.kex.is_idle()
    }

    /// No exchange has completed yet
    pub fn is_initial(&self) -> bool {
        !self.first_done
    }

    pub fn is_client(&self) -> bool {
        self.ctx.is_client
    }

    /// The first exchange hash, fixed for the connection
    pub fn session_id(&self) -> Option<&[u8]> {
        self.sess_id.as_deref()
    }

    /// Signature algorithms the server accepts for user authentication,
    /// from `SSH_MSG_EXT_INFO`. Client only.
    pub fn server_sig_algs(&self) -> Option<&NameList> {
        self.server_sig_algs.as_ref()
    }

    /// Whether the transport should call [`start_rekex()`](Self::start_rekex).
    ///
    /// `bytes` is traffic in either direction under the current keys,
    /// `elapsed` is time since they were installed.
    pub fn rekey_due(&self, bytes: u64, elapsed: Duration) -> bool {
        self.done() && (bytes >= self.rekey_bytes || elapsed >= self.ctx.conf.rekey.time)
    }

    /// Consumes a received payload.
    ///
    /// `seq` is the packet's receive sequence number.
    pub fn handle_payload<C: CliBehaviour, S: ServBehaviour>(
        &mut self,
        payload: &[u8],
        seq: u32,
        t: &mut dyn Transport,
        b: &mut Behaviour<C, S>,
    ) -> Result<DispatchEvent> {
        if b.is_client() != self.ctx.is_client {
            return Error::bug_msg("Behaviour doesn't match session");
        }
        let num = *payload.first().ok_or(Error::RanOut)?;

        // Method specific numbers
        if (30..=49).contains(&num) && self.kex.maybe_discard() {
            debug!("Discarding guessed kex packet {num}");
            return Ok(DispatchEvent::None);
        }

        let mut s = TrafSend::new(t);
        let r = match sshwire::packet_from_bytes(payload, &self.parse_ctx) {
            Ok(p) => self.dispatch_packet(p, payload, seq, &mut s, b),
            Err(Error::UnknownPacket { number }) => self.unknown(number, seq, &mut s),
            Err(e) => {
                debug!("Error decoding packet: {e}");
                trace!("Input:\n{:#?}", payload.hex_dump());
                Err(e)
            }
        };
        self.parse_ctx.kex_gex = self.kex.kex_gex();

        match r {
            Err(Error::PacketWrong) => self.unexpected(num, seq, &mut s),
            r => r,
        }
    }

    /// A message number we don't parse
    fn unknown(&mut self, number: u8, seq: u32, s: &mut TrafSend) -> Result<DispatchEvent> {
        let between = matches!(self.kex, Kex::Idle | Kex::KexInit { .. });
        if self.first_done && between {
            trace!("Forwarding message {number}");
            Ok(DispatchEvent::Forward)
        } else {
            self.unexpected(number, seq, s)
        }
    }

    /// Fatal before the first exchange completes, later the peer is told
    /// with `SSH_MSG_UNIMPLEMENTED`.
    fn unexpected(&mut self, msg: u8, seq: u32, s: &mut TrafSend) -> Result<DispatchEvent> {
        debug!("Unexpected message {msg}, seq {seq}");
        trace!("state is {:?}", self.kex);
        if self.first_done {
            s.send(packets::Unimplemented { seq })?;
            Ok(DispatchEvent::None)
        } else {
            Err(Error::ProtocolError { msg, seq })
        }
    }

    /// Check that a packet is received in the correct state
    fn check_packet(&self, p: &Packet) -> Result<()> {
        if self.is_initial() && self.kex.is_strict() {
            // Strict Kex doesn't allow even packets like Ignore or Debug
            match p {
                Packet::Disconnect(_) => Ok(()),
                _ if p.category() == Category::Kex => Ok(()),
                _ => {
                    debug!("Non-kex packet during strict kex");
                    error::PacketWrong.fail()
                }
            }
        } else {
            Ok(())
        }
    }

    fn dispatch_packet<C: CliBehaviour, S: ServBehaviour>(
        &mut self,
        packet: Packet,
        payload: &[u8],
        seq: u32,
        s: &mut TrafSend,
        b: &mut Behaviour<C, S>,
    ) -> Result<DispatchEvent> {
        trace!("Incoming {packet:#?}");
        self.check_packet(&packet)?;

        let mut ev = DispatchEvent::None;
        match packet {
            Packet::KexInit(_) => {
                // the exact bytes are hashed
                self.kex.handle_kexinit(payload, seq, self.is_initial(), &self.ctx, s)?;
            }
            Packet::KexDHInit(p) => {
                self.kex.handle_kexdhinit(&p, &mut self.sess_id, &self.ctx, s, b.server()?)?;
            }
            Packet::Kex31(Kex31::DhReply(p)) => {
                self.kex.handle_kexdhreply(&p, &mut self.sess_id, &self.ctx, s, b.client()?)?;
            }
            Packet::Kex31(Kex31::GexGroup(p)) => {
                b.client()?;
                self.kex.handle_gex_group(&p, s)?;
            }
            Packet::KexGexRequest(p) => {
                b.server()?;
                self.kex.handle_gex_request(&p, &self.ctx, s)?;
            }
            Packet::KexGexInit(p) => {
                self.kex.handle_gex_init(&p, &mut self.sess_id, &self.ctx, s, b.server()?)?;
            }
            Packet::KexGexReply(p) => {
                self.kex.handle_gex_reply(&p, &mut self.sess_id, &self.ctx, s, b.client()?)?;
            }
            Packet::NewKeys(_) => {
                let chosen = self.kex.handle_newkeys(&self.ctx, s)?;
                ev = self.kex_done(&chosen)?;
            }
            Packet::ExtInfo(p) => {
                if !self.ctx.is_client {
                    debug!("Ignoring ext-info from client");
                } else if let Some(algs) = p.server_sig_algs {
                    debug!("server-sig-algs {algs}");
                    b.client()?.server_sig_algs(&algs);
                    self.server_sig_algs = Some(algs);
                    ev = DispatchEvent::ExtInfo;
                }
            }
            Packet::Ignore(_) => {
                // nothing to do
            }
            Packet::Unimplemented(p) => {
                warn!("Received SSH unimplemented message for seq {}", p.seq);
            }
            Packet::DebugPacket(p) => {
                let level = match p.always_display {
                    true => log::Level::Info,
                    false => log::Level::Debug,
                };
                log!(level, "SSH debug message from remote host: {}", p.message);
            }
            Packet::Disconnect(p) => {
                b.disconnected(p.reason, p.desc);
                return error::PeerDisconnected { reason: p.reason }.fail();
            }
        };
        Ok(ev)
    }

    fn kex_done(&mut self, chosen: &Chosen) -> Result<DispatchEvent> {
        let first = self.is_initial();
        self.first_done = true;
        if chosen.strict_kex {
            self.ctx.strict_kex = true;
        }

        let mut limit = self.ctx.conf.rekey.bytes;
        for enc in [chosen.enc_out, chosen.enc_in] {
            let bs = enc.cipher().trap()?.block_size;
            limit = limit.min(keys::max_blocks(bs).saturating_mul(bs as u64));
        }
        self.rekey_bytes = limit;

        if first {
            info!("Key exchange complete, {}", chosen.kex.name);
        } else {
            info!("Rekey complete, {}", chosen.kex.name);
        }
        Ok(DispatchEvent::KexDone { first })
    }
}
