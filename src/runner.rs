#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::*;
use behaviour::{Behaviour, CliBehaviour, ServBehaviour};
use config::KexConfig;
use conn::{DispatchEvent, KexSession};
use traffic::{TrafSend, Transport};

/// Owns a [`KexSession`] and its transport.
///
/// Any error ends the session. The peer is sent `SSH_MSG_DISCONNECT` with
/// a reason code for the error, and further input is refused.
pub struct Runner<T: Transport> {
    sess: KexSession,
    transport: T,
    closed: bool,
}

impl<T: Transport> core::fmt::Debug for Runner<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runner")
            .field("sess", &self.sess)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Runner<T> {
    pub fn new_client(
        conf: KexConfig,
        transport: T,
        client_ident: &[u8],
        server_ident: &[u8],
    ) -> Result<Self> {
        let sess = KexSession::new_client(conf, client_ident, server_ident)?;
        Ok(Self { sess, transport, closed: false })
    }

    pub fn new_server(
        conf: KexConfig,
        transport: T,
        client_ident: &[u8],
        server_ident: &[u8],
    ) -> Result<Self> {
        let sess = KexSession::new_server(conf, client_ident, server_ident)?;
        Ok(Self { sess, transport, closed: false })
    }

    pub fn is_client(&self) -> bool {
        self.sess.is_client()
    }

    /// Sends our initial KEXINIT
    pub fn start(&mut self) -> Result<()> {
        self.check_open()?;
        let r = self.sess.start(&mut self.transport);
        self.fail_on_err(r)
    }

    /// Begins a rekey, see [`KexSession::start_rekex()`]
    pub fn start_rekex(&mut self) -> Result<()> {
        self.check_open()?;
        let r = self.sess.start_rekex(&mut self.transport);
        self.fail_on_err(r)
    }

    /// Handles a received payload with its receive sequence number.
    pub fn input<C: CliBehaviour, S: ServBehaviour>(
        &mut self,
        payload: &[u8],
        seq: u32,
        b: &mut Behaviour<C, S>,
    ) -> Result<DispatchEvent> {
        self.check_open()?;
        match self.sess.handle_payload(payload, seq, &mut self.transport, b) {
            Ok(ev) => Ok(ev),
            Err(e) => {
                if !matches!(e, Error::PeerDisconnected { .. }) {
                    // the peer's own disconnect has already been reported
                    b.disconnected(e.disconnect_reason(), e.to_string().as_str().into());
                }
                Err(self.fail(e))
            }
        }
    }

    pub fn session(&self) -> &KexSession {
        &self.sess
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return error::SessionClosed.fail();
        }
        Ok(())
    }

    fn fail_on_err<R>(&mut self, r: Result<R>) -> Result<R> {
        r.map_err(|e| self.fail(e))
    }

    /// Ends the session, telling the peer why
    fn fail(&mut self, e: Error) -> Error {
        self.closed = true;
        if self.is_client() {
            info!("Ending session: {e}");
        } else {
            error!("Ending session: {e}");
        }

        if matches!(e, Error::PeerDisconnected { .. } | Error::SessionClosed) {
            return e;
        }
        let desc = e.to_string();
        let d = packets::Disconnect {
            reason: e.disconnect_reason(),
            desc: desc.as_str().into(),
            lang: "".into(),
        };
        if let Err(se) = TrafSend::new(&mut self.transport).send(d) {
            debug!("Couldn't send disconnect: {se}");
        }
        e
    }
}

#[cfg(test)]
mod tests {
    use crate::behaviour::{UnusedCli, UnusedServ};
    use crate::conn::tests::{conf, TestCli, TestServ, CLIENT_IDENT, SERVER_IDENT};
    use crate::packets::{self, Packet};
    use crate::runner::*;
    use crate::sign::{KeyType, SignKey};
    use crate::sshnames::*;
    use crate::sshwire::{packet_from_bytes, write_ssh};
    use crate::sunsetlog::init_test_log;
    use crate::traffic::MemTransport;

    fn runners(sconf: KexConfig) -> (Runner<MemTransport>, Runner<MemTransport>) {
        init_test_log();
        let cconf = conf(SSH_NAME_CURVE25519, SSH_NAME_AES256_CTR, SSH_NAME_HMAC_SHA256);
        let (ct, st) = MemTransport::pair();
        let cli = Runner::new_client(cconf, ct, CLIENT_IDENT, SERVER_IDENT).unwrap();
        let serv = Runner::new_server(sconf, st, CLIENT_IDENT, SERVER_IDENT).unwrap();
        (cli, serv)
    }

    #[test]
    fn disconnect_sent() {
        let sconf = conf(SSH_NAME_DH_GROUP14_SHA256, SSH_NAME_AES256_CTR, SSH_NAME_HMAC_SHA256);
        let (mut cli, mut serv) = runners(sconf);
        let mut cb = TestCli { allow: true, sig_algs: None, disconnects: 0 };
        let mut sb = TestServ { key: SignKey::generate(KeyType::Ed25519).unwrap() };

        cli.start().unwrap();
        let (m, seq) = serv.transport_mut().next_message().unwrap().unwrap();
        let mut b = Behaviour::<UnusedCli, TestServ>::Server(&mut sb);
        let e = serv.input(&m.payload, seq, &mut b).unwrap_err();
        assert!(matches!(e, Error::NoKexAlgMatch { .. }));
        assert!(serv.is_closed());

        // input is refused from now on
        let e = serv.input(&m.payload, seq, &mut b).unwrap_err();
        assert!(matches!(e, Error::SessionClosed));

        // the server's KEXINIT, then the disconnect
        let (m, seq) = cli.transport_mut().next_message().unwrap().unwrap();
        assert_eq!(m.payload[0], 20);
        let mut b = Behaviour::<TestCli, UnusedServ>::Client(&mut cb);
        // the client can't agree either
        let e = cli.input(&m.payload, seq, &mut b).unwrap_err();
        assert!(matches!(e, Error::NoKexAlgMatch { .. }));
        assert!(cli.is_closed());
        assert_eq!(cb.disconnects, 1);

        let (m, _) = cli.transport_mut().next_message().unwrap().unwrap();
        let ctx = Default::default();
        let Packet::Disconnect(d) = packet_from_bytes(&m.payload, &ctx).unwrap() else {
            panic!("not a disconnect");
        };
        assert_eq!(d.reason, SSH_DISCONNECT_KEY_EXCHANGE_FAILED);
        assert!(d.desc.as_str().unwrap().contains("No matching kex"));
    }

    #[test]
    fn peer_disconnect_ends() {
        let sconf = conf(SSH_NAME_CURVE25519, SSH_NAME_AES256_CTR, SSH_NAME_HMAC_SHA256);
        let (mut cli, mut serv) = runners(sconf);
        let mut cb = TestCli { allow: true, sig_algs: None, disconnects: 0 };

        let d: Packet = packets::Disconnect {
            reason: SSH_DISCONNECT_BY_APPLICATION,
            desc: "bye".into(),
            lang: "".into(),
        }
        .into();
        serv.transport_mut().send_payload(&write_ssh(&d).unwrap()).unwrap();

        let (m, seq) = cli.transport_mut().next_message().unwrap().unwrap();
        let mut b = Behaviour::<TestCli, UnusedServ>::Client(&mut cb);
        let e = cli.input(&m.payload, seq, &mut b).unwrap_err();
        assert!(matches!(e, Error::PeerDisconnected { reason: SSH_DISCONNECT_BY_APPLICATION }));
        assert!(cli.is_closed());
        assert_eq!(cb.disconnects, 1);
        // no reply to a disconnect
        assert!(serv.transport_mut().next_message().unwrap().is_none());
    }

    #[test]
    fn complete() {
        let sconf = conf(SSH_NAME_CURVE25519, SSH_NAME_AES256_CTR, SSH_NAME_HMAC_SHA256);
        let (mut cli, mut serv) = runners(sconf);
        let mut cb = TestCli { allow: true, sig_algs: None, disconnects: 0 };
        let mut sb = TestServ { key: SignKey::generate(KeyType::Ed25519).unwrap() };

        cli.start().unwrap();
        serv.start().unwrap();
        loop {
            let mut progress = false;
            if let Some((m, seq)) = serv.transport_mut().next_message().unwrap() {
                let mut b = Behaviour::<UnusedCli, TestServ>::Server(&mut sb);
                let _ = serv.input(&m.payload, seq, &mut b).unwrap();
                progress = true;
            }
            if let Some((m, seq)) = cli.transport_mut().next_message().unwrap() {
                let mut b = Behaviour::<TestCli, UnusedServ>::Client(&mut cb);
                let _ = cli.input(&m.payload, seq, &mut b).unwrap();
                progress = true;
            }
            if !progress {
                break;
            }
        }
        assert!(cli.session().done() && serv.session().done());
        assert_eq!(cli.session().session_id(), serv.session().session_id());
        assert!(!cli.is_closed());
    }
}
