//! The boundary between the key exchange and SSH transport framing.
//!
//! Packet length, padding, encryption and MACs all happen on the other
//! side of [`Transport`]. The key exchange only sees whole payloads.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::sync::mpsc;

use pretty_hex::PrettyHex;

use crate::*;
use keys::NegotiatedSet;
use packets::Packet;

/// A reliable message channel to the peer.
pub trait Transport {
    /// Sends a payload, the first byte is the message number.
    fn send_payload(&mut self, payload: &[u8]) -> Result<()>;

    /// Switches the sending direction to new keys. Called
    /// immediately after `SSH_MSG_NEWKEYS` is sent.
    ///
    /// `reset_seq` is set under strict kex, the sequence number restarts at zero.
    fn set_send_keys(&mut self, keys: NegotiatedSet, reset_seq: bool);

    /// Switches the receiving direction to new keys. Called after the
    /// peer's `SSH_MSG_NEWKEYS` has been received.
    fn set_recv_keys(&mut self, keys: NegotiatedSet, reset_seq: bool);
}

/// Convenience wrapper to send packets
pub(crate) struct TrafSend<'s> {
    out: &'s mut dyn Transport,
}

impl<'s> TrafSend<'s> {
    pub fn new(out: &'s mut dyn Transport) -> Self {
        Self { out }
    }

    pub fn send<'p, P: Into<Packet<'p>>>(&mut self, p: P) -> Result<()> {
        let p: Packet = p.into();
        trace!("send {:?}", p.message_num());
        let payload = sshwire::write_ssh(&p)?;
        trace!("{:?}", payload.hex_dump());
        self.out.send_payload(&payload)
    }

    /// Sends an already encoded payload
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        trace!("send raw {:?}", payload.hex_dump());
        self.out.send_payload(payload)
    }

    pub fn set_send_keys(&mut self, keys: NegotiatedSet, reset_seq: bool) {
        self.out.set_send_keys(keys, reset_seq)
    }

    pub fn set_recv_keys(&mut self, keys: NegotiatedSet, reset_seq: bool) {
        self.out.set_recv_keys(keys, reset_seq)
    }
}

/// A payload that went through a [`MemTransport`]
#[derive(Debug, Clone)]
pub struct MemMessage {
    pub payload: Vec<u8>,
    /// Sequence number as counted by the sender
    pub seq: u32,
    /// How many times the sender had switched keys when sending,
    /// zero for cleartext.
    pub key_generation: u32,
}

/// One end of an in-memory duplex channel.
///
/// Records the keys that have been installed, so that the asymmetric
/// switch of sending and receiving keys can be observed.
pub struct MemTransport {
    tx: mpsc::Sender<MemMessage>,
    rx: mpsc::Receiver<MemMessage>,

    send_seq: u32,
    recv_seq: u32,

    send_keys: Option<NegotiatedSet>,
    recv_keys: Option<NegotiatedSet>,
    send_generation: u32,
    recv_generation: u32,
}

impl MemTransport {
    /// Returns two connected ends
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel();
        let (tx_b, rx_a) = mpsc::channel();
        (Self::new(tx_a, rx_a), Self::new(tx_b, rx_b))
    }

    fn new(tx: mpsc::Sender<MemMessage>, rx: mpsc::Receiver<MemMessage>) -> Self {
        Self {
            tx,
            rx,
            send_seq: 0,
            recv_seq: 0,
            send_keys: None,
            recv_keys: None,
            send_generation: 0,
            recv_generation: 0,
        }
    }

    /// Returns the next received message with our receive sequence number,
    /// or `None` if nothing is waiting.
    ///
    /// A message sent under different keys than we are receiving with
    /// fails with [`Error::BadDecrypt`], as a real transport would.
    pub fn next_message(&mut self) -> Result<Option<(MemMessage, u32)>> {
        let Ok(m) = self.rx.try_recv() else {
            return Ok(None);
        };
        let seq = self.recv_seq;
        self.recv_seq = self.recv_seq.wrapping_add(1);
        if m.key_generation != self.recv_generation {
            warn!(
                "Message {seq} sent with key generation {}, receiving with {}",
                m.key_generation, self.recv_generation
            );
            return error::BadDecrypt.fail();
        }
        Ok(Some((m, seq)))
    }

    pub fn send_keys(&self) -> Option<&NegotiatedSet> {
        self.send_keys.as_ref()
    }

    pub fn recv_keys(&self) -> Option<&NegotiatedSet> {
        self.recv_keys.as_ref()
    }

    pub fn send_generation(&self) -> u32 {
        self.send_generation
    }

    pub fn recv_generation(&self) -> u32 {
        self.recv_generation
    }
}

impl Transport for MemTransport {
    fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        let m = MemMessage {
            payload: payload.to_vec(),
            seq: self.send_seq,
            key_generation: self.send_generation,
        };
        self.send_seq = self.send_seq.wrapping_add(1);
        self.tx.send(m).map_err(|_| Error::SessionClosed)
    }

    fn set_send_keys(&mut self, keys: NegotiatedSet, reset_seq: bool) {
        debug!("send keys {keys:?}");
        self.send_keys = Some(keys);
        self.send_generation += 1;
        if reset_seq {
            self.send_seq = 0;
        }
    }

    fn set_recv_keys(&mut self, keys: NegotiatedSet, reset_seq: bool) {
        debug!("recv keys {keys:?}");
        self.recv_keys = Some(keys);
        self.recv_generation += 1;
        if reset_seq {
            self.recv_seq = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::traffic::*;

    #[test]
    fn mem_pair() {
        let (mut a, mut b) = MemTransport::pair();
        a.send_payload(&[2, 0, 0, 0, 0]).unwrap();
        a.send_payload(&[4]).unwrap();
        let (m, seq) = b.next_message().unwrap().unwrap();
        assert_eq!(m.payload, [2, 0, 0, 0, 0]);
        assert_eq!((m.seq, seq), (0, 0));
        let (m, seq) = b.next_message().unwrap().unwrap();
        assert_eq!((m.seq, seq), (1, 1));
        assert!(b.next_message().unwrap().is_none());
        assert!(a.next_message().unwrap().is_none());

        drop(b);
        assert!(matches!(a.send_payload(&[2]), Err(Error::SessionClosed)));
    }
}
