//! One key exchange pass, [RFC4253](https://tools.ietf.org/html/rfc4253) sections 7 and 8

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use digest::DynDigest;
use pretty_hex::PrettyHex;
use rand_core::OsRng;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::*;
use behaviour::{CliBehaviour, ServBehaviour};
use catalog::{HashAlg, KexMethod};
use config::KexConfig;
use dh::{mpint_content, mpint_value, DhKeypair};
use gex::{GexClient, GexServer};
use groups::DhGroup;
use keys::{KexOutput, NegotiatedSet, SessId};
use negotiate::Chosen;
use packets::{KexDHInit, KexDHReply, KexGexGroup, KexGexInit, KexGexReply, KexGexRequest};
use packets::{PubKey, Signature};
use proposal::Proposal;
use sign::{SigType, SignKey};
use sshwire::{hash_ser_length, BinString, Blob, MpInt};
use traffic::TrafSend;

/// Per connection values that every pass needs
#[derive(Debug)]
pub(crate) struct KexCtx {
    pub conf: KexConfig,
    pub is_client: bool,
    /// Identification strings without CR LF
    pub client_ident: Vec<u8>,
    pub server_ident: Vec<u8>,
    /// Strict kex was agreed in the initial exchange, sequence numbers
    /// reset at every NEWKEYS from then on.
    pub strict_kex: bool,
}

/// The current state of the Kex
#[derive(Debug)]
pub(crate) enum Kex {
    /// No key exchange in progress
    Idle,

    /// Have sent our KEXINIT, waiting for the peer's.
    KexInit {
        our_proposal: Proposal,
        /// The exact payload sent, it is hashed into `H`
        our_kexinit: Vec<u8>,
    },

    /// Method specific messages
    KexDH {
        chosen: Chosen,
        kex_hash: KexHash,
        exchange: Exchange,
    },

    /// Our NEWKEYS has been sent and the send direction switched.
    /// `keys_in` is taken into use when the peer's NEWKEYS arrives.
    NewKeys {
        chosen: Chosen,
        keys_in: NegotiatedSet,
    },

    /// A transient state use internally to transition between other states.
    ///
    /// Returned from .take(). A proper state is set before returning
    /// unless an error occurs, and errors end the connection.
    Taken,
}

/// The exchange hash `H`, fed progressively as the pass proceeds.
pub(crate) struct KexHash {
    hash_ctx: Box<dyn DynDigest + Send>,
    hash: HashAlg,
}

impl fmt::Debug for KexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexHash").field("hash", &self.hash).finish_non_exhaustive()
    }
}

impl KexHash {
    pub fn new(hash: HashAlg, v_c: &[u8], v_s: &[u8], i_c: &[u8], i_s: &[u8]) -> Self {
        // RFC4253 section 8:
        // The hash H is computed as the HASH hash of the concatenation of the
        // following:
        //    string    V_C, the client's identification string (CR and LF
        //              excluded)
        //    string    V_S, the server's identification string (CR and LF
        //              excluded)
        //    string    I_C, the payload of the client's SSH_MSG_KEXINIT
        //    string    I_S, the payload of the server's SSH_MSG_KEXINIT
        //    string    K_S, the host key
        // then method specific values, and
        //    mpint     K, the shared secret
        let mut kh = KexHash { hash_ctx: hash.new_ctx(), hash };
        kh.hash_slice(v_c);
        kh.hash_slice(v_s);
        kh.hash_slice(i_c);
        kh.hash_slice(i_s);
        kh
    }

    pub fn hash_hostkey(&mut self, k_s: &PubKey) -> Result<()> {
        hash_ser_length(&mut *self.hash_ctx, k_s)
    }

    /// Hashes a slice, with added u32 length prefix.
    pub fn hash_slice(&mut self, v: &[u8]) {
        self.hash_u32(v.len() as u32);
        self.hash_ctx.update(v);
    }

    pub fn hash_u32(&mut self, v: u32) {
        self.hash_ctx.update(&v.to_be_bytes());
    }

    /// `v` is unsigned big-endian
    pub fn hash_mpint(&mut self, v: &[u8]) {
        sshwire::hash_mpint(&mut *self.hash_ctx, v)
    }

    /// Hashes `K` and produces `H`
    pub fn finish(mut self, k: Zeroizing<Vec<u8>>) -> Result<KexOutput> {
        self.hash_mpint(&k);
        let hash = self.hash;
        let h = SessId::from_slice(&self.hash_ctx.finalize()).trap()?;
        Ok(KexOutput::new(h, k, hash))
    }
}

/// Method specific state, selected by the negotiated [`KexMethod`]
#[derive(Debug)]
pub(crate) enum Exchange {
    Curve25519(KexCurve25519),
    DhGroup { group: DhGroup, keypair: DhKeypair },
    GexServer(GexServer),
    GexClient(GexClient),
}

impl Exchange {
    /// Sets up the exchange. A client sends its first method message.
    fn start(chosen: &Chosen, conf: &KexConfig, s: &mut TrafSend) -> Result<Self> {
        let ex = match chosen.kex_method()? {
            KexMethod::Curve25519 => {
                let k = KexCurve25519::new();
                if chosen.is_client {
                    s.send(KexDHInit { q_c: BinString(k.pubkey()) })?;
                }
                Exchange::Curve25519(k)
            }
            KexMethod::DhGroup(m) => {
                let group = m.group()?;
                let keypair = DhKeypair::generate(&group, dh::need_bits(chosen)?)?;
                if chosen.is_client {
                    let e = mpint_content(keypair.public());
                    s.send(KexDHInit { q_c: BinString(&e) })?;
                }
                Exchange::DhGroup { group, keypair }
            }
            KexMethod::DhGex => {
                if chosen.is_client {
                    let mut g = GexClient::new();
                    g.start(&conf.gex, dh::need_bits(chosen)?, s)?;
                    Exchange::GexClient(g)
                } else {
                    Exchange::GexServer(GexServer::new())
                }
            }
        };
        Ok(ex)
    }
}

impl Kex {
    pub fn new() -> Self {
        Kex::Idle
    }

    fn take(&mut self) -> Self {
        debug_assert!(!matches!(self, Kex::Taken));
        core::mem::replace(self, Kex::Taken)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Kex::Idle)
    }

    /// Message 31 is a `SSH_MSG_KEX_DH_GEX_GROUP`
    pub fn kex_gex(&self) -> bool {
        matches!(self, Kex::KexDH { exchange: Exchange::GexClient(_) | Exchange::GexServer(_), .. })
    }

    /// Strict kex was negotiated for this pass
    pub fn is_strict(&self) -> bool {
        match self {
            Kex::KexDH { chosen, .. } | Kex::NewKeys { chosen, .. } => chosen.strict_kex,
            _ => false,
        }
    }

    /// Returns `true` once if the peer's guessed method packet
    /// should be dropped.
    pub fn maybe_discard(&mut self) -> bool {
        if let Kex::KexDH { chosen, .. } = self {
            if chosen.discard_next {
                chosen.discard_next = false;
                return true;
            }
        }
        false
    }

    /// Sends a `KexInit` message. Must be called from `Idle` state
    pub fn send_kexinit(&mut self, our_proposal: Proposal, s: &mut TrafSend) -> Result<()> {
        if !self.is_idle() {
            return Err(Error::bug());
        }
        // no guessed packet follows
        let our_kexinit = our_proposal.encode(false)?;
        s.send_raw(&our_kexinit)?;
        *self = Kex::KexInit { our_proposal, our_kexinit };
        Ok(())
    }

    pub fn handle_kexinit(
        &mut self,
        payload: &[u8],
        seq: u32,
        first_kex: bool,
        ctx: &KexCtx,
        s: &mut TrafSend,
    ) -> Result<()> {
        let (peer, first_follows) = Proposal::decode(payload)?;

        // Reply if we haven't already sent one. This will bump the state to Kex::KexInit
        if self.is_idle() {
            self.send_kexinit(ctx.conf.local_proposal(ctx.is_client, first_kex)?, s)?;
        }

        if !matches!(self, Kex::KexInit { .. }) {
            // already received a KexInit
            return error::PacketWrong.fail();
        }
        let Kex::KexInit { our_proposal, our_kexinit } = self.take() else {
            return Err(Error::bug());
        };

        let chosen =
            negotiate::select(&our_proposal, &peer, first_follows, !ctx.is_client, first_kex)?;
        debug!("{chosen}");

        if first_kex && chosen.strict_kex && seq != 0 {
            debug!("kexinit has strict kex but wasn't first packet");
            return error::PacketWrong.fail();
        }

        let (i_c, i_s) = if ctx.is_client {
            (our_kexinit.as_slice(), payload)
        } else {
            (payload, our_kexinit.as_slice())
        };
        let kex_hash =
            KexHash::new(chosen.hash_alg()?, &ctx.client_ident, &ctx.server_ident, i_c, i_s);
        let exchange = Exchange::start(&chosen, &ctx.conf, s)?;

        *self = Kex::KexDH { chosen, kex_hash, exchange };
        Ok(())
    }

    // server only, curve25519 or a fixed group
    pub fn handle_kexdhinit(
        &mut self,
        p: &KexDHInit,
        sess_id: &mut Option<SessId>,
        ctx: &KexCtx,
        s: &mut TrafSend,
        b: &mut impl ServBehaviour,
    ) -> Result<()> {
        match self {
            Kex::KexDH {
                chosen,
                exchange: Exchange::Curve25519(_) | Exchange::DhGroup { .. },
                ..
            } if !chosen.is_client => (),
            _ => return error::PacketWrong.fail(),
        }
        let Kex::KexDH { chosen, mut kex_hash, exchange } = self.take() else {
            return Err(Error::bug());
        };

        let hk = b.hostkeys().map_err(|_| Error::BehaviourError { msg: "hostkeys() failed" })?;
        let hostkey = find_hostkey(&hk, chosen.hostkey)?;
        let k_s = hostkey.pubkey();
        kex_hash.hash_hostkey(&k_s)?;

        let (k, q_s) = match exchange {
            Exchange::Curve25519(mut c) => {
                kex_hash.hash_slice(p.q_c.0);
                kex_hash.hash_slice(c.pubkey());
                let q_s = c.pubkey().to_vec();
                (c.secret(p.q_c.0)?, q_s)
            }
            Exchange::DhGroup { group, keypair } => {
                let e = MpInt::from_content(p.q_c.0)?;
                let k = keypair.shared_secret(&group, &mpint_value(&e))?;
                kex_hash.hash_mpint(e.0);
                kex_hash.hash_mpint(&keypair.public().to_bytes_be());
                (k, mpint_content(keypair.public()))
            }
            _ => return Err(Error::bug()),
        };
        let out = kex_hash.finish(k)?;

        trace!("sign kexreply h {:?}", out.h.hex_dump());
        let sig = hostkey.sign(&out.h)?;
        let sig: Signature = (&sig).into();
        s.send(KexDHReply { k_s: Blob(k_s), q_s: BinString(&q_s), sig: Blob(sig) })?;

        *self = Self::send_newkeys(chosen, out, sess_id, ctx, s)?;
        Ok(())
    }

    // client only, curve25519 or a fixed group
    pub fn handle_kexdhreply(
        &mut self,
        p: &KexDHReply,
        sess_id: &mut Option<SessId>,
        ctx: &KexCtx,
        s: &mut TrafSend,
        b: &mut impl CliBehaviour,
    ) -> Result<()> {
        match self {
            Kex::KexDH {
                chosen,
                exchange: Exchange::Curve25519(_) | Exchange::DhGroup { .. },
                ..
            } if chosen.is_client => (),
            _ => return error::PacketWrong.fail(),
        }
        let Kex::KexDH { chosen, mut kex_hash, exchange } = self.take() else {
            return Err(Error::bug());
        };

        kex_hash.hash_hostkey(&p.k_s.0)?;
        let k = match exchange {
            Exchange::Curve25519(mut c) => {
                kex_hash.hash_slice(c.pubkey());
                kex_hash.hash_slice(p.q_s.0);
                c.secret(p.q_s.0)?
            }
            Exchange::DhGroup { group, keypair } => {
                let f = MpInt::from_content(p.q_s.0)?;
                let k = keypair.shared_secret(&group, &mpint_value(&f))?;
                kex_hash.hash_mpint(&keypair.public().to_bytes_be());
                kex_hash.hash_mpint(f.0);
                k
            }
            _ => return Err(Error::bug()),
        };
        let out = kex_hash.finish(k)?;
        verify_reply(&chosen, &p.k_s.0, &out.h, &p.sig.0, b)?;

        *self = Self::send_newkeys(chosen, out, sess_id, ctx, s)?;
        Ok(())
    }

    // server only
    pub fn handle_gex_request(
        &mut self,
        p: &KexGexRequest,
        ctx: &KexCtx,
        s: &mut TrafSend,
    ) -> Result<()> {
        let Kex::KexDH { chosen, exchange: Exchange::GexServer(g), .. } = self else {
            return error::PacketWrong.fail();
        };
        g.handle_request(p, ctx.conf.gex.policy, dh::need_bits(chosen)?, s)
    }

    // client only
    pub fn handle_gex_group(&mut self, p: &KexGexGroup, s: &mut TrafSend) -> Result<()> {
        let Kex::KexDH { chosen, exchange: Exchange::GexClient(g), .. } = self else {
            return error::PacketWrong.fail();
        };
        g.handle_group(p, dh::need_bits(chosen)?, s)
    }

    // server only
    pub fn handle_gex_init(
        &mut self,
        p: &KexGexInit,
        sess_id: &mut Option<SessId>,
        ctx: &KexCtx,
        s: &mut TrafSend,
        b: &mut impl ServBehaviour,
    ) -> Result<()> {
        if !matches!(self, Kex::KexDH { exchange: Exchange::GexServer(GexServer::AwaitInit { .. }), .. }) {
            return error::PacketWrong.fail();
        }
        let Kex::KexDH { chosen, kex_hash, exchange: Exchange::GexServer(mut g) } = self.take()
        else {
            return Err(Error::bug());
        };

        let hk = b.hostkeys().map_err(|_| Error::BehaviourError { msg: "hostkeys() failed" })?;
        let hostkey = find_hostkey(&hk, chosen.hostkey)?;
        let out = g.handle_init(p, kex_hash, hostkey, s)?;

        *self = Self::send_newkeys(chosen, out, sess_id, ctx, s)?;
        Ok(())
    }

    // client only
    pub fn handle_gex_reply(
        &mut self,
        p: &KexGexReply,
        sess_id: &mut Option<SessId>,
        ctx: &KexCtx,
        s: &mut TrafSend,
        b: &mut impl CliBehaviour,
    ) -> Result<()> {
        if !matches!(self, Kex::KexDH { exchange: Exchange::GexClient(GexClient::AwaitReply { .. }), .. }) {
            return error::PacketWrong.fail();
        }
        let Kex::KexDH { chosen, kex_hash, exchange: Exchange::GexClient(mut g) } = self.take()
        else {
            return Err(Error::bug());
        };

        let out = g.handle_reply(p, kex_hash, &chosen, b)?;

        *self = Self::send_newkeys(chosen, out, sess_id, ctx, s)?;
        Ok(())
    }

    /// Derives keys, sends NEWKEYS and switches the send direction.
    fn send_newkeys(
        chosen: Chosen,
        out: KexOutput,
        sess_id: &mut Option<SessId>,
        ctx: &KexCtx,
        s: &mut TrafSend,
    ) -> Result<Kex> {
        // The first KEX's H becomes the persistent sess_id
        let sid = sess_id.get_or_insert_with(|| out.h.clone()).clone();
        let (keys_out, keys_in) = out.new_sets(&chosen, &sid)?;

        s.send(packets::NewKeys {})?;
        s.set_send_keys(keys_out, chosen.strict_kex || ctx.strict_kex);

        if chosen.ext_info_c {
            // the first message with new keys
            let ext = packets::ExtInfo { server_sig_algs: Some(ctx.conf.server_sig_algs.clone()) };
            s.send(ext)?;
        }
        Ok(Kex::NewKeys { chosen, keys_in })
    }

    /// Switches the receive direction, the pass is complete.
    pub fn handle_newkeys(&mut self, ctx: &KexCtx, s: &mut TrafSend) -> Result<Chosen> {
        if !matches!(self, Kex::NewKeys { .. }) {
            return error::PacketWrong.fail();
        }
        let Kex::NewKeys { chosen, keys_in } = self.take() else {
            return Err(Error::bug());
        };
        s.set_recv_keys(keys_in, chosen.strict_kex || ctx.strict_kex);
        *self = Kex::Idle;
        Ok(chosen)
    }
}

fn find_hostkey<'a>(keys: &[&'a SignKey], sig: SigType) -> Result<&'a SignKey> {
    keys.iter().find(|k| k.can_sign(sig)).copied().ok_or_else(|| {
        warn!("No host key for {}", sig.algorithm_name());
        Error::msg("No host key for the negotiated algorithm")
    })
}

/// Checks a server's host key and its signature over `h`. Client only.
///
/// The application's host key policy is consulted before the signature is checked.
pub(crate) fn verify_reply(
    chosen: &Chosen,
    k_s: &PubKey,
    h: &[u8],
    sig: &Signature,
    b: &mut impl CliBehaviour,
) -> Result<()> {
    if k_s.algorithm_name().ok() != Some(chosen.hostkey.algorithm_name()) {
        warn!(
            "Server host key {:?} isn't the negotiated {}",
            k_s.algorithm_name(),
            chosen.hostkey.algorithm_name()
        );
        return Err(Error::BadKey);
    }

    match b.valid_hostkey(k_s) {
        Ok(true) => (),
        Ok(false) => {
            info!("Host key rejected");
            return Err(Error::HostKeyRejected);
        }
        Err(e) => {
            debug!("Host key check failed: {e}");
            return Err(Error::HostKeyRejected);
        }
    }

    trace!("verify h {:?}", h.hex_dump());
    chosen.hostkey.verify(k_s, h, sig)?;
    debug!("Hostkey signature is valid");
    Ok(())
}

#[derive(ZeroizeOnDrop)]
pub(crate) struct KexCurve25519 {
    // Initialised in `new()`, cleared after deriving the secret
    ours: Option<x25519_dalek::EphemeralSecret>,
    // pubkey is relatively expensive to compute from the secret key
    pubkey: [u8; 32],
}

impl fmt::Debug for KexCurve25519 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KexCurve25519")
            .field("ours", &if self.ours.is_some() { "Some" } else { "None" })
            .field("pubkey", &self.pubkey)
            .finish()
    }
}

impl KexCurve25519 {
    fn new() -> Self {
        let ours = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
        let pubkey = x25519_dalek::PublicKey::from(&ours).to_bytes();
        KexCurve25519 { ours: Some(ours), pubkey }
    }

    fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    /// Returns `K`, raw bytes that are hashed as a mpint
    fn secret(&mut self, theirs: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let theirs: [u8; 32] = theirs.try_into().map_err(|_| {
            warn!("Bad curve25519 public key length {}", theirs.len());
            Error::BadKexValue
        })?;
        let shsec = self.ours.take().trap()?.diffie_hellman(&theirs.into());
        // RFC8731 section 3, all zero output must be rejected
        if !shsec.was_contributory() {
            warn!("Non-contributory curve25519 public key");
            return Err(Error::BadKexValue);
        }
        Ok(Zeroizing::new(shsec.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use crate::kex::*;
    use crate::behaviour::BhResult;
    use crate::sunsetlog::init_test_log;

    struct TestCli {
        allow: bool,
    }

    impl CliBehaviour for TestCli {
        fn valid_hostkey(&mut self, _key: &PubKey) -> BhResult<bool> {
            Ok(self.allow)
        }
    }

    #[test]
    fn curve25519_agree() {
        let mut a = KexCurve25519::new();
        let mut b = KexCurve25519::new();
        let pa = a.pubkey().to_vec();
        let pb = b.pubkey().to_vec();
        let ka = a.secret(&pb).unwrap();
        let kb = b.secret(&pa).unwrap();
        assert_eq!(*ka, *kb);
        assert_eq!(ka.len(), 32);
    }

    #[test]
    fn curve25519_bad() {
        init_test_log();
        let mut a = KexCurve25519::new();
        assert!(matches!(a.secret(&[9u8; 31]), Err(Error::BadKexValue)));
        let mut a = KexCurve25519::new();
        // the zero point is low order
        assert!(matches!(a.secret(&[0u8; 32]), Err(Error::BadKexValue)));
    }

    #[test]
    fn hash_order() {
        use sha2::{Digest, Sha256};
        let mut kh = KexHash::new(HashAlg::Sha256, b"SSH-2.0-c", b"SSH-2.0-s", &[20, 1], &[20, 2]);
        kh.hash_u32(2048);
        let out = kh.finish(Zeroizing::new(vec![0x80, 1])).unwrap();

        let mut buf = vec![];
        let parts: [&[u8]; 4] = [b"SSH-2.0-c", b"SSH-2.0-s", &[20, 1], &[20, 2]];
        for v in parts {
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v);
        }
        buf.extend_from_slice(&2048u32.to_be_bytes());
        // K is padded as a positive mpint
        buf.extend_from_slice(&[0, 0, 0, 3, 0, 0x80, 1]);
        assert_eq!(out.h.as_slice(), Sha256::digest(&buf).as_slice());
    }

    fn chosen() -> Chosen {
        let p = Proposal::from_strs([
            "curve25519-sha256", "ssh-ed25519", "aes256-ctr", "aes256-ctr",
            "hmac-sha2-256", "hmac-sha2-256", "none", "none", "", "",
        ])
        .unwrap();
        negotiate::select(&p, &p, false, false, true).unwrap()
    }

    #[test]
    fn reply_verify() {
        init_test_log();
        let c = chosen();
        let hostkey = SignKey::generate(sign::KeyType::Ed25519).unwrap();
        let h = [0x42u8; 32];
        let sig = hostkey.sign(&h).unwrap();
        let sig: Signature = (&sig).into();
        let k_s = hostkey.pubkey();

        verify_reply(&c, &k_s, &h, &sig, &mut TestCli { allow: true }).unwrap();

        let r = verify_reply(&c, &k_s, &h, &sig, &mut TestCli { allow: false });
        assert!(matches!(r, Err(Error::HostKeyRejected)));

        let r = verify_reply(&c, &k_s, &[0x43u8; 32], &sig, &mut TestCli { allow: true });
        assert!(matches!(r, Err(Error::BadSig)));

        // a different key signed it
        let other = SignKey::generate(sign::KeyType::Ed25519).unwrap();
        let r = verify_reply(&c, &other.pubkey(), &h, &sig, &mut TestCli { allow: true });
        assert!(matches!(r, Err(Error::BadSig)));
    }

    #[test]
    fn discard_once() {
        let mut c = chosen();
        c.discard_next = true;
        let kh = KexHash::new(HashAlg::Sha256, b"a", b"b", b"c", b"d");
        let exchange = Exchange::Curve25519(KexCurve25519::new());
        let mut k = Kex::KexDH { chosen: c, kex_hash: kh, exchange };
        assert!(k.maybe_discard());
        assert!(!k.maybe_discard());
        assert!(!Kex::Idle.maybe_discard());
    }
}
