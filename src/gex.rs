//! Diffie-Hellman group exchange, [RFC4419](https://tools.ietf.org/html/rfc4419)
//!
//! The client requests a group size range, the server picks one of the
//! MODP groups and the exchange continues as ordinary Diffie-Hellman
//! over that group.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use num_bigint::BigUint;
use num_traits::One;

use crate::*;
use behaviour::CliBehaviour;
use config::{GexConfig, GroupPolicy};
use dh::{mpint_content, mpint_value, DhKeypair, DH_GRP_MAX, DH_GRP_MIN};
use groups::{DhGroup, Modp};
use kex::{verify_reply, KexHash};
use keys::KexOutput;
use negotiate::Chosen;
use packets::{KexGexGroup, KexGexInit, KexGexReply, KexGexRequest, Signature};
use sign::SignKey;
use sshwire::{Blob, MpInt};
use traffic::TrafSend;

/// A client's requested group size range, in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GexRange {
    pub min: u32,
    pub preferred: u32,
    pub max: u32,
}

impl From<&KexGexRequest> for GexRange {
    fn from(p: &KexGexRequest) -> Self {
        Self { min: p.min, preferred: p.preferred, max: p.max }
    }
}

impl GexRange {
    fn out_of_range(&self) -> Error {
        Error::DhGexOutOfRange { min: self.min, preferred: self.preferred, max: self.max }
    }

    /// Requires `min <= preferred <= max` and `max` no smaller than the
    /// smallest group we will use.
    pub fn validate(&self) -> Result<()> {
        if self.min <= self.preferred && self.preferred <= self.max && self.max >= DH_GRP_MIN {
            Ok(())
        } else {
            warn!("Bad group exchange range {self:?}");
            Err(self.out_of_range())
        }
    }

    /// Limits the range to the group sizes we have.
    ///
    /// The result may be empty (`min > max`) if the request doesn't
    /// overlap what is available.
    pub fn clamp(&self) -> GexRange {
        let min = self.min.max(DH_GRP_MIN);
        let max = self.max.min(DH_GRP_MAX);
        // not u32::clamp(), which panics when min > max
        let preferred = self.preferred.max(min).min(max);
        GexRange { min, preferred, max }
    }
}

/// Picks a group for a request. The range is validated and clamped first.
pub fn select_group(range: &GexRange, policy: GroupPolicy) -> Result<Modp> {
    range.validate()?;
    let c = range.clamp();
    let fits = Modp::ALL.into_iter().filter(|m| c.min <= m.bits() && m.bits() <= c.max);

    let m = match policy {
        // ALL is ascending, so max_by_key keeps the later (larger) group on a tie
        GroupPolicy::Nearest => fits.max_by_key(|m| core::cmp::Reverse(m.bits().abs_diff(c.preferred))),
        GroupPolicy::Largest => fits.max_by_key(|m| m.bits()),
    };
    m.ok_or_else(|| {
        debug!("No group between {} and {}", c.min, c.max);
        range.out_of_range()
    })
}

/// Hashes the group exchange specific parts of `H`, from `K_S` to `f`.
fn hash_gex(
    kex_hash: &mut KexHash,
    k_s: &packets::PubKey,
    req: &KexGexRequest,
    group: &DhGroup,
    e: &BigUint,
    f: &BigUint,
) -> Result<()> {
    kex_hash.hash_hostkey(k_s)?;
    kex_hash.hash_u32(req.min);
    kex_hash.hash_u32(req.preferred);
    kex_hash.hash_u32(req.max);
    kex_hash.hash_mpint(&group.p.to_bytes_be());
    kex_hash.hash_mpint(&group.g.to_bytes_be());
    kex_hash.hash_mpint(&e.to_bytes_be());
    kex_hash.hash_mpint(&f.to_bytes_be());
    Ok(())
}

/// Server side state
#[derive(Debug)]
pub(crate) enum GexServer {
    AwaitRequest,
    AwaitInit {
        req: KexGexRequest,
        group: DhGroup,
        keypair: DhKeypair,
    },
    Done,
}

impl GexServer {
    pub fn new() -> Self {
        Self::AwaitRequest
    }

    pub fn handle_request(
        &mut self,
        p: &KexGexRequest,
        policy: GroupPolicy,
        need_bits: u32,
        s: &mut TrafSend,
    ) -> Result<()> {
        if !matches!(self, Self::AwaitRequest) {
            return error::PacketWrong.fail();
        }
        let m = select_group(&p.into(), policy)?;
        debug!("Group exchange request {p:?}, chose group {} ({} bits)", m.id(), m.bits());
        let group = m.group()?;
        let keypair = DhKeypair::generate(&group, need_bits)?;

        let pc = mpint_content(&group.p);
        let gc = mpint_content(&group.g);
        s.send(KexGexGroup { p: MpInt::from_content(&pc)?, g: MpInt::from_content(&gc)? })?;

        *self = Self::AwaitInit { req: p.clone(), group, keypair };
        Ok(())
    }

    /// Computes `K` and sends the signed reply.
    pub fn handle_init(
        &mut self,
        p: &KexGexInit,
        mut kex_hash: KexHash,
        hostkey: &SignKey,
        s: &mut TrafSend,
    ) -> Result<KexOutput> {
        let Self::AwaitInit { req, group, keypair } = core::mem::replace(self, Self::Done) else {
            return error::PacketWrong.fail();
        };

        let e = mpint_value(&p.e);
        let k = keypair.shared_secret(&group, &e)?;

        let k_s = hostkey.pubkey();
        hash_gex(&mut kex_hash, &k_s, &req, &group, &e, keypair.public())?;
        let out = kex_hash.finish(k)?;

        let sig = hostkey.sign(&out.h)?;
        let sig: Signature = (&sig).into();
        let fc = mpint_content(keypair.public());
        s.send(KexGexReply { k_s: Blob(k_s), f: MpInt::from_content(&fc)?, sig: Blob(sig) })?;
        Ok(out)
    }
}

/// Client side state
#[derive(Debug)]
pub(crate) enum GexClient {
    SendRequest,
    AwaitGroup {
        req: KexGexRequest,
    },
    AwaitReply {
        req: KexGexRequest,
        group: DhGroup,
        keypair: DhKeypair,
    },
    Done,
}

impl GexClient {
    pub fn new() -> Self {
        Self::SendRequest
    }

    /// Sends the request. The preferred size is estimated from `need_bits`
    /// unless configured.
    pub fn start(&mut self, conf: &GexConfig, need_bits: u32, s: &mut TrafSend) -> Result<()> {
        if !matches!(self, Self::SendRequest) {
            return Err(Error::bug());
        }
        let preferred = conf.preferred.unwrap_or_else(|| dh::estimate_group_bits(need_bits));
        let preferred = preferred.max(conf.min).min(conf.max);
        let req = KexGexRequest { min: conf.min, preferred, max: conf.max };
        debug!("Requesting group {req:?}");
        s.send(req.clone())?;
        *self = Self::AwaitGroup { req };
        Ok(())
    }

    pub fn handle_group(&mut self, p: &KexGexGroup, need_bits: u32, s: &mut TrafSend) -> Result<()> {
        let Self::AwaitGroup { req } = self else {
            return error::PacketWrong.fail();
        };

        let bits = p.p.bits();
        if bits < req.min || bits > req.max {
            warn!("Server sent a {bits} bit group, requested {req:?}");
            return Err(Error::DhGexOutOfRange {
                min: req.min,
                preferred: req.preferred,
                max: req.max,
            });
        }
        let group = DhGroup { p: mpint_value(&p.p), g: mpint_value(&p.g) };
        let one = BigUint::one();
        if group.g <= one || group.g >= &group.p - &one {
            warn!("Bad group generator");
            return Err(Error::BadKexValue);
        }

        let keypair = DhKeypair::generate(&group, need_bits)?;
        let ec = mpint_content(keypair.public());
        s.send(KexGexInit { e: MpInt::from_content(&ec)? })?;

        let req = req.clone();
        *self = Self::AwaitReply { req, group, keypair };
        Ok(())
    }

    /// Checks the server's reply and returns the exchange output.
    pub fn handle_reply(
        &mut self,
        p: &KexGexReply,
        mut kex_hash: KexHash,
        chosen: &Chosen,
        b: &mut impl CliBehaviour,
    ) -> Result<KexOutput> {
        let Self::AwaitReply { req, group, keypair } = core::mem::replace(self, Self::Done) else {
            return error::PacketWrong.fail();
        };

        let f = mpint_value(&p.f);
        let k = keypair.shared_secret(&group, &f)?;
        hash_gex(&mut kex_hash, &p.k_s.0, &req, &group, keypair.public(), &f)?;
        let out = kex_hash.finish(k)?;
        verify_reply(chosen, &p.k_s.0, &out.h, &p.sig.0, b)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::gex::*;
    use crate::packets::{Kex31, Packet, ParseContext};
    use crate::sshwire::packet_from_bytes;
    use crate::sunsetlog::init_test_log;
    use crate::traffic::MemTransport;

    fn r(min: u32, preferred: u32, max: u32) -> GexRange {
        GexRange { min, preferred, max }
    }

    #[test]
    fn bounds_rejected() {
        init_test_log();
        // preferred < min
        let e = select_group(&r(100, 50, 200), GroupPolicy::Nearest).unwrap_err();
        assert!(matches!(e, Error::DhGexOutOfRange { min: 100, preferred: 50, max: 200 }));
        // max < min
        assert!(matches!(r(10, 50, 5).validate(), Err(Error::DhGexOutOfRange { .. })));
        // max below the floor
        assert!(matches!(r(512, 1024, 1536).validate(), Err(Error::DhGexOutOfRange { .. })));
        // valid, but no group inside
        assert!(matches!(select_group(&r(2100, 2200, 2500), GroupPolicy::Nearest),
            Err(Error::DhGexOutOfRange { .. })));
    }

    #[test]
    fn clamping() {
        assert_eq!(r(1024, 1536, 16384).clamp(), r(2048, 2048, 8192));
        assert_eq!(r(2048, 9000, 9000).clamp(), r(2048, 8192, 8192));
        // empty after clamping
        let c = r(9000, 9000, 9000).clamp();
        assert!(c.min > c.max);
        assert!(select_group(&r(9000, 9000, 9000), GroupPolicy::Largest).is_err());
    }

    #[test]
    fn policy() {
        let n = GroupPolicy::Nearest;
        assert_eq!(select_group(&r(1024, 2048, 8192), n).unwrap(), Modp::Group14);
        assert_eq!(select_group(&r(2048, 3000, 8192), n).unwrap(), Modp::Group15);
        assert_eq!(select_group(&r(2048, 7000, 8192), n).unwrap(), Modp::Group17);
        // 3584 is halfway between 3072 and 4096, larger wins
        assert_eq!(select_group(&r(2048, 3584, 8192), n).unwrap(), Modp::Group16);
        // range excludes the nearest
        assert_eq!(select_group(&r(3500, 3500, 8192), n).unwrap(), Modp::Group16);

        let l = GroupPolicy::Largest;
        assert_eq!(select_group(&r(2048, 2048, 8192), l).unwrap(), Modp::Group18);
        assert_eq!(select_group(&r(2048, 2048, 5000), l).unwrap(), Modp::Group16);
    }

    /// A client that has sent its request with the default range
    fn client(t: &mut MemTransport) -> GexClient {
        let mut c = GexClient::new();
        c.start(&GexConfig::default(), 256, &mut TrafSend::new(t)).unwrap();
        c
    }

    #[test]
    fn client_rejects_group() {
        init_test_log();
        let (mut ct, mut st) = MemTransport::pair();
        let mut c = client(&mut ct);
        let (m, _) = st.next_message().unwrap().unwrap();
        assert_eq!(m.payload[0], 34);

        // 1024 bits is below the requested minimum
        let small = [&[0u8][..], &[0xffu8; 128][..]].concat();
        let g = KexGexGroup { p: MpInt::from_content(&small).unwrap(), g: MpInt(&[2]) };
        let e = c.handle_group(&g, 256, &mut TrafSend::new(&mut ct)).unwrap_err();
        assert!(matches!(e, Error::DhGexOutOfRange { min: 2048, max: 8192, .. }));

        // degenerate generators
        let grp = Modp::Group14.group().unwrap();
        let pc = mpint_content(&grp.p);
        let pm1 = mpint_content(&(grp.p.clone() - 1u32));
        for gv in [&[][..], &[1u8][..], pm1.as_slice()] {
            let mut c = client(&mut ct);
            let g = KexGexGroup { p: MpInt::from_content(&pc).unwrap(), g: MpInt(gv) };
            let e = c.handle_group(&g, 256, &mut TrafSend::new(&mut ct)).unwrap_err();
            assert!(matches!(e, Error::BadKexValue));
        }
        // nothing further was sent after the requests
        while let Some((m, _)) = st.next_message().unwrap() {
            assert_eq!(m.payload[0], 34);
        }
    }

    #[test]
    fn server_request() {
        init_test_log();
        let (mut ct, mut st) = MemTransport::pair();

        // preferred below min
        let mut serv = GexServer::new();
        let req = KexGexRequest { min: 4096, preferred: 1024, max: 8192 };
        let e = serv
            .handle_request(&req, GroupPolicy::Nearest, 256, &mut TrafSend::new(&mut st))
            .unwrap_err();
        assert!(matches!(e, Error::DhGexOutOfRange { min: 4096, preferred: 1024, max: 8192 }));
        assert!(ct.next_message().unwrap().is_none());

        let mut c = client(&mut ct);
        let (m, _) = st.next_message().unwrap().unwrap();
        let ctx = ParseContext { kex_gex: true, ..Default::default() };
        let Packet::KexGexRequest(req) = packet_from_bytes(&m.payload, &ctx).unwrap() else {
            panic!("not a request");
        };
        let mut serv = GexServer::new();
        serv.handle_request(&req, GroupPolicy::Largest, 256, &mut TrafSend::new(&mut st))
            .unwrap();
        // a second request is out of order
        let e = serv
            .handle_request(&req, GroupPolicy::Largest, 256, &mut TrafSend::new(&mut st))
            .unwrap_err();
        assert!(matches!(e, Error::PacketWrong));

        let (m, _) = ct.next_message().unwrap().unwrap();
        let Packet::Kex31(Kex31::GexGroup(g)) = packet_from_bytes(&m.payload, &ctx).unwrap() else {
            panic!("not a group");
        };
        assert_eq!(g.p.bits(), Modp::Group18.bits());
        c.handle_group(&g, 256, &mut TrafSend::new(&mut ct)).unwrap();
        let (m, _) = st.next_message().unwrap().unwrap();
        assert_eq!(m.payload[0], 32);
    }
}
