//! Algorithm negotiation, [RFC4253](https://tools.ietf.org/html/rfc4253) section 7.1

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use snafu::OptionExt;

use crate::*;
use catalog::{Algorithm, Category, HashAlg, KexMethod, MARKER_ONLY_KEXS};
use namelist::{first_match, NameList};
use proposal::{Field, Proposal};
use sign::SigType;
use sshnames::*;

/// The algorithms chosen for one key exchange pass.
///
/// "out" is the direction we send, "in" the direction we receive.
#[derive(Debug, Clone)]
pub struct Chosen {
    pub kex: &'static Algorithm,
    pub hostkey: SigType,
    pub enc_out: &'static Algorithm,
    pub enc_in: &'static Algorithm,
    /// `None` for AEAD ciphers
    pub mac_out: Option<&'static Algorithm>,
    pub mac_in: Option<&'static Algorithm>,
    pub comp_out: &'static Algorithm,
    pub comp_in: &'static Algorithm,

    // If first_kex_packet_follows was set in SSH_MSG_KEXINIT but the
    // guessed algorithms don't match, we discard the next message (RFC4253 Sec 7).
    // This flag is reset to `false` after the packet has been discarded.
    pub discard_next: bool,

    pub is_client: bool,

    /// The peer is a client that wants `SSH_MSG_EXT_INFO`.
    /// Only set for a server on the initial exchange.
    pub ext_info_c: bool,

    /// Both sides support strict kex. Only set on the initial exchange.
    pub strict_kex: bool,
}

impl Chosen {
    pub fn kex_method(&self) -> Result<KexMethod> {
        self.kex.kex_method().trap()
    }

    pub fn hash_alg(&self) -> Result<HashAlg> {
        self.kex.hash_alg().trap()
    }

    pub fn group_id(&self) -> Option<u32> {
        self.kex.group_id()
    }
}

impl fmt::Display for Chosen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |m: Option<&'static Algorithm>| m.map(|a| a.name).unwrap_or("<implicit>");
        let (cc, cs, mc, ms, zc, zs) = if self.is_client {
            (self.enc_out, self.enc_in, self.mac_out, self.mac_in, self.comp_out, self.comp_in)
        } else {
            (self.enc_in, self.enc_out, self.mac_in, self.mac_out, self.comp_in, self.comp_out)
        };

        write!(f, "Negotiated algorithms {{\nkex {}\nhostkey {}\ncipher c->s {}\ncipher s->c {}\nmac c->s {}\nmac s->c {}\ncomp c->s {}\ncomp s->c {}\n}}",
            self.kex.name, self.hostkey.algorithm_name(), cc.name, cs.name,
            name(mc), name(ms), zc.name, zs.name)
    }
}

/// Finds the first name in `client` that's in `server`, and its catalog entry.
///
/// Local lists only contain catalog names, so a match is always found
/// in the catalog.
fn pick(client: &NameList, server: &NameList, cat: Category)
    -> Result<Option<&'static Algorithm>> {
    let Some(name) = first_match(client, server) else {
        return Ok(None);
    };
    let a = catalog::lookup_by_name(name)
        .filter(|a| a.category() == cat)
        .trap_msg(format_args!("{name} isn't a known {cat:?} algorithm"))?;
    Ok(Some(a))
}

/// Performs SSH algorithm negotiation between our `local` proposal and the `peer`'s.
///
/// For each category the first name in the client's list that is also present
/// in the server's list is selected, regardless of which side we are.
/// `is_initial` is set for the first exchange on a connection.
pub fn select(
    local: &Proposal,
    peer: &Proposal,
    peer_first_follows: bool,
    is_server: bool,
    is_initial: bool,
) -> Result<Chosen> {
    let is_client = !is_server;
    let (cprop, sprop) = if is_client { (local, peer) } else { (peer, local) };

    // Certain kex method names aren't actual algorithms, just markers.
    let ckex = cprop[Field::Kex].without(MARKER_ONLY_KEXS);
    let skex = sprop[Field::Kex].without(MARKER_ONLY_KEXS);
    let kex = pick(&ckex, &skex, Category::Kex)?.with_context(|| error::NoKexAlgMatch {
        client: ckex.clone(),
        server: skex.clone(),
    })?;

    let kexguess2 = local[Field::Kex].has_algo(SSH_NAME_KEXGUESS2)
        && peer[Field::Kex].has_algo(SSH_NAME_KEXGUESS2);
    let goodguess_kex = if kexguess2 {
        peer[Field::Kex].first() == kex.name
    } else {
        peer[Field::Kex].first() == local[Field::Kex].first()
    };

    // we only send MSG_EXT_INFO to a client, don't look
    // for SSH_NAME_EXT_INFO_S
    let ext_info_c = is_server && is_initial && peer[Field::Kex].has_algo(SSH_NAME_EXT_INFO_C);

    let (ours_strict, other_strict) = if is_client {
        (SSH_NAME_STRICT_KEX_C, SSH_NAME_STRICT_KEX_S)
    } else {
        (SSH_NAME_STRICT_KEX_S, SSH_NAME_STRICT_KEX_C)
    };
    let strict_kex = is_initial
        && local[Field::Kex].has_algo(ours_strict)
        && peer[Field::Kex].has_algo(other_strict);

    let hk = pick(&cprop[Field::HostKey], &sprop[Field::HostKey], Category::HostKey)?
        .with_context(|| error::NoHostkeyAlgMatch {
            client: cprop[Field::HostKey].clone(),
            server: sprop[Field::HostKey].clone(),
        })?;
    let hostkey = hk.sig_type().trap()?;
    let goodguess_hostkey = if kexguess2 {
        peer[Field::HostKey].first() == hk.name
    } else {
        peer[Field::HostKey].first() == local[Field::HostKey].first()
    };

    let cipher = |f: Field| -> Result<&'static Algorithm> {
        pick(&cprop[f], &sprop[f], Category::Cipher)?.with_context(|| error::NoCipherAlgMatch {
            client: cprop[f].clone(),
            server: sprop[f].clone(),
        })
    };
    let enc_c2s = cipher(Field::CipherC2S)?;
    let enc_s2c = cipher(Field::CipherS2C)?;

    // We ignore mac algorithms for AEAD ciphers
    let mac = |f: Field, enc: &'static Algorithm| -> Result<Option<&'static Algorithm>> {
        if enc.cipher().trap()?.aead {
            return Ok(None);
        }
        pick(&cprop[f], &sprop[f], Category::Mac)?
            .with_context(|| error::NoMacAlgMatch {
                client: cprop[f].clone(),
                server: sprop[f].clone(),
            })
            .map(Some)
    };
    let mac_c2s = mac(Field::MacC2S, enc_c2s)?;
    let mac_s2c = mac(Field::MacS2C, enc_s2c)?;

    let comp = |f: Field| -> Result<&'static Algorithm> {
        pick(&cprop[f], &sprop[f], Category::Compression)?.with_context(|| {
            error::NoCompressAlgMatch {
                client: cprop[f].clone(),
                server: sprop[f].clone(),
            }
        })
    };
    let comp_c2s = comp(Field::CompC2S)?;
    let comp_s2c = comp(Field::CompS2C)?;

    // Ignore language fields at present.

    let discard_next = peer_first_follows && !(goodguess_kex && goodguess_hostkey);
    if discard_next {
        debug!("Peer guessed wrong, will discard its next kex packet");
    }

    let (enc_out, enc_in, mac_out, mac_in, comp_out, comp_in) = if is_client {
        (enc_c2s, enc_s2c, mac_c2s, mac_s2c, comp_c2s, comp_s2c)
    } else {
        (enc_s2c, enc_c2s, mac_s2c, mac_c2s, comp_s2c, comp_c2s)
    };

    Ok(Chosen {
        kex,
        hostkey,
        enc_out,
        enc_in,
        mac_out,
        mac_in,
        comp_out,
        comp_in,
        discard_next,
        is_client,
        ext_info_c,
        strict_kex,
    })
}
