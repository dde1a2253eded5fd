//! Local algorithm preferences and key exchange limits.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::time::Duration;

use crate::*;
use catalog::Category;
use dh::{DH_GRP_MAX, DH_GRP_MIN};
use namelist::NameList;
use proposal::{Field, Proposal};
use sshnames::*;

/// Rekey after this much traffic in either direction, unless the
/// cipher's block limit is lower. [RFC4253](https://tools.ietf.org/html/rfc4253) section 9
pub const DEFAULT_REKEY_BYTES: u64 = 1 << 30;
pub const DEFAULT_REKEY_TIME: Duration = Duration::from_secs(60 * 60);

/// How a server picks a group when several fit the client's range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupPolicy {
    /// Closest to the preferred size. Ties go to the larger group.
    #[default]
    Nearest,
    /// The largest group within range
    Largest,
}

/// Diffie-Hellman group exchange parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GexConfig {
    /// Client request minimum, in bits
    pub min: u32,
    /// Client preferred size. `None` estimates it from the negotiated ciphers.
    pub preferred: Option<u32>,
    /// Client request maximum
    pub max: u32,
    /// Server group selection
    pub policy: GroupPolicy,
}

impl Default for GexConfig {
    fn default() -> Self {
        Self { min: DH_GRP_MIN, preferred: None, max: DH_GRP_MAX, policy: GroupPolicy::Nearest }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyLimits {
    pub bytes: u64,
    pub time: Duration,
}

impl Default for RekeyLimits {
    fn default() -> Self {
        Self { bytes: DEFAULT_REKEY_BYTES, time: DEFAULT_REKEY_TIME }
    }
}

/// Key exchange configuration for one connection.
///
/// The algorithm lists are in preference order. Capability markers
/// like `ext-info-c` are added by [`local_proposal()`](Self::local_proposal)
/// and mustn't be listed here.
#[derive(Debug, Clone)]
pub struct KexConfig {
    pub kexs: NameList,
    pub hostsig: NameList,
    /// Used for both directions
    pub ciphers: NameList,
    pub macs: NameList,
    pub comps: NameList,

    pub gex: GexConfig,

    /// Sent by a server in `SSH_MSG_EXT_INFO`
    pub server_sig_algs: NameList,

    pub rekey: RekeyLimits,
}

fn catalog_list(cat: Category) -> Result<NameList> {
    let names: Vec<&str> = catalog::enumerate(cat).map(|a| a.name).collect();
    NameList::new(&names)
}

impl KexConfig {
    /// Everything in the catalog, in catalog order.
    /// Compression is only `none`.
    pub fn new() -> Result<Self> {
        Ok(Self {
            kexs: catalog_list(Category::Kex)?,
            hostsig: catalog_list(Category::HostKey)?,
            ciphers: catalog_list(Category::Cipher)?,
            macs: catalog_list(Category::Mac)?,
            comps: NameList::new(&[SSH_NAME_NONE])?,
            gex: GexConfig::default(),
            server_sig_algs: catalog_list(Category::HostKey)?,
            rekey: RekeyLimits::default(),
        })
    }

    /// Checks that all names are known and the group exchange range is sensible.
    pub fn validate(&self) -> Result<()> {
        let lists = [
            (&self.kexs, Category::Kex, "kex"),
            (&self.hostsig, Category::HostKey, "hostkey"),
            (&self.ciphers, Category::Cipher, "cipher"),
            (&self.macs, Category::Mac, "mac"),
            (&self.comps, Category::Compression, "compression"),
        ];
        for (l, cat, kind) in lists {
            for n in l.iter() {
                if !catalog::lookup_by_name(n).is_some_and(|a| a.category() == cat) {
                    debug!("Unknown {kind} algorithm {n}");
                    return error::UnknownMethod { kind }.fail();
                }
            }
            // an empty mac list is fine if only AEAD ciphers are used,
            // negotiation fails otherwise
            if l.is_empty() && cat != Category::Mac {
                debug!("Empty {kind} list");
                return Err(Error::msg("Empty algorithm list"));
            }
        }

        let g = &self.gex;
        let preferred = g.preferred.unwrap_or(g.min);
        if g.min < DH_GRP_MIN || g.max > DH_GRP_MAX || !(g.min <= preferred && preferred <= g.max)
        {
            return error::DhGexOutOfRange { min: g.min, preferred, max: g.max }.fail();
        }
        Ok(())
    }

    /// Our KEXINIT proposal. Markers for extension info and strict kex
    /// are only included on the `initial` exchange.
    pub fn local_proposal(&self, is_client: bool, initial: bool) -> Result<Proposal> {
        let mut kexs = self.kexs.clone();
        if initial {
            if is_client {
                kexs.push(SSH_NAME_EXT_INFO_C)?;
                kexs.push(SSH_NAME_STRICT_KEX_C)?;
            } else {
                kexs.push(SSH_NAME_EXT_INFO_S)?;
                kexs.push(SSH_NAME_STRICT_KEX_S)?;
            }
        }
        kexs.push(SSH_NAME_KEXGUESS2)?;

        let mut p = Proposal::default();
        p.set(Field::Kex, kexs);
        p.set(Field::HostKey, self.hostsig.clone());
        p.set(Field::CipherC2S, self.ciphers.clone());
        p.set(Field::CipherS2C, self.ciphers.clone());
        p.set(Field::MacC2S, self.macs.clone());
        p.set(Field::MacS2C, self.macs.clone());
        p.set(Field::CompC2S, self.comps.clone());
        p.set(Field::CompS2C, self.comps.clone());
        // languages are left empty
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::sunsetlog::init_test_log;

    #[test]
    fn default_valid() {
        init_test_log();
        let c = KexConfig::new().unwrap();
        c.validate().unwrap();
        assert_eq!(c.kexs.first(), SSH_NAME_CURVE25519);
        assert_eq!(c.comps.as_str(), "none");
        assert_eq!(c.gex.policy, GroupPolicy::Nearest);
    }

    #[test]
    fn reject_unknown() {
        let mut c = KexConfig::new().unwrap();
        c.ciphers = "aes256-ctr,3des-cbc".try_into().unwrap();
        assert!(matches!(c.validate(), Err(Error::UnknownMethod { kind: "cipher" })));

        // markers are added automatically
        let mut c = KexConfig::new().unwrap();
        c.kexs.push(SSH_NAME_EXT_INFO_C).unwrap();
        assert!(matches!(c.validate(), Err(Error::UnknownMethod { kind: "kex" })));

        // a cipher name in the mac list
        let mut c = KexConfig::new().unwrap();
        c.macs = "aes256-ctr".try_into().unwrap();
        assert!(c.validate().is_err());

        let mut c = KexConfig::new().unwrap();
        c.hostsig = NameList::empty();
        assert!(c.validate().is_err());
    }

    #[test]
    fn gex_range() {
        let mut c = KexConfig::new().unwrap();
        c.gex.min = 1024;
        assert!(matches!(c.validate(), Err(Error::DhGexOutOfRange { .. })));
        c.gex.min = 3072;
        c.gex.preferred = Some(2048);
        assert!(matches!(c.validate(), Err(Error::DhGexOutOfRange { .. })));
        c.gex.preferred = Some(4096);
        c.validate().unwrap();
    }

    #[test]
    fn markers() {
        let c = KexConfig::new().unwrap();
        let p = c.local_proposal(true, true).unwrap();
        let k = &p[Field::Kex];
        assert_eq!(k.first(), SSH_NAME_CURVE25519);
        assert!(k.has_algo(SSH_NAME_EXT_INFO_C));
        assert!(k.has_algo(SSH_NAME_STRICT_KEX_C));
        assert!(k.has_algo(SSH_NAME_KEXGUESS2));
        assert!(!k.has_algo(SSH_NAME_EXT_INFO_S));
        assert!(p[Field::LangC2S].is_empty());

        let p = c.local_proposal(false, true).unwrap();
        assert!(p[Field::Kex].has_algo(SSH_NAME_STRICT_KEX_S));
        assert!(p[Field::Kex].has_algo(SSH_NAME_EXT_INFO_S));

        // rekey
        let p = c.local_proposal(true, false).unwrap();
        assert!(!p[Field::Kex].has_algo(SSH_NAME_EXT_INFO_C));
        assert!(!p[Field::Kex].has_algo(SSH_NAME_STRICT_KEX_C));
        assert!(p[Field::Kex].has_algo(SSH_NAME_KEXGUESS2));
    }
}
