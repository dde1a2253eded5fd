//! SSH comma separated algorithm lists.
//!
//! Wire format is described in [RFC4251](https://tools.ietf.org/html/rfc4251) SSH Architecture "name-list"
#[allow(unused_imports)]
use {
    crate::error::{Error, Result},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use ascii::AsciiChar;

use crate::*;
use sshwire::{BinString, SSHDecode, SSHEncode, SSHSink, SSHSource, WireResult};

/// RFC4251 limits names to 64 characters
const MAX_NAME_LEN: usize = 64;

/// A comma separated list of algorithm names, in preference order.
///
/// Used both for our own lists and for lists received from the peer.
/// Lists received from the peer may contain names we don't know, those
/// never match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameList(String);

impl NameList {
    /// Builds a list from individual names.
    ///
    /// Each name must be printable ASCII, without commas or spaces.
    pub fn new(names: &[&str]) -> Result<Self> {
        let mut l = Self::empty();
        for n in names {
            l.push(n)?;
        }
        Ok(l)
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Appends a name to the end of the list
    pub fn push(&mut self, name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name.bytes().all(|c| c.is_ascii_graphic() && c != b',');
        if !valid {
            debug!("Bad algorithm name {:?}", name);
            return Err(Error::BadName);
        }
        if !self.0.is_empty() {
            self.0.push(',');
        }
        self.0.push_str(name);
        Ok(())
    }

    /// Returns the names in order. An empty list has no names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.split(',').filter(|n| !n.is_empty())
    }

    /// Returns the first name, or `""` for an empty list
    pub fn first(&self) -> &str {
        self.iter().next().unwrap_or("")
    }

    /// Returns whether the `algo` is contained in this list
    pub fn has_algo(&self, algo: &str) -> bool {
        self.iter().any(|n| n == algo)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Returns a copy of the list without any of `names`
    pub fn without(&self, names: &[&str]) -> Self {
        let kept: Vec<&str> = self.iter().filter(|n| !names.contains(n)).collect();
        Self(kept.join(","))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Returns the first name in `client` that is also present anywhere in `server`.
///
/// The SSH client's list always determines priority, regardless of which
/// side is running the negotiation.
pub fn first_match<'c>(client: &'c NameList, server: &NameList) -> Option<&'c str> {
    client.iter().find(|c| server.has_algo(c))
}

impl fmt::Display for NameList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// Parses a comma separated string, as found on the wire.
impl TryFrom<&str> for NameList {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self> {
        let n = sshwire::try_as_ascii(s.as_bytes())?;
        if n.chars().any(|ch| ch == AsciiChar::Space) {
            return Err(Error::BadName);
        }
        Ok(Self(n.as_str().into()))
    }
}

impl SSHEncode for NameList {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        BinString(self.0.as_bytes()).enc(s)
    }
}

impl<'de> SSHDecode<'de> for NameList {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let b = BinString::dec(s)?;
        let n = sshwire::try_as_ascii(b.0)?;
        Ok(Self(n.as_str().into()))
    }
}

#[cfg(test)]
mod tests {
    use crate::namelist::*;
    use crate::sshwire::{read_ssh, write_ssh};

    #[test]
    fn test_match() {
        let r1: NameList = "rho,cog".try_into().unwrap();
        let r2: NameList = "woe".try_into().unwrap();
        let l1 = NameList::new(&["rho", "cog"]).unwrap();
        let l2 = NameList::new(&["cog", "rho"]).unwrap();
        let l3 = NameList::new(&["now", "woe"]).unwrap();
        let l4 = NameList::empty();

        // we are client, our list is first
        assert_eq!(first_match(&l1, &r1), Some("rho"));
        assert_eq!(first_match(&l2, &r1), Some("cog"));
        assert_eq!(first_match(&l3, &r2), Some("woe"));
        assert_eq!(first_match(&l4, &r1), None);
        assert_eq!(first_match(&l3, &l4), None);
        // we are server, their list is first
        assert_eq!(first_match(&r1, &l2), Some("rho"));
        assert_eq!(first_match(&r2, &l1), None);
    }

    #[test]
    /// The result only depends on the client's order, not the server's
    fn test_match_server_order() {
        let client = NameList::new(&["d", "b", "a", "c"]).unwrap();
        let servers = [
            NameList::new(&["a", "b", "c"]).unwrap(),
            NameList::new(&["c", "b", "a"]).unwrap(),
            NameList::new(&["b", "c", "a"]).unwrap(),
        ];
        for s in servers.iter() {
            assert_eq!(first_match(&client, s), Some("b"));
        }
    }

    #[test]
    fn test_localnames_serialize() {
        let t = |names: &[&str], expect: &[u8]| {
            let l = NameList::new(names).unwrap();
            let b = write_ssh(&l).unwrap();
            assert_eq!(b, expect);
            let back: NameList = read_ssh(&b, None).unwrap();
            assert_eq!(back, l);
        };
        t(&["foo", "quux", "pyrex"], b"\x00\x00\x00\x0efoo,quux,pyrex");
        t(&["foo"], b"\x00\x00\x00\x03foo");
        t(&[], b"\x00\x00\x00\x00");
    }

    #[test]
    fn test_first() {
        let n: NameList = "".try_into().unwrap();
        assert_eq!(n.first(), "");
        assert!(n.is_empty());
        let n: NameList = "boo".try_into().unwrap();
        assert_eq!(n.first(), "boo");
        let n: NameList = "boo,pie".try_into().unwrap();
        assert_eq!(n.first(), "boo");
        let n: NameList = "boo,pie,".try_into().unwrap();
        assert_eq!(n.first(), "boo");
        assert_eq!(n.iter().count(), 2);
    }

    #[test]
    fn test_has_algo() {
        let n: NameList = "".try_into().unwrap();
        assert!(!n.has_algo("boo"));
        assert!(!n.has_algo(""));
        let n: NameList = "boo,pie".try_into().unwrap();
        assert!(n.has_algo("boo"));
        assert!(n.has_algo("pie"));
        assert!(!n.has_algo("p"));
        assert!(!n.has_algo("boo,pie"));
    }

    #[test]
    fn test_without() {
        let n = NameList::new(&["a", "ext-info-c", "b"]).unwrap();
        assert_eq!(n.without(&["ext-info-c"]).as_str(), "a,b");
    }

    #[test]
    fn test_bad_names() {
        assert!(NameList::new(&["a,b"]).is_err());
        assert!(NameList::new(&[""]).is_err());
        assert!(NameList::new(&["sp ace"]).is_err());
        assert!(NameList::try_from("a\x07b").is_err());
        let r: crate::Result<NameList> = read_ssh(b"\x00\x00\x00\x02\xc3\xa9", None);
        assert!(r.is_err());
    }
}
