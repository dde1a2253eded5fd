#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

/// Fills `buf` from the operating system RNG
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| {
        warn!("getrandom failed: {e}");
        Error::msg("RNG failed")
    })
}

/// A fresh KEXINIT cookie
pub fn cookie() -> Result<[u8; 16]> {
    let mut c = [0u8; 16];
    fill_random(&mut c)?;
    Ok(c)
}
