//! Named SSH algorithms, methods, and extensions.
//!
//! Packet numbers are listed in `packets.rs`.
//!
//! This module also serves as an index of SSH specifications.

/// [RFC8731](https://tools.ietf.org/html/rfc8731)
pub const SSH_NAME_CURVE25519: &str = "curve25519-sha256";
/// An older alias prior to standardisation.
pub const SSH_NAME_CURVE25519_LIBSSH: &str = "curve25519-sha256@libssh.org";
/// [RFC4419](https://tools.ietf.org/html/rfc4419) Diffie-Hellman Group Exchange
pub const SSH_NAME_DH_GEX_SHA256: &str = "diffie-hellman-group-exchange-sha256";
/// [RFC8268](https://tools.ietf.org/html/rfc8268)
pub const SSH_NAME_DH_GROUP14_SHA256: &str = "diffie-hellman-group14-sha256";
/// [RFC8268](https://tools.ietf.org/html/rfc8268)
pub const SSH_NAME_DH_GROUP16_SHA512: &str = "diffie-hellman-group16-sha512";
/// [RFC8268](https://tools.ietf.org/html/rfc8268)
pub const SSH_NAME_DH_GROUP18_SHA512: &str = "diffie-hellman-group18-sha512";

/// [RFC8308](https://tools.ietf.org/html/rfc8308) Extension Negotiation
pub const SSH_NAME_EXT_INFO_S: &str = "ext-info-s";
/// [RFC8308](https://tools.ietf.org/html/rfc8308) Extension Negotiation
pub const SSH_NAME_EXT_INFO_C: &str = "ext-info-c";
/// Implemented by Dropbear to improve first_kex_packet_follows, described
/// [https://mailarchive.ietf.org/arch/msg/secsh/3n6lNzDHmsGsIQSqhmHHwigIbuo/](https://mailarchive.ietf.org/arch/msg/secsh/3n6lNzDHmsGsIQSqhmHHwigIbuo/)
pub const SSH_NAME_KEXGUESS2: &str = "kexguess2@matt.ucc.asn.au";
/// Strict Kex, OpenSSH [PROTOCOL](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL?annotate=HEAD)
pub const SSH_NAME_STRICT_KEX_S: &str = "kex-strict-s-v00@openssh.com";
/// Strict Kex
pub const SSH_NAME_STRICT_KEX_C: &str = "kex-strict-c-v00@openssh.com";

/// [RFC8709](https://tools.ietf.org/html/rfc8709)
pub const SSH_NAME_ED25519: &str = "ssh-ed25519";

/// [RFC4344](https://tools.ietf.org/html/rfc4344)
pub const SSH_NAME_AES256_CTR: &str = "aes256-ctr";
/// [RFC4344](https://tools.ietf.org/html/rfc4344)
pub const SSH_NAME_AES192_CTR: &str = "aes192-ctr";
/// [RFC4344](https://tools.ietf.org/html/rfc4344)
pub const SSH_NAME_AES128_CTR: &str = "aes128-ctr";
/// OpenSSH [PROTOCOL.chacha20poly1305.txt](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL.chacha20poly1305?annotate=HEAD)
pub const SSH_NAME_CHAPOLY: &str = "chacha20-poly1305@openssh.com";
/// OpenSSH [PROTOCOL](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL?annotate=HEAD).
/// (No-one directly uses `AEAD_AES_256_GCM` [RFC5647](https://tools.ietf.org/html/rfc5647), it fails to define mac negotiation
/// sensibly and has incongruous naming style)
pub const SSH_NAME_AES256_GCM: &str = "aes256-gcm@openssh.com";
/// OpenSSH [PROTOCOL](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL?annotate=HEAD).
pub const SSH_NAME_AES128_GCM: &str = "aes128-gcm@openssh.com";

/// [RFC6668](https://tools.ietf.org/html/rfc6668)
pub const SSH_NAME_HMAC_SHA256: &str = "hmac-sha2-256";
/// [RFC6668](https://tools.ietf.org/html/rfc6668)
pub const SSH_NAME_HMAC_SHA512: &str = "hmac-sha2-512";
/// OpenSSH encrypt-then-mac
pub const SSH_NAME_HMAC_SHA256_ETM: &str = "hmac-sha2-256-etm@openssh.com";
/// OpenSSH encrypt-then-mac
pub const SSH_NAME_HMAC_SHA512_ETM: &str = "hmac-sha2-512-etm@openssh.com";

/// [RFC4253](https://tools.ietf.org/html/rfc4253)
pub const SSH_NAME_NONE: &str = "none";
/// OpenSSH delayed compression, starts after authentication
pub const SSH_NAME_ZLIB_OPENSSH: &str = "zlib@openssh.com";

/// [RFC8308](https://tools.ietf.org/html/rfc8308) Extension Negotiation
pub const SSH_EXT_SERVER_SIG_ALGS: &str = "server-sig-algs";

/// [RFC4253](https://tools.ietf.org/html/rfc4253) section 11.1
pub const SSH_DISCONNECT_PROTOCOL_ERROR: u32 = 2;
pub const SSH_DISCONNECT_KEY_EXCHANGE_FAILED: u32 = 3;
pub const SSH_DISCONNECT_MAC_ERROR: u32 = 5;
pub const SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE: u32 = 9;
pub const SSH_DISCONNECT_BY_APPLICATION: u32 = 11;
