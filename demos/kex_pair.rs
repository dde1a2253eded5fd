//! Runs a client and server key exchange over an in-memory channel,
//! then rekeys once.

use anyhow::{bail, Context, Result};
use pretty_hex::PrettyHex;
use simplelog::{self, LevelFilter, TestLogger};

use sunset_kex::*;

struct Cli;

impl CliBehaviour for Cli {
    fn valid_hostkey(&mut self, key: &PubKey) -> BhResult<bool> {
        println!("server host key {key:?}");
        Ok(true)
    }
}

struct Serv {
    key: SignKey,
}

impl ServBehaviour for Serv {
    fn hostkeys(&mut self) -> BhResult<heapless::Vec<&SignKey, 2>> {
        let mut v = heapless::Vec::new();
        v.push(&self.key).map_err(|_| BhError::Fail)?;
        Ok(v)
    }
}

fn main() -> Result<()> {
    let _ = TestLogger::init(LevelFilter::Debug, simplelog::Config::default());

    let kex = std::env::args().nth(1).unwrap_or_else(|| "curve25519-sha256".into());
    let mut conf = KexConfig::new()?;
    conf.kexs = namelist::NameList::try_from(kex.as_str()).context("kex name")?;

    let (ct, st) = MemTransport::pair();
    let (vc, vs) = (b"SSH-2.0-demo_client", b"SSH-2.0-demo_server");
    let mut cli = Runner::new_client(conf.clone(), ct, vc, vs)?;
    let mut serv = Runner::new_server(conf, st, vc, vs)?;

    let mut cb = Cli;
    let mut sb = Serv { key: SignKey::generate(KeyType::Ed25519)? };

    cli.start()?;
    serv.start()?;
    run(&mut cli, &mut serv, &mut cb, &mut sb)?;

    let sess_id = cli.session().session_id().context("no session id")?.to_vec();
    println!("session id {:?}", sess_id.hex_dump());

    cli.start_rekex()?;
    run(&mut cli, &mut serv, &mut cb, &mut sb)?;
    if cli.session().session_id() != Some(sess_id.as_slice()) {
        bail!("session id changed");
    }
    println!("rekeyed, send keys {:?}", cli.transport().send_keys());
    Ok(())
}

fn run(
    cli: &mut Runner<MemTransport>,
    serv: &mut Runner<MemTransport>,
    cb: &mut Cli,
    sb: &mut Serv,
) -> Result<()> {
    loop {
        let mut progress = false;
        if let Some((m, seq)) = serv.transport_mut().next_message()? {
            let mut b = Behaviour::<UnusedCli, Serv>::Server(&mut *sb);
            let ev = serv.input(&m.payload, seq, &mut b).context("server")?;
            println!("server {ev:?}");
            progress = true;
        }
        if let Some((m, seq)) = cli.transport_mut().next_message()? {
            let mut b = Behaviour::<Cli, UnusedServ>::Client(&mut *cb);
            let ev = cli.input(&m.payload, seq, &mut b).context("client")?;
            println!("client {ev:?}");
            progress = true;
        }
        if !progress {
            return Ok(());
        }
    }
}
