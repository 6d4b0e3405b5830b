//! Small demo binary exercising [`atchan`] against a real serial port with
//! commands that exist on essentially every Hayes-compatible modem. This is
//! explicitly not a modem driver — per-modem command suites are out of
//! scope for this crate (see the crate docs).

use std::time::Duration;

use atchan::AtChannelBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let mut chan = AtChannelBuilder::new()
        .with_serial(&path, 115_200)
        .with_timeout(Duration::from_secs(5))
        .open()?;

    let resp = chan.command(format_args!("AT"))?;
    println!("AT -> {:?}", resp.as_str()?);

    let resp = chan.command(format_args!("ATI"))?;
    println!("ATI -> {:?}", resp.as_str()?);

    let resp = chan.command(format_args!("AT+CSQ?"))?;
    println!("AT+CSQ? -> {:?}", resp.as_str()?);

    chan.close();
    Ok(())
}
