//! Integration tests for the Extractor
//!
//! Require a local `anvil` binary: `cargo test -p extractor -- --ignored`.

use std::{
    process::{Child, Command},
    thread::sleep,
    time::Duration,
};

use extractor::{ChainSource, Extractor};

use eyre::Result;
use tokio_stream::StreamExt;
use url::Url;

const WS_URL: &str = "ws://127.0.0.1:8545";

/// Spawn Anvil as a child process (auto-mining every second),
/// and kill it when dropped.
struct Anvil(Child);

impl Anvil {
    fn new() -> Result<Self> {
        let child = Command::new("anvil").args(["--port", "8545", "--block-time", "1"]).spawn()?;
        Ok(Self(child))
    }
}

impl Drop for Anvil {
    fn drop(&mut self) {
        self.0.kill().unwrap();
    }
}

#[tokio::test]
#[ignore = "requires anvil"]
async fn test_header_stream_and_payload() -> Result<()> {
    let _anvil = Anvil::new()?;
    sleep(Duration::from_millis(500));

    let ext = Extractor::new(Url::parse(WS_URL)?).await?;
    let mut stream = ext.get_header_stream().await?;

    let header = stream.next().await.expect("stream ended unexpectedly");
    assert!(header.number > 0);
    assert!(header.timestamp > 0);

    let payload = ext.payload_at(header.number).await?;
    assert_eq!(payload.header.hash, header.hash);
    assert!(ext.latest_block_number().await? >= header.number);
    Ok(())
}
