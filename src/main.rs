#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    outreach_ledger::server::run().await
}
