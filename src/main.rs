#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meshtalk_gateway::run().await
}
