#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medinodus::run().await
}
