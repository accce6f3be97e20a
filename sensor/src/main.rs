mod host;
mod plug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
