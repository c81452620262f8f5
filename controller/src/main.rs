mod host;
mod links;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
