#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nyaynow::start_server().await
}
