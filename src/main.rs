#[tokio::main]
async fn main() -> anyhow::Result<()> {
    devevent_lib::run().await
}
