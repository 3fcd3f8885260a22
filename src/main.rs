#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = scanmark::run().await {
        eprintln!("scanmark fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
