use std::path::PathBuf;

use clap::Parser;

/// Marks a batch of local scans once and prints the result as JSON.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Pipeline options as a JSON object, e.g. '{"examBoard":"AQA"}'
    #[arg(long)]
    options: Option<String>,
    /// Page images or PDFs, in upload order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    scanmark::run_batch(args.files, args.options).await
}
