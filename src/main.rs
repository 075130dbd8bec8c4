use anyhow::Result;
use codegen::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
