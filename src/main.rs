//! Lantern CLI entry point.

use lantern_lib::cli::{self, Cli};
use lantern_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
