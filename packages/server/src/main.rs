#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Crime API server binary.
//!
//! ```text
//! crime_api_server                 # configure from the environment
//! crime_api_server --interactive   # prompt for address, port, MongoDB URI
//! ```
//!
//! Environment: `BIND_ADDR`, `PORT`, `MONGODB_URI`, `MONGODB_DATABASE`,
//! `MONGODB_COLLECTION`, `RUST_LOG`.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "crime_api_server",
    about = "Read-only HTTP API over geocoded crime records"
)]
struct Cli {
    /// Prompt for the bind address, port, and MongoDB URI before starting
    #[arg(long)]
    interactive: bool,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    if cli.interactive {
        crime_api_server::interactive::run().await
    } else {
        crime_api_server::run_server().await
    }
}
