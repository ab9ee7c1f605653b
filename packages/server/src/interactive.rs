//! Interactive mode for the server.
//!
//! Prompts for the bind address, port, and MongoDB connection string before
//! starting the server.

use crime_api_database::db::DEFAULT_URI;
use dialoguer::{Confirm, Input};

/// Runs the server in interactive mode, prompting for configuration.
///
/// Each prompt defaults to the current environment value, if set. The
/// answers are written back to `BIND_ADDR`, `PORT`, and `MONGODB_URI` and
/// the server is started with [`super::run_server`].
///
/// # Errors
///
/// Returns an `std::io::Result` error if the underlying server fails to
/// start.
#[allow(clippy::future_not_send)]
pub async fn run() -> std::io::Result<()> {
    println!("Crime API Server");
    println!();

    let settings = [
        ("BIND_ADDR", prompt("Bind address", "BIND_ADDR", "127.0.0.1")),
        ("PORT", prompt("Port", "PORT", "8080")),
        ("MONGODB_URI", prompt("MongoDB URI", "MONGODB_URI", DEFAULT_URI)),
    ];

    for (name, value) in &settings {
        // SAFETY: no other thread exists yet; `run_server` reads these once
        // on startup.
        unsafe { std::env::set_var(name, value) };
    }

    let [(_, bind_addr), (_, port), (_, uri)] = &settings;
    let start = Confirm::new()
        .with_prompt(format!("Serve on {bind_addr}:{port} using {uri}?"))
        .default(true)
        .interact()
        .unwrap_or(true);
    if !start {
        println!("Not starting.");
        return Ok(());
    }

    super::run_server().await
}

fn prompt(label: &str, env_var: &str, fallback: &str) -> String {
    let default = std::env::var(env_var).unwrap_or_else(|_| fallback.to_string());
    Input::new()
        .with_prompt(label)
        .default(default.clone())
        .interact_text()
        .unwrap_or(default)
}
