//! Warden CLI - issue tokens and inspect permissions offline.
//!
//! Provides token, permission descriptor and route inference commands.

mod commands;
mod output;

use clap::{Parser, Subcommand};

use commands::{permission, route, token};
use output::OutputFormat;

/// Warden - scoped role-based access control CLI
#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Warden - scoped role-based access control",
    long_about = "CLI tool for issuing and inspecting Warden tokens, parsing permission descriptors and previewing route permissions.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue and inspect identity tokens
    #[command(subcommand)]
    Token(token::TokenCommands),

    /// Permission descriptor operations
    #[command(subcommand)]
    Permission(permission::PermissionCommands),

    /// Route permission inference
    #[command(subcommand)]
    Route(route::RouteCommands),
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;

    let result = match cli.command {
        Commands::Token(cmd) => token::execute(cmd, format),
        Commands::Permission(cmd) => permission::execute(cmd, format),
        Commands::Route(cmd) => route::execute(cmd, format),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
