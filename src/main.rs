// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Shoulders - streaming chat with Anthropic, OpenAI and Google models
//!
//! Entry point for the Shoulders CLI application.

use clap::Parser;

use shoulders::cli::{ChatArgs, Cli, Commands};
use shoulders::config::Settings;
use shoulders::error::Result;

#[path = "main/chat_runtime.rs"]
mod chat_runtime;
#[path = "main/cli_commands.rs"]
mod cli_commands;

use cli_commands::{
    run_ask, run_chat, run_pricing, run_quick, run_session_command, run_settings_command,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on engine and transport diagnostics, `-vv` everything.
    // `RUST_LOG` still takes precedence.
    let directives: &[&str] = match cli.verbose {
        0 => &[],
        1 => &[
            "shoulders.engine=debug",
            "shoulders.transport=debug",
            "shoulders.access=debug",
        ],
        _ => &["shoulders=trace"],
    };
    for directive in directives {
        if let Ok(parsed) = directive.parse() {
            env_filter = env_filter.add_directive(parsed);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let settings_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load_from(&settings_path)?;

    let verbose = cli.verbose;
    match cli.command {
        None => run_chat(ChatArgs::default(), settings, verbose).await?,
        Some(Commands::Chat(args)) => run_chat(args, settings, verbose).await?,
        Some(Commands::Ask(args)) => run_ask(args, settings, verbose).await?,
        Some(Commands::Quick(args)) => run_quick(args, settings, verbose).await?,
        Some(Commands::Pricing(args)) => run_pricing(args)?,
        Some(Commands::Settings(args)) => {
            run_settings_command(args.command, &settings, &settings_path)?
        }
        Some(Commands::Session(args)) => run_session_command(args)?,
    }

    Ok(())
}
