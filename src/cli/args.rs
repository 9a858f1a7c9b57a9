// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::chat::interfaces::FallbackStrategy;

/// Shoulders - streaming chat with Anthropic, OpenAI and Google models
#[derive(Parser, Debug)]
#[command(name = "shoulders")]
#[command(version, about = "Streaming chat with Anthropic, OpenAI and Google models")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat session (default when no command given)
    Chat(ChatArgs),

    /// Ask a single question and stream the answer
    Ask(AskArgs),

    /// Non-streaming call through a fallback model list
    Quick(QuickArgs),

    /// Show model prices or the cost of a usage sample
    Pricing(PricingArgs),

    /// Show or initialize settings
    #[command(alias = "config")]
    Settings(SettingsArgs),

    /// Print a saved session
    Session(SessionArgs),
}

/// Arguments shared by commands that run a session
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SessionOptions {
    /// Model id from the settings catalog
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Continue a saved session (bare names are looked up in ~/.shoulders/sessions)
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Save the session here when done (bare names go to ~/.shoulders/sessions)
    #[arg(long)]
    pub save: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    #[command(flatten)]
    pub session: SessionOptions,
}

#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: Option<String>,

    #[command(flatten)]
    pub session: SessionOptions,

    /// Read prompt from stdin
    #[arg(long)]
    pub stdin: bool,

    /// Print reasoning as it streams
    #[arg(long)]
    pub show_thinking: bool,
}

#[derive(clap::Args, Debug)]
pub struct QuickArgs {
    /// The prompt
    pub prompt: String,

    /// Fallback list to pick the model from
    #[arg(long, value_enum, default_value = "cheapest")]
    pub strategy: StrategyArg,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    Ghost,
    Cheapest,
}

impl From<StrategyArg> for FallbackStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Ghost => FallbackStrategy::Ghost,
            StrategyArg::Cheapest => FallbackStrategy::Cheapest,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct PricingArgs {
    /// Provider model identifier; lists the whole table when omitted
    pub model: Option<String>,

    /// Input tokens for a cost estimate
    #[arg(long, default_value_t = 0)]
    pub input: u64,

    /// Output tokens for a cost estimate
    #[arg(long, default_value_t = 0)]
    pub output: u64,
}

#[derive(clap::Args, Debug)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: Option<SettingsCommands>,
}

/// Settings subcommands
#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Show current configuration with credentials masked
    Show,

    /// Print the settings file path
    Path,

    /// Write default settings if no file exists
    Init,

    /// List the model catalog
    Models,
}

#[derive(clap::Args, Debug)]
pub struct SessionArgs {
    /// Session file written with --save
    pub file: PathBuf,
}
