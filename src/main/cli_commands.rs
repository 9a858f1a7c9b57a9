// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, BufRead, Read, Write};
use std::path::Path;

use serde_json::Value;
use shoulders::chat::interfaces::{AccessRequest, AccessResolver};
use shoulders::chat::snapshot::SessionSnapshot;
use shoulders::chat::SettingsAccessResolver;
use shoulders::cli::{AskArgs, ChatArgs, PricingArgs, QuickArgs, SessionArgs, SettingsCommands};
use shoulders::config::Settings;
use shoulders::error::{Result, ShouldersError};
use shoulders::llm::oneshot::call_model;
use shoulders::llm::pricing::{self, format_cost, PRICE_TABLE};
use shoulders::llm::provider::RequestOptions;
use shoulders::llm::spend::SpendLedger;
use shoulders::llm::usage::UsageSnapshot;
use shoulders::llm::{Role, WireMessage};

use super::chat_runtime::{initialize_chat_runtime, run_turn, save_session};

pub(super) async fn run_chat(args: ChatArgs, settings: Settings, verbose: u8) -> Result<()> {
    let mut runtime = initialize_chat_runtime(&settings, &args.session, false)?;
    if let Some(session) = runtime.engine.session(runtime.session_id) {
        eprintln!(
            "shoulders chat ({}), /quit to exit, Ctrl+C stops a reply",
            session.model_id
        );
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/usage" => {
                if let Some(session) = runtime.engine.session(runtime.session_id) {
                    eprintln!(
                        "{} in / {} out, {} this session, {} direct spend this month",
                        session.usage.input_total,
                        session.usage.output,
                        format_cost(session.usage.cost),
                        format_cost(runtime.engine.spent())
                    );
                }
                continue;
            }
            _ => {}
        }
        run_turn(&mut runtime, input.to_string(), verbose).await?;
    }

    save_session(&runtime, args.session.save.as_deref())
}

pub(super) async fn run_ask(args: AskArgs, settings: Settings, verbose: u8) -> Result<()> {
    let prompt = match (args.prompt, args.stdin) {
        (Some(prompt), false) => prompt,
        (prompt, true) => {
            let mut piped = String::new();
            io::stdin().read_to_string(&mut piped)?;
            match prompt {
                Some(prompt) => format!("{}\n\n{}", prompt, piped),
                None => piped,
            }
        }
        (None, false) => {
            return Err(ShouldersError::InvalidInput(
                "a prompt or --stdin is required".into(),
            ))
        }
    };

    let mut runtime = initialize_chat_runtime(&settings, &args.session, args.show_thinking)?;
    run_turn(&mut runtime, prompt, verbose).await?;
    save_session(&runtime, args.session.save.as_deref())
}

pub(super) async fn run_quick(args: QuickArgs, settings: Settings, verbose: u8) -> Result<()> {
    let resolver = SettingsAccessResolver::new(settings.clone());
    let access = resolver
        .resolve(&AccessRequest::Strategy(args.strategy.into()))
        .await?;
    let provider = access.provider();

    let mut options = RequestOptions::new(
        access.api_key.clone(),
        access.model.clone(),
        vec![WireMessage::user(args.prompt)],
    )
    .with_endpoint(access.endpoint.clone());
    if let Some(system) = args.system.or_else(|| settings.defaults.system_prompt.clone()) {
        options = options.with_system(system);
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(
            settings.engine.request_timeout_secs,
        ))
        .build()?;
    let reply = call_model(&client, provider, &options).await?;

    if let (Some(usage), true) = (reply.usage, access.is_direct()) {
        let path = SpendLedger::default_path();
        let mut ledger = SpendLedger::load_from(&path);
        ledger.record(usage.cost);
        ledger.save_to(&path)?;
    }

    println!("{}", reply.text.unwrap_or_default());
    if verbose > 0 {
        eprintln!(
            "[{} via {}, {}]",
            access.model,
            provider,
            format_cost(reply.usage.map(|u| u.cost).unwrap_or_default())
        );
        if let Some(balance) = reply.balance {
            eprintln!("[relay balance {:.2}]", balance);
        }
    }
    Ok(())
}

pub(super) fn run_pricing(args: PricingArgs) -> Result<()> {
    let Some(model) = args.model else {
        println!("{:<24} {:>8} {:>8} {:>10} {:>10}", "model", "input", "output", "cache w", "cache r");
        for (name, rates) in PRICE_TABLE {
            println!(
                "{:<24} {:>8.3} {:>8.3} {:>10} {:>10}",
                name,
                rates.input,
                rates.output,
                rates.cache_write.map(|r| format!("{:.3}", r)).unwrap_or_else(|| "-".into()),
                rates.cache_read.map(|r| format!("{:.3}", r)).unwrap_or_else(|| "-".into()),
            );
        }
        println!("(USD per million tokens)");
        return Ok(());
    };

    let (key, rates) = pricing::pricing_for(&model).ok_or_else(|| {
        ShouldersError::InvalidInput(format!("no pricing known for '{}'", model))
    })?;
    println!("{} -> {}", model, key);
    println!("  input  ${:.3}/MTok", rates.input);
    println!("  output ${:.3}/MTok", rates.output);
    if let Some(large) = rates.large_prompt {
        println!(
            "  above {} input tokens: ${:.3} in / ${:.3} out",
            pricing::LARGE_PROMPT_THRESHOLD,
            large.input,
            large.output
        );
    }

    if args.input > 0 || args.output > 0 {
        let usage = UsageSnapshot {
            input_cache_miss: args.input,
            input_total: args.input,
            output: args.output,
            total: args.input + args.output,
            ..Default::default()
        };
        println!("  estimate: {}", format_cost(pricing::price(&usage, &model)));
    }
    Ok(())
}

pub(super) fn run_settings_command(
    command: Option<SettingsCommands>,
    settings: &Settings,
    path: &Path,
) -> Result<()> {
    match command.unwrap_or(SettingsCommands::Show) {
        SettingsCommands::Show => {
            let mut value = serde_json::to_value(settings)?;
            mask_secrets(&mut value);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        SettingsCommands::Path => println!("{}", path.display()),
        SettingsCommands::Init => {
            if path.exists() {
                eprintln!("Settings already exist at {}", path.display());
            } else {
                Settings::default().save_to(path)?;
                eprintln!("Wrote default settings to {}", path.display());
            }
        }
        SettingsCommands::Models => {
            let default = settings.default_model_id();
            for entry in &settings.models {
                let marker = if Some(&entry.id) == default.as_ref() { "*" } else { " " };
                let thinking = entry
                    .thinking
                    .map(|level| format!(" thinking={}", level))
                    .unwrap_or_default();
                let reachable = if settings.is_provider_configured(entry.provider) {
                    ""
                } else {
                    " (no credentials)"
                };
                println!(
                    "{} {:<22} {:<10} {}{}{}",
                    marker,
                    entry.id,
                    entry.provider.as_str(),
                    entry.model,
                    thinking,
                    reachable
                );
            }
        }
    }
    Ok(())
}

/// Replace credential values with a masked form.
fn mask_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if key == "api_key" || key == "token" {
                    if let Value::String(secret) = inner {
                        let tail: String = secret
                            .chars()
                            .rev()
                            .take(4)
                            .collect::<Vec<_>>()
                            .into_iter()
                            .rev()
                            .collect();
                        *secret = format!("****{}", tail);
                    }
                } else {
                    mask_secrets(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_secrets),
        _ => {}
    }
}

pub(super) fn run_session_command(args: SessionArgs) -> Result<()> {
    let snapshot = SessionSnapshot::load_from(&Settings::session_file(&args.file))?;
    println!(
        "{} ({}), {} messages, saved {}",
        snapshot.label.as_deref().unwrap_or("untitled"),
        snapshot.model_id,
        snapshot.messages.len(),
        snapshot.saved_at.format("%Y-%m-%d %H:%M")
    );
    for message in &snapshot.messages {
        let role = match message.role {
            Role::User if !message.tool_results.is_empty() => "tools",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        println!("\n[{}]", role);
        if !message.content.is_empty() {
            println!("{}", message.content);
        }
        for call in &message.tool_calls {
            println!("  -> {}({})", call.name, call.input);
        }
        for result in &message.tool_results {
            let status = if result.is_error { "error" } else { "ok" };
            println!("  <- {} [{}]", result.tool_name, status);
        }
    }
    println!(
        "\n{} in / {} out, {}",
        snapshot.usage.input_total,
        snapshot.usage.output,
        format_cost(snapshot.usage.cost)
    );
    Ok(())
}
