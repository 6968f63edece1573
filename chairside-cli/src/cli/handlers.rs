//! Configuration loading and the 'config' command

use anyhow::{Context, Result};
use chairside_core::credentials::normalize_system;
use chairside_core::models::{Configuration, LogLevel, BACKEND_URL_ENV};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Resolve the config file: explicit path, else the XDG default
fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Configuration::default_config_path(),
    }
}

/// Load configuration, apply environment overrides and validate
pub fn load_configuration(explicit: Option<&Path>) -> Result<Configuration> {
    let path = config_path(explicit)?;
    let mut config = Configuration::load_from_file(&path)?;
    config.apply_env_overrides();

    if let Err(errors) = config.validate() {
        anyhow::bail!(
            "Invalid configuration in {}:\n  - {}",
            path.display(),
            errors.join("\n  - ")
        );
    }
    Ok(config)
}

fn read_user_input_sync() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read input")?;
    Ok(input)
}

fn prompt(label: &str, current: &str) -> Result<Option<String>> {
    print!("{} [{}]: ", label, current);
    io::stdout().flush()?;
    let input = read_user_input_sync()?;
    let trimmed = input.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

fn log_level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Handle the 'config --init' command
pub async fn handle_config_init(config_file: Option<PathBuf>) -> Result<()> {
    println!("⚙️  Initializing chairside configuration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = config_path(config_file.as_deref())?;
    println!("📄 Config file: {}", config_path.display());

    let mut config = if config_path.exists() {
        println!("⚠️  Configuration file already exists. Loading existing values...");
        Configuration::load_from_file(&config_path)?
    } else {
        println!("✨ Creating new configuration with defaults...");
        Configuration::default()
    };

    println!("\n📝 Please answer the following questions (press Enter to use default):\n");

    if let Some(url) = prompt("Automation backend URL", &config.backend.base_url)? {
        config.backend.base_url = url;
    }

    let timeout = config.backend.timeout_seconds.to_string();
    if let Some(input) = prompt("Backend call timeout in seconds", &timeout)? {
        match input.parse::<u64>() {
            Ok(seconds) => config.backend.timeout_seconds = seconds,
            Err(_) => println!("⚠️  Invalid timeout value, using default"),
        }
    }

    let visits = config.engine.max_node_visits.to_string();
    if let Some(input) = prompt("Maximum visits per workflow step", &visits)? {
        match input.parse::<u32>() {
            Ok(max) => config.engine.max_node_visits = max,
            Err(_) => println!("⚠️  Invalid visit budget, using default"),
        }
    }

    let level = log_level_name(config.log_level);
    if let Some(input) = prompt("Log level (error/warn/info/debug/trace)", level)? {
        match input.parse::<LogLevel>() {
            Ok(level) => config.log_level = level,
            Err(e) => println!("⚠️  {}, using default", e),
        }
    }

    println!("\n🔍 Validating configuration...");
    match config.validate() {
        Ok(()) => println!("✅ Configuration is valid"),
        Err(errors) => {
            println!("❌ Configuration validation failed:");
            for error in &errors {
                println!("   - {}", error);
            }
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("\n💾 Saving configuration to {}...", config_path.display());
    config.save_to_file(&config_path)?;

    println!("✅ Configuration saved successfully!");
    println!("\n📋 Configuration summary:");
    println!("   Backend: {}", config.backend.base_url);
    println!("   Timeout: {}s", config.backend.timeout_seconds);
    println!("   Log level: {}", log_level_name(config.log_level));
    println!("   Run store: {}", config.resolved_store_path().display());
    println!("   Workflows: {}", config.resolved_workflows_dir().display());
    println!();
    println!("   Credentials are read from the environment (or a .env file), e.g.:");
    for spec in &config.credentials {
        let prefix = spec
            .env_prefix
            .clone()
            .unwrap_or_else(|| normalize_system(&spec.system).to_uppercase());
        for field in &spec.fields {
            println!("     {}_{}", prefix, field.to_uppercase());
        }
    }
    println!("   They are never stored in the config file.");

    Ok(())
}

/// Handle the 'config' command without --init
pub async fn handle_config_show(config_file: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_configuration(config_file.as_deref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
        if std::env::var(BACKEND_URL_ENV).is_ok() {
            println!("# backend.base_url overridden by {}", BACKEND_URL_ENV);
        }
    }

    Ok(())
}
