pub mod models {
    pub mod alert;
    pub mod sensor;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod schema;
pub mod utils;
pub mod services {
    pub mod alerts;
    pub mod classify;
    pub mod feed;
    pub mod guard;
    pub mod realtime;
    pub mod simulated;
    pub mod store;
}

use crate::config::Config;
use crate::models::sensor::ChannelKind;
use crate::services::alerts::{self, AlertFilter};
use crate::services::realtime::{self, ChannelWorker};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Subscribe to the enabled channels and store alerts.
    Watch,
    /// Print stored alerts of one display type, newest first.
    Alerts { filter: AlertFilter, limit: i64 },
    /// Print the resident outage history, newest first.
    History { limit: i64 },
}

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Command,
}

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn connect(database_url: &str) -> Result<PgConnection, String> {
    let mut conn = PgConnection::establish(database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");
    apply_database_migrations(&mut conn)?;
    Ok(conn)
}

fn database_url_from_env() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| config::DEFAULT_DATABASE_URL.to_string())
}

fn run_watch() -> Result<(), String> {
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (feed={}, poll={}ms, cooldown={}ms, domestic={}@{}, transformer={}@{})",
        if cfg.feed_simulated {
            "simulated".to_string()
        } else {
            cfg.feed_url.clone().unwrap_or_else(|| "-".to_string())
        },
        cfg.feed_poll_interval.as_millis(),
        cfg.alert_cooldown.as_millis(),
        cfg.domestic_enabled,
        cfg.domestic_root,
        cfg.transformer_enabled,
        cfg.transformer_root,
    );

    // Migrations run once up front; workers open their own connections.
    drop(connect(&cfg.database_url)?);

    let mut workers = Vec::new();
    for channel in ChannelKind::ALL {
        if !cfg.channel_enabled(channel) {
            info!("Channel {} disabled", channel);
            continue;
        }
        match ChannelWorker::spawn(&cfg, channel) {
            Ok(w) => workers.push(w),
            Err(e) => {
                for w in &workers {
                    w.unsubscribe();
                }
                realtime::supervise(workers)?;
                return Err(e);
            }
        }
    }
    if workers.is_empty() {
        return Err("No channels enabled; set DOMESTIC_CHANNEL_ENABLED or TRANSFORMER_CHANNEL_ENABLED".into());
    }

    info!("Watching {} channel(s)", workers.len());
    realtime::supervise(workers)
}

fn run_alerts(filter: AlertFilter, limit: i64) -> Result<(), String> {
    let mut conn = connect(&database_url_from_env())?;
    let shown = alerts::list_alerts(&mut conn, filter, limit)?;
    if shown.is_empty() {
        println!("No alerts found.");
    }
    for alert in &shown {
        println!("{}", alert.summary_line());
    }
    Ok(())
}

fn run_history(limit: i64) -> Result<(), String> {
    let mut conn = connect(&database_url_from_env())?;
    let entries = alerts::list_history(&mut conn, limit)?;
    if entries.is_empty() {
        println!("No history found.");
    }
    for entry in &entries {
        println!("{}", alerts::history_line(entry));
    }
    Ok(())
}

fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Watch => run_watch(),
        Command::Alerts { filter, limit } => run_alerts(filter, limit),
        Command::History { limit } => run_history(limit),
    }
}

fn parse_cli<I: IntoIterator<Item = OsString>>(args: I) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut command_name: Option<String> = None;
    let mut filter: Option<AlertFilter> = None;
    let mut limit: Option<i64> = None;

    while let Some(arg) = args.next() {
        let arg = arg.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())?;
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String, String> {
            let v = match inline.clone() {
                Some(v) => v,
                None => args
                    .next()
                    .and_then(|v| v.into_string().ok())
                    .ok_or_else(|| format!("`{}` requires a value", name))?,
            };
            if v.is_empty() {
                return Err(format!("`{}` requires a value", name));
            }
            Ok(v)
        };

        match flag.as_str() {
            "--env-file" => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                env_file = Some(PathBuf::from(value("--env-file")?));
            }
            "--filter" => filter = Some(value("--filter")?.parse()?),
            "--limit" => {
                let raw = value("--limit")?;
                let n = raw
                    .parse::<i64>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("`--limit` must be a positive integer, got {}", raw))?;
                limit = Some(n);
            }
            "--" => break,
            s if !s.starts_with('-') && command_name.is_none() => command_name = Some(s.to_string()),
            other => return Err(format!("unrecognised argument: {}", other)),
        }
    }

    let limit_or_default = limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let command = match command_name.as_deref().unwrap_or("watch") {
        "watch" => {
            if filter.is_some() || limit.is_some() {
                return Err("`watch` takes no --filter/--limit".to_string());
            }
            Command::Watch
        }
        "alerts" => Command::Alerts {
            filter: filter.unwrap_or_default(),
            limit: limit_or_default,
        },
        "history" => {
            if filter.is_some() {
                return Err("`history` takes no --filter".to_string());
            }
            Command::History { limit: limit_or_default }
        }
        other => return Err(format!("unknown command: {} (expected watch, alerts or history)", other)),
    };

    Ok(CliArgs { env_file, command })
}

fn load_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    load_env_file(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
    }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in contents.lines().enumerate() {
        let parsed = parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?;
        if let Some((key, value)) = parsed {
            // Variables already set in the process environment take precedence.
            if std::env::var_os(&key).is_none() {
                // Updating process-level environment variables is unsafe on some targets.
                unsafe {
                    std::env::set_var(key, value);
                }
            }
        }
    }
    Ok(())
}

/// Parse one `.env` line: `KEY=value`, optionally prefixed with `export`, with
/// single or double quotes and trailing `#` comments on unquoted values.
fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => parse_quoted(&raw[1..], q)?,
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

/// Scan a quoted value up to its closing quote. Double-quoted values honour
/// backslash escapes; single-quoted values are literal.
fn parse_quoted(body: &str, quote: char) -> Result<String, String> {
    let mut value = String::new();
    let mut chars = body.chars();
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if escaped {
            value.push(match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            escaped = false;
            continue;
        }
        match ch {
            '\\' if quote == '"' => escaped = true,
            c if c == quote => {
                let rest = chars.as_str().trim();
                if !rest.is_empty() && !rest.starts_with('#') {
                    return Err("unexpected characters after closing quote".to_string());
                }
                return Ok(value);
            }
            other => value.push(other),
        }
    }

    if escaped {
        Err("unterminated escape sequence in quoted value".to_string())
    } else {
        Err(format!("unterminated {} quoted value", quote))
    }
}

fn main() {
    let cli = match parse_cli(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(2);
        }
    };
    let loaded_env = match load_env(cli.env_file.clone()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "powerpulse-alerts {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
