//! Atrium operations CLI.
//!
//! The engine normally runs behind a chat transport; this binary covers
//! the jobs an operator runs by hand or from cron: reconciling pending
//! payment requests against the gateway, inspecting tickets, and editing
//! per-guild configuration.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use atrium_config::{AtriumConfig, PayPalMode, data_dir};
use atrium_engine::PaymentReconciler;
use atrium_providers::paypal::{
    PAYPAL_LIVE_API_URL, PAYPAL_SANDBOX_API_URL, PayPalClient, PayPalConfig,
};
use atrium_store::Store;
use atrium_types::{GuildId, PaymentId, TicketId};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        print_usage();
        return Ok(());
    };

    let config = AtriumConfig::load()?;
    match command {
        "sweep-payments" => sweep_payments(&config).await,
        "check-payment" => check_payment(&config, parse_payment_id(args.get(1))?).await,
        "refund-payment" => {
            let id = parse_payment_id(args.get(1))?;
            let reason = args
                .get(2..)
                .filter(|rest| !rest.is_empty())
                .map(|rest| rest.join(" "))
                .context("A refund reason is required")?;
            refund_payment(&config, id, &reason).await
        }
        "show-ticket" => show_ticket(&config, parse_ticket_id(args.get(1))?),
        "set-config" => match args.get(1..) {
            Some([guild, key, value]) => set_config(&config, guild, key, value),
            _ => bail!("Usage: atrium set-config <guild> <key> <value>"),
        },
        "get-config" => match args.get(1..) {
            Some([guild, key]) => get_config(&config, guild, key),
            _ => bail!("Usage: atrium get-config <guild> <key>"),
        },
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("Unknown command '{other}'")
        }
    }
}

async fn sweep_payments(config: &AtriumConfig) -> Result<()> {
    let (_store, reconciler) = build_reconciler(config)?;
    let reconciled = reconciler.sweep_pending().await?;
    tracing::info!(count = reconciled.len(), "sweep finished");

    if reconciled.is_empty() {
        println!("No pending payment requests.");
        return Ok(());
    }
    for (id, status) in reconciled {
        println!("payment #{id}: {status}");
    }
    Ok(())
}

async fn check_payment(config: &AtriumConfig, id: PaymentId) -> Result<()> {
    let (_store, reconciler) = build_reconciler(config)?;
    let status = reconciler.poll_status(id).await?;
    println!("payment #{id}: {status}");
    Ok(())
}

async fn refund_payment(config: &AtriumConfig, id: PaymentId, reason: &str) -> Result<()> {
    let (_store, reconciler) = build_reconciler(config)?;
    let refunded = reconciler.refund(id, reason).await?;
    println!(
        "payment #{} refunded ({}): {}",
        refunded.id, refunded.amount, reason
    );
    Ok(())
}

fn show_ticket(config: &AtriumConfig, id: TicketId) -> Result<()> {
    let store = open_store(config)?;
    let ticket = store
        .ticket(id)?
        .with_context(|| format!("No ticket #{id}"))?;

    println!("ticket #{} ({})", ticket.id, ticket.ticket_type);
    println!("  status:   {}", ticket.status);
    println!("  guild:    {}", ticket.guild_id);
    println!("  channel:  {}", ticket.channel_id);
    println!("  opened:   {} by {}", ticket.created_at.to_rfc3339(), ticket.user_id);
    if let (Some(by), Some(at)) = (&ticket.claimed_by, ticket.claimed_at) {
        println!("  claimed:  {} by {by}", at.to_rfc3339());
    }
    if let (Some(by), Some(at)) = (&ticket.closed_by, ticket.closed_at) {
        println!("  closed:   {} by {by}", at.to_rfc3339());
    }
    Ok(())
}

fn set_config(config: &AtriumConfig, guild: &str, key: &str, value: &str) -> Result<()> {
    let store = open_store(config)?;
    store.set_config_value(&GuildId::from(guild), key, value)?;
    println!("{guild}/{key} = {value}");
    Ok(())
}

fn get_config(config: &AtriumConfig, guild: &str, key: &str) -> Result<()> {
    let store = open_store(config)?;
    match store.config_value(&GuildId::from(guild), key)? {
        Some(value) => println!("{value}"),
        None => println!("(not set)"),
    }
    Ok(())
}

fn open_store(config: &AtriumConfig) -> Result<Arc<Store>> {
    Ok(Arc::new(Store::open(config.database_path()?)?))
}

fn build_reconciler(
    config: &AtriumConfig,
) -> Result<(Arc<Store>, PaymentReconciler<PayPalClient>)> {
    config.require_paypal_credentials()?;
    let store = open_store(config)?;
    let base_url = match config.paypal.mode {
        PayPalMode::Live => PAYPAL_LIVE_API_URL,
        PayPalMode::Sandbox => PAYPAL_SANDBOX_API_URL,
    };
    let client = PayPalClient::new(PayPalConfig {
        base_url: base_url.to_string(),
        client_id: config.paypal.client_id.clone(),
        client_secret: config.paypal.client_secret.clone(),
        brand_name: config.paypal.brand_name.clone(),
        return_url: config.paypal.return_url.clone(),
        cancel_url: config.paypal.cancel_url.clone(),
    });
    let reconciler = PaymentReconciler::new(
        Arc::clone(&store),
        Arc::new(client),
        config.paypal.currency.clone(),
    );
    Ok((store, reconciler))
}

fn parse_payment_id(arg: Option<&String>) -> Result<PaymentId> {
    let raw = arg.context("A payment id is required")?;
    let id = raw
        .parse()
        .with_context(|| format!("Invalid payment id '{raw}'"))?;
    Ok(PaymentId::new(id))
}

fn parse_ticket_id(arg: Option<&String>) -> Result<TicketId> {
    let raw = arg.context("A ticket id is required")?;
    let id = raw
        .parse()
        .with_context(|| format!("Invalid ticket id '{raw}'"))?;
    Ok(TicketId::new(id))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(file) = open_log_file() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();
        return;
    }
    // No usable data directory; log to stderr instead of dropping logs.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn open_log_file() -> Option<File> {
    let dir = data_dir()?.join("logs");
    fs::create_dir_all(&dir).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("atrium.log"))
        .ok()
}

fn print_usage() {
    println!("Atrium operations CLI");
    println!();
    println!("Usage: atrium <command> [args]");
    println!();
    println!("Commands:");
    println!("  sweep-payments                     Poll every pending payment request");
    println!("  check-payment <id>                 Reconcile one payment request");
    println!("  refund-payment <id> <reason...>    Refund a completed payment request");
    println!("  show-ticket <id>                   Print a ticket record");
    println!("  set-config <guild> <key> <value>   Set a guild configuration value");
    println!("  get-config <guild> <key>           Read a guild configuration value");
}
