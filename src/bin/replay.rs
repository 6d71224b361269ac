//! Replay binary
//!
//! Stream recorded price ticks through the simulated matching engine and
//! report fills and final positions.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tradesim::{
    MatchingEngine, Order, OrderedSeries, SeriesPoint, Side, SimConfig, Symbol, Trade,
};

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay recorded price ticks through the simulated engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: String,

    /// Path to tick data CSV (timestamp,symbol,price)
    #[arg(short, long)]
    data: String,

    /// Optional market order to work during the replay, e.g. "buy:ES:2"
    #[arg(long)]
    order: Vec<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// One CSV row of recorded tick data
#[derive(Debug, Deserialize)]
struct TickRow {
    timestamp: DateTime<Utc>,
    symbol: Symbol,
    price: f64,
}

fn parse_order(spec: &str) -> Result<Order> {
    let parts: Vec<&str> = spec.split(':').collect();
    anyhow::ensure!(
        parts.len() == 3,
        "order spec must be side:symbol:quantity, got '{spec}'"
    );
    let side = match parts[0].to_ascii_lowercase().as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => anyhow::bail!("unknown side '{other}'"),
    };
    let quantity: f64 = parts[2]
        .parse()
        .with_context(|| format!("bad quantity in order spec '{spec}'"))?;
    Ok(Order::market(Symbol::new(parts[1]), side, quantity))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = SimConfig::from_file(&args.config)?;
    let engine = Arc::new(MatchingEngine::from_config(&config));

    // One strict price series per configured instrument, feeding the engine
    let mut series = Vec::new();
    for instrument in &config.instruments {
        let feed = Arc::new(OrderedSeries::strict());
        engine.attach_price_feed(instrument.symbol.clone(), &feed);
        series.push((instrument.symbol.clone(), feed));
    }

    for spec in &args.order {
        let order = parse_order(spec)?;
        let id = engine
            .submit_order(order)
            .map_err(|e| anyhow::anyhow!("order '{spec}' rejected: {e}"))?;
        info!(id, spec = %spec, "order submitted");
    }

    let mut reader = csv::Reader::from_path(&args.data)
        .with_context(|| format!("Failed to open tick data {}", args.data))?;
    let mut ticks = 0usize;
    for row in reader.deserialize() {
        let tick: TickRow = row.context("Failed to parse tick row")?;
        match series.iter().find(|(symbol, _)| *symbol == tick.symbol) {
            Some((_, feed)) => {
                feed.add_last(SeriesPoint::discrete(tick.timestamp, tick.price))
                    .with_context(|| format!("tick out of order at {}", tick.timestamp))?;
                ticks += 1;
            }
            None => tracing::warn!(symbol = %tick.symbol, "tick for unconfigured instrument"),
        }
    }
    info!(ticks, "replay complete");

    println!("\n{}", "=".repeat(60));
    println!("TRADES");
    println!("{}", "=".repeat(60));
    for Trade {
        order_id,
        symbol,
        side,
        quantity,
        price,
        commission,
        ..
    } in engine.trades()
    {
        println!(
            "#{order_id:<6} {symbol:<10} {side:?} {quantity:.4} @ {price:.4} (fee {commission:.4})"
        );
    }

    println!("\n{}", "=".repeat(60));
    println!("POSITIONS");
    println!("{}", "=".repeat(60));
    for position in engine.ledger().positions() {
        println!(
            "{:<10} qty {:>10.4}  avg {:>10.4}  mkt {:>10.4}  realized {:>10.2}  unrealized {:>10.2}",
            position.symbol.to_string(),
            position.quantity,
            position.avg_cost,
            position.market_price,
            position.realized_pnl,
            position.unrealized_pnl,
        );
    }
    for cash in engine.ledger().cash_positions() {
        println!("{:<10} cash {:>10.2}", cash.currency.to_string(), cash.quantity);
    }

    Ok(())
}
