use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use alloy_primitives::Address;
use app::{
    config::{load_config, write_config},
    Cli, Command, Marketplace,
};
use clap::Parser;
use market::{
    find_chain, http_pool::HttpPool, is_supported, Fanout, HttpMetadataFetcher, ListingIndexClient,
    LogNotifier, MarketConfig, NodeWallet, NoticeLog, RpcClient,
};
use market_core::{format_units, Listing, Metrics, Notifier, TokenSymbol, Wallet};
use prometheus::Registry;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type App = Marketplace<NodeWallet, RpcClient, ListingIndexClient, HttpMetadataFetcher>;

fn spawn_metrics_server(registry: Arc<Registry>, port: u16) {
    tokio::spawn(async move {
        use prometheus::{Encoder, TextEncoder};
        use warp::Filter;

        let metrics_route = warp::path!("metrics").map(move || {
            let encoder = TextEncoder::new();
            let mut buffer = vec![];
            if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                warn!(target: "app", error = %e, "encode metrics");
            }
            warp::reply::with_header(
                String::from_utf8_lossy(&buffer).into_owned(),
                "content-type",
                "text/plain; version=0.0.4",
            )
        });

        info!(target: "app", port, "prometheus metrics server listening on /metrics");
        warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
    });
}

/// Decimals for every payment token in `listings`, read once per token.
async fn decimals_for(app: &App, listings: &[Listing]) -> HashMap<Address, u8> {
    let mut out = HashMap::new();
    for l in listings {
        if !out.contains_key(&l.payment_token) {
            out.insert(l.payment_token, app.token_decimals(l.payment()).await);
        }
    }
    out
}

fn price_line(l: &Listing, decimals: &HashMap<Address, u8>) -> String {
    let token = l.payment();
    let decimals = decimals
        .get(&l.payment_token)
        .copied()
        .unwrap_or_else(|| token.display_decimals(None));
    format!(
        "{}  token #{}  {} {}  seller {}",
        l.nft_address,
        l.token_id,
        format_units(l.price, decimals),
        TokenSymbol::for_token(token),
        l.seller
    )
}

fn print_notices(log: &NoticeLog) {
    for n in log.drain() {
        match (&n.explorer_url, n.tx_hash) {
            (Some(url), _) => println!("[{:?}] {}: {} ({})", n.level, n.title, n.message, url),
            (None, Some(hash)) => println!("[{:?}] {}: {} (tx {})", n.level, n.title, n.message, hash),
            (None, None) => println!("[{:?}] {}: {}", n.level, n.title, n.message),
        }
    }
}

async fn connect(cfg: &MarketConfig, registry: &Registry, notifier: Arc<dyn Notifier>) -> Result<App> {
    let rpc_pool = HttpPool::new(&cfg.http, &cfg.rpc.url, registry).context("create rpc pool")?;
    let indexer_pool = rpc_pool
        .with_base(&cfg.indexer.url)
        .context("indexer url")?;
    let gateway_pool = rpc_pool
        .with_base(&cfg.metadata.gateway)
        .context("metadata gateway url")?;

    let rpc = Arc::new(RpcClient::new(rpc_pool));
    let wallet = NodeWallet::connect(Arc::clone(&rpc), cfg.wallet.account, &cfg.rpc).await?;
    let session = wallet.session();
    if !is_supported(session.chain_id, cfg.enable_testnets) {
        bail!(
            "chain {} is not supported (enable_testnets={})",
            session.chain_id,
            cfg.enable_testnets
        );
    }
    let chain = find_chain(session.chain_id).map(|c| c.name).unwrap_or("unknown");
    info!(target: "app", account = %session.account, chain, "session ready");

    Marketplace::new(
        cfg,
        Arc::new(wallet),
        rpc,
        Arc::new(ListingIndexClient::new(indexer_pool)),
        Arc::new(HttpMetadataFetcher::new(gateway_pool)),
        notifier,
        Metrics::new(registry),
    )
}

async fn watch_listings(app: &App, every: Duration) -> Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = Arc::clone(app.feed()).spawn(every, stop_rx);
    let mut ticker = tokio::time::interval(every);
    let mut last = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let at = app.feed().refreshed_at();
                if at.is_some() && at != last {
                    last = at;
                    let snapshot = app.listings();
                    let decimals = decimals_for(app, &snapshot).await;
                    println!("{} active listings", snapshot.len());
                    for l in snapshot.iter() {
                        println!("  {}", price_line(l, &decimals));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    let _ = stop_tx.send(true);
    handle.await.context("listing poller")?;
    Ok(())
}

async fn run(app: &App, command: Command, cfg: &MarketConfig) -> Result<()> {
    match command {
        Command::Listings { query } => {
            app.refresh_listings().await?;
            let listings = app.search(query.as_deref().unwrap_or_default());
            let decimals = decimals_for(app, &listings).await;
            for l in listings.iter() {
                println!("{}", price_line(l, &decimals));
            }
        }
        Command::Watch => {
            watch_listings(app, Duration::from_millis(cfg.indexer.poll_interval_ms.max(1))).await?
        }
        Command::Listing(t) => match app.listing(t.nft, t.token_id).await? {
            Some(l) => {
                let decimals = decimals_for(app, std::slice::from_ref(&l)).await;
                println!("{}  [{:?}]", price_line(&l, &decimals), l.status())
            }
            None => println!("not listed"),
        },
        Command::Metadata(t) => {
            let meta = app.metadata(t.nft, t.token_id).await;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Command::Balance => {
            let b = app.balances().await?;
            if let Some(eth) = b.native {
                println!("ETH   {}", eth.formatted);
            }
            if let Some(usdc) = b.usdc {
                println!("USDC  {}", usdc.formatted);
            }
        }
        Command::Proceeds { symbol } => {
            let p = app.proceeds(symbol).await?;
            println!("{} {}", p.formatted, p.symbol);
        }
        Command::Buy(t) => {
            app.buy(t.nft, t.token_id).await?;
        }
        Command::List { price, no_approve } => {
            app.list(&price.form(), !no_approve).await?;
        }
        Command::ApproveNft(t) => {
            app.approve_nft(t.nft, t.token_id).await?;
        }
        Command::Update(price) => {
            app.update(&price.form()).await?;
        }
        Command::Cancel(t) => {
            app.cancel(t.nft, t.token_id).await?;
        }
        Command::Withdraw { symbol } => {
            app.withdraw(symbol).await?;
        }
        Command::Config { .. } => bail!("config is handled before connecting"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config).await?;

    if let Command::Config { write } = cli.command {
        if write {
            write_config(&cli.config, &cfg).await?;
            info!(target: "app", path = %cli.config.display(), "config written");
        } else {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        return Ok(());
    }

    let registry = Arc::new(Registry::new());
    if let Some(port) = cfg.metrics_port {
        spawn_metrics_server(Arc::clone(&registry), port);
    }

    let notices = Arc::new(NoticeLog::new());
    let notifier: Arc<dyn Notifier> = Arc::new(Fanout(vec![
        Box::new(LogNotifier),
        Box::new(Arc::clone(&notices)),
    ]));
    let app = connect(&cfg, &registry, notifier).await?;

    let result = run(&app, cli.command, &cfg).await;
    print_notices(&notices);
    result
}
