use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use affiliations_api::serve;
use affiliations_core::coins::CoinLedgerConfig;
use affiliations_core::{
    CoinLedger, FamilyKernel, HttpCoinLedger, LedgerStore, NullCoinLedger,
};

const DEFAULT_DB_PATH: &str = "affiliations.sqlite";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";

fn print_usage() {
    println!("affiliations <command>");
    println!("commands:");
    println!("  init");
    println!("    creates or migrates the database");
    println!("  serve [addr]");
    println!("    default addr: {DEFAULT_API_ADDR}");
    println!("  stats");
    println!("  rotate-secret <secret>");
    println!("  owner add <guild_id> <user_id>");
    println!("  owner remove <guild_id> <user_id>");
    println!("  owner list <guild_id>");
    println!("  export <dest_path>");
    println!("environment:");
    println!("  AFFIL_DB_PATH, AFFIL_API_ADDR, AFFIL_API_SECRET, COINS_BASE_URL, COINS_API_KEY");
}

fn parse_u64(value: Option<&String>, label: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<u64>().map_err(|_| format!("invalid {label}: {raw}"))
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value
        .map(String::to_string)
        .or_else(|| env::var("AFFIL_API_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn db_path() -> String {
    env::var("AFFIL_DB_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
}

fn coin_ledger() -> Arc<dyn CoinLedger> {
    match CoinLedgerConfig::from_env() {
        Some(config) => {
            info!(base_url = %config.base_url, "external coin ledger configured");
            Arc::new(HttpCoinLedger::new(config))
        }
        None => {
            info!("no coin ledger configured, personal balances disabled");
            Arc::new(NullCoinLedger)
        }
    }
}

fn open_kernel() -> Result<FamilyKernel, String> {
    let path = db_path();
    let store = LedgerStore::open(&path).map_err(|err| format!("cannot open {path}: {err}"))?;
    Ok(FamilyKernel::new(store, coin_ledger()))
}

fn run_owner_command(args: &[String]) -> Result<(), String> {
    let mut kernel = open_kernel()?;
    match args.get(2).map(String::as_str) {
        Some("add") => {
            let guild_id = parse_u64(args.get(3), "guild_id")?;
            let user_id = parse_u64(args.get(4), "user_id")?;
            kernel.add_owner(guild_id, user_id).map_err(|err| err.to_string())?;
            println!("owner {user_id} added in guild {guild_id}");
        }
        Some("remove") => {
            let guild_id = parse_u64(args.get(3), "guild_id")?;
            let user_id = parse_u64(args.get(4), "user_id")?;
            kernel.remove_owner(guild_id, user_id).map_err(|err| err.to_string())?;
            println!("owner {user_id} removed in guild {guild_id}");
        }
        Some("list") => {
            let guild_id = parse_u64(args.get(3), "guild_id")?;
            for owner in kernel.owners(guild_id).map_err(|err| err.to_string())? {
                println!("{owner}");
            }
        }
        _ => return Err("expected owner add|remove|list".to_string()),
    }
    Ok(())
}

fn run_export(args: &[String]) -> Result<(), String> {
    let dest = args.get(2).ok_or_else(|| "missing dest_path".to_string())?;
    let kernel = open_kernel()?;
    let source = kernel
        .export_path()
        .ok_or_else(|| "no database file to export".to_string())?;
    std::fs::copy(source, dest).map_err(|err| format!("export failed: {err}"))?;
    println!("exported {} to {dest}", source.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    let result = match command {
        Some("init") => open_kernel().map(|_| {
            println!("database ready at {}", db_path());
        }),
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => match open_kernel() {
                Ok(kernel) => {
                    let secret = env::var("AFFIL_API_SECRET").ok();
                    println!("serving api on http://{addr}");
                    serve(addr, kernel, secret)
                        .await
                        .map_err(|err| format!("server error: {err}"))
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        },
        Some("stats") => open_kernel().and_then(|kernel| {
            let stats = kernel.stats().map_err(|err| err.to_string())?;
            println!(
                "relations={} families={} marriages={} wallets={}",
                stats.relations, stats.families, stats.marriages, stats.wallets
            );
            Ok(())
        }),
        Some("rotate-secret") => match args.get(2) {
            Some(secret) => open_kernel().and_then(|mut kernel| {
                kernel.rotate_api_secret(secret).map_err(|err| err.to_string())?;
                println!("api secret rotated");
                Ok(())
            }),
            None => Err("missing secret".to_string()),
        },
        Some("owner") => run_owner_command(&args),
        Some("export") => run_export(&args),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        print_usage();
        std::process::exit(2);
    }
}
