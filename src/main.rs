use std::sync::Arc;

use alloy_primitives::{Address, hex};
use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use walletlink::{
    AppResult,
    cli::{Cli, Commands, parse_param},
    config::Config,
    deploy::{DaoTemplate, DeploymentConfig, DeploymentOrchestrator},
    dispatch::TransactionDispatcher,
    encoder::{ModuleConfig, ModuleRegistry, TransactionEncoder},
    init_logging,
    relay::WebSocketRelay,
    session::{FileSessionStore, SessionManager, SessionStore},
};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let config = Config::load_or_default(&cli.config_file);

    // Initialize logging
    let _log_guard = init_logging(&cli.effective_log_level(&config.log_level), &config.log)?;

    tracing::info!("WalletLink starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    if let Err(e) = run(&cli, config).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        if e.downcast_ref::<walletlink::Error>().is_some_and(|e| e.is_recoverable()) {
            eprintln!("{}", "The operation can be retried.".yellow());
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: &Cli, config: Config) -> Result<()> {
    match cli.command() {
        Commands::Config { action } => Config::handle_command(&cli.config_file, &action),
        Commands::EncodeInit {
            module,
            admin,
            params,
        } => encode_init(&config, &module, admin.as_deref(), &params),
        Commands::Status => status(&config).await,
        Commands::Connect => connect(&config).await,
        Commands::Disconnect => disconnect(&config).await,
        Commands::Deploy {
            template,
            dao,
            dry_run,
        } => deploy(&config, &template, &dao, dry_run).await,
    }
}

fn encoder(config: &Config) -> Result<TransactionEncoder> {
    let registry = ModuleRegistry::builtin()
        .with_address_overrides(&config.modules)
        .context("Invalid [modules] address override")?;
    Ok(TransactionEncoder::new(registry))
}

fn session_manager(config: &Config) -> Result<Arc<SessionManager>> {
    config.validate()?;
    let relay = Arc::new(WebSocketRelay::new(config.relay.clone()));
    let store = Arc::new(FileSessionStore::new(&config.session.store_path));
    Ok(Arc::new(SessionManager::new(config, relay, store)))
}

fn encode_init(config: &Config, module: &str, admin: Option<&str>, params: &[String]) -> Result<()> {
    let admin = match admin {
        Some(raw) => raw
            .parse::<Address>()
            .with_context(|| format!("Invalid admin address: {}", raw))?,
        None => Address::ZERO,
    };

    let mut module_config = ModuleConfig::new();
    for raw in params {
        let (key, value) = parse_param(raw).map_err(|e| anyhow!(e))?;
        module_config.insert(key, value);
    }

    let data = encoder(config)?.encode_module_init(module, &module_config, admin)?;
    println!("{}", hex::encode_prefixed(&data));
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let store = FileSessionStore::new(&config.session.store_path);
    match store.load().await? {
        Some(session) if !session.is_expired() => {
            println!("{} {}", "Connected".green().bold(), session.topic);
            for account in &session.accounts {
                println!("  account: {}", account);
            }
            if let Some(peer) = &session.peer {
                println!("  wallet:  {}", peer.name);
            }
            println!("  expires: {}", session.expiry);
        }
        Some(session) => {
            println!("{} {} expired at {}", "Expired".yellow().bold(), session.topic, session.expiry);
        }
        None => println!("{}", "Not connected".yellow()),
    }
    Ok(())
}

async fn connect(config: &Config) -> Result<()> {
    let manager = session_manager(config)?;
    manager.init().await?;

    if let Some(session) = manager.session() {
        println!("{} {}", "Already connected:".green().bold(), session.topic);
        return manager.shutdown().await.map_err(Into::into);
    }

    let offer = manager.connect().await?;
    println!("{}", "Open this URI in your wallet:".cyan().bold());
    println!("{}", offer.uri);
    println!("Offer expires at {}", offer.expires_at);

    let result = manager.approve().await;
    match &result {
        Ok(_) => {
            let account = manager.primary_account()?;
            println!("{} {}", "Connected as".green().bold(), account.address_hex());
        }
        Err(e) => println!("{} {}", "Pairing failed:".red().bold(), e),
    }

    manager.shutdown().await?;
    result.map(|_| ()).map_err(Into::into)
}

async fn disconnect(config: &Config) -> Result<()> {
    let manager = session_manager(config)?;
    manager.init().await?;

    let was_connected = manager.is_connected();
    manager.disconnect().await?;
    manager.shutdown().await?;

    if was_connected {
        println!("{}", "Disconnected".green().bold());
    } else {
        println!("{}", "No active session".yellow());
    }
    Ok(())
}

async fn deploy(config: &Config, template: &str, dao: &str, dry_run: bool) -> Result<()> {
    let template = DaoTemplate::resolve(template)?;
    let dao = DeploymentConfig::load_from_file(dao)?;
    let encoder = encoder(config)?;

    if dry_run {
        let admin = FileSessionStore::new(&config.session.store_path)
            .load()
            .await?
            .and_then(|session| session.account_on(config.chain_id).map(|a| a.address))
            .unwrap_or(Address::ZERO);

        let manager = session_manager(config)?;
        let orchestrator =
            DeploymentOrchestrator::new(encoder, Arc::new(TransactionDispatcher::new(manager)));
        let plan = orchestrator.build_deployment(&template, &dao, admin)?;

        println!("{} {} ({})", "Deployment plan for".cyan().bold(), dao.name, template.name);
        for ((module, address), data) in template
            .modules
            .iter()
            .zip(&plan.module_addresses)
            .zip(&plan.init_data)
        {
            println!("  {:<22} {} {}", module, address, hex::encode_prefixed(data));
        }
        println!("  treasury logic: {}", plan.treasury_logic_address);
        println!("  token:          {}", plan.token_address);
        println!("  calldata: {}", hex::encode_prefixed(plan.encode_call()?));
        return Ok(());
    }

    if config.contracts.factory_address == Address::ZERO {
        anyhow::bail!("contracts.factory_address is not configured");
    }

    let manager = session_manager(config)?;
    manager.init().await?;
    let orchestrator = DeploymentOrchestrator::new(
        encoder,
        Arc::new(TransactionDispatcher::new(manager.clone())),
    );

    println!("{}", "Confirm the deployment in your wallet...".cyan());
    let result = orchestrator
        .deploy(&template, &dao, config.contracts.factory_address)
        .await;
    manager.shutdown().await?;

    let hash = result?;
    println!("{} {}", "Deployment submitted:".green().bold(), hash);
    Ok(())
}
