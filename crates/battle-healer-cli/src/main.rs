//! Demo executable: drives a single request through the Supervisor's
//! healing cycle loop and prints the resulting `HealingAgentResult` as JSON.

use async_trait::async_trait;
use battle_healer_common::config::Config;
use battle_healer_common::error::Result;
use battle_healer_common::observability::init_tracing;
use battle_healer_common::types::RequestState;
use battle_healer_region::{RegionNode, RegionRegistry};
use battle_healer_supervisor::toolkit::TransactionRepairStrategy;
use battle_healer_supervisor::{
    CredentialClient, LogClient, MockClient, QueueClient, ResponseCache, RunParams, Supervisor,
    Toolkit, TokenProvider,
};
use battle_healer_transport::{RetryBudgetStore, Transport};
use clap::{Arg, ArgAction, Command};
use std::sync::Arc;
use tracing::{error, info};

struct StaticTokenProvider(Option<String>);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn provide(&self) -> Result<String> {
        Ok(self.0.clone().unwrap_or_default())
    }
}

fn region_registry(backend_base: &str) -> RegionRegistry {
    let primary = RegionNode::new("primary", backend_base);
    let root = RegionNode::new("root", "").with_children(vec![primary]);
    RegionRegistry::new(root)
}

fn load_config(path: Option<&String>) -> Config {
    match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(raw) => Config::from_toml(&raw).unwrap_or_else(|err| {
                error!("failed to parse config at {path}: {err}, using defaults");
                Config::default()
            }),
            Err(err) => {
                error!("failed to read config at {path}: {err}, using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("battle-healer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Drives one HTTP request through a self-healing client loop")
        .arg(Arg::new("config").short('c').long("config").value_name("FILE").help("TOML configuration file"))
        .arg(Arg::new("url").short('u').long("url").value_name("PATH").help("Request path, joined onto the backend region endpoint").default_value("/external-api"))
        .arg(Arg::new("backend").short('b').long("backend").value_name("URL").help("Base URL of the target API and its collaborator endpoints").required(true))
        .arg(Arg::new("method").short('m').long("method").value_name("METHOD").default_value("GET"))
        .arg(Arg::new("token").long("token").value_name("TOKEN").help("Bearer token to attach to the initial request"))
        .arg(Arg::new("verbose").short('v').long("verbose").action(ArgAction::SetTrue))
        .get_matches();

    let config = load_config(matches.get_one::<String>("config"));
    init_tracing(&config.telemetry);

    let backend = matches.get_one::<String>("backend").expect("backend is required").clone();
    let url = matches.get_one::<String>("url").expect("has a default").clone();
    let method = matches.get_one::<String>("method").expect("has a default").clone();
    let token = matches.get_one::<String>("token").cloned();

    info!(backend = %backend, url = %url, method = %method, "starting healing run");

    let registry = Arc::new(region_registry(&backend));
    let supervisor = Supervisor {
        transport: Transport::with_default_client(Arc::new(RetryBudgetStore::new())),
        transport_config: config.transport.clone(),
        planner: Arc::new(battle_healer_planner::HeuristicPlanner::default()),
        toolkit: Toolkit {
            repair_config: config.repair.clone(),
            repair_strategy: Arc::new(TransactionRepairStrategy),
            repair_window: Arc::new(RetryBudgetStore::new()),
            region_registry: Arc::clone(&registry),
            credential_client: Arc::new(CredentialClient::new(backend.clone())),
            mock_client: Arc::new(MockClient::new(backend.clone())),
            queue_client: Arc::new(QueueClient::new(backend.clone())),
        },
        region_registry: Arc::clone(&registry),
        response_cache: Arc::new(ResponseCache::new()),
        mock_client: Arc::new(MockClient::new(backend.clone())),
        log_client: Arc::new(LogClient::new(backend.clone())),
        degradation_config: config.degradation.clone(),
    };

    let params = RunParams {
        url,
        request: RequestState::new(method),
        regions: None,
        request_id: None,
        correlation_id: None,
        max_cycles: Some(config.supervisor.max_cycles),
        token_provider: Arc::new(StaticTokenProvider(token)),
        degradation: None,
        token_recovery_handler: None,
        cancellation: None,
    };

    let result = supervisor.run(params).await;

    if matches.get_flag("verbose") {
        println!("{}", serde_json::to_string_pretty(&result.state).unwrap_or_default());
    }

    let summary = serde_json::json!({
        "success": result.success,
        "data": result.data,
        "degraded": result.degraded,
        "cycles_used": result.state.cycles_used,
        "final_error": result.final_error,
        "health": result.health,
        "metrics": result.metrics,
    });
    println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());

    if !result.success {
        std::process::exit(1);
    }

    Ok(())
}
