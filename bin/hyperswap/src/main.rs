//! hyperswap deploys the hyperswap contracts on a set of chains and checks the result.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{CheckArgs, Cli, Command, DeployArgs};
use hyperswap_deploy::{
    AddressBook, ChainName, ChainRegistry, CheckError, ContractBundle, ContractRole,
    DeploymentOutcome, FactorySet, HyperswapApp, HyperswapChecker, HyperswapConfig,
    HyperswapDeployer, JsonRpcConnection, MultiProvider, Violation,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Deploy(args) => deploy(args).await,
        Command::Check(args) => check(args).await,
    }
}

fn connect(registry: &ChainRegistry) -> Result<MultiProvider<JsonRpcConnection>> {
    MultiProvider::from_registry(registry, |descriptor| {
        JsonRpcConnection::new(descriptor.connection.rpc_url.clone())
            .with_context(|| format!("Failed to connect to {}", descriptor.name))
    })
}

async fn deploy(args: DeployArgs) -> Result<()> {
    let config = HyperswapConfig::load_from_file(&args.config)?;
    let registry = config.registry()?;
    let factories = FactorySet::from_artifacts(&config.artifacts)?;
    let multi_provider = connect(&registry)?;
    let configs = config.router_configs();

    let mut book = AddressBook::load_from_file(&config.address_book)?;

    let (chains, skipped): (Vec<ChainName>, Vec<ChainName>) = configs
        .keys()
        .cloned()
        .partition(|chain| args.redeploy || !book.is_complete(chain));
    for chain in &skipped {
        tracing::info!(chain = %chain, "Bundle already complete, skipping (use --redeploy to force)");
    }

    let deployer = HyperswapDeployer::new(
        &multi_provider,
        &registry,
        &factories,
        &configs,
        config.hub_chains(),
    );
    let outcome = deployer.deploy_chains(chains).await;

    // Keep whatever was created on failed chains, so the address book reflects what exists.
    for (chain, error) in &outcome.failures {
        if let Some(partial) = error.partial().filter(|p| p.router.is_some()) {
            book.insert(chain.clone(), partial.clone());
        }
    }
    book.merge(outcome.contracts.clone());
    book.save_to_file(&config.address_book)?;

    println!("{}", deployment_table(&registry, &book, &outcome));

    if !outcome.is_success() {
        anyhow::bail!("{} chain(s) failed to deploy", outcome.failures.len());
    }

    tracing::info!(address_book = %config.address_book.display(), "Deployment complete");
    Ok(())
}

async fn check(args: CheckArgs) -> Result<()> {
    let config = HyperswapConfig::load_from_file(&args.config)?;
    let registry = config.registry()?;
    let multi_provider = connect(&registry)?;
    let configs = config.router_configs();

    let path = args.address_book.unwrap_or(config.address_book.clone());
    if !path.exists() {
        anyhow::bail!("Address book not found: {}", path.display());
    }
    let book = AddressBook::load_from_file(&path)?;

    let app = HyperswapApp::new(registry, book.into_inner(), Arc::new(multi_provider));
    let mut checker = HyperswapChecker::new(&app, &configs, config.hub_chains());

    let result = checker.check().await.map(|_| ());
    if !checker.violations().is_empty() {
        println!("{}", violations_table(checker.violations()));
    }
    if let Err(CheckError::Unreadable { failures }) = &result {
        for (chain, error) in failures {
            tracing::error!(chain = %chain, error = %error, "Chain state unreadable");
        }
    }
    result?;

    checker.expect_empty()?;
    tracing::info!(chains = configs.len(), "No violations found");
    Ok(())
}

fn address_cell(bundle: Option<&ContractBundle>, role: ContractRole) -> String {
    bundle
        .and_then(|b| b.address(role))
        .map(|a| a.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn deployment_table(
    registry: &ChainRegistry,
    book: &AddressBook,
    outcome: &DeploymentOutcome,
) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Chain",
        "Domain",
        "Topology",
        "Router",
        "BridgeRouter",
        "Custodian",
        "Status",
    ]);

    for chain in registry.chains() {
        let bundle = book.get(chain);
        let status = match (outcome.failures.get(chain), outcome.contracts.contains_key(chain)) {
            (Some(error), _) => format!("failed: {error}"),
            (None, true) => "deployed".to_string(),
            (None, false) if bundle.is_some_and(ContractBundle::is_complete) => {
                "skipped".to_string()
            }
            (None, false) => "not deployed".to_string(),
        };

        table.add_row(vec![
            chain.to_string(),
            registry
                .domain_id(chain)
                .map(|d| d.to_string())
                .unwrap_or_default(),
            bundle
                .and_then(|b| b.topology)
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            address_cell(bundle, ContractRole::Router),
            address_cell(bundle, ContractRole::BridgeRouter),
            address_cell(bundle, ContractRole::Custodian),
            status,
        ]);
    }

    table
}

fn violations_table(violations: &[Violation]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Chain", "Category", "Field", "Expected", "Actual"]);

    for violation in violations {
        table.add_row(vec![
            violation.chain.to_string(),
            violation.category.to_string(),
            violation.field.clone(),
            violation.expected.clone(),
            violation.actual.clone(),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use hyperswap_deploy::testing::{Fault, FaultKind, TestDeployment};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_args() {
        let cli = Cli::try_parse_from([
            "hyperswap",
            "check",
            "--config",
            "deploy/Hyperswap.toml",
            "--address-book",
            "out.json",
        ])
        .unwrap();

        let Command::Check(args) = cli.command else {
            panic!("expected check command");
        };
        assert_eq!(args.config.to_str(), Some("deploy/Hyperswap.toml"));
        assert_eq!(
            args.address_book.as_deref().and_then(|p| p.to_str()),
            Some("out.json")
        );
    }

    #[tokio::test]
    async fn test_deployment_table_reports_failures() {
        let env = TestDeployment::new(&["test1", "test2"], &["test1"]);
        env.network(&"test2".into())
            .inject_fault(Fault::deploy(ContractRole::Router, FaultKind::Revert));

        let outcome = env.deploy().await;
        let mut book = AddressBook::default();
        book.merge(outcome.contracts.clone());

        let rendered = deployment_table(&env.registry, &book, &outcome).to_string();
        assert!(rendered.contains("deployed"));
        assert!(rendered.contains("failed"));
        assert!(rendered.contains("hub"));
    }

    #[tokio::test]
    async fn test_violations_table() {
        let env = TestDeployment::new(&["test1"], &[]);
        let contracts = env.deploy().await.into_result().unwrap();
        let app = env.app(contracts);

        let mut configs = env.configs.clone();
        for config in configs.values_mut() {
            config.owner = hyperswap_deploy::SENTINEL;
        }
        let mut checker = HyperswapChecker::new(&app, &configs, env.hub_chains.clone());
        checker.check().await.unwrap();

        let rendered = violations_table(checker.violations()).to_string();
        assert!(rendered.contains("ownership"));
        assert!(rendered.contains("router.owner"));
    }
}
