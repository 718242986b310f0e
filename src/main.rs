use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use color_eyre::owo_colors::OwoColorize;
use compact_str::CompactString;
use indexmap::IndexMap;
use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use treeline::progress::PROGRESS_BAR;
use treeline::{build_tree, config, tree, Registry, RequirementSet};

/// Resolve a handful of top-level `name@range` requests against a
/// node-semver-style registry and print the resulting tree.
#[derive(Debug, Parser)]
#[command(name = "treeline", version, about)]
struct Args {
    /// One or more `name@range` requests, e.g. `express@^4.17.0`.
    #[arg(required = true)]
    packages: Vec<String>,

    /// Registry base URL, overriding TREELINE_REGISTRY / the npm default.
    #[arg(long)]
    registry: Option<String>,
}

fn parse_request(raw: &str) -> Result<(CompactString, RequirementSet)> {
    let (name, range) = raw
        .rsplit_once('@')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| eyre!("expected `name@range`, got {raw:?}"))?;
    let req: RequirementSet = range
        .parse()
        .map_err(|e| eyre!("invalid range in {raw:?}: {e}"))?;
    Ok((CompactString::from(name), req))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .init();

    let args = Args::parse();

    let mut requests = IndexMap::new();
    for raw in &args.packages {
        let (name, range) = parse_request(raw)?;
        requests.insert(name, range);
    }

    let base_url = args
        .registry
        .unwrap_or_else(|| config::registry_base_url().to_string());
    let registry = Registry::new(base_url);

    PROGRESS_BAR.set_message("resolving dependencies");
    let resolved = build_tree(&registry, &requests).await?;
    PROGRESS_BAR.finish_and_clear();
    println!("{}", tree::render(&resolved).green());

    Ok(())
}
