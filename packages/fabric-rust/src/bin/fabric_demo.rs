//! Ping/pong across the router.
//!
//! Wires a `RouterService`, a `ConfigService` and two services `A` and `B`,
//! each on its own in-memory pipe. `A` fetches its configuration on start,
//! then sends `--rounds` ping requests to `B` and prints every reply.
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin fabric-demo -- --rounds 3 --config demo.json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use aocc_core::{pipe, status, Package, Value};
use aocc_fabric::{
    ConfigService, FabricConfig, PackageHandler, RouterService, Service, ServiceConfig,
    CONFIG_SERVICE_NAME,
};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "fabric-demo")]
#[command(about = "Exchange ping/pong packages between two services through the router", long_about = None)]
struct Args {
    /// Number of ping requests `A` sends to `B`
    #[arg(short, long, default_value_t = 3)]
    rounds: u32,

    /// Idle/poll interval of every loop in the fabric, in milliseconds
    #[arg(long, default_value_t = 20, env = "FABRIC_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// JSON object served by the config service
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Answers every request with `200` and `"pong"`.
struct Pong;

#[async_trait]
impl PackageHandler for Pong {
    async fn on_request(&self, service: &Service, package: Package) {
        service.respond(&package, status::OK, Value::from("pong"));
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(key, value)| (key, json_to_value(value)))
                .collect(),
        ),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BTreeMap<String, Value>> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    match json_to_value(json) {
        Value::Map(map) => Ok(map),
        _ => anyhow::bail!("{} must contain a JSON object", path.display()),
    }
}

/// Builds service `name` on a fresh pipe whose far end is registered with
/// the router.
fn attach(
    router: &RouterService,
    name: &str,
    handler: Arc<dyn PackageHandler>,
    config: ServiceConfig,
) -> anyhow::Result<Arc<Service>> {
    let (service_end, router_end) = pipe();
    router.add_connection_pair(name, Arc::new(router_end.clone()), Arc::new(router_end))?;
    Ok(
        Service::builder(name, Arc::new(service_end.clone()), Arc::new(service_end))
            .handler(handler)
            .config(config)
            .build(),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let fabric = FabricConfig::default()
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms));
    let without_handshake = ServiceConfig {
        config_required: false,
        ..fabric.service.clone()
    };

    let router = RouterService::new(fabric.router.clone());
    router.start();

    let config_service = attach(
        &router,
        CONFIG_SERVICE_NAME,
        Arc::new(ConfigService::new(load_config(args.config.as_ref())?)),
        without_handshake.clone(),
    )?;
    let b = attach(&router, "B", Arc::new(Pong), without_handshake)?;
    let a = attach(
        &router,
        "A",
        Arc::new(aocc_fabric::NoopHandler),
        fabric.service.clone(),
    )?;

    config_service.start().await?;
    b.start().await?;
    a.start().await.context("service A configuration handshake")?;
    info!(keys = a.config().data().len(), "A configured");

    for round in 1..=args.rounds {
        let reply = a
            .request("B", "ping", "ping", Some(Duration::from_secs(5)))
            .await
            .with_context(|| format!("ping round {round}"))?;
        println!(
            "round {round}: {} -> {} [{}] {:?}",
            reply.sender(),
            reply.recipient(),
            reply.status_code(),
            reply.payload().as_value(),
        );
    }

    let missing = a
        .request("Nobody", "ping", "ping", Some(Duration::from_secs(5)))
        .await?;
    println!(
        "unknown recipient: {} [{}]",
        missing.subject(),
        missing.status_code()
    );

    a.stop();
    b.stop();
    config_service.stop();
    router.stop();
    router.join().await;
    Ok(())
}
