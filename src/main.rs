use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hotspot::config::{HotspotConfig, LoggingConfig};
use hotspot::hotspot::{CallContext, ControllerRegistry, HotspotChecker, HotspotRuleSet, ParamValue};

/// Dry-run calls against a set of hotspot rules.
#[derive(Debug, Parser)]
#[command(name = "hotspot", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Rule file; overrides `rules.path` from the configuration
    #[arg(short, long)]
    rules: Option<String>,

    /// Resource being entered
    #[arg(long)]
    resource: String,

    /// Call argument as `kind:value`, e.g. `str:alice`, `i64:42`, `f64:3.14`, `nil`
    #[arg(short, long = "arg", value_parser = parse_arg)]
    args: Vec<ParamValue>,

    /// Weight of each call
    #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
    batch_count: i64,

    /// How many times to issue the call
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Print decisions as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = HotspotConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    info!("Starting Hotspot");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules_path = cli
        .rules
        .clone()
        .or_else(|| config.rules.path.clone())
        .ok_or_else(|| anyhow!("no rule file given; pass --rules or set rules.path"))?;

    let rule_set = HotspotRuleSet::from_file(&rules_path)
        .with_context(|| format!("loading rules from {}", rules_path))?;
    if rule_set.rules_for(&cli.resource).next().is_none() {
        warn!(resource = %cli.resource, "No hotspot rule guards this resource");
    }

    let registry = Arc::new(ControllerRegistry::from_rules(&rule_set.rules)?);
    let checker = HotspotChecker::new(registry);

    for attempt in 1..=cli.repeat {
        let ctx = CallContext::new(&cli.resource, &cli.args).with_batch_count(cli.batch_count);
        let result = checker.check(ctx).await;

        if cli.json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            println!("#{} {}", attempt, result);
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("invalid log filter {:?}", logging.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Parse a `kind:value` command line argument.
fn parse_arg(raw: &str) -> anyhow::Result<ParamValue> {
    if raw == "nil" {
        return Ok(ParamValue::Nil);
    }

    let (kind, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected kind:value, got {:?}", raw))?;

    let parsed = match kind {
        "bool" => ParamValue::Bool(value.parse()?),
        "i8" => ParamValue::I8(value.parse()?),
        "i16" => ParamValue::I16(value.parse()?),
        "i32" => ParamValue::I32(value.parse()?),
        "i64" | "int" => ParamValue::I64(value.parse()?),
        "isize" => ParamValue::Isize(value.parse()?),
        "u8" => ParamValue::U8(value.parse()?),
        "u16" => ParamValue::U16(value.parse()?),
        "u32" => ParamValue::U32(value.parse()?),
        "u64" => ParamValue::U64(value.parse()?),
        "usize" => ParamValue::Usize(value.parse()?),
        "f32" => ParamValue::F32(value.parse()?),
        "f64" | "float" => ParamValue::F64(value.parse()?),
        "str" | "string" => ParamValue::Str(value.to_string()),
        other => bail!("unknown argument kind {:?}", other),
    };
    Ok(parsed)
}
