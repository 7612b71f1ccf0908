use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use futures::stream::select_all;
use hass_ws::{ServiceCall, ServiceTarget, Session};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

mod config;

use crate::config::Overrides;

#[derive(Parser)]
#[command(name = "hass-ws")]
#[command(about = "Talk to a Home Assistant hub over its realtime WebSocket API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.toml (defaults to <config dir>/hass-ws)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Hub host name or address
    #[arg(long, global = true)]
    host: Option<String>,

    /// Hub port (default 8123)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Long-lived access token (prefer HASS_WS_ACCESS_TOKEN or config.toml)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Connect with wss:// instead of ws://
    #[arg(long, global = true)]
    secure: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to event types and print each event as a JSON line
    Listen(ListenArgs),

    /// Call a service
    Call(CallArgs),

    /// Fire an event on the hub's bus
    Fire(FireArgs),
}

#[derive(Parser)]
struct ListenArgs {
    /// Event types to subscribe to (e.g. state_changed)
    #[arg(required = true)]
    event_types: Vec<String>,
}

#[derive(Parser)]
struct CallArgs {
    /// Service domain (e.g. light)
    domain: String,

    /// Service name (e.g. turn_on)
    service: String,

    /// Service data as a JSON object
    #[arg(long)]
    data: Option<String>,

    #[command(flatten)]
    target: TargetArgs,

    /// Ask the hub for the service's response and print it
    #[arg(long)]
    response: bool,
}

#[derive(Args)]
struct TargetArgs {
    #[arg(long)]
    entity_id: Option<String>,
    #[arg(long)]
    area_id: Option<String>,
    #[arg(long)]
    device_id: Option<String>,
    #[arg(long)]
    label_id: Option<String>,
}

impl From<TargetArgs> for ServiceTarget {
    fn from(args: TargetArgs) -> Self {
        ServiceTarget {
            entity_id: args.entity_id,
            area_id: args.area_id,
            device_id: args.device_id,
            label_id: args.label_id,
        }
    }
}

#[derive(Parser)]
struct FireArgs {
    /// Event type to fire
    event_type: String,

    /// Event data as a JSON object
    #[arg(long)]
    data: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config_dir = config::resolve_config_dir(cli.config_dir)?;
    let options = config::resolve(
        &config_dir,
        Overrides {
            host: cli.host,
            port: cli.port,
            access_token: cli.token,
            secure: cli.secure,
        },
    )?;

    let session = Session::connect(&options)
        .await
        .with_context(|| format!("failed to connect to {}", options.url()))?;

    let outcome = match cli.command {
        Commands::Listen(args) => listen_command(&session, args).await,
        Commands::Call(args) => call_command(&session, args).await,
        Commands::Fire(args) => fire_command(&session, args).await,
    };

    session.close().await;
    outcome
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "hass_ws=debug,hass_ws_cli=debug,info"
    } else {
        "hass_ws=info,hass_ws_cli=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn listen_command(session: &Session, args: ListenArgs) -> Result<()> {
    let mut streams = Vec::with_capacity(args.event_types.len());
    for event_type in &args.event_types {
        // Listen first so nothing sent right after the subscription is missed.
        streams.push(session.listen(event_type)?);
        session
            .subscribe(event_type)
            .await
            .with_context(|| format!("failed to subscribe to {event_type}"))?;
    }
    info!(event_types = ?args.event_types, "listening, press Ctrl+C to stop");

    let mut events = select_all(streams);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, closing session");
                return Ok(());
            }
            event = events.next() => match event {
                Some(event) => println!("{}", String::from_utf8_lossy(&event.raw)),
                None => bail!("connection to the hub was lost"),
            },
        }
    }
}

async fn call_command(session: &Session, args: CallArgs) -> Result<()> {
    let mut call = ServiceCall::new(&args.domain, &args.service)
        .with_target(args.target.into())
        .with_response(args.response);
    if let Some(data) = args.data.as_deref() {
        call = call.with_data(Value::Object(parse_object(data)?));
    }

    let response = session
        .call(call)
        .await
        .with_context(|| format!("{}.{} failed", args.domain, args.service))?;

    if args.response {
        println!("{}", serde_json::to_string_pretty(&response.response)?);
    } else {
        info!(domain = %args.domain, service = %args.service, "service call sent");
    }
    Ok(())
}

async fn fire_command(session: &Session, args: FireArgs) -> Result<()> {
    let data = args.data.as_deref().map(parse_object).transpose()?;
    session
        .fire_event(&args.event_type, data)
        .await
        .with_context(|| format!("failed to fire {}", args.event_type))?;
    info!(event_type = %args.event_type, "event fired");
    Ok(())
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("--data is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => {
            warn!(data = %other, "rejected non-object data");
            bail!("--data must be a JSON object")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::try_parse_from([
            "hass-ws",
            "--host",
            "hub",
            "call",
            "light",
            "turn_on",
            "--entity-id",
            "light.kitchen",
            "--data",
            r#"{"brightness":120}"#,
            "--response",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("hub"));
        let Commands::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args.domain, "light");
        assert_eq!(args.service, "turn_on");
        assert!(args.response);
        let target: ServiceTarget = args.target.into();
        assert_eq!(target, ServiceTarget::entity("light.kitchen"));
    }

    #[test]
    fn test_cli_listen_requires_event_type() {
        assert!(Cli::try_parse_from(["hass-ws", "listen"]).is_err());
        let cli = Cli::try_parse_from(["hass-ws", "listen", "state_changed", "call_service"])
            .unwrap();
        let Commands::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.event_types, vec!["state_changed", "call_service"]);
    }

    #[test]
    fn test_parse_object() {
        let map = parse_object(r#"{"a":1}"#).unwrap();
        assert_eq!(map["a"], 1);
        assert!(parse_object("[1,2]").is_err());
        assert!(parse_object("{nope").is_err());
    }
}
