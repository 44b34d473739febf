//! # uamqtt CLI
//!
//! Command-line utilities for inspecting and editing an OPC UA server the
//! way the gateway sees it.

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uamqtt_adapter_opcua::OpcUaTransport;
use uamqtt_bridge::{
    Anchor, CancelToken, DiscardingPublisher, NewNodeKind, SourceClient, SourceConfig,
};
use uamqtt_core::{
    ClientStatus, NodeClass, NodeIdentity, SecurityLevel, SourceTransport, TopicScheme,
    TypedValue, ValueKind, DEFAULT_BASE_TOPIC,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "endpoints" => {
            if args.len() < 3 {
                eprintln!("Usage: uamqtt endpoints <url>");
                std::process::exit(1);
            }
            let endpoints = OpcUaTransport::default()
                .discover_endpoints(&args[2])
                .context("Endpoint discovery failed")?;
            for endpoint in endpoints {
                println!("{}\t{}", endpoint.label(), endpoint.security_policy_uri);
            }
        }
        "browse" => {
            if args.len() < 3 {
                eprintln!("Usage: uamqtt browse <endpoint-url> [--objects] [--depth N]");
                std::process::exit(1);
            }
            let options = BrowseOptions::parse(&args[3..])?;
            let client = connect(&args[2])?;
            browse(&client, &options)?;
            client.shutdown();
        }
        "write" => {
            if args.len() < 6 {
                eprintln!(
                    "Usage: uamqtt write <endpoint-url> <node> <int|float|bool|string> <value>"
                );
                std::process::exit(1);
            }
            let node = parse_node(&args[3])?;
            let kind = parse_kind(&args[4])?;
            let value = TypedValue::parse(kind, &args[5])
                .map_err(|text| anyhow!("'{text}' is not a valid {kind} value"))?;

            let client = connect(&args[2])?;
            client
                .write_value(&node, &value)
                .with_context(|| format!("Failed to write {node}"))?;
            let snapshot = client.refresh(&node).context("Failed to read back value")?;
            println!("{node} = {}", snapshot.value);
            client.shutdown();
        }
        command @ ("add-folder" | "add-variable") => {
            if args.len() < 5 {
                eprintln!("Usage: uamqtt {command} <endpoint-url> <parent> <name>");
                std::process::exit(1);
            }
            let parent = parse_node(&args[3])?;
            let kind = if command == "add-folder" {
                NewNodeKind::Folder
            } else {
                NewNodeKind::Variable
            };

            let client = connect(&args[2])?;
            let created = client
                .add_child_node(&parent, kind, &args[4])
                .with_context(|| format!("Failed to add '{}' below {parent}", args[4]))?;
            println!("{created}");
            client.shutdown();
        }
        "topic" => {
            if args.len() < 5 {
                eprintln!("Usage: uamqtt topic <base> <ns> <browse-name>");
                std::process::exit(1);
            }
            let namespace: u16 = args[3].parse().context("Invalid namespace index")?;
            println!("{}", TopicScheme::new(&args[2]).link_topic(namespace, &args[4]));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

struct BrowseOptions {
    anchor: Anchor,
    depth: Option<usize>,
}

impl BrowseOptions {
    fn parse(args: &[String]) -> Result<Self> {
        let mut options = Self {
            anchor: Anchor::Root,
            depth: None,
        };
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--objects" => options.anchor = Anchor::Objects,
                "--depth" => {
                    let depth = args.next().ok_or_else(|| anyhow!("--depth needs a value"))?;
                    options.depth = Some(depth.parse().context("Invalid --depth")?);
                }
                other => bail!("Unknown browse option: {other}"),
            }
        }
        Ok(options)
    }
}

/// Connect a source client to the first insecure endpoint offered at `url`.
fn connect(url: &str) -> Result<SourceClient> {
    let client = SourceClient::new(
        Arc::new(OpcUaTransport::default()),
        SourceConfig {
            initial_endpoint: url.to_string(),
            ..SourceConfig::default()
        },
        Arc::new(DiscardingPublisher::new(DEFAULT_BASE_TOPIC)),
    );

    let endpoints = client
        .discover_endpoints(url)
        .context("Endpoint discovery failed")?;
    let endpoint = endpoints
        .iter()
        .find(|endpoint| endpoint.security_level == SecurityLevel::None)
        .or_else(|| endpoints.first())
        .ok_or_else(|| anyhow!("{url} offers no endpoints"))?;

    client.connect(endpoint).context("Failed to start session")?;
    match client.wait_for_connection(CONNECT_TIMEOUT) {
        ClientStatus::Connected => Ok(client),
        status => {
            let reason = client
                .last_error()
                .map_or_else(|| format!("status {status}"), |e| e.to_string());
            bail!("Could not connect to {}: {reason}", endpoint.label())
        }
    }
}

fn browse(client: &SourceClient, options: &BrowseOptions) -> Result<()> {
    let walk = match options.depth {
        None => client.walk_from(options.anchor)?,
        Some(depth) => {
            let start = match options.anchor {
                Anchor::Root => client.root_node(),
                Anchor::Objects => client.objects_node(),
            }
            .ok_or_else(|| anyhow!("session has no anchor nodes"))?;
            client.walk_with(&start.identity, depth, CancelToken::new())?
        }
    };

    for discovered in walk {
        let node = discovered.context("Browse failed")?;
        let snapshot = &node.snapshot;
        let indent = "  ".repeat(node.depth);
        if snapshot.node_class == NodeClass::Variable {
            println!(
                "{indent}{} ({}) [{}] = {}",
                snapshot.browse_name, snapshot.identity, snapshot.data_type, snapshot.value
            );
        } else {
            println!("{indent}{} ({})", snapshot.browse_name, snapshot.identity);
        }
    }
    Ok(())
}

fn parse_node(text: &str) -> Result<NodeIdentity> {
    text.parse().with_context(|| format!("Invalid node id '{text}'"))
}

fn parse_kind(text: &str) -> Result<ValueKind> {
    match text {
        "int" | "integer" => Ok(ValueKind::Integer),
        "float" | "double" => Ok(ValueKind::Float),
        "bool" | "boolean" => Ok(ValueKind::Boolean),
        "string" | "str" => Ok(ValueKind::String),
        other => bail!("Unknown value kind '{other}', expected int, float, bool or string"),
    }
}

fn print_help() {
    println!(
        r#"uamqtt CLI

USAGE:
    uamqtt <COMMAND> [OPTIONS]

COMMANDS:
    endpoints <url>                              List the endpoints a server offers
    browse <endpoint-url> [--objects] [--depth N] Print the address space below Root (or Objects)
    write <endpoint-url> <node> <kind> <value>   Write an int, float, bool or string value
    add-folder <endpoint-url> <parent> <name>    Create a folder below a node
    add-variable <endpoint-url> <parent> <name>  Create a variable below a node
    topic <base> <ns> <browse-name>              Print the MQTT topic a node is published on
    help                                         Show this help message

EXAMPLES:
    uamqtt endpoints opc.tcp://localhost:4841/
    uamqtt browse opc.tcp://localhost:4841/ --objects --depth 3
    uamqtt write opc.tcp://localhost:4841/ "ns=2;i=5001" float 21.5
    uamqtt topic opcuamqtt 2 Temperature
"#
    );
}
