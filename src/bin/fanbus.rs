use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use fanbus::adapter::node::{node_id, DataValue, ReadValueId, Variant};
use fanbus::adapter::register::{register_of, REGISTER_SPACE};
use fanbus::client::{ClientError, NodeClient};
use fanbus::fields::{Attribute, FieldId, TEMPERATURE_SCALE};
use fanbus::Role;
use std::time::Duration;
use tokio::time;
use tokio_modbus::client::{tcp, Reader, Writer};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_NODE_PORT: &str = "4840";
const DEFAULT_MODBUS_PORT: &str = "5020";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("fanbus")
        .version("0.1.0")
        .about("🌀 fanbus client - read and tune the fan controller")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Controller host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Node protocol port")
                .takes_value(true)
                .default_value(DEFAULT_NODE_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("user")
                .short("u")
                .long("user")
                .value_name("USER")
                .help("Username for an authenticated session")
                .takes_value(true)
                .requires("password")
                .global(true),
        )
        .arg(
            Arg::with_name("password")
                .long("password")
                .value_name("PASSWORD")
                .help("Password for an authenticated session")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["table", "json"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("read")
                .about("📊 Read fields with their metadata")
                .arg(
                    Arg::with_name("field")
                        .help("Field name (default: all fields)")
                        .required(false),
                ),
        )
        .subcommand(
            SubCommand::with_name("write")
                .about("✏️  Write a setting")
                .arg(
                    Arg::with_name("field")
                        .help("HighThreshold, LowThreshold or ManualOverride")
                        .required(true),
                )
                .arg(
                    Arg::with_name("value")
                        .help("°C for thresholds, on/off for ManualOverride")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("📈 Poll the controller continuously")
                .arg(
                    Arg::with_name("interval")
                        .short("i")
                        .long("interval")
                        .value_name("MS")
                        .help("Poll interval in milliseconds")
                        .takes_value(true)
                        .default_value("1000"),
                ),
        )
        .subcommand(
            SubCommand::with_name("modbus")
                .about("🔌 Raw holding register access over Modbus/TCP")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .arg(
                    Arg::with_name("modbus-port")
                        .long("modbus-port")
                        .value_name("PORT")
                        .help("Modbus/TCP port")
                        .takes_value(true)
                        .default_value(DEFAULT_MODBUS_PORT),
                )
                .subcommand(
                    SubCommand::with_name("read")
                        .about("Read holding registers")
                        .arg(Arg::with_name("address").help("Start address").required(true))
                        .arg(Arg::with_name("count").help("Register count").default_value("1")),
                )
                .subcommand(
                    SubCommand::with_name("write")
                        .about("Write one holding register")
                        .arg(Arg::with_name("address").help("Register address").required(true))
                        .arg(Arg::with_name("value").help("Raw register value").required(true)),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string();
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_NODE_PORT).parse()?;
    let json = matches.value_of("format") == Some("json");
    let credentials = matches
        .value_of("user")
        .zip(matches.value_of("password"));

    let result = match matches.subcommand() {
        ("read", Some(sub)) => {
            let mut client = connect(&host, port, credentials).await?;
            handle_read(&mut client, sub, json).await
        }
        ("write", Some(sub)) => {
            let mut client = connect(&host, port, credentials).await?;
            handle_write(&mut client, sub).await
        }
        ("watch", Some(sub)) => {
            let mut client = connect(&host, port, credentials).await?;
            handle_watch(&mut client, sub, json).await
        }
        ("modbus", Some(sub)) => handle_modbus(&host, sub).await,
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "❌".red(), e.to_string().bright_red());
        std::process::exit(1);
    }
    Ok(())
}

async fn connect(
    host: &str,
    port: u16,
    credentials: Option<(&str, &str)>,
) -> Result<NodeClient, Box<dyn std::error::Error>> {
    let mut client = match NodeClient::connect((host, port)).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} Failed to connect to controller at {}:{}", "❌".red(), host, port);
            eprintln!("{} Is fanbus-server running?", "💡".yellow());
            return Err(e.into());
        }
    };
    let role = client
        .activate(credentials.map(|c| c.0), credentials.map(|c| c.1))
        .await?;
    if credentials.is_some() && role == Role::Anonymous {
        eprintln!("{} Login rejected, continuing as anonymous", "⚠️".yellow());
    }
    Ok(client)
}

async fn handle_read(
    client: &mut NodeClient,
    matches: &ArgMatches<'_>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let fields = match matches.value_of("field") {
        Some(name) => vec![parse_field(name)?],
        None => FieldId::ALL.to_vec(),
    };

    let attributes = [
        Attribute::Value,
        Attribute::EngineeringUnits,
        Attribute::UserAccessLevel,
        Attribute::Description,
    ];
    let nodes = fields
        .iter()
        .flat_map(|field| {
            attributes.iter().map(move |attribute| ReadValueId {
                node_id: node_id(*field),
                attribute: *attribute,
            })
        })
        .collect();
    let results = client.read(nodes).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("{}", "📊 Fan Controller".bright_blue().bold());
    for (field, row) in fields.iter().zip(results.chunks(attributes.len())) {
        let value = show(&row[0]);
        let unit = row[1].value.as_ref().map(ToString::to_string).unwrap_or_default();
        let writable = matches!(row[2].value, Some(Variant::UInt(level)) if level & 0x02 != 0);
        let access = if writable { "rw".bright_green() } else { "r".dimmed() };
        println!(
            "  {:<16} {:>8} {:<3} {:<3} {}",
            field.name().bright_white(),
            value.bright_cyan(),
            unit,
            access,
            show(&row[3]).dimmed()
        );
    }
    Ok(())
}

async fn handle_write(client: &mut NodeClient, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let field = parse_field(matches.value_of("field").unwrap_or_default())?;
    let raw = matches.value_of("value").unwrap_or_default();
    let value = match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "enable" => Variant::Bool(true),
        "off" | "false" | "disable" => Variant::Bool(false),
        number => Variant::Double(number.parse().map_err(|_| format!("'{raw}' is not a number or on/off"))?),
    };

    match client.write_field(field, value.clone()).await {
        Ok(()) => {
            println!("{} {} set to {}", "✅".green(), field.name().bright_white(), value.to_string().bright_cyan());
            Ok(())
        }
        Err(ClientError::Fault { status, message, .. }) => {
            println!("{} {} rejected: {}", "❌".red(), field.name().bright_white(), message.bright_red());
            if status == fanbus::adapter::node::StatusCode::BadUserAccessDenied {
                println!("{} Log in with: {}", "💡".yellow(), "fanbus --user <name> --password <secret> write ...".bright_cyan());
            }
            Err(format!("{status}").into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_watch(
    client: &mut NodeClient,
    matches: &ArgMatches<'_>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let interval_ms: u64 = matches.value_of("interval").unwrap_or("1000").parse()?;
    let mut interval = time::interval(Duration::from_millis(interval_ms.max(100)));
    println!("{}", "📈 Watching controller (Press Ctrl+C to stop)...".bright_blue().bold());

    let nodes: Vec<ReadValueId> = [
        FieldId::CpuTemperature,
        FieldId::HighThreshold,
        FieldId::LowThreshold,
        FieldId::OverheatStatus,
        FieldId::FanStatus,
        FieldId::ManualOverride,
    ]
    .iter()
    .map(|field| ReadValueId {
        node_id: node_id(*field),
        attribute: Attribute::Value,
    })
    .collect();

    loop {
        interval.tick().await;
        let results = client.read(nodes.clone()).await?;
        if json {
            println!("{}", serde_json::to_string(&results)?);
            continue;
        }
        let flag = |v: &DataValue| matches!(v.value, Some(Variant::Bool(true)));
        let temp = show(&results[0]);
        let status = if flag(&results[3]) { "OVERHEAT".bright_red() } else { "NORMAL".bright_green() };
        let fan = if flag(&results[4]) { "ON".bright_green() } else { "OFF".dimmed() };
        let manual = if flag(&results[5]) { " (manual)".yellow() } else { "".normal() };
        println!(
            "🌡️  {:>6}°C  band {}..{}  {}  fan {}{}",
            temp,
            show(&results[2]),
            show(&results[1]),
            status,
            fan,
            manual
        );
    }
}

async fn handle_modbus(host: &str, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = matches.value_of("modbus-port").unwrap_or(DEFAULT_MODBUS_PORT).parse()?;
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| format!("cannot resolve {host}"))?;
    let mut ctx = tcp::connect(addr).await?;

    match matches.subcommand() {
        ("read", Some(sub)) => {
            let address: u16 = sub.value_of("address").unwrap_or_default().parse()?;
            let count: u16 = sub.value_of("count").unwrap_or("1").parse()?;
            match ctx.read_holding_registers(address, count).await? {
                Ok(words) => {
                    for (offset, word) in words.iter().enumerate() {
                        let register = address + offset as u16;
                        println!(
                            "  {:>3}  {:>5}  {}",
                            register.to_string().bright_white(),
                            word.to_string().bright_cyan(),
                            describe_register(register, *word).dimmed()
                        );
                    }
                }
                Err(exception) => return Err(format!("modbus exception: {exception:?}").into()),
            }
        }
        ("write", Some(sub)) => {
            let address: u16 = sub.value_of("address").unwrap_or_default().parse()?;
            let value: u16 = sub.value_of("value").unwrap_or_default().parse()?;
            match ctx.write_single_register(address, value).await? {
                Ok(()) => println!("{} register {} set to {}", "✅".green(), address, value.to_string().bright_cyan()),
                Err(exception) => return Err(format!("modbus exception: {exception:?}").into()),
            }
        }
        _ => {}
    }
    Ok(())
}

fn describe_register(register: u16, word: u16) -> String {
    if register >= REGISTER_SPACE {
        return String::new();
    }
    FieldId::ALL
        .iter()
        .find(|field| register_of(**field) == register)
        .map(|field| match field.descriptor().scale {
            TEMPERATURE_SCALE => format!("{} = {:.1}", field.name(), f64::from(word as i16) / f64::from(TEMPERATURE_SCALE)),
            _ => format!("{} = {}", field.name(), word),
        })
        .unwrap_or_default()
}

fn parse_field(name: &str) -> Result<FieldId, String> {
    FieldId::from_name(name).ok_or_else(|| format!("unknown field '{name}'"))
}

fn show(value: &DataValue) -> String {
    match &value.value {
        Some(v) => v.to_string(),
        None => format!("{:?}", value.status),
    }
}
