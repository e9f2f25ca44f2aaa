//! tinybus - command-line front-end for the tinybus message bus.
//!
//! Runs the TCP bus daemon, the demo service, and one-shot client commands
//! (introspect, call, signal). Command output goes to stdout; logs go to
//! stderr.

mod demo;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tinybus_core::{
    connect_tcp, resolve_address, BusDaemon, BusError, CallPattern, Client, ProtocolNames, Server,
    ServiceDefaults,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tinybus")]
#[command(about = "Minimal message bus: daemon, demo service and client")]
struct Args {
    /// Bus address (defaults to $TINYBUS_ADDRESS, then 127.0.0.1:7411)
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bus daemon until interrupted
    Daemon {
        /// Address to listen on (defaults to the bus address)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run the demo service
    Serve {
        #[arg(long, default_value = ServiceDefaults::SERVICE)]
        service: String,

        #[arg(long, default_value = ServiceDefaults::INTERFACE)]
        interface: String,

        /// Signal interface to subscribe to (repeatable)
        #[arg(long = "signal-interface")]
        signal_interfaces: Vec<String>,
    },

    /// Print a service's introspection document
    Introspect {
        #[arg(long, default_value = ServiceDefaults::SERVICE)]
        service: String,
    },

    /// Call a method and print the reply fields, one per line
    Call {
        #[arg(long, default_value = ServiceDefaults::SERVICE)]
        service: String,

        #[arg(long, default_value = ServiceDefaults::INTERFACE)]
        interface: String,

        /// Call pattern: void, string, x1, x2 or x3
        pattern: CallPattern,

        method: String,

        /// Positional arguments for the pattern's request
        args: Vec<String>,
    },

    /// Emit a signal carrying one string and print its serial
    Signal {
        #[arg(long, default_value = ServiceDefaults::SIGNAL_PATH)]
        path: String,

        #[arg(long, default_value = ServiceDefaults::SIGNAL_INTERFACE)]
        interface: String,

        name: String,

        payload: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tinybus: {}", e);
            let code = e
                .downcast_ref::<BusError>()
                .map(BusError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let address = args.address.as_deref();

    match args.command {
        Command::Daemon { listen } => {
            let addr = resolve_address(listen.as_deref().or(address))?;
            let mut daemon = BusDaemon::start(addr).await?;
            println!("listening on {}", daemon.addr());

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            daemon.shutdown();
        }

        Command::Serve {
            service,
            interface,
            signal_interfaces,
        } => {
            let connection = connect_tcp(resolve_address(address)?).await?;
            let mut server = Server::bind(connection, &service, &interface).await?;
            demo::register(&mut server)?;
            for signal_interface in &signal_interfaces {
                server.register_signal(signal_interface).await?;
            }
            server.on_signal(|event| {
                info!(
                    "Signal {}.{} from {:?}: {}",
                    event.interface, event.member, event.sender, event.payload
                );
            });

            tokio::select! {
                served = server.serve() => served?,
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received, exiting"),
            }
        }

        Command::Introspect { service } => {
            let mut client = Client::new(connect_tcp(resolve_address(address)?).await?);
            let reply = client
                .invoke(
                    CallPattern::VoidToString,
                    &service,
                    ProtocolNames::INTROSPECTABLE_INTERFACE,
                    ProtocolNames::INTROSPECT_MEMBER,
                    Vec::new(),
                )
                .await?;
            for value in reply {
                print!("{}", value);
            }
        }

        Command::Call {
            service,
            interface,
            pattern,
            method,
            args,
        } => {
            let request = pattern.parse_request(&args)?;
            let mut client = Client::new(connect_tcp(resolve_address(address)?).await?);
            let reply = client
                .invoke(pattern, &service, &interface, &method, request)
                .await?;
            for value in reply {
                println!("{}", value);
            }
        }

        Command::Signal {
            path,
            interface,
            name,
            payload,
        } => {
            let mut client = Client::new(connect_tcp(resolve_address(address)?).await?);
            let serial = client.signal(&path, &interface, &name, &payload).await?;
            println!("{}", serial);
        }
    }

    Ok(())
}
