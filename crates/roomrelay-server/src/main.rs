//! Roomrelay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on every interface, default port
//! roomrelay-server
//!
//! # Small rooms, reply to chat from outside a room with an error
//! roomrelay-server --bind 0.0.0.0:9000 --room-capacity 4 --reject-non-members
//! ```

use std::time::Duration;

use clap::Parser;
use roomrelay_server::{
    DriverConfig, NonMemberPolicy, Server, ServerRuntimeConfig, ShutdownHandle,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Roomrelay chat and signaling relay
#[derive(Parser, Debug)]
#[command(name = "roomrelay-server")]
#[command(about = "Local-network chat and signaling relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8888")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Maximum members per room
    #[arg(long, default_value = "10")]
    room_capacity: usize,

    /// Largest accepted JSON message, in bytes
    #[arg(long, default_value = "65536")]
    max_message_size: usize,

    /// Messages buffered per client before it is disconnected as stuck
    #[arg(long, default_value = "256")]
    outbound_queue: usize,

    /// Socket write timeout, in milliseconds
    #[arg(long, default_value = "5000")]
    write_timeout_ms: u64,

    /// Reply "not in a room" to chat and signals from clients outside a room
    #[arg(long)]
    reject_non_members: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerRuntimeConfig {
        let non_member_policy = if self.reject_non_members {
            NonMemberPolicy::Reject
        } else {
            NonMemberPolicy::Ignore
        };

        ServerRuntimeConfig {
            bind_address: self.bind,
            driver: DriverConfig {
                max_connections: self.max_connections,
                room_capacity: self.room_capacity,
                non_member_policy,
            },
            max_message_size: self.max_message_size,
            outbound_queue: self.outbound_queue,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Roomrelay server starting");
    tracing::info!("Binding to {}", args.bind);

    let server = Server::bind(args.into_config()).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    tokio::spawn(stop_on_ctrl_c(server.shutdown_handle()));

    server.run().await?;

    Ok(())
}

async fn stop_on_ctrl_c(shutdown: ShutdownHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Interrupt received, shutting down");
            shutdown.trigger();
        },
        Err(e) => tracing::error!("Unable to listen for Ctrl-C: {}", e),
    }
}
