//! RTMP / HTTP-FLV relay server
//!
//! Run with: relay_server <rtmp_bind_addr> [httpflv_bind_addr]
//!
//! Example: relay_server 0.0.0.0:1935 0.0.0.0:8080
//!
//! An empty address disables that listener; at least one must be given.

use rtmp_relay::relay::{ServerManager, ServerManagerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_relay=info".parse()?)
                .add_directive("relay_server=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: relay_server <rtmp_bind_addr> [httpflv_bind_addr]");
        eprintln!("Example: relay_server 0.0.0.0:1935 0.0.0.0:8080");
        std::process::exit(1);
    }

    let config = ServerManagerConfig {
        rtmp_listen_addr: args[1].clone(),
        httpflv_listen_addr: args.get(2).cloned().unwrap_or_default(),
    };
    if config.rtmp_listen_addr.is_empty() && config.httpflv_listen_addr.is_empty() {
        eprintln!("At least one listen address is required");
        std::process::exit(1);
    }

    let manager = ServerManager::new(config);
    manager.run_loop().await?;
    Ok(())
}
