//! multirootca - multi-root certificate authority signing service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use multirootca::{
    config::Args,
    logging,
    roots::{BuildOptions, RootRegistry, RootsConfig},
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  multirootca {}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Roots file: {}", args.roots_file.display());
    info!("TLS: {}", if args.tls_enabled() { "enabled" } else { "disabled" });
    info!("Max in flight: {}", args.max_in_flight);
    info!("======================================");

    let config = match RootsConfig::load(&args.roots_file) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let options = BuildOptions {
        skip_invalid: args.skip_invalid_roots,
        require_acl: args.require_acl,
    };
    let registry = match RootRegistry::build(&config, &options).await {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to build root registry: {}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(args, registry));
    if let Err(e) = server::run(state).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("multirootca stopped");
    Ok(())
}
