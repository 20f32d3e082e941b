//! `forged` — the peer-to-peer git forge daemon binary (§4.9).
//!
//! Wires a concrete `VaultClient`/`IdentityResolver` pair into
//! `forge_core::server::run`. This binary does not implement the
//! record-vault or identity-resolver primitives itself (§1,
//! "Explicitly out of scope"); it expects to be linked against real
//! implementations of those traits. The in-memory test doubles
//! (`MemoryVault`, `MemoryResolver`) are available behind the
//! `test-support` feature for local experimentation only and are not
//! suitable as a production vault or resolver.

use std::path::PathBuf;

use clap::Parser;
use forge_core::config::ForgeConfig;
use forge_core::ForgeError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "forged", about = "Peer-to-peer git forge daemon")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "FORGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = ForgeConfig::load(args.config.as_deref())?;

    let _log_guard = init_logging(&config)?;

    #[cfg(feature = "test-support")]
    {
        tracing::warn!(
            "running with in-memory MemoryVault/MemoryResolver test doubles; state is not persisted"
        );
        let vault = forge_core::vault::MemoryVault::new();
        let resolver = forge_core::identity::resolver::memory::MemoryResolver::new();
        forge_core::server::run(config, vault, resolver).await?;
        return Ok(());
    }

    #[cfg(not(feature = "test-support"))]
    {
        Err(Box::new(ForgeError::internal(
            "forged requires a real VaultClient/IdentityResolver implementation; \
             build with --features test-support for local experimentation only",
        )))
    }
}

fn init_logging(
    config: &ForgeConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard, ForgeError> {
    std::fs::create_dir_all(&config.home)?;
    let file_appender = tracing_appender::rolling::never(&config.home, "daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .init();

    Ok(guard)
}
