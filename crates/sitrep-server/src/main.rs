//! sitrep server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), layered with
//! `SITREP_*` environment variables, opens the SQLite store, and serves the
//! REST API plus the WebSocket session endpoint.
//!
//! # Password hash generation
//!
//! To print an argon2 PHC string for seeding an operator out of band:
//!
//! ```
//! cargo run -p sitrep-server -- --hash-password
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use sitrep_auth::TokenSigner;
use sitrep_server::{
  AppState, ServerConfig,
  rt::{focus::FocusRegistry, hub::RoomHub},
  sweeper,
};
use sitrep_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Sitrep incident collaboration server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if cli.hash_password {
    let password = read_password()?;
    let hash =
      sitrep_auth::hash_password(&password).context("argon2 error")?;
    println!("{hash}");
    return Ok(());
  }

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("SITREP"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Open the store and build shared state.
  let store = SqliteStore::open(&server_cfg.store_path)
    .await
    .with_context(|| {
      format!("failed to open store at {:?}", server_cfg.store_path)
    })?;

  let signer = TokenSigner::new(server_cfg.token_secret.as_bytes())
    .context("invalid token_secret")?;

  let state = AppState {
    store:  Arc::new(store),
    signer: Arc::new(signer),
    hub:    Arc::new(RoomHub::new()),
    focus:  Arc::new(FocusRegistry::new(Duration::from_millis(
      server_cfg.focus_throttle_ms,
    ))),
    config: Arc::new(server_cfg.clone()),
  };

  sweeper::spawn(state.clone());

  let app = sitrep_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}
