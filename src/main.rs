use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rtot::config::{parse_listen_addr, LogFormat, ServerConfig, DEFAULT_ADDR};
use rtot::scheduler::{StoreKind, DEFAULT_FIELDS};
use rtot::server::Server;
use rtot::shutdown::install_shutdown_handler;
use rtot::worker::DEFAULT_SHELL;

#[derive(Parser, Debug)]
#[command(name = "rtot-server")]
#[command(version)]
#[command(about = "Run shell scripts remotely and poll for their results")]
struct Args {
    /// HTTP server address, "host:port" or ":port"
    #[arg(short = 'a', long, env = "RTOT_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Shared secret clients send as "Authorization: rtot <secret>".
    /// Generated and logged when empty.
    #[arg(short = 's', long, env = "RTOT_SECRET", default_value = "", hide_env_values = true)]
    secret: String,

    /// Log output format
    #[arg(short = 'f', long, env = "RTOT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Interpreter prepended to scripts that have no "#!" line
    #[arg(long, env = "RTOT_SHELL", default_value = DEFAULT_SHELL)]
    shell: String,

    /// Directory for script artifacts (defaults to the system temp dir)
    #[arg(long, env = "RTOT_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Job store backend
    #[arg(long, env = "RTOT_STORE", default_value = "memory")]
    store: String,
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let listen_addr = parse_listen_addr(&args.addr)
        .map_err(|e| format!("invalid address {:?}: {}", args.addr, e))?;

    let store_kind: StoreKind = match args.store.parse() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::error!(error = %e, "Failed to init job store");
            return Err(e.into());
        }
    };

    let mut config = ServerConfig {
        listen_addr,
        secret: args.secret,
        default_job_fields: DEFAULT_FIELDS.to_string(),
        store_kind,
        shell: args.shell,
        artifact_dir: args.artifact_dir,
    };

    if config.ensure_secret() {
        tracing::info!(secret = %config.secret, "No secret given, so generated one");
    }

    tracing::info!(
        addr = %config.listen_addr,
        shell = %config.shell,
        store = ?config.store_kind,
        "Starting rtot server"
    );

    let server = Server::new(config);
    install_shutdown_handler(server.shutdown_token());
    server.run().await?;

    Ok(())
}
