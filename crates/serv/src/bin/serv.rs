//! Serves a directory over HTTP or HTTPS.
//!
//! ```text
//! serv -p 8080 ./public
//! serv --config serv.toml --tls-cert cert.pem --tls-key key.pem
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serv::config::{ConfigLoader, ServConfig, DEFAULT_ENV_PREFIX};
use serv::core::SharedMiddleware;
use serv::middleware::{
    AccessLog, AccessLogger, ClfFormat, Collector, GenericFormat, LimitCodes, ResponseStatus,
};
use serv::server::options::with_options;
use serv::server::{shutdown, DefaultLogger, Server};
use serv::telemetry::{init_logging, init_metrics};
use serv::FileServer;

const DEFAULT_PORT: &str = "8080";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AccessLogFormat {
    Generic,
    Clf,
    None,
}

#[derive(Debug, Parser)]
#[command(name = "serv", version)]
#[command(about = "Serve a directory over HTTP", long_about = None)]
struct Cli {
    /// Port to listen on [default: 8080].
    #[arg(short, long)]
    port: Option<String>,

    /// TOML or JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server name used in logs.
    #[arg(long)]
    name: Option<String>,

    /// PEM encoded certificate; enables HTTPS.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM encoded private key.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// CA used to verify client certificates; enables mutual TLS.
    #[arg(long)]
    tls_ca: Option<PathBuf>,

    /// Access log format. Only requests answered with an error status are
    /// logged.
    #[arg(long, value_enum, default_value_t = AccessLogFormat::Generic)]
    access_log: AccessLogFormat,

    /// Directory to serve.
    #[arg(default_value = "./")]
    dir: PathBuf,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ServConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader
                .with_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
        }
        let mut config = loader
            .with_env_prefix(DEFAULT_ENV_PREFIX)
            .load_unvalidated();

        if let Some(port) = &self.port {
            config.server.port.clone_from(port);
        }
        if let Some(name) = &self.name {
            config.server.name.clone_from(name);
        }
        if self.tls_cert.is_some() {
            config.tls.cert_file.clone_from(&self.tls_cert);
            config.tls.key_file.clone_from(&self.tls_key);
        }
        if let Some(ca) = &self.tls_ca {
            config.tls.ca_cert_file = Some(ca.clone());
            config.tls.verify_client = true;
        }
        if config.server.port.is_empty() && config.server.addr.is_empty() {
            config.server.port = DEFAULT_PORT.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn access_logger(&self) -> Option<Arc<dyn AccessLogger>> {
        match self.access_log {
            AccessLogFormat::Generic => Some(Arc::new(GenericFormat::new())),
            AccessLogFormat::Clf => Some(Arc::new(ClfFormat::new())),
            AccessLogFormat::None => None,
        }
    }
}

fn middleware(cli: &Cli, config: &ServConfig) -> Vec<SharedMiddleware> {
    let mut middleware: Vec<SharedMiddleware> = Vec::new();
    if let Some(logger) = cli.access_logger() {
        middleware.push(Arc::new(AccessLog::new(LimitCodes::new(
            ResponseStatus::ERRORS,
            logger,
        ))));
    }
    if let Some(recorder) = init_metrics(&config.metrics) {
        middleware.push(Arc::new(Collector::new(recorder)));
    }
    middleware
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config.logging).context("initializing logging")?;

    let dir = cli.dir.canonicalize().with_context(|| format!("opening {}", cli.dir.display()))?;
    let mut builder = Server::builder()
        .option(with_options(config.server_options()?))
        .logger(Arc::new(DefaultLogger::new()))
        .handler(FileServer::new(&dir));
    for layer in middleware(&cli, &config) {
        builder = builder.middleware(layer);
    }
    let server = Arc::new(builder.build().context("configuring server")?);
    tracing::info!(dir = %dir.display(), server = %server.name(), "serving directory");

    let mut running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    tokio::select! {
        result = &mut running => {
            return result.context("server task failed")?.context("server stopped");
        }
        signal = shutdown::os_signal() => {
            signal.context("listening for shutdown signals")?;
        }
    }

    match server.shutdown(Some(SHUTDOWN_TIMEOUT)).await {
        Err(err) if err.is_deadline_exceeded() => {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "shutdown timed out, remaining connections were dropped");
        }
        other => other.context("shutting down")?,
    }
    running.await.context("server task failed")??;
    Ok(())
}
