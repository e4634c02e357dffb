use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use url::Url;

use pagepress::acquire::DEFAULT_REMOTE_ENDPOINT;
use pagepress::cdp::ChromeLauncher;
use pagepress::validate::{normalize_url, validate_url};
use pagepress::{Acquirer, AcquirerConfig, RenderConfig, Renderer};

/// Render web pages to PDF with headless Chrome
#[derive(Parser, Debug)]
#[command(name = "pagepress", version, about)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, env = "PAGEPRESS_LOG", default_value = "info", global = true)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Render a single URL to a file
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PAGEPRESS_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Renders allowed to hold a browser at the same time (defaults to the CPU count)
    #[arg(long, env = "PAGEPRESS_MAX_CONCURRENT_RENDERS")]
    max_concurrent_renders: Option<usize>,

    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Page to render; `https://` is assumed when no scheme is given
    url: String,

    /// Output file
    #[arg(short, long, default_value = "page.pdf")]
    output: PathBuf,

    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args, Debug)]
struct BrowserArgs {
    /// Credential for the remote browser endpoint; local Chrome is used when unset
    #[arg(long, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    browserless_token: Option<String>,

    /// Remote browser WebSocket endpoint
    #[arg(long, env = "PAGEPRESS_REMOTE_ENDPOINT", default_value = DEFAULT_REMOTE_ENDPOINT)]
    remote_endpoint: Url,

    /// Chrome executable for local launches
    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Bound on browser protocol operations (ms)
    #[arg(long, default_value_t = 120_000)]
    protocol_timeout_ms: u64,

    /// Bound on navigation (ms)
    #[arg(long, default_value_t = 30_000)]
    navigation_timeout_ms: u64,

    /// Bound on waiting for images before printing (ms)
    #[arg(long, default_value_t = 10_000)]
    image_settle_timeout_ms: u64,
}

impl BrowserArgs {
    fn acquirer_config(&self) -> AcquirerConfig {
        AcquirerConfig {
            protocol_timeout_ms: self.protocol_timeout_ms,
            chrome_path: self.chrome_path.clone(),
            ..AcquirerConfig::from_token(
                self.browserless_token.clone(),
                self.remote_endpoint.clone(),
            )
        }
    }

    fn render_config(&self) -> RenderConfig {
        RenderConfig {
            navigation_timeout_ms: self.navigation_timeout_ms,
            image_settle_timeout_ms: self.image_settle_timeout_ms,
            ..Default::default()
        }
    }

    fn renderer(&self, max_concurrent: usize) -> Renderer<ChromeLauncher> {
        let acquirer_config = self.acquirer_config();
        match &acquirer_config.remote {
            Some(remote) => info!("Remote browser endpoint: {}", remote),
            None => info!("No remote browser credential configured; rendering with local Chrome"),
        }
        let acquirer = Acquirer::new(ChromeLauncher, acquirer_config);
        Renderer::new(acquirer, self.render_config(), max_concurrent)
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let max_concurrent = args.max_concurrent_renders.unwrap_or_else(num_cpus::get);
    let renderer = Arc::new(args.browser.renderer(max_concurrent));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    pagepress::server::serve(listener, renderer, shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let url = validate_url(&normalize_url(&args.url))?;
    let renderer = args.browser.renderer(1);

    let pdf = renderer.render(&url).await?;
    std::fs::write(&args.output, &pdf)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!("Wrote {} bytes to {}", pdf.len(), args.output.display());
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = ConfigBuilder::new()
        .add_filter_ignore_str("headless_chrome")
        .add_filter_ignore_str("tungstenite")
        .build();
    TermLogger::init(cli.log_level, log_config, TerminalMode::Mixed, ColorChoice::Auto)?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Render(args) => render(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["pagepress", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind.port(), 3000);
        assert_eq!(args.browser.remote_endpoint.as_str(), "wss://production-sfo.browserless.io/");

        let render = args.browser.render_config();
        assert_eq!(render.navigation_timeout_ms, 30_000);
        assert_eq!(args.browser.acquirer_config().protocol_timeout_ms, 120_000);
    }

    #[test]
    fn test_token_selects_remote() {
        let cli = Cli::try_parse_from([
            "pagepress",
            "render",
            "example.com",
            "--browserless-token",
            "abc",
        ])
        .unwrap();
        let Command::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.output, PathBuf::from("page.pdf"));
        let remote = args.browser.acquirer_config().remote.unwrap();
        assert_eq!(remote.authorization(), "Bearer abc");
    }
}
