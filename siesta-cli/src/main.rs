use std::time::Duration;

use clap::Parser;
use indicatif::MultiProgress;
use mimalloc::MiMalloc;
use siesta_engine::{Service, TransportConfig};
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod error;
mod output;
mod utils;

use cli::CliArgs;
use error::AppError;
use utils::progress::ProgressManager;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    if args.repeat == 0 {
        return Err(AppError::InvalidInput("--repeat must be at least 1".to_string()));
    }

    info!(
        "HTTP timeout configuration: overall={}s, connect={}s",
        args.timeout, args.connect_timeout
    );

    let mut transport_config = TransportConfig {
        timeout: Duration::from_secs(args.timeout),
        connect_timeout: Duration::from_secs(args.connect_timeout),
        ..TransportConfig::default()
    };
    transport_config
        .headers
        .extend(utils::parse_headers(&args.headers));
    if let Some(user_agent) = &args.user_agent {
        transport_config.user_agent = user_agent.clone();
    }

    let mut builder = Service::builder()
        .with_transport_config(transport_config)
        .with_default_pipeline(!args.raw);
    if let Some(proxy) = &args.proxy {
        info!(proxy_url = %proxy, "Using explicit proxy configuration");
        builder = builder.with_proxy(proxy.clone());
    }
    let service = builder.build()?;

    let progress = if args.show_progress {
        ProgressManager::new(MultiProgress::new())
    } else {
        ProgressManager::new_disabled(MultiProgress::new())
    };

    let mut failures = 0usize;
    let mut last_error = None;
    for url in &args.urls {
        let resource = service.resource_from_url(url)?;
        for attempt in 1..=args.repeat {
            debug!(url = %url, attempt, "Loading");
            let request = resource.load();
            progress.track(&request, url);
            let info = request.await;
            println!("{}", output::render(url, &info));
            if let Err(error) = info.response {
                failures += 1;
                last_error = Some(error);
            }
        }
    }

    match last_error {
        Some(error) => {
            info!(failures, "Some requests failed");
            Err(AppError::Request(error))
        }
        None => Ok(()),
    }
}
