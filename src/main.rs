use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use media_gateway::cli::{Cli, Commands};
use media_gateway::config::Config;
use media_gateway::extractors::{MediaExtractor, YtDlpExtractor};
use media_gateway::platform::{classify, Platform};
use media_gateway::{build_catalog, output, select, server, utils, PipelineRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    // --init writes the defaults, so it must not require an existing file
    let init_only = matches!(cli.command, Commands::Config { init: true, .. });
    let mut config = if init_only {
        Config::default()
    } else {
        Config::load(cli.config.as_deref())?
    };

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate_for_serving()?;

            warn_missing_dependencies(&config).await;

            server::serve(&config).await?;
        }
        Commands::Analyze { url, format } => {
            warn_missing_dependencies(&config).await;

            let url = utils::validate_url(&url)?.to_string();
            let classification = classify(&url);
            if !classification.allowed {
                tracing::warn!("{} is outside the allowlist; the server would reject it", url);
            }

            let extractor = YtDlpExtractor::new(&config.tools.extractor, config.extract_timeout());

            let progress = ProgressBar::new_spinner();
            progress.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
            progress.set_message(format!("Extracting metadata with {}...", extractor.name()));
            progress.enable_steady_tick(Duration::from_millis(100));

            let metadata = extractor.extract(&url).await;
            progress.finish_and_clear();

            let catalog = build_catalog(&metadata?);
            output::print_catalog(&catalog, &classification, &format)?;
        }
        Commands::Plan { url, format_id } => {
            let url = utils::validate_url(&url)?.to_string();
            let classification = classify(&url);
            let plan = select(classification.platform, &format_id);

            let runner = PipelineRunner::new(
                &config.tools.transcoder,
                config.pipeline.chunk_size,
                config.kill_timeout(),
            );

            println!("Platform: {}", classification.platform);
            if !classification.allowed {
                println!("Allowed: no (rejected unless policy.enforce_allowlist is false)");
            }
            println!("Selection: {}", plan.selection_expression);
            println!("Container: {}", plan.output_container.as_str());
            println!("Command: {}", runner.command_line(&plan, &url).join(" "));
        }
        Commands::Config { show, init } => {
            if show {
                config.display();
            } else if init {
                let path = config.save(cli.config.as_deref())?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Use --show to print it or --init to write the defaults");
            }
        }
        Commands::Platforms => {
            println!("Supported platforms:");
            for platform in Platform::all() {
                println!("  • {}", platform.description());
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "media_gateway=debug,tower_http=debug"
    } else {
        "media_gateway=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so `analyze --format json` stays machine readable
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// Missing tools are not fatal: the binaries may sit outside PATH in containers
async fn warn_missing_dependencies(config: &Config) {
    let missing = utils::check_dependencies(&config.tools.extractor).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }
}
