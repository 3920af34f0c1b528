use std::sync::Arc;

use actiongate::probe::{
    self, Authorizer, HandlerHost, HandlerRegistry, Principal, RequestContext, RequestData,
};
use actiongate::settings::Settings;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "actiongate",
    version,
    about = "Ask whether an action would be authorized before invoking it"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the probe API (default)
    Serve,
    /// Run a single probe and print `allowed` or `denied`
    Check {
        /// Handler serving the current request
        #[arg(long)]
        current: String,
        /// Action to probe
        #[arg(long)]
        action: String,
        /// Target handler; the current handler when omitted
        #[arg(long)]
        handler: Option<String>,
        /// Caller identity; anonymous when omitted
        #[arg(long)]
        user: Option<String>,
        #[arg(long = "role")]
        roles: Vec<String>,
        #[arg(long, default_value = "GET")]
        method: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let mut registry =
        HandlerRegistry::new().with_descriptor_cache(settings.probe.cache_descriptors);
    probe::loader::load_policies(&settings.probe.policies_dir, &mut registry)?;
    let authorizer = Arc::new(Authorizer::new(Arc::new(registry)));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&settings, authorizer).await,
        Command::Check {
            current,
            action,
            handler,
            user,
            roles,
            method,
        } => {
            let principal = roles.into_iter().fold(
                user.map(Principal::user).unwrap_or_else(Principal::anonymous),
                Principal::with_role,
            );
            let request = RequestData::new(method, "");
            let host = authorizer.host();
            let current_handler = host.create_handler(&current, &request).ok_or_else(|| {
                probe::ProbeError::HandlerNotFound {
                    host: host.name().to_string(),
                    name: current.clone(),
                }
            })?;
            let ctx = RequestContext::new(current_handler, principal, request);

            let allowed = authorizer
                .is_action_authorized_async(&ctx, &action, handler.as_deref())
                .await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
            Ok(())
        }
    }
}

async fn serve(settings: &Settings, authorizer: Arc<Authorizer>) -> Result<()> {
    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Probe API listening");
    axum::serve(listener, probe::web::router(authorizer))
        .await
        .into_diagnostic()?;
    Ok(())
}
