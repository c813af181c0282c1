use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "safecheck", version, about = "SafeCheck check-in and alert engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reminder and escalation scheduler
    Serve(commands::serve::ServeArgs),
    /// Monitored user profiles
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Safe and danger PIN management
    Pins {
        #[command(subcommand)]
        action: commands::pins::PinsAction,
    },
    /// Push device registration
    Device {
        #[command(subcommand)]
        action: commands::device::DeviceAction,
    },
    /// Recurring check-in timings
    Timing {
        #[command(subcommand)]
        action: commands::timing::TimingAction,
    },
    /// Answer or snooze check-ins as a user
    Checkin {
        #[command(subcommand)]
        action: commands::checkin::CheckinAction,
    },
    /// Moderator alert handling
    Alerts {
        #[command(subcommand)]
        action: commands::alerts::AlertsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Audit trail
    Audit {
        #[command(subcommand)]
        action: commands::audit::AuditAction,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so JSON output on stdout stays parseable.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "safecheck_core=info,safecheck=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::User { action } => commands::user::run(action),
        Commands::Pins { action } => commands::pins::run(action).await,
        Commands::Device { action } => commands::device::run(action),
        Commands::Timing { action } => commands::timing::run(action),
        Commands::Checkin { action } => commands::checkin::run(action).await,
        Commands::Alerts { action } => commands::alerts::run(action).await,
        Commands::Config { action } => commands::config::run(action),
        Commands::Audit { action } => commands::audit::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
