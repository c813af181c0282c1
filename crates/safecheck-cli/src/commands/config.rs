use clap::Subcommand;
use safecheck_core::Config;

use super::CmdResult;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the configuration as TOML, whole or one section
    Show {
        /// scheduler, notifications, fcm, security or storage
        section: Option<String>,
    },
    /// Print one value by dotted key, e.g. "scheduler.reminder_interval_secs"
    Get { key: String },
    /// Validate and store one value
    Set { key: String, value: String },
    /// Print where the config file and database live
    Paths,
    /// Overwrite the config file with defaults
    Reset,
}

pub fn run(action: ConfigAction) -> CmdResult {
    match action {
        ConfigAction::Show { section } => {
            let config = toml::Value::try_from(Config::load()?)?;
            let shown = match section.as_deref() {
                None => &config,
                Some(name) => config
                    .get(name)
                    .ok_or_else(|| format!("no config section '{name}'"))?,
            };
            print!("{}", toml::to_string_pretty(shown)?);
        }
        ConfigAction::Get { key } => {
            let value = Config::load()?
                .get(&key)
                .ok_or_else(|| format!("unknown key: {key}"))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            // Echo the stored form, which may differ from the input ("1" -> 1).
            println!("{key} = {}", config.get(&key).unwrap_or(value));
        }
        ConfigAction::Paths => {
            let config = Config::load()?;
            println!("config   {}", Config::path()?.display());
            println!("database {}", config.database_path()?.display());
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("restored defaults in {}", Config::path()?.display());
        }
    }
    Ok(())
}
