pub mod alerts;
pub mod audit;
pub mod checkin;
pub mod config;
pub mod device;
pub mod pins;
pub mod serve;
pub mod timing;
pub mod user;

use std::sync::Arc;

use safecheck_core::{
    Config, FcmChannel, LogChannel, PushChannel, SafetyDb, SafetyService, SystemClock,
};
use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Everything a command needs, opened from the data directory.
pub struct Context {
    pub config: Config,
    pub db: Arc<SafetyDb>,
    pub service: SafetyService,
}

impl Context {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        Self::from_config(Config::load()?)
    }

    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(SafetyDb::open(&config.database_path()?)?);
        let service = SafetyService::new(
            db.clone(),
            push_channel(&config)?,
            Arc::new(SystemClock),
            &config,
        )?;
        Ok(Self {
            config,
            db,
            service,
        })
    }
}

/// The configured push transport. FCM reads its access token from the
/// environment variable named in `fcm.access_token_env`.
pub fn push_channel(config: &Config) -> Result<Arc<dyn PushChannel>, Box<dyn std::error::Error>> {
    match config.notifications.channel.as_str() {
        "fcm" => {
            let token = std::env::var(&config.fcm.access_token_env).unwrap_or_default();
            let channel = FcmChannel::new(&config.fcm.endpoint, &config.fcm.project_id, &token)?;
            Ok(Arc::new(channel))
        }
        _ => Ok(Arc::new(LogChannel)),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
