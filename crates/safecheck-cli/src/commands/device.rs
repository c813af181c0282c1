use clap::Subcommand;
use safecheck_core::{Platform, SafetyStore};

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum DeviceAction {
    /// Register (or re-activate) a push token
    Register {
        user_id: i64,
        token: String,
        /// ios or android
        #[arg(long, default_value = "android")]
        platform: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Stop sending to a token
    Deactivate { user_id: i64, token: String },
    /// List a user's active devices
    List { user_id: i64 },
}

pub fn run(action: DeviceAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        DeviceAction::Register {
            user_id,
            token,
            platform,
            name,
        } => {
            let platform = Platform::parse(&platform)?;
            let device = ctx
                .service
                .register_device(user_id, &token, platform, name.as_deref())?;
            print_json(&device)?;
        }
        DeviceAction::Deactivate { user_id, token } => {
            ctx.service.deactivate_device(user_id, &token)?;
            println!("device deactivated");
        }
        DeviceAction::List { user_id } => {
            print_json(&ctx.db.active_devices(user_id)?)?;
        }
    }
    Ok(())
}
