use clap::Subcommand;
use safecheck_core::SafetyStore;
use serde_json::json;

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum UserAction {
    /// Create or update a monitored user
    Add {
        user_id: i64,
        /// Organisation the user belongs to
        #[arg(long)]
        org: i64,
        /// Display name shown to moderators
        #[arg(long)]
        name: String,
    },
    /// Show a user profile
    Show { user_id: i64 },
}

pub fn run(action: UserAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        UserAction::Add { user_id, org, name } => {
            ctx.db.upsert_profile(user_id, org, &name)?;
            println!("user {user_id} saved");
        }
        UserAction::Show { user_id } => match ctx.db.get_profile(user_id)? {
            Some(profile) => print_json(&json!({
                "user_id": profile.user_id,
                "org_id": profile.org_id,
                "full_name": profile.full_name,
                "pins_configured": profile.pins.is_some(),
            }))?,
            None => return Err(format!("user {user_id} not found").into()),
        },
    }
    Ok(())
}
