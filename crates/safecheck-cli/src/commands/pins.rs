use clap::Subcommand;

use super::{CmdResult, Context};

#[derive(Subcommand)]
pub enum PinsAction {
    /// Set both PINs for the first time
    Setup {
        user_id: i64,
        #[arg(long)]
        safe: String,
        #[arg(long)]
        danger: String,
    },
    /// Replace both PINs; requires the current safe PIN
    Rotate {
        user_id: i64,
        #[arg(long)]
        current: String,
        #[arg(long)]
        safe: String,
        #[arg(long)]
        danger: String,
    },
}

pub async fn run(action: PinsAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        PinsAction::Setup {
            user_id,
            safe,
            danger,
        } => {
            ctx.service.setup_pins(user_id, &safe, &danger).await?;
            println!("PINs configured for user {user_id}");
        }
        PinsAction::Rotate {
            user_id,
            current,
            safe,
            danger,
        } => {
            ctx.service
                .rotate_pins(user_id, &current, &safe, &danger)
                .await?;
            println!("PINs rotated for user {user_id}");
        }
    }
    Ok(())
}
