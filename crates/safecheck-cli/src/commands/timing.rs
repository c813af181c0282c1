use clap::Subcommand;

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum TimingAction {
    /// Add a recurring check-in
    Add {
        user_id: i64,
        /// e.g. "morning_checkin"
        #[arg(long)]
        label: String,
        /// Time of day in UTC, HH:MM or HH:MM:SS
        #[arg(long)]
        time: String,
        /// Comma-separated weekdays, e.g. "monday,wednesday,friday"
        #[arg(long, value_delimiter = ',', required = true)]
        days: Vec<String>,
    },
    /// List a user's timings
    List { user_id: i64 },
    /// Resume a paused timing
    Enable { user_id: i64, timing_id: i64 },
    /// Pause a timing
    Disable { user_id: i64, timing_id: i64 },
}

pub fn run(action: TimingAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        TimingAction::Add {
            user_id,
            label,
            time,
            days,
        } => {
            let timing = ctx.service.create_timing(user_id, &label, &time, &days)?;
            print_json(&timing)?;
        }
        TimingAction::List { user_id } => print_json(&ctx.service.timings(user_id)?)?,
        TimingAction::Enable { user_id, timing_id } => {
            ctx.service.set_timing_active(user_id, timing_id, true)?;
            println!("timing {timing_id} enabled");
        }
        TimingAction::Disable { user_id, timing_id } => {
            ctx.service.set_timing_active(user_id, timing_id, false)?;
            println!("timing {timing_id} disabled");
        }
    }
    Ok(())
}
