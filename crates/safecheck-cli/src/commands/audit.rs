use clap::Subcommand;
use safecheck_core::SafetyStore;

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum AuditAction {
    /// Most recent audit entries, newest first
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn run(action: AuditAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        AuditAction::Recent { limit } => print_json(&ctx.db.recent_audit(limit)?)?,
    }
    Ok(())
}
