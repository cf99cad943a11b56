//! Configuration management commands.

use tandem_core::config::IssueSeverity;

use crate::{AppContext, ConfigAction};

pub fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => show(ctx),
    }
}

fn show(ctx: &AppContext) -> anyhow::Result<()> {
    match &ctx.config_path {
        Some(path) => println!("# Configuration (with {})", path.display()),
        None => println!("# Configuration"),
    }
    println!("{}", ctx.config.to_redacted_toml()?);

    let result = ctx.config.validate();
    if result.issues.is_empty() {
        println!("# Valid");
        return Ok(());
    }

    for issue in &result.issues {
        let label = match issue.severity {
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
        };
        println!("# {}: {}: {}", label, issue.field, issue.message);
    }
    Ok(())
}
