use anyhow::Result;
use tabla_client::AppContext;

use crate::cli::ThemeArgs;
use crate::output::{print_field, print_success};

pub fn run(ctx: &AppContext, args: &ThemeArgs) -> Result<()> {
    match args.preference {
        Some(preference) => {
            ctx.theme().save(preference)?;
            print_success(&format!("Theme set to {preference}"));
        }
        None => print_field("Theme", ctx.theme().load_or_default()),
    }
    Ok(())
}
