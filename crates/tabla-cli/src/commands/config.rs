use anyhow::Result;
use tabla_client::ClientConfig;

use crate::cli::{ConfigCommands, OutputFormat};
use crate::output::print_json;

pub fn run(command: &ConfigCommands, config: &ClientConfig, format: OutputFormat) -> Result<()> {
    match command {
        ConfigCommands::Show => match format {
            OutputFormat::Json => print_json(config)?,
            OutputFormat::Table => print!("{}", toml::to_string_pretty(config)?),
        },
    }
    Ok(())
}
