use super::{Command, Context};
use anyhow::Result;

pub struct ConfigCommand;

impl Command for ConfigCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        if ctx.json {
            println!("{}", serde_json::to_string_pretty(&ctx.config)?);
        } else {
            print!("{}", ctx.config.to_toml()?);
        }
        Ok(())
    }
}
