use anyhow::Result;
use emojifs::config::Config;
use schemars::schema_for;

pub fn main() -> Result<()> {
    let schema = schema_for!(Config);

    println!("{}", serde_json::to_string_pretty(&schema)?);

    Ok(())
}
