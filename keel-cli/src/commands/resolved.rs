//! Print the resolved configuration.

use anyhow::Result;
use keel_core::{merge, PartialConfig, ResolvedConfig};

/// Run the config command.
pub fn run(partial: PartialConfig) -> Result<()> {
    let resolved = merge(ResolvedConfig::default(), partial);
    println!("{}", resolved.to_json_pretty()?);

    match resolved.sync_target() {
        Some(target) => eprintln!(
            "sync: enabled ({} every {}s)",
            target.url,
            target.interval.as_secs()
        ),
        None => eprintln!("sync: disabled"),
    }
    Ok(())
}
