//! Subcommand implementations

pub mod describe;
pub mod info;
pub mod plan;

use serde::Serialize;

/// Print `report` as pretty JSON
pub(crate) fn print_json<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
