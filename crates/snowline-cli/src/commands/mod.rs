//! CLI command implementations.

pub mod deploy;
pub mod resolve;
pub mod serve;

use anyhow::{Context, Result};
use serde_json::Value;

/// Print a JSON document to stdout.
pub(crate) fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let value: Value = serde_json::to_value(value).context("Failed to serialize output")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
