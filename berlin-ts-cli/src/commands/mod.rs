//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod channel;
pub(crate) mod completions;
pub(crate) mod decode;
pub(crate) mod image;

/// Print a `{"ok": true, "data": ...}` envelope to stdout.
pub(crate) fn print_json(data: serde_json::Value) -> anyhow::Result<()> {
    let out = serde_json::json!({
        "ok": true,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
