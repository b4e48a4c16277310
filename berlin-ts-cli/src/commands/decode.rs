//! Offline decoding of captured event frames and IcInfo dumps.

use anyhow::{Context, Result};
use berlin_ts::{EventFrame, IcInfo, TouchEvent};
use console::style;
use std::fs;
use std::path::Path;

use super::print_json;

/// Parse hex text such as `80 00 01`, `0x80,0x0` or `800001` into bytes.
///
/// Tokens are separated by whitespace or commas. A single digit is one
/// byte; longer tokens must have an even number of digits and are read as
/// a run of bytes.
pub(crate) fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(text.len() / 2);
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("'{token}' is not hex");
        }
        if digits.len() == 1 {
            bytes.push(
                u8::from_str_radix(digits, 16)
                    .with_context(|| format!("invalid hex byte '{token}'"))?,
            );
            continue;
        }
        if digits.len() % 2 != 0 {
            anyhow::bail!("'{token}' has an odd number of hex digits");
        }
        for i in (0..digits.len()).step_by(2) {
            let pair = &digits[i..i + 2];
            bytes.push(
                u8::from_str_radix(pair, 16)
                    .with_context(|| format!("invalid hex byte '{pair}' in '{token}'"))?,
            );
        }
    }
    Ok(bytes)
}

fn describe(event: &TouchEvent) -> String {
    match event {
        TouchEvent::Coordinate(c) => format!(
            "touch  slot {} {:?} x={} y={} major={} minor={} z={}",
            c.slot, c.action, c.x, c.y, c.major, c.minor, c.z
        ),
        TouchEvent::Status(s) => format!(
            "status kind {} id 0x{:02X} data {:02X?}",
            s.kind, s.id, s.data
        ),
        TouchEvent::Gesture(g) => format!(
            "gesture kind {} id 0x{:02X} data {:02X?}",
            g.kind, g.id, g.data
        ),
        TouchEvent::Empty => "release all".to_string(),
    }
}

/// Decode-frame command implementation.
pub(crate) fn cmd_decode_frame(hex: Option<&str>, file: Option<&Path>, json: bool) -> Result<()> {
    let raw = match (hex, file) {
        (_, Some(path)) => {
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        },
        (Some(text), None) => parse_hex_bytes(text)?,
        (None, None) => anyhow::bail!("no frame given"),
    };
    let frame = EventFrame::parse(&raw).context("Failed to decode event frame")?;

    if json {
        return print_json(serde_json::json!({
            "flags": format!("0x{:02X}", frame.flags),
            "gesture": frame.is_gesture(),
            "request": frame.has_request(),
            "event_num": frame.event_num,
            "events": serde_json::to_value(&frame.events)?,
        }));
    }

    println!(
        "flags 0x{:02X}, {} record(s){}{}",
        frame.flags,
        frame.event_num,
        if frame.is_gesture() { ", gesture" } else { "" },
        if frame.has_request() { ", request" } else { "" },
    );
    for event in &frame.events {
        println!("  {}", describe(event));
    }
    Ok(())
}

/// IcInfo command implementation.
pub(crate) fn cmd_ic_info(dump: &Path, json: bool) -> Result<()> {
    let raw = fs::read(dump).with_context(|| format!("Failed to read {}", dump.display()))?;
    let info = IcInfo::parse(&raw)
        .with_context(|| format!("Invalid IcInfo record in {}", dump.display()))?;

    if json {
        return print_json(serde_json::to_value(&info)?);
    }

    let misc = &info.misc;
    println!("{}", style("IcInfo").bold().underlined());
    println!("  Firmware:   {}", info.firmware_string());
    println!("  Config:     {}", info.config_string());
    println!(
        "  Panel:      {} drive x {} sense",
        info.parm.drv_num, info.parm.sen_num
    );
    println!("  cmd        0x{:08X}", misc.cmd_addr);
    println!(
        "  fw buffer  0x{:08X} ({} bytes)",
        misc.fw_buffer_addr, misc.fw_buffer_max_len
    );
    println!("  touch data 0x{:08X}", misc.touch_data_addr);
    println!("  frame data 0x{:08X}", misc.frame_data_addr);
    println!("  esd        0x{:08X}", misc.esd_addr);
    println!("  sponge     0x{:08X}", info.other.sponge_addr);
    println!("  self-test  0x{:08X}", info.other.production_test_addr);
    Ok(())
}
