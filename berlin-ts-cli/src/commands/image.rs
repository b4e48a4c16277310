//! Firmware image inspection and update decision.

use anyhow::{Context, Result};
use berlin_ts::image::firmware::{SUBSYS_TYPE_CONFIG, SUBSYS_TYPE_ISP};
use berlin_ts::{FirmwareImage, FirmwareVersion};
use console::style;
use std::fs;
use std::path::{Path, PathBuf};

use super::print_json;

/// Where the running firmware version comes from.
pub(crate) enum RunningVersion {
    /// Raw version record dumped from the device.
    Record(PathBuf),
    /// Product id and patch version typed on the command line.
    Fields {
        /// Patch product id.
        pid: String,
        /// Patch version, most significant byte first.
        vid: u32,
    },
}

impl RunningVersion {
    fn resolve(&self) -> Result<FirmwareVersion> {
        match self {
            Self::Record(path) => {
                let raw = fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                FirmwareVersion::parse(&raw)
                    .with_context(|| format!("Invalid version record in {}", path.display()))
            },
            Self::Fields { pid, vid } => version_from_fields(pid, *vid),
        }
    }
}

fn version_from_fields(pid: &str, vid: u32) -> Result<FirmwareVersion> {
    let mut version = FirmwareVersion::default();
    if pid.len() > version.patch_pid.len() {
        anyhow::bail!(
            "product id '{pid}' is longer than {} bytes",
            version.patch_pid.len()
        );
    }
    version.patch_pid[..pid.len()].copy_from_slice(pid.as_bytes());
    version.patch_vid = vid.to_be_bytes();
    Ok(version)
}

fn load_image(path: &Path) -> Result<FirmwareImage> {
    FirmwareImage::from_file(path)
        .with_context(|| format!("Failed to load firmware {}", path.display()))
}

/// Plain name of a subsystem type.
pub(crate) fn subsystem_kind_str(kind: u8) -> String {
    match kind {
        SUBSYS_TYPE_ISP => "isp".to_string(),
        SUBSYS_TYPE_CONFIG => "config".to_string(),
        other => format!("0x{other:02X}"),
    }
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let image = load_image(firmware)?;
    let header = &image.header;

    if json {
        let subsystems: Vec<serde_json::Value> = image
            .subsystems
            .iter()
            .map(|s| {
                serde_json::json!({
                    "type": subsystem_kind_str(s.kind),
                    "size": s.size,
                    "flash_addr": format!("0x{:08X}", s.flash_addr),
                    "offset": s.offset,
                    "flashable": !s.is_isp(),
                })
            })
            .collect();
        return print_json(serde_json::json!({
            "product_id": header.product_id(),
            "patch_version": format!("{:08X}", header.patch_version()),
            "size": header.size,
            "checksum": format!("0x{:08X}", header.checksum),
            "chip_type": header.chip_type,
            "protocol_ver": header.protocol_ver,
            "bus_type": header.bus_type,
            "flash_protect": header.flash_protect,
            "subsystems": subsystems,
        }));
    }

    println!("{}", style("Firmware image").bold().underlined());
    println!("  Product id:    {}", header.product_id());
    println!("  Patch version: {:08X}", header.patch_version());
    println!("  Size:          {} bytes", header.size);
    println!("  Checksum:      0x{:08X} (valid)", header.checksum);
    println!(
        "  Chip type 0x{:02X}, protocol {}, bus {}, flash protect {}",
        header.chip_type, header.protocol_ver, header.bus_type, header.flash_protect
    );
    println!();
    println!("{}", style("Subsystems").bold().underlined());
    for (i, s) in image.subsystems.iter().enumerate() {
        let marker = if s.is_isp() {
            style("skip").dim()
        } else {
            style("flash").green()
        };
        println!(
            "  [{i:2}] {:<7} {:>7} bytes -> 0x{:08X}  {marker}",
            subsystem_kind_str(s.kind),
            s.size,
            s.flash_addr
        );
    }
    Ok(())
}

/// Check-update command implementation.
pub(crate) fn cmd_check_update(
    firmware: &Path,
    running: &RunningVersion,
    force: bool,
    json: bool,
) -> Result<()> {
    let image = load_image(firmware)?;
    let running = running.resolve()?;
    let newer = image.need_update(&running);
    let update = force || newer;
    let bytes: usize = image
        .flashable()
        .map(|s| s.size as usize)
        .sum();

    if json {
        return print_json(serde_json::json!({
            "update": update,
            "forced": force && !newer,
            "running": {
                "product_id": running.product_id(),
                "patch_version": format!("{:08X}", running.patch_version()),
            },
            "image": {
                "product_id": image.header.product_id(),
                "patch_version": format!("{:08X}", image.header.patch_version()),
            },
            "flash_bytes": if update { bytes } else { 0 },
        }));
    }

    println!(
        "running {} {:08X}, image {} {:08X}",
        running.product_id(),
        running.patch_version(),
        image.header.product_id(),
        image.header.patch_version()
    );
    if update {
        let why = if newer { "" } else { " (forced)" };
        println!(
            "{} {bytes} bytes to flash{why}",
            style("update required:").yellow().bold()
        );
    } else {
        println!("{}", style("firmware is current").green());
    }
    Ok(())
}
