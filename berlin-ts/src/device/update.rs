//! Firmware update.
//!
//! ```text
//! need_update? ──no──▶ Skipped
//!      │yes (or force)
//!      ▼
//! pause ESD, mask IRQ, take op lock
//!      │
//!      ▼
//! for each non-ISP subsystem: write_chunked(flash_addr, payload)
//!      │
//!      ▼
//! reset ─▶ re-read version + IcInfo ─▶ replay soft config
//! ```
//!
//! Flash writes only become live through the finish handshake of each
//! chunk, so an update that fails part way leaves the running firmware in
//! place. The guards restore IRQ and watchdog on every exit path.

use log::{info, warn};

use super::{Device, HardwareOps};
use crate::bus::{Bus, Platform};
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::protocol::flash::{FlashBuffer, write_chunked};
use crate::protocol::version::FirmwareVersion;
use crate::target::IcVariant;

/// What [`Device::update_firmware`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The running firmware is current.
    Skipped,
    /// Image written; the controller now reports `version`.
    Updated {
        /// Payload bytes written.
        bytes: usize,
        /// Version read back after the reset.
        version: FirmwareVersion,
    },
}

impl<V, B, P> Device<V, B, P>
where
    V: IcVariant,
    B: Bus + 'static,
    P: Platform + 'static,
{
    /// Flash `image` if it is newer than the running firmware or `force`
    /// is set.
    pub fn update_firmware(&self, image: &FirmwareImage, force: bool) -> Result<UpdateOutcome> {
        self.update_firmware_with_progress(image, force, |_, _, _| {})
    }

    /// As [`Self::update_firmware`], reporting `(subsystem, written, total)`
    /// after every chunk.
    pub fn update_firmware_with_progress<F>(
        &self,
        image: &FirmwareImage,
        force: bool,
        mut progress: F,
    ) -> Result<UpdateOutcome>
    where
        F: FnMut(&str, usize, usize),
    {
        let running = self.read_version()?;
        if !force && !image.need_update(&running) {
            info!("firmware {running} is current, skipping update");
            return Ok(UpdateOutcome::Skipped);
        }
        let buffer = self.with_info(FlashBuffer::from_ic_info)?;
        info!(
            "updating {} -> {} {:08X}",
            running,
            image.header.product_id(),
            image.header.patch_version()
        );

        let _esd = self.pause_esd();
        let _irq = self.mask_irq()?;
        let bytes = {
            let _op = self.lock_ops();
            let mut bytes = 0usize;
            for (index, subsystem) in image.flashable().enumerate() {
                let name = format!("subsys{index} type 0x{:02X}", subsystem.kind);
                let payload = image.payload(subsystem);
                self.with_session(|s| {
                    write_chunked(s, &buffer, subsystem.flash_addr, payload, |done, total| {
                        progress(&name, done, total);
                    })
                })
                .inspect_err(|e| warn!("{name} at 0x{:08X} failed: {e}", subsystem.flash_addr))?;
                bytes += payload.len();
            }
            bytes
        };

        self.reset(self.config().reset_settle)?;
        self.load_descriptors()?;
        self.replay()?;
        let version = self
            .version()
            .ok_or_else(|| Error::NotReady("version not read after update".into()))?;
        if version.patch_version() != image.header.patch_version() {
            warn!(
                "controller reports {:08X} after update, image is {:08X}",
                version.patch_version(),
                image.header.patch_version()
            );
        }
        info!("update complete, {bytes} bytes, running {version}");
        Ok(UpdateOutcome::Updated { bytes, version })
    }
}
