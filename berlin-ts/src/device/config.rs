//! Device configuration.

use std::time::Duration;

use crate::selftest::channel::ChannelMap;

/// Default ESD tick period.
pub const DEFAULT_ESD_PERIOD: Duration = Duration::from_secs(2);

/// Default settle after a reset pulse.
pub const DEFAULT_RESET_SETTLE: Duration = Duration::from_millis(100);

/// Default full self-test retries.
pub const DEFAULT_TEST_RETRIES: u8 = 2;

/// Short-test pass thresholds in kΩ. A computed resistance below its
/// threshold fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ShortThresholds {
    /// Between two channels.
    pub channel_to_channel: i32,
    /// Between a channel and AVDD.
    pub channel_to_avdd: i32,
    /// Between a channel and GND.
    pub channel_to_gnd: i32,
}

impl Default for ShortThresholds {
    fn default() -> Self {
        Self {
            channel_to_channel: 500,
            channel_to_avdd: 500,
            channel_to_gnd: 500,
        }
    }
}

/// Timing and policy for a bound device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    /// ESD tick period.
    pub esd_period: Duration,
    /// Settle after releasing reset.
    pub reset_settle: Duration,
    /// Settle after enabling the supply.
    pub power_on_settle: Duration,
    /// Settle after cutting the supply.
    pub power_off_settle: Duration,
    /// Full self-test retries (device reset between attempts).
    pub test_retries: u8,
    /// Short-test thresholds.
    pub short_thresholds: ShortThresholds,
    /// Bonding tables; identity for the generation when absent.
    pub channel_map: Option<ChannelMap>,
    /// Overrides every self-test poll interval.
    pub test_poll_interval: Option<Duration>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            esd_period: DEFAULT_ESD_PERIOD,
            reset_settle: DEFAULT_RESET_SETTLE,
            power_on_settle: Duration::from_millis(10),
            power_off_settle: Duration::from_millis(20),
            test_retries: DEFAULT_TEST_RETRIES,
            short_thresholds: ShortThresholds::default(),
            channel_map: None,
            test_poll_interval: None,
        }
    }
}

impl DeviceConfig {
    /// Set the ESD period.
    #[must_use]
    pub fn with_esd_period(mut self, period: Duration) -> Self {
        self.esd_period = period;
        self
    }

    /// Set the reset settle.
    #[must_use]
    pub fn with_reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle = settle;
        self
    }

    /// Set the supply settle delays.
    #[must_use]
    pub fn with_power_settle(mut self, on: Duration, off: Duration) -> Self {
        self.power_on_settle = on;
        self.power_off_settle = off;
        self
    }

    /// Set the full self-test retry count.
    #[must_use]
    pub fn with_test_retries(mut self, retries: u8) -> Self {
        self.test_retries = retries;
        self
    }

    /// Set the short thresholds.
    #[must_use]
    pub fn with_short_thresholds(mut self, thresholds: ShortThresholds) -> Self {
        self.short_thresholds = thresholds;
        self
    }

    /// Set the bonding tables.
    #[must_use]
    pub fn with_channel_map(mut self, map: ChannelMap) -> Self {
        self.channel_map = Some(map);
        self
    }

    /// Override self-test poll intervals.
    #[must_use]
    pub fn with_test_poll_interval(mut self, interval: Duration) -> Self {
        self.test_poll_interval = Some(interval);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.esd_period, Duration::from_secs(2));
        assert_eq!(config.reset_settle, Duration::from_millis(100));
        assert_eq!(config.test_retries, 2);
        assert!(config.channel_map.is_none());
    }

    #[test]
    fn test_builder() {
        let config = DeviceConfig::default()
            .with_esd_period(Duration::from_millis(500))
            .with_test_retries(0)
            .with_short_thresholds(ShortThresholds {
                channel_to_channel: 100,
                ..ShortThresholds::default()
            });
        assert_eq!(config.esd_period, Duration::from_millis(500));
        assert_eq!(config.test_retries, 0);
        assert_eq!(config.short_thresholds.channel_to_channel, 100);
        assert_eq!(config.short_thresholds.channel_to_gnd, 500);
    }
}
