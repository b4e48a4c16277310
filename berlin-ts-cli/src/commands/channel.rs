//! Die channel to pin mapping and short resistance calculation.

use anyhow::Result;
use berlin_ts::{ChannelMap, DieChannel, Generation, ShortThresholds};
use clap::ValueEnum;
use console::style;

use super::print_json;

/// What the shorted channel is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum ShortKind {
    /// Another sense or drive channel.
    Channel,
    /// The analog supply rail.
    Avdd,
    /// Ground.
    Gnd,
}

impl ShortKind {
    /// Resistance in kΩ and the threshold it is judged against.
    pub(crate) fn evaluate(
        self,
        generation: Generation,
        thresholds: &ShortThresholds,
        v1: u16,
        v2: u16,
    ) -> (i32, i32) {
        match self {
            Self::Channel => (
                generation.short_to_channel_kohm(v1, v2),
                thresholds.channel_to_channel,
            ),
            Self::Avdd => (
                generation.short_to_avdd_kohm(v1, v2),
                thresholds.channel_to_avdd,
            ),
            Self::Gnd => (
                generation.short_to_gnd_kohm(v1),
                thresholds.channel_to_gnd,
            ),
        }
    }
}

fn channel_str(channel: DieChannel) -> String {
    match channel {
        DieChannel::Sense(n) => format!("sense {n}"),
        DieChannel::Drive(n) => format!("drive {n}"),
    }
}

/// Die2pin command implementation.
pub(crate) fn cmd_die2pin(map: &ChannelMap, indices: &[usize], json: bool) -> Result<()> {
    if json {
        let entries: Vec<serde_json::Value> = indices
            .iter()
            .map(|&die| {
                serde_json::json!({
                    "die": die,
                    "channel": channel_str(map.channel(die)),
                    "pin": map.die2pin(die).map(|p| p.to_string()),
                })
            })
            .collect();
        return print_json(serde_json::Value::Array(entries));
    }

    for &die in indices {
        let channel = channel_str(map.channel(die));
        match map.die2pin(die) {
            Some(pin) => println!("{die:4} ({channel}) -> {pin}"),
            None => println!("{die:4} ({channel}) -> {}", style("unbonded").yellow()),
        }
    }
    Ok(())
}

/// Short-calc command implementation.
pub(crate) fn cmd_short_calc(
    generation: Generation,
    thresholds: &ShortThresholds,
    kind: ShortKind,
    v1: u16,
    v2: u16,
    json: bool,
) -> Result<()> {
    let (kohm, threshold) = kind.evaluate(generation, thresholds, v1, v2);
    let pass = kohm >= threshold;

    if json {
        return print_json(serde_json::json!({
            "generation": generation.to_string(),
            "peer": format!("{kind:?}").to_lowercase(),
            "kohm": kohm,
            "threshold": threshold,
            "pass": pass,
        }));
    }

    let verdict = if pass {
        style("OK").green()
    } else {
        style("NG").red().bold()
    };
    println!("{kohm}kΩ (threshold {threshold}kΩ, {generation}) {verdict}");
    Ok(())
}
