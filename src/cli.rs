use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "rcmboot", version, about = "RCM boot payload loader for Tegra X1 devices")]
pub struct Cli {
    /// Payload storage directory (defaults to the per-user data directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Synced mirror directory; takes precedence over the local root while present
    #[arg(long, global = true)]
    pub mirror_root: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List payloads in their boot-menu order
    List {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy a payload file into the store
    Import {
        file: PathBuf,

        /// Store the payload under this name instead of the source file name
        #[arg(long)]
        name: Option<String>,

        /// Insert at this position instead of appending
        #[arg(long)]
        at: Option<usize>,

        /// Move the source file instead of copying it
        #[arg(long = "move")]
        move_file: bool,
    },

    /// Rename a payload; its position and selection are kept
    Rename { name: String, new_name: String },

    /// Move a payload file to the trash and drop it from the list
    Delete { name: String },

    /// Move a payload to a new position (zero-based)
    Reorder { from: usize, to: usize },

    /// Select the payload to boot, or clear the selection with --none
    Select {
        name: Option<String>,

        #[arg(long, conflicts_with = "name")]
        none: bool,
    },

    /// Control whether a connecting device is booted without user action
    Autoboot {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Boot the selected payload into a connected device once
    Boot {
        /// Bootstrap image sent ahead of the payload
        #[arg(long)]
        intermezzo: Option<PathBuf>,

        /// Boot this payload instead of the stored selection
        #[arg(long)]
        payload: Option<String>,

        /// Give up when no device appears within this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Override the recovery-mode vendor ID (hex with 0x prefix, or decimal)
        #[arg(long, value_parser = parse_u16)]
        vendor_id: Option<u16>,

        /// Override the recovery-mode product ID
        #[arg(long, value_parser = parse_u16)]
        product_id: Option<u16>,
    },

    /// Watch for devices and payload changes until interrupted
    Watch {
        #[arg(long)]
        intermezzo: Option<PathBuf>,

        #[arg(long, value_parser = parse_u16)]
        vendor_id: Option<u16>,

        #[arg(long, value_parser = parse_u16)]
        product_id: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

fn parse_u16(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| format!("\"{value}\" is not a 16-bit ID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_in_hex_and_decimal() {
        assert_eq!(parse_u16("0x0955"), Ok(0x0955));
        assert_eq!(parse_u16("2389"), Ok(2389));
        assert!(parse_u16("banana").is_err());
        assert!(parse_u16("0x10000").is_err());
    }
}
