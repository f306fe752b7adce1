use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// Parse temporal units and report frame metadata.
    #[default]
    Inspect,
    /// Decode pixels with FFmpeg (needs the `ffmpeg` feature).
    Ffmpeg,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Summarise an OBU stream.
    Probe {
        input: PathBuf,
        /// Print JSON instead of key=value sections.
        #[arg(long)]
        json: bool,
    },
    /// Run an OBU stream through the decode engine.
    Decode {
        input: PathBuf,
        #[arg(long)]
        input_buffers: Option<usize>,
        #[arg(long)]
        output_buffers: Option<usize>,
        /// Units the inspect hook holds back before releasing pictures.
        #[arg(long)]
        frame_delay: Option<usize>,
        #[arg(long, value_enum)]
        hook: Option<HookKind>,
        /// Decoder name for the ffmpeg hook, e.g. libdav1d.
        #[arg(long)]
        decoder: Option<String>,
    },
}

#[derive(Parser, Debug)]
#[command(name = "av1-pipe", version, about = "AV1 OBU probe and decode pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decode_flags() {
        let cli = Cli::try_parse_from([
            "av1-pipe",
            "decode",
            "in.obu",
            "--input-buffers",
            "6",
            "--frame-delay",
            "2",
            "--hook",
            "inspect",
        ])
        .unwrap();
        match cli.command {
            Command::Decode {
                input,
                input_buffers,
                output_buffers,
                frame_delay,
                hook,
                decoder,
            } => {
                assert_eq!(input, PathBuf::from("in.obu"));
                assert_eq!(input_buffers, Some(6));
                assert_eq!(output_buffers, None);
                assert_eq!(frame_delay, Some(2));
                assert_eq!(hook, Some(HookKind::Inspect));
                assert!(decoder.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_probe() {
        let cli = Cli::try_parse_from(["av1-pipe", "probe", "a.obu", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Probe { json: true, .. }));
        assert!(Cli::try_parse_from(["av1-pipe", "decode", "a.obu", "--hook", "vaapi"]).is_err());
    }
}
