use clap::Parser;

mod cli;
mod config;
mod decode;

use cli::{Cli, Command};
use decode::DecodeOptions;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("decoder_bus", log::LevelFilter::Info)
        .filter_module("av1_pipe", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = config::config();

    match cli.command {
        Command::Probe { input, json } => {
            let info = decoder_bus::probe(&input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print!("{}", info);
            }
        }
        Command::Decode {
            input,
            input_buffers,
            output_buffers,
            frame_delay,
            hook,
            decoder,
        } => {
            let mut options = DecodeOptions {
                engine: config.engine.clone(),
                inspect: config.inspect.clone(),
                hook: hook.unwrap_or(config.hook),
                decoder: decoder.or_else(|| config.decoder.clone()),
                max_obu_size: config.max_obu_size,
            };
            if let Some(n) = input_buffers {
                options.engine.num_input_buffers = n;
            }
            if let Some(n) = output_buffers {
                options.engine.num_output_buffers = n;
            }
            if let Some(n) = frame_delay {
                options.inspect.frame_delay = n;
                options.inspect.max_pending = options.inspect.max_pending.max(n + 1);
            }
            let summary = decode::run(&input, options).await?;
            println!(
                "frames={} key_frames={} skipped={}{}",
                summary.frames,
                summary.key_frames,
                summary.skipped,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
    Ok(())
}
