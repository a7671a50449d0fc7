use crate::{
    collect,
    config::ToolConfig,
    local_logger::{ACCENT_U8_COLOR_CODE, init_local_logger},
    merge,
    prelude::*,
};
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(
            styling::Ansi256Color(ACCENT_U8_COLOR_CODE).on_default() | styling::Effects::BOLD,
        )
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Pull memory diagnostics from a remote device and merge them into one report",
    styles = create_styles()
)]
pub struct Cli {
    /// The configuration name to use
    /// If provided, the configuration will be loaded from ~/.config/memreport/{config-name}.yaml
    /// Otherwise, loads from ~/.config/memreport/config.yaml
    #[arg(long, env = "MEMREPORT_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull memory reports and allocation dumps from the device, merge the
    /// reports and post-process the dumps
    Collect(Box<collect::CollectArgs>),
    /// Merge already-pulled memory report fragments into a single file
    Merge(merge::MergeArgs),
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let tool_config = ToolConfig::load(cli.config_name.as_deref())?;

    match cli.command {
        // Collect is responsible for its own logger initialization
        Commands::Collect(args) => collect::run(*args, &tool_config).await?,
        Commands::Merge(args) => {
            init_local_logger()?;
            merge::run(args).await?
        }
    }
    Ok(())
}
