use std::path::PathBuf;

use crate::collect::CollectArgs;
use crate::config::ToolConfig;

/// Messages understood by the on-device dumper.
const MEMORY_REPORT_MSG: &str = "memory report";
const MINIMIZE_MEMORY_REPORT_MSG: &str = "minimize memory report";

#[derive(Debug)]
pub struct Config {
    pub output_directory: Option<PathBuf>,
    pub fifo_msg: &'static str,
    pub create_archive: bool,
    pub leave_on_device: bool,
    pub open_in_viewer: bool,
    pub keep_individual_reports: bool,
    pub no_dmd: bool,
    pub compress_dmd_logs: bool,
    pub no_gpu_logs: bool,

    pub adb_binary: Option<String>,
    pub serial: Option<String>,
    pub fix_stacks: Option<PathBuf>,
}

impl Config {
    /// Distill the CLI arguments; for the external tool locations, CLI
    /// arguments take precedence over the persistent configuration.
    pub fn new(args: CollectArgs, tool_config: &ToolConfig) -> Self {
        // A ~ may make its way here without being expanded by the shell
        let output_directory = args
            .output_directory
            .as_ref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref()));

        Self {
            output_directory,
            fifo_msg: if args.minimize_memory_usage {
                MINIMIZE_MEMORY_REPORT_MSG
            } else {
                MEMORY_REPORT_MSG
            },
            create_archive: args.create_archive,
            leave_on_device: args.leave_on_device,
            open_in_viewer: args.open_in_viewer,
            keep_individual_reports: args.keep_individual_reports,
            no_dmd: args.no_dmd,
            compress_dmd_logs: args.compress_dmd_logs,
            no_gpu_logs: args.no_gpu_logs,
            adb_binary: args.adb.or_else(|| tool_config.device.adb_binary.clone()),
            serial: args.serial.or_else(|| tool_config.device.serial.clone()),
            fix_stacks: args.fix_stacks.or_else(|| tool_config.dmd.fix_stacks.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_take_precedence_over_tool_config() {
        let mut args = CollectArgs::test();
        args.adb = Some("/cli/adb".to_string());
        let mut tool_config = ToolConfig::default();
        tool_config.device.adb_binary = Some("/config/adb".to_string());
        tool_config.device.serial = Some("emulator-5554".to_string());

        let config = Config::new(args, &tool_config);

        assert_eq!(config.adb_binary.as_deref(), Some("/cli/adb"));
        // Config values fill in what the CLI left unset
        assert_eq!(config.serial.as_deref(), Some("emulator-5554"));
    }

    #[test]
    fn test_minimize_selects_the_minimizing_dump_message() {
        let mut args = CollectArgs::test();
        args.minimize_memory_usage = true;

        let config = Config::new(args, &ToolConfig::default());

        assert_eq!(config.fifo_msg, "minimize memory report");
    }

    #[test]
    fn test_defaults() {
        let config = Config::new(CollectArgs::test(), &ToolConfig::default());

        assert_eq!(config.fifo_msg, "memory report");
        assert!(config.compress_dmd_logs);
        assert!(config.open_in_viewer);
        assert!(!config.keep_individual_reports);
        assert!(config.output_directory.is_none());
    }
}
