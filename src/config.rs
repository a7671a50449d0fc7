use std::{env, fs, path::PathBuf};

use crate::prelude::*;
use nestify::nest;
use serde::{Deserialize, Serialize};

nest! {
    #[derive(Debug, Default, Deserialize, Serialize)]*
    #[serde(rename_all = "kebab-case", default)]*
    /// Persistent configuration for the memreport CLI.
    ///
    /// This struct represents the user's persistent configuration stored in
    /// the filesystem, typically at `~/.config/memreport/config.yaml`. It
    /// holds the locations of the external tools the collector drives, so
    /// they don't have to be repeated on every invocation.
    ///
    /// The configuration follows the XDG Base Directory Specification.
    pub struct ToolConfig {
        pub device: pub struct DeviceConfig {
            /// Path of the adb binary used to reach the device
            pub adb_binary: Option<String>,
            /// Serial of the device to target when several are attached
            pub serial: Option<String>,
        },
        pub dmd: pub struct DmdToolConfig {
            /// Stack fixer binary piped over each DMD dump
            pub fix_stacks: Option<PathBuf>,
        },
    }
}

/// Get the path to the configuration file, following the XDG Base Directory
/// Specification at https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
///
/// If config_name is None, returns ~/.config/memreport/config.yaml (default)
/// If config_name is Some, returns ~/.config/memreport/{config_name}.yaml
fn get_configuration_file_path(config_name: Option<&str>) -> PathBuf {
    let config_dir = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = env::var("HOME").expect("HOME env variable not set");
            PathBuf::from(home).join(".config")
        });
    let config_dir = config_dir.join("memreport");

    match config_name {
        Some(name) => config_dir.join(format!("{name}.yaml")),
        None => config_dir.join("config.yaml"),
    }
}

impl ToolConfig {
    /// Load the configuration. If it does not exist, return a default
    /// configuration.
    pub fn load(config_name: Option<&str>) -> Result<Self> {
        let config_path = get_configuration_file_path(config_name);

        match fs::read(&config_path) {
            Ok(config_str) => {
                let config: ToolConfig = serde_yaml::from_slice(&config_str).context(format!(
                    "Failed to parse memreport config at {}",
                    config_path.display()
                ))?;
                debug!("Config loaded from {}", config_path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                Ok(ToolConfig::default())
            }
            Err(e) => bail!("Failed to load config: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: ToolConfig = serde_yaml::from_str(
            r#"
device:
  adb-binary: /opt/platform-tools/adb
  serial: emulator-5554
dmd:
  fix-stacks: /opt/fix-stacks/fix-stacks
"#,
        )
        .unwrap();

        assert_eq!(
            config.device.adb_binary.as_deref(),
            Some("/opt/platform-tools/adb")
        );
        assert_eq!(config.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(
            config.dmd.fix_stacks,
            Some(PathBuf::from("/opt/fix-stacks/fix-stacks"))
        );
    }

    #[test]
    fn test_parse_partial_config_falls_back_to_defaults() {
        let config: ToolConfig = serde_yaml::from_str("device:\n  serial: emulator-5554\n").unwrap();

        assert!(config.device.adb_binary.is_none());
        assert_eq!(config.device.serial.as_deref(), Some("emulator-5554"));
        assert!(config.dmd.fix_stacks.is_none());
    }
}
