use std::collections::HashMap;

use config::{Config, File};
use log::LevelFilter;
use nix::unistd::Pid;
use sysinfo::{PidExt, ProcessExt, System, SystemExt};

pub struct ToolConfig {
    pub log_level_filter: LevelFilter,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            log_level_filter: LevelFilter::Warn,
        }
    }
}

/// Reads the optional config file from the working directory. A
/// missing file or key falls back to the defaults.
pub fn read_config(name: &str) -> ToolConfig {
    let config = match Config::builder()
        .add_source(File::with_name(name).required(false))
        .build()
    {
        Ok(config) => config,
        Err(error) => {
            eprintln!("ignoring config file: {}", error);
            return ToolConfig::default();
        }
    };

    let hashmap: HashMap<String, String> = match config.try_deserialize() {
        Ok(hashmap) => hashmap,
        Err(_) => return ToolConfig::default(),
    };
    let log_level_filter = match hashmap.get("log_level_filter") {
        Some(filter) => {
            match filter.as_str() {
                "trace" => LevelFilter::Trace,
                "debug" => LevelFilter::Debug,
                "info" => LevelFilter::Info,
                "warn" => LevelFilter::Warn,
                "error" => LevelFilter::Error,
                _ => LevelFilter::Warn, // Defaults to Warn
            }
        }
        None => LevelFilter::Warn,
    };

    ToolConfig { log_level_filter }
}

/// Name of the process `pid`, for log output only.
pub fn process_name(pid: Pid) -> Option<String> {
    let system = System::new_all();
    let process = system.process(sysinfo::Pid::from_u32(pid.as_raw() as u32))?;
    Some(process.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getpid;

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = read_config("no-such-config-file");
        assert_eq!(config.log_level_filter, LevelFilter::Warn);
    }

    #[test]
    fn this_process_has_a_name() {
        let name = process_name(getpid()).expect("own process not found");
        assert!(!name.is_empty());
    }
}
