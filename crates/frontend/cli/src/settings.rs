use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use x86emu_linux::MachineConfig;

/// Default config file, looked up next to the executable
pub fn config_path() -> PathBuf {
    let mut path = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    path.push("x86emu.json");
    path
}

/// Load the machine configuration
///
/// An explicitly given file must exist and parse. The default file is
/// optional and a broken one only produces a warning.
pub fn load(explicit: Option<&Path>) -> Result<MachineConfig> {
    if let Some(path) = explicit {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        return serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()));
    }

    let path = config_path();
    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!(
                    "Failed to parse {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Ok(MachineConfig::default())
            }
        },
        Err(_) => Ok(MachineConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use x86emu_core::cpu_i386::ZeroFlagMode;

    #[test]
    fn test_explicit_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"memory_size": 65536, "cpu": {{"zero_flag": "operand_equality"}}}}"#
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.memory_size, 0x10000);
        assert_eq!(config.stack_pointer, MachineConfig::default().stack_pointer);
        assert_eq!(config.cpu.zero_flag, ZeroFlagMode::OperandEquality);
    }

    #[test]
    fn test_explicit_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("missing.json"))).is_err());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        let err = load(Some(&bad)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }
}
