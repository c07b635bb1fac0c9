// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memfs FUSE host
//!
//! Mounts an in-memory memfs volume through libfuse. The volume lives as
//! long as the process; unmounting discards it.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod adapter;

#[cfg(all(feature = "fuse", target_os = "linux"))]
use adapter::MemFsFuse;
use anyhow::{Context, Result};
use clap::Parser;
use memfs_core::FsConfig;
use memfs_logging::CliLoggingArgs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const COMPONENT: &str = "memfs-fuse-host";

#[derive(Parser)]
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
#[command(name = "memfs-fuse-host", about = "Mount an in-memory filesystem through FUSE")]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the filesystem
    #[arg(long)]
    allow_root: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    /// Do not offer readdir-plus to the kernel
    #[arg(long)]
    no_readdir_plus: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn load_config(config_path: Option<&Path>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: FsConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FsConfig::default()),
    }
}

fn apply_overrides(config: &mut FsConfig, args: &Args) {
    if args.no_readdir_plus {
        config.cache.enable_readdir_plus = false;
    }
}

#[cfg(all(feature = "fuse", target_os = "linux"))]
fn mount_options(args: &Args) -> Vec<fuser::MountOption> {
    let mut options = vec![
        fuser::MountOption::FSName("memfs".to_string()),
        fuser::MountOption::Subtype("memfs".to_string()),
        fuser::MountOption::DefaultPermissions,
    ];
    if args.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    if args.allow_root {
        options.push(fuser::MountOption::AllowRoot);
    }
    if args.auto_unmount {
        options.push(fuser::MountOption::AutoUnmount);
    }
    options
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.clone().init(COMPONENT)?;

    info!(mount_point = %args.mount_point.display(), "starting memfs FUSE host");

    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;
    info!(?config, "configuration loaded");

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        let filesystem = MemFsFuse::new(config).context("creating filesystem")?;
        let options = mount_options(&args);
        info!("mounting filesystem; blocking until unmount");
        fuser::mount2(filesystem, &args.mount_point, &options)
            .with_context(|| format!("mounting at {}", args.mount_point.display()))?;
        info!("filesystem unmounted");
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        let fs = memfs_core::FsCore::new(config).context("creating filesystem")?;
        tracing::warn!("FUSE support not compiled in; build with --features fuse on Linux");
        info!(nodes = fs.stats().nodes, "engine initialized without mounting");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_loading_default() {
        let config = load_config(None).unwrap();
        assert_eq!(config, FsConfig::default());
        assert!(config.cache.enable_readdir_plus);
    }

    #[test]
    fn test_config_loading_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_json = r#"{
            "device_id": 7,
            "root_mode": 493,
            "security": { "default_uid": 1000 },
            "cache": {
                "attr_ttl_ms": 500,
                "enable_readdir_plus": false
            },
            "faults": {
                "enabled": true,
                "rules": [{ "op": "write", "start_after": 2 }]
            }
        }"#;
        temp_file.write_all(config_json.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(Some(temp_file.path())).unwrap();
        assert_eq!(config.device_id, 7);
        assert_eq!(config.root_mode, 0o755);
        assert_eq!(config.security.default_uid, 1000);
        assert_eq!(config.security.default_gid, 0);
        assert_eq!(config.cache.attr_ttl_ms, 500);
        assert_eq!(config.cache.entry_ttl_ms, 1000);
        assert!(!config.cache.enable_readdir_plus);
        assert!(config.faults.is_active());
        assert_eq!(config.faults.rules[0].start_after, 2);
    }

    #[test]
    fn test_config_loading_errors() {
        assert!(load_config(Some(Path::new("/nonexistent/memfs.json"))).is_err());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ not json").unwrap();
        temp_file.flush().unwrap();
        assert!(load_config(Some(temp_file.path())).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "memfs-fuse-host",
            "/mnt/memfs",
            "--no-readdir-plus",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.mount_point, PathBuf::from("/mnt/memfs"));
        assert!(!args.logging.is_empty());

        let mut config = FsConfig::default();
        apply_overrides(&mut config, &args);
        assert!(!config.cache.enable_readdir_plus);
    }

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    #[test]
    fn test_mount_options() {
        let args =
            Args::try_parse_from(["memfs-fuse-host", "/mnt", "--allow-other", "--auto-unmount"])
                .unwrap();
        let options = mount_options(&args);
        assert!(options.contains(&fuser::MountOption::DefaultPermissions));
        assert!(options.contains(&fuser::MountOption::AllowOther));
        assert!(options.contains(&fuser::MountOption::AutoUnmount));
        assert!(!options.contains(&fuser::MountOption::AllowRoot));
    }

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    #[test]
    fn test_adapter_creation() {
        assert!(MemFsFuse::new(FsConfig::default()).is_ok());
    }
}
