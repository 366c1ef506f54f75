pub mod build;
pub mod cache;
pub mod completions;
pub mod status;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stratus_cloud::{select_cloud, CloudFacade};
use stratus_schema::{BuildConfig, LocationKind};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_CACHE_ERROR: u8 = 3;

/// Map an error message to the process exit code by its prefix.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("config error:") {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("cache error:") {
        EXIT_CACHE_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LocationArg {
    Local,
    Volume,
    Image,
}

impl From<LocationArg> for LocationKind {
    fn from(arg: LocationArg) -> Self {
        match arg {
            LocationArg::Local => LocationKind::Local,
            LocationArg::Volume => LocationKind::Volume,
            LocationArg::Image => LocationKind::Image,
        }
    }
}

pub fn load_config(path: &std::path::Path) -> Result<BuildConfig, String> {
    stratus_schema::parse_config_file(path).map_err(|e| format!("config error: {e}"))
}

/// Connect to the backend named in the build file's cloud section.
pub fn open_cloud(config: &BuildConfig) -> Result<Arc<dyn CloudFacade>, String> {
    select_cloud(&config.cloud.backend, &config.cloud)
        .map(Arc::from)
        .map_err(|e| format!("config error: {e}"))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "COMPLETE" | "active" => Style::new().green().apply_to(status).to_string(),
        "RUNNING" | "ACTIVE" => Style::new().cyan().bold().apply_to(status).to_string(),
        "SHUTOFF" => Style::new().yellow().apply_to(status).to_string(),
        "FAILED" | "ERROR" | "error" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_prefix() {
        assert_eq!(exit_code_for("config error: missing install.script"), EXIT_CONFIG_ERROR);
        assert_eq!(exit_code_for("cache error: lock failed"), EXIT_CACHE_ERROR);
        assert_eq!(exit_code_for("cloud error: HTTP 500"), EXIT_FAILURE);
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
        assert_ne!(EXIT_CONFIG_ERROR, EXIT_CACHE_ERROR);
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(
                expand_tilde("~/.cache/stratus"),
                PathBuf::from(home).join(".cache/stratus")
            );
        }
        assert_eq!(expand_tilde("/var/cache"), PathBuf::from("/var/cache"));
    }

    #[test]
    fn location_arg_converts() {
        assert_eq!(LocationKind::from(LocationArg::Volume), LocationKind::Volume);
    }

    #[test]
    fn mock_backend_opens() {
        let config = stratus_schema::parse_config_str(
            "config_version = 1\n[os]\nshort_id = \"fedora20\"\n[install]\ntype = \"tree\"\n[image]\nname = \"f\"\n[cloud]\nbackend = \"mock\"\n",
        )
        .unwrap();
        assert_eq!(open_cloud(&config).unwrap().name(), "mock");
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let config = stratus_schema::parse_config_str(
            "config_version = 1\n[os]\nshort_id = \"fedora20\"\n[install]\ntype = \"tree\"\n[image]\nname = \"f\"\n[cloud]\nbackend = \"ec2\"\n",
        )
        .unwrap();
        let msg = open_cloud(&config).err().unwrap();
        assert_eq!(exit_code_for(&msg), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn colorize_keeps_text() {
        assert!(colorize_status("COMPLETE").contains("COMPLETE"));
        assert_eq!(colorize_status("BUILD"), "BUILD");
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
