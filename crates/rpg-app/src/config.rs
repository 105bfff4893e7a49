// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rpg_render::{PresentPolicy, RenderOptions};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: 800,
            height: 600,
            title: "Action RPG".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentCfg {
    #[default]
    LowLatency,
    Fifo,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present: PresentCfg,
    pub validation: bool,
    pub frames_in_flight: usize,
    pub gpu_timeout_ms: u64,
    pub shader_dir: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let opts = RenderOptions::default();
        RenderCfg {
            clear_color: opts.clear_color,
            present: PresentCfg::LowLatency,
            validation: opts.validation,
            frames_in_flight: opts.frames_in_flight,
            gpu_timeout_ms: opts.gpu_timeout.as_millis() as u64,
            shader_dir: opts.shader_dir,
        }
    }
}

impl RenderCfg {
    pub fn to_options(&self) -> RenderOptions {
        RenderOptions {
            clear_color: self.clear_color,
            present: match self.present {
                PresentCfg::LowLatency => PresentPolicy::LowLatency,
                PresentCfg::Fifo => PresentPolicy::Fifo,
            },
            validation: self.validation,
            frames_in_flight: self.frames_in_flight,
            gpu_timeout: Duration::from_millis(self.gpu_timeout_ms.max(1)),
            shader_dir: self.shader_dir.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

/// Missing file: defaults. Unreadable or malformed file: warning, then defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppCfg::default(),
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_cfg(body: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), body).unwrap();
        file
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_cfg(&dir.path().join("absent.toml"));
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_cfg(
            r#"
            [render]
            present = "fifo"
            frames_in_flight = 3
            "#,
        );
        let cfg = load_cfg(file.path());
        assert_eq!(cfg.render.present, PresentCfg::Fifo);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.window, WindowCfg::default());
        assert_eq!(cfg.render.shader_dir, PathBuf::from("spirv"));
    }

    #[test]
    fn malformed_file_falls_back() {
        let file = write_cfg("[render]\nframes_in_flight = \"lots\"\n");
        assert_eq!(load_cfg(file.path()), AppCfg::default());
    }

    #[test]
    fn options_projection() {
        let file = write_cfg(
            r#"
            [window]
            title = "Dungeon"

            [render]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            validation = false
            frames_in_flight = 9
            gpu_timeout_ms = 250
            shader_dir = "assets/spirv"
            "#,
        );
        let cfg = load_cfg(file.path());
        assert_eq!(cfg.window.title, "Dungeon");

        let opts = cfg.render.to_options();
        assert_eq!(opts.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert!(!opts.validation);
        assert_eq!(opts.present, PresentPolicy::LowLatency);
        assert_eq!(opts.frames_in_flight(), rpg_render::MAX_FRAMES_IN_FLIGHT);
        assert_eq!(opts.gpu_timeout, Duration::from_millis(250));
        assert_eq!(opts.shader_dir, PathBuf::from("assets/spirv"));
    }
}
