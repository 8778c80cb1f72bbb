// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::prelude::*;

/// Runtime configuration. The scripting layer owns the richer config
/// surface; this is only what the core itself consumes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Xcursor theme name. Empty string means the environment default.
    pub cursor_theme: String,
    pub cursor_size: u32,
    pub cursor_icon: String,

    /// Relative-pointer sensitivity multiplier.
    pub sensitivity: f64,

    /// Root background colour, RGBA.
    pub background_color: [u8; 4],

    /// Keyboard repeat overrides. `None` forwards the host's values.
    pub repeat_rate: Option<i32>,
    pub repeat_delay: Option<i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cursor_theme: String::new(),
            cursor_size: 16,
            cursor_icon: "left_ptr".to_string(),
            sensitivity: 1.0,
            background_color: [0, 0, 0, 255],
            repeat_rate: None,
            repeat_delay: None,
        }
    }
}

fn fallback_config_parent_dir() -> Result<PathBuf> {
    Ok(Path::join(
        &home::home_dir().ok_or(anyhow!("unable to determine home dir"))?,
        ".config",
    ))
}

pub fn default_config_file_dir() -> PathBuf {
    Path::join(
        &env::var("XDG_CONFIG_HOME")
            .log(loc!())
            .ok()
            .map(Into::into)
            .or(fallback_config_parent_dir().log(loc!()).ok())
            .unwrap_or_else(|| "/etc".into()),
        "nestwall",
    )
}

pub fn default_config_file() -> PathBuf {
    Path::join(&default_config_file_dir(), "nestwall.ron")
}

impl Config {
    /// Reads the config file, falling back to defaults when it does not
    /// exist. A file that exists but fails to parse is an error: silently
    /// running with defaults after a typo is worse than not starting.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_config_file);
        if !path.exists() {
            debug!("no config file at {path:?}, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).location(loc!())?;
        let config = ron::from_str(&raw)
            .with_context(loc!(), || format!("failed to parse config at {path:?}"))?;
        info!("loaded config from {path:?}: {config:?}");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_round_trip_through_ron() {
        let config = Config::default();
        let raw = ron::to_string(&config).unwrap();
        let parsed: Config = ron::from_str(&raw).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let parsed: Config = ron::from_str("(sensitivity: 0.5)").unwrap();
        assert_eq!(parsed.sensitivity, 0.5);
        assert_eq!(parsed.cursor_icon, "left_ptr");
        assert_eq!(parsed.repeat_rate, None);
    }
}
