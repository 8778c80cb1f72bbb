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

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "nestwall", about = "Nested Wayland compositor for a single game window")]
pub struct Args {
    /// Path to the config file. Defaults to
    /// $XDG_CONFIG_HOME/nestwall/nestwall.ron.
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    pub stderr_log_level: Level,

    /// Also log to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value = "trace")]
    pub file_log_level: Level,

    /// Do not spawn Xwayland or the X11 window manager.
    #[arg(long)]
    pub no_xwayland: bool,

    /// Path to the Xwayland binary.
    #[arg(long, default_value = "Xwayland")]
    pub xwayland_path: String,
}
