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

use std::backtrace::Backtrace;
use std::env;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::ErrorKind;
use std::io::Write;
use std::os::fd::AsFd;
use std::os::unix::net::UnixListener;
use std::panic;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;
use std::time::Instant;

use nix::fcntl::FcntlArg;
use nix::fcntl::fcntl;
use nix::libc;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::prelude::*;

pub fn configure_tracing<P: Into<PathBuf>>(
    stderr_log_level: Level,
    path: Option<P>,
    file_log_level: Level,
) -> Result<()> {
    let mut layers = Vec::new();

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr.with_max_level(stderr_log_level))
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    if let Some(path) = path {
        let log_file = File::create(path.into()).location(loc!())?;
        let log_file_writer = Mutex::new(log_file).with_max_level(file_log_level);
        let layer = layer.map_writer(|w| w.and(log_file_writer));
        layers.push(layer.boxed());
    } else {
        layers.push(layer.boxed());
    };

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

pub fn exit_on_panic() {
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = Backtrace::capture();
        error!("panic!:\n{panic_info}\n{backtrace}");
        orig_hook(panic_info);
        process::exit(1);
    }));
}

/// Monotonic millisecond clock with the additional guarantee that every
/// reading is strictly greater than the previous one. GLFW drops key events
/// whose timestamps do not ascend, so synthetic input leans on this.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
    last: u32,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last: 0,
        }
    }

    /// Current time in milliseconds. Not strictly increasing; use for
    /// forwarded (non-synthetic) events.
    pub fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    /// Strictly-increasing time in milliseconds for synthetic events.
    pub fn next_ms(&mut self) -> u32 {
        let mut now = self.now_ms();
        if now <= self.last {
            now = self.last.wrapping_add(1);
        }
        self.last = now;
        now
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

pub const DISPLAY_LOCK_PATH: &str = "/tmp/nestwall-display";

/// Takes the single-instance lock and returns the (held-open) lock file.
/// A second instance fails here with EAGAIN/EACCES from F_SETLK.
pub fn acquire_display_lock() -> Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(DISPLAY_LOCK_PATH)
        .location(loc!())?;

    let lock = libc::flock {
        l_type: libc::F_WRLCK as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    fcntl(file.as_fd(), FcntlArg::F_SETLK(&lock))
        .context(loc!(), "another instance already owns the display lock")?;

    file.set_len(0).location(loc!())?;
    Ok(file)
}

pub fn write_display_lock(
    file: &mut File,
    wayland_display: &str,
    x11_display: Option<u32>,
) -> Result<()> {
    match x11_display {
        Some(display) => writeln!(file, "{wayland_display};:{display}").location(loc!())?,
        None => writeln!(file, "{wayland_display};").location(loc!())?,
    }
    file.flush().location(loc!())?;
    Ok(())
}

/// Binds the inner display socket under an auto-chosen name
/// (`nestwall-0` through `nestwall-31`) in `$XDG_RUNTIME_DIR`.
pub fn bind_inner_socket() -> Result<(UnixListener, String)> {
    let runtime_dir: PathBuf = env::var_os("XDG_RUNTIME_DIR")
        .ok_or_else(|| anyhow!("XDG_RUNTIME_DIR is not set"))?
        .into();

    for n in 0..32 {
        let name = format!("nestwall-{n}");
        let path = runtime_dir.join(&name);

        match UnixListener::bind(&path) {
            Ok(listener) => {
                listener.set_nonblocking(true).location(loc!())?;
                info!("listening on inner socket {path:?}");
                return Ok((listener, name));
            },
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                // Another (live or crashed) instance; try the next name.
                continue;
            },
            Err(e) => return Err(e).location(loc!()),
        }
    }

    bail!("no free inner socket name in {runtime_dir:?}")
}

#[cfg(test)]
mod tests {
    use super::MonotonicClock;

    #[test]
    fn synthetic_timestamps_strictly_increase() {
        let mut clock = MonotonicClock::new();
        let mut last = 0;
        for _ in 0..1000 {
            let t = clock.next_ms();
            assert!(t > last);
            last = t;
        }
    }

    #[test]
    fn forwarded_timestamps_do_not_advance_the_clamp() {
        let mut clock = MonotonicClock::new();
        let a = clock.next_ms();
        let _ = clock.now_ms();
        let b = clock.next_ms();
        assert!(b > a);
    }
}
