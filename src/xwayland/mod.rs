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

//! The Xwayland process.
//!
//! Nestwall owns the X11 listen socket (so it can pick a free display
//! number), the Wayland socketpair (so Xwayland shows up as a known inner
//! client), the WM socketpair (for the XCB connection in `xwm`), and the
//! displayfd pipe that signals readiness.

use std::fs::File;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;

use nix::fcntl::FcntlArg;
use nix::fcntl::FdFlag;
use nix::fcntl::fcntl;
use nix::unistd::pipe;
use wayland_server::Client;

use crate::prelude::*;

pub mod xwm;

const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";
const MAX_DISPLAYS: u32 = 32;

pub struct Xwayland {
    pub child: Child,
    pub display: u32,
    /// The inner client backing Xwayland's Wayland connection.
    pub client: Client,
    /// Read end of -displayfd; readable once the Xserver is up.
    pub displayfd: Option<File>,
    /// Our end of the WM socketpair, handed to the XWM once ready.
    pub wm_stream: Option<UnixStream>,
    /// Keeps the X11 listen socket bound for the lifetime of the server.
    _listener: UnixListener,
}

fn bind_x11_socket() -> Result<(u32, UnixListener)> {
    std::fs::create_dir_all(X11_SOCKET_DIR).location(loc!())?;

    for display in 0..MAX_DISPLAYS {
        let path: PathBuf = format!("{X11_SOCKET_DIR}/X{display}").into();
        match UnixListener::bind(&path) {
            Ok(listener) => {
                info!("bound X11 socket for display :{display}");
                return Ok((display, listener));
            },
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e).location(loc!()),
        }
    }

    bail!("no free X11 display number below {MAX_DISPLAYS}")
}

fn clear_cloexec(fd: i32) -> std::io::Result<()> {
    fcntl(
        unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
        FcntlArg::F_SETFD(FdFlag::empty()),
    )
    .map_err(std::io::Error::from)?;
    Ok(())
}

impl Xwayland {
    /// Spawns the Xserver. `insert_client` wires the Wayland half of the
    /// socketpair into the inner display, marked as the Xwayland client.
    pub fn spawn(
        xwayland_path: &str,
        insert_client: impl FnOnce(UnixStream) -> Result<Client>,
    ) -> Result<Self> {
        let (display, listener) = bind_x11_socket().location(loc!())?;

        let (wayland_ours, wayland_theirs) = UnixStream::pair().location(loc!())?;
        let (wm_ours, wm_theirs) = UnixStream::pair().location(loc!())?;
        let (displayfd_read, displayfd_write): (OwnedFd, OwnedFd) = pipe().location(loc!())?;

        let listen_fd = listener.as_raw_fd();
        let wayland_fd = wayland_theirs.as_raw_fd();
        let wm_fd = wm_theirs.as_raw_fd();
        let displayfd = displayfd_write.as_raw_fd();

        let mut command = Command::new(xwayland_path);
        command
            .arg(format!(":{display}"))
            .args(["-rootless", "-core", "-noreset"])
            .args(["-listenfd", &listen_fd.to_string()])
            .args(["-displayfd", &displayfd.to_string()])
            .args(["-wm", &wm_fd.to_string()])
            .env("WAYLAND_SOCKET", wayland_fd.to_string());

        unsafe {
            command.pre_exec(move || {
                for fd in [listen_fd, wayland_fd, wm_fd, displayfd] {
                    clear_cloexec(fd)?;
                }
                Ok(())
            });
        }

        let child = command
            .spawn()
            .with_context(loc!(), || format!("failed to spawn {xwayland_path}"))?;
        info!("spawned Xwayland :{display} (pid {})", child.id());

        // The child holds its own copies now.
        drop(wayland_theirs);
        drop(wm_theirs);
        drop(displayfd_write);

        let client = insert_client(wayland_ours).location(loc!())?;

        Ok(Self {
            child,
            display,
            client,
            displayfd: Some(File::from(displayfd_read)),
            wm_stream: Some(wm_ours),
            _listener: listener,
        })
    }

    /// Drains the readiness pipe. Returns true once the Xserver has written
    /// its display number, meaning the WM connection can be established.
    pub fn check_ready(&mut self) -> Result<bool> {
        let Some(displayfd) = &mut self.displayfd else {
            return Ok(true);
        };

        let mut buf = [0u8; 64];
        let n = displayfd.read(&mut buf).location(loc!())?;
        if n == 0 {
            bail!("Xwayland closed its displayfd before becoming ready");
        }
        if buf[..n].contains(&b'\n') {
            self.displayfd = None;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn take_wm_stream(&mut self) -> Option<UnixStream> {
        self.wm_stream.take()
    }
}

impl crate::server::ServerState {
    /// Polls Xwayland readiness; once ready, connects the XWM and registers
    /// its event source. Returns true when this poller can be removed.
    pub fn xwayland_ready_poll(&mut self) -> bool {
        let Some(xwayland) = &mut self.xwayland else {
            return true;
        };

        match xwayland.check_ready() {
            Ok(false) => false,
            Ok(true) => {
                let Some(stream) = xwayland.take_wm_stream() else {
                    return true;
                };
                match xwm::Xwm::new(stream) {
                    Ok(xwm) => {
                        let fd = xwm.connection_fd();
                        self.xwm = Some(xwm);
                        if let Err(e) = self.register_xwm_source(fd) {
                            error!("{e:?}");
                            self.xwm = None;
                        } else {
                            info!("X11 window manager ready");
                        }
                    },
                    Err(e) => error!("failed to start the X11 window manager: {e:?}"),
                }
                true
            },
            Err(e) => {
                error!("Xwayland failed to become ready: {e:?}");
                true
            },
        }
    }

    fn register_xwm_source(&mut self, fd: i32) -> Result<()> {
        use calloop::Interest;
        use calloop::Mode;
        use calloop::PostAction;
        use calloop::generic::Generic;

        let fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }
            .try_clone_to_owned()
            .location(loc!())?;
        self.lh
            .insert_source(Generic::new(fd, Interest::READ, Mode::Level), |_, _, state| {
                if state.xwm_dispatch() {
                    Ok(PostAction::Continue)
                } else {
                    Ok(PostAction::Remove)
                }
            })
            .map_err(|e| anyhow!("failed to register X11 event source: {e}"))?;
        Ok(())
    }
}

impl Drop for Xwayland {
    fn drop(&mut self) {
        // Reap the Xserver on teardown; SIGTERM then wait.
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(self.child.id() as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        let _ = self.child.wait();
        let _ = std::fs::remove_file(format!("{X11_SOCKET_DIR}/X{}", self.display));
    }
}
