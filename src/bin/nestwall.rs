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

use std::cell::RefCell;
use std::env;
use std::io::ErrorKind;
use std::rc::Rc;
use std::sync::Arc;

use calloop::EventLoop;
use calloop::Interest;
use calloop::Mode;
use calloop::PostAction;
use calloop::generic::Generic;
use calloop::signals::Signal;
use calloop::signals::Signals;
use clap::Parser;
use nestwall::args::Args;
use nestwall::config::Config;
use nestwall::prelude::*;
use nestwall::server::ClientState;
use nestwall::server::ServerState;
use nestwall::utils;
use wayland_server::Display;

fn main() -> Result<()> {
    let args = Args::parse();
    utils::configure_tracing(args.stderr_log_level, args.log_file.clone(), args.file_log_level)
        .location(loc!())?;
    utils::exit_on_panic();

    let config = Config::load(args.config_file.as_deref()).location(loc!())?;

    // Single-instance guard; held open for the lifetime of the process.
    let mut lock_file = utils::acquire_display_lock().location(loc!())?;

    let (listener, socket_name) = utils::bind_inner_socket().location(loc!())?;

    let mut event_loop: EventLoop<'static, ServerState> =
        EventLoop::try_new().map_err(|e| anyhow!("failed to create event loop: {e}"))?;
    let display = Rc::new(RefCell::new(
        Display::<ServerState>::new().location(loc!())?,
    ));

    let xwayland_path = (!args.no_xwayland).then_some(args.xwayland_path.as_str());
    let mut state = ServerState::new(
        display.clone(),
        event_loop.handle(),
        event_loop.get_signal(),
        config,
        xwayland_path,
    )
    .location(loc!())?;

    // Finish the initial registry/seat/shm handshakes before clients can
    // connect.
    state.roundtrip().location(loc!())?;

    let lh = event_loop.handle();

    // New inner clients.
    lh.insert_source(
        Generic::new(listener, Interest::READ, Mode::Level),
        |_, listener, state: &mut ServerState| {
            loop {
                match listener.accept() {
                    Ok((stream, _)) => {
                        if let Err(e) = state
                            .dh
                            .insert_client(stream, Arc::new(ClientState::default()))
                        {
                            error!("failed to insert inner client: {e}");
                        }
                    },
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        error!("inner socket accept failed: {e}");
                        break;
                    },
                }
            }
            Ok(PostAction::Continue)
        },
    )
    .map_err(|e| anyhow!("failed to register the inner listener: {e}"))?;

    // Inner client requests.
    let inner_fd = display
        .borrow_mut()
        .backend()
        .poll_fd()
        .try_clone_to_owned()
        .location(loc!())?;
    lh.insert_source(
        Generic::new(inner_fd, Interest::READ, Mode::Level),
        |_, _, state: &mut ServerState| {
            let display = state.display.clone();
            if let Err(e) = display.borrow_mut().dispatch_clients(state) {
                error!("inner dispatch failed: {e}");
            }
            Ok(PostAction::Continue)
        },
    )
    .map_err(|e| anyhow!("failed to register the inner display: {e}"))?;

    // Outer compositor events.
    let outer_fd = {
        let queue = state.backend.queue.clone();
        let mut queue = queue.borrow_mut();
        let guard = queue
            .prepare_read()
            .ok_or_else(|| anyhow!("outer event queue not empty at startup"))?;
        guard.connection_fd().try_clone_to_owned().location(loc!())?
    };
    lh.insert_source(
        Generic::new(outer_fd, Interest::READ, Mode::Level),
        |_, _, state: &mut ServerState| {
            if let Err(e) = state.dispatch_outer() {
                // A well-behaved host is assumed; a broken outer connection
                // ends the session.
                error!("{e:?}");
                state.loop_signal.stop();
            }
            Ok(PostAction::Continue)
        },
    )
    .map_err(|e| anyhow!("failed to register the outer connection: {e}"))?;

    // Xwayland readiness pipe.
    if let Some(xwayland) = &state.xwayland {
        if let Some(displayfd) = &xwayland.displayfd {
            use std::os::fd::AsFd;
            let fd = displayfd.as_fd().try_clone_to_owned().location(loc!())?;
            lh.insert_source(
                Generic::new(fd, Interest::READ, Mode::Level),
                |_, _, state: &mut ServerState| {
                    if state.xwayland_ready_poll() {
                        Ok(PostAction::Remove)
                    } else {
                        Ok(PostAction::Continue)
                    }
                },
            )
            .map_err(|e| anyhow!("failed to register the Xwayland pipe: {e}"))?;
        }
    }

    lh.insert_source(
        Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
            .map_err(|e| anyhow!("failed to register signal handlers: {e}"))?,
        |event, _, state: &mut ServerState| {
            info!("received {:?}; stopping", event.signal());
            state.shutdown();
        },
    )
    .map_err(|e| anyhow!("failed to register signal handlers: {e}"))?;

    // Children (the game, helpers, Xwayland) find us through these.
    unsafe {
        env::set_var("WAYLAND_DISPLAY", &socket_name);
        if let Some(xwayland) = &state.xwayland {
            env::set_var("DISPLAY", format!(":{}", xwayland.display));
        }
    }
    let x11_display = state.xwayland.as_ref().map(|xwayland| xwayland.display);
    utils::write_display_lock(&mut lock_file, &socket_name, x11_display).location(loc!())?;

    state.ui_show().location(loc!())?;

    event_loop
        .run(None::<std::time::Duration>, &mut state, |state| {
            state.flush_all()
        })
        .map_err(|e| anyhow!("event loop error: {e}"))?;

    // Clients go first so their resource destructors run against live
    // globals, then the display and the backend drop in field order.
    state.shutdown();
    Ok(())
}
