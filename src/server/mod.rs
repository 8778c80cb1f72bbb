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

//! The nested server: one inner display for clients, one outer connection
//! to the host, and the translation state between them.
//!
//! `ServerState` is the single mutable hub. It implements the server-side
//! dispatch traits for every inner protocol and the client-side dispatch
//! traits for every outer protocol; everything runs on one calloop loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::OnceLock;

use calloop::LoopHandle;
use calloop::LoopSignal;
use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_client::globals::GlobalListContents;
use wayland_client::globals::registry_queue_init;
use wayland_client::protocol::wl_compositor::WlCompositor as OuterWlCompositor;
use wayland_client::protocol::wl_registry as outer_registry;
use wayland_client::protocol::wl_registry::WlRegistry as OuterWlRegistry;
use wayland_server::Client;
use wayland_server::Display;
use wayland_server::DisplayHandle;
use wayland_server::Resource;
use wayland_server::backend::ClientData;
use wayland_server::backend::ClientId;
use wayland_server::backend::DisconnectReason;
use wayland_server::backend::GlobalId;
use wayland_server::protocol::wl_compositor::WlCompositor;
use wayland_server::protocol::wl_data_device_manager::WlDataDeviceManager;
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::protocol::wl_seat::WlSeat;
use wayland_server::protocol::wl_shm::WlShm;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_manager_v1::WpLinuxDrmSyncobjManagerV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_surface_v1::WpLinuxDrmSyncobjSurfaceV1;
use wayland_protocols::wp::pointer_constraints::zv1::server::zwp_pointer_constraints_v1::ZwpPointerConstraintsV1;
use wayland_protocols::wp::relative_pointer::zv1::server::zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1;
use wayland_protocols::xdg::decoration::zv1::server::zxdg_decoration_manager_v1::ZxdgDecorationManagerV1;
use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;
use wayland_protocols::xwayland::shell::v1::server::xwayland_shell_v1::XwaylandShellV1;

use crate::config::Config;
use crate::prelude::*;
use crate::protocol::drm::server::wl_drm::WlDrm;
use crate::serial::SerialCounter;
use crate::signals::Signal;
use crate::timer::Timers;
use crate::utils::MonotonicClock;
use crate::xwayland::Xwayland;
use crate::xwayland::xwm::Xwm;

pub mod backend;
pub mod buffer;
pub mod cursor;
pub mod data_device;
pub mod dmabuf;
pub mod drm;
pub mod output;
pub mod pointer_constraints;
pub mod relative_pointer;
pub mod remote_buffer;
pub mod seat;
pub mod shm;
pub mod surface;
pub mod syncobj;
pub mod ui;
pub mod xdg_decoration;
pub mod xdg_shell;
pub mod xwayland_shell;

use backend::Backend;
use cursor::Cursor;
use data_device::SelectionState;
use output::OutputGlobal;
use pointer_constraints::PointerConstraints;
use relative_pointer::RelativePointer;
use remote_buffer::RemoteBufferManager;
use seat::Seat;
use shm::ShmGlobal;
use ui::Ui;
use ui::ViewId;
use xdg_decoration::DecorationGlobal;
use xwayland_shell::XwaylandShellGlobal;

/// Per-client data on the inner display.
#[derive(Debug, Default)]
pub struct ClientState {
    pub xwayland: bool,
}

impl ClientData for ClientState {
    fn initialized(&self, _client_id: ClientId) {}
    fn disconnected(&self, _client_id: ClientId, _reason: DisconnectReason) {}
}

/// Settable back-pointer from an outer object to its inner counterpart.
/// Needed because some outer objects (dmabuf `created` buffers) exist before
/// the pairing is known.
#[derive(Debug)]
pub struct OuterRef<I: Resource + 'static> {
    inner: OnceLock<wayland_server::Weak<I>>,
}

impl<I: Resource + 'static> Default for OuterRef<I> {
    fn default() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }
}

impl<I: Resource + 'static> OuterRef<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(inner: wayland_server::Weak<I>) -> Self {
        let this = Self::default();
        this.inner.set(inner).unwrap();
        this
    }

    pub fn set(&self, inner: wayland_server::Weak<I>) {
        if self.inner.set(inner).is_err() {
            warn!("outer object already paired with an inner resource");
        }
    }

    pub fn get(&self) -> Option<I> {
        self.inner.get().and_then(|weak| weak.upgrade().ok())
    }
}

/// Raw value of a received enum, known or not.
pub fn wenum_raw<T: Into<u32>>(value: wayland_server::WEnum<T>) -> u32 {
    match value {
        wayland_server::WEnum::Value(value) => value.into(),
        wayland_server::WEnum::Unknown(raw) => raw,
    }
}

/// Matches `wl_client_post_implementation_error`: the client did something
/// no supported client does; kill it with a descriptive message.
// wl_display error codes (no generated `wl_display` module exists server-side,
// since wl_display is handled specially by wayland-server).
const WL_DISPLAY_ERROR_IMPLEMENTATION: u32 = 3;
const WL_DISPLAY_ERROR_NO_MEMORY: u32 = 2;

pub fn post_implementation_error<I: Resource>(resource: &I, message: impl Into<String>) {
    resource.post_error(WL_DISPLAY_ERROR_IMPLEMENTATION, message);
}

pub fn post_no_memory<I: Resource>(resource: &I) {
    resource.post_error(WL_DISPLAY_ERROR_NO_MEMORY, "out of memory");
}

/// Façade signals for the scripting and scene layers.
#[derive(Default)]
pub struct Events {
    pub view_create: Signal<ServerState, ViewId>,
    pub view_destroy: Signal<ServerState, ViewId>,
    /// A view's buffer changed size.
    pub resize: Signal<ServerState, ViewId>,
    /// The root window changed size.
    pub ui_resize: Signal<ServerState, (i32, i32)>,
    /// The host asked the root window to close.
    pub close: Signal<ServerState, ()>,
    pub pointer_lock: Signal<ServerState, ()>,
    pub pointer_unlock: Signal<ServerState, ()>,
    pub input_focus: Signal<ServerState, Option<ViewId>>,
}

pub struct ServerState {
    pub dh: DisplayHandle,
    pub lh: LoopHandle<'static, ServerState>,
    pub display: Rc<RefCell<Display<ServerState>>>,
    pub loop_signal: LoopSignal,
    pub config: Config,

    pub backend: Backend,
    pub serials: SerialCounter,
    pub clock: MonotonicClock,

    pub seat: Seat,
    pub ui: Ui,
    pub output: OutputGlobal,
    pub shm: ShmGlobal,
    pub selection: SelectionState,
    pub constraints: PointerConstraints,
    pub relative: RelativePointer,
    pub decorations: DecorationGlobal,
    pub syncobj_surfaces: Vec<WpLinuxDrmSyncobjSurfaceV1>,
    pub xwayland_shell: XwaylandShellGlobal,
    pub cursor: Option<Cursor>,
    pub colors: RemoteBufferManager,

    pub xwayland: Option<Xwayland>,
    pub xwm: Option<Xwm>,

    pub timers: Timers,
    pub events: Events,

    globals: Vec<GlobalId>,
    shutting_down: bool,
}

impl ServerState {
    pub fn new(
        display: Rc<RefCell<Display<ServerState>>>,
        lh: LoopHandle<'static, ServerState>,
        loop_signal: LoopSignal,
        config: Config,
        xwayland_path: Option<&str>,
    ) -> Result<Self> {
        let conn = Connection::connect_to_env()
            .context(loc!(), "failed to connect to the host compositor")?;
        let (globals, queue) =
            registry_queue_init::<ServerState>(&conn).location(loc!())?;
        let qh = queue.handle();

        let backend = Backend::bind(conn, globals, queue, qh).location(loc!())?;
        let mut colors = RemoteBufferManager::new(&backend).location(loc!())?;
        let ui = Ui::new(&backend, &mut colors, config.background_color).location(loc!())?;
        let cursor = Cursor::new(&backend.conn, &backend, &config)
            .warn(loc!())
            .ok();

        let dh = display.borrow().handle();
        let sensitivity = config.sensitivity;

        let mut state = Self {
            dh: dh.clone(),
            lh,
            display,
            loop_signal,
            config,
            backend,
            serials: SerialCounter::new(),
            clock: MonotonicClock::new(),
            seat: Seat::default(),
            ui,
            output: OutputGlobal::default(),
            shm: ShmGlobal::default(),
            selection: SelectionState::default(),
            constraints: PointerConstraints::default(),
            relative: RelativePointer::new(sensitivity),
            decorations: DecorationGlobal::default(),
            syncobj_surfaces: Vec::new(),
            xwayland_shell: XwaylandShellGlobal::default(),
            cursor,
            colors,
            xwayland: None,
            xwm: None,
            timers: Timers::new(),
            events: Events::default(),
            globals: Vec::new(),
            shutting_down: false,
        };

        state.create_globals(xwayland_path.is_some());

        if let Some(path) = xwayland_path {
            let dh = state.dh.clone();
            match Xwayland::spawn(path, move |stream| {
                dh.insert_client(stream, Arc::new(ClientState { xwayland: true }))
                    .location(loc!())
            }) {
                Ok(xwayland) => state.xwayland = Some(xwayland),
                Err(e) => {
                    // The server is still useful for pure-Wayland clients.
                    error!("failed to start Xwayland: {e:?}");
                },
            }
        }

        Ok(state)
    }

    fn create_globals(&mut self, xwayland: bool) {
        let dh = self.dh.clone();

        self.globals.extend([
            dh.create_global::<Self, WlCompositor, _>(surface::COMPOSITOR_VERSION, ()),
            dh.create_global::<Self, WlShm, _>(shm::SHM_VERSION, ()),
            dh.create_global::<Self, WlSeat, _>(seat::SEAT_VERSION, ()),
            dh.create_global::<Self, WlOutput, _>(output::OUTPUT_VERSION, ()),
            dh.create_global::<Self, XdgWmBase, _>(xdg_shell::XDG_WM_BASE_VERSION, ()),
            dh.create_global::<Self, ZxdgDecorationManagerV1, _>(
                xdg_decoration::XDG_DECORATION_VERSION,
                (),
            ),
            dh.create_global::<Self, ZwpPointerConstraintsV1, _>(
                pointer_constraints::POINTER_CONSTRAINTS_VERSION,
                (),
            ),
            dh.create_global::<Self, ZwpRelativePointerManagerV1, _>(
                relative_pointer::RELATIVE_POINTER_VERSION,
                (),
            ),
            dh.create_global::<Self, ZwpLinuxDmabufV1, _>(dmabuf::DMABUF_VERSION, ()),
            dh.create_global::<Self, WlDataDeviceManager, _>(
                data_device::DATA_DEVICE_MANAGER_VERSION,
                (),
            ),
        ]);

        if self.backend.syncobj_manager.is_some() {
            self.globals.push(
                dh.create_global::<Self, WpLinuxDrmSyncobjManagerV1, _>(
                    syncobj::SYNCOBJ_VERSION,
                    (),
                ),
            );
        }
        if self.backend.drm.is_some() {
            self.globals
                .push(dh.create_global::<Self, WlDrm, _>(drm::DRM_VERSION, ()));
        }
        if xwayland {
            self.globals.push(dh.create_global::<Self, XwaylandShellV1, _>(
                xwayland_shell::XWAYLAND_SHELL_VERSION,
                (),
            ));
        }
    }

    pub fn client_is_xwayland(&self, client: &Client) -> bool {
        client
            .get_data::<ClientState>()
            .is_some_and(|data| data.xwayland)
    }

    /// Blocking round-trip on the outer connection. Only startup, dmabuf
    /// creation, and UI show/hide use this.
    pub fn roundtrip(&mut self) -> Result<()> {
        let queue = self.backend.queue.clone();
        let mut queue = queue.borrow_mut();
        queue
            .roundtrip(self)
            .map_err(|e| anyhow!("outer roundtrip failed: {e}"))?;
        Ok(())
    }

    /// Non-blocking read+dispatch of the outer connection; the fd was
    /// reported readable.
    pub fn dispatch_outer(&mut self) -> Result<()> {
        let queue = self.backend.queue.clone();
        let mut queue = queue.borrow_mut();

        queue
            .dispatch_pending(self)
            .map_err(|e| anyhow!("outer dispatch failed: {e}"))?;

        if let Some(guard) = queue.prepare_read() {
            match guard.read() {
                Ok(_) => {},
                Err(wayland_client::backend::WaylandError::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock => {},
                Err(e) => return Err(anyhow!("outer connection read failed: {e}")),
            }
        }

        queue
            .dispatch_pending(self)
            .map_err(|e| anyhow!("outer dispatch failed: {e}"))?;
        Ok(())
    }

    pub fn flush_all(&mut self) {
        if let Err(e) = self.display.clone().borrow_mut().flush_clients() {
            warn!("failed to flush inner clients: {e}");
        }
        if let Err(e) = self.backend.conn.flush() {
            // A dead host connection is fatal; a well-behaved host is
            // assumed.
            error!("failed to flush outer connection: {e}");
            self.loop_signal.stop();
        }
    }

    /// Host pointer appeared or disappeared; pointer-derived outer objects
    /// must be recreated or dropped.
    pub fn host_pointer_changed(&mut self) {
        self.relative_pointer_reconcile();
        self.constraints_reconcile();
    }

    /// Stages clipboard content for X11 paste requests.
    pub fn set_clipboard(&mut self, content: &str) -> Result<()> {
        self.xwm_set_clipboard(content.to_string())
    }

    /// Orderly teardown: close views, then globals; clients are dropped by
    /// the display after the loop exits.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("shutting down");

        let views: Vec<ViewId> = self.ui.views.iter().map(|view| view.id).collect();
        for view in views {
            self.view_close(view);
        }

        self.drop_all_timers();

        let dh = self.dh.clone();
        for global in self.globals.drain(..) {
            dh.remove_global::<Self>(global);
        }

        self.loop_signal.stop();
    }
}

impl wayland_client::Dispatch<OuterWlRegistry, GlobalListContents> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlRegistry,
        event: outer_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            outer_registry::Event::GlobalRemove { name } => {
                // Required globals vanishing mid-run means a host teardown;
                // the exit path handles it.
                debug!("host removed global {name}");
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<OuterWlCompositor, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlCompositor,
        _event: <OuterWlCompositor as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}
