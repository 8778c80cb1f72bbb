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

//! The UI root and views.
//!
//! One outer toplevel holds everything. Each view is a desynced subsurface
//! of the root with its own viewport for crop and scale; a separate scene
//! subsurface sits above all views for scripted overlays. View state is
//! double buffered and `commit_view` issues the minimal outer calls.

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_client::protocol::wl_subcompositor::WlSubcompositor as OuterWlSubcompositor;
use wayland_client::protocol::wl_subsurface::WlSubsurface as OuterWlSubsurface;
use wayland_client::protocol::wl_surface::WlSurface as OuterWlSurface;
use wayland_protocols::wp::viewporter::client::wp_viewport::WpViewport as OuterWpViewport;
use wayland_protocols::wp::viewporter::client::wp_viewporter::WpViewporter as OuterWpViewporter;
use wayland_protocols::xdg::decoration::zv1::client::zxdg_decoration_manager_v1::ZxdgDecorationManagerV1 as OuterDecorationManager;
use wayland_protocols::xdg::decoration::zv1::client::zxdg_toplevel_decoration_v1 as outer_decoration;
use wayland_protocols::xdg::decoration::zv1::client::zxdg_toplevel_decoration_v1::ZxdgToplevelDecorationV1 as OuterToplevelDecoration;
use wayland_protocols::xdg::shell::client::xdg_surface as outer_xdg_surface;
use wayland_protocols::xdg::shell::client::xdg_surface::XdgSurface as OuterXdgSurface;
use wayland_protocols::xdg::shell::client::xdg_toplevel as outer_xdg_toplevel;
use wayland_protocols::xdg::shell::client::xdg_toplevel::XdgToplevel as OuterXdgToplevel;
use wayland_protocols::xdg::shell::client::xdg_wm_base as outer_xdg_wm_base;
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase as OuterXdgWmBase;
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_server::Resource;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::backend::Backend;
use crate::server::buffer::buffer_data;
use crate::server::remote_buffer::RemoteBufferManager;
use crate::server::surface::surface_data;
use crate::server::xdg_shell::toplevel_data;
use crate::server::xdg_shell::xdg_surface_data;

const DEFAULT_WIDTH: i32 = 640;
const DEFAULT_HEIGHT: i32 = 480;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ViewId(u64);

/// Role-specific half of a view.
#[derive(Clone, Debug)]
pub enum ViewKind {
    XdgToplevel { toplevel: XdgToplevel },
    Xwayland { window: u32 },
}

impl ViewKind {
    pub fn name(&self) -> &'static str {
        match self {
            ViewKind::XdgToplevel { .. } => "xdg_toplevel",
            ViewKind::Xwayland { .. } => "xwayland",
        }
    }

    pub fn is_xwayland(&self) -> bool {
        matches!(self, ViewKind::Xwayland { .. })
    }
}

const VIEW_STATE_POS: u32 = 1 << 0;
const VIEW_STATE_SIZE: u32 = 1 << 1;
const VIEW_STATE_CENTERED: u32 = 1 << 2;
const VIEW_STATE_VISIBLE: u32 = 1 << 3;

#[derive(Clone, Copy, Debug, Default)]
pub struct ViewState {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub centered: bool,
    pub visible: bool,
    pub present: u32,
}

pub struct View {
    pub id: ViewId,
    pub surface: WlSurface,
    pub subsurface: OuterWlSubsurface,
    pub viewport: OuterWpViewport,
    pub kind: ViewKind,
    pub current: ViewState,
    pub pending: ViewState,
    /// Size of the most recent buffer, for resize tracking and centering.
    pub buffer_size: (i32, i32),
}

pub struct Ui {
    pub root: OuterWlSurface,
    pub root_viewport: OuterWpViewport,
    pub xdg_surface: OuterXdgSurface,
    pub xdg_toplevel: OuterXdgToplevel,
    pub decoration: Option<OuterToplevelDecoration>,
    pub background: Option<wayland_client::protocol::wl_buffer::WlBuffer>,
    pub scene_surface: OuterWlSurface,
    pub scene_subsurface: OuterWlSubsurface,

    pub width: i32,
    pub height: i32,
    pub mapped: bool,

    pub views: Vec<View>,
    next_view: u64,
}

impl Ui {
    pub fn new(backend: &Backend, colors: &mut RemoteBufferManager, background: [u8; 4]) -> Result<Self> {
        let qh = &backend.qh;

        let root = backend.compositor.create_surface(qh, ());
        let root_viewport = backend.viewporter.get_viewport(&root, qh, ());

        let xdg_surface = backend.xdg_wm_base.get_xdg_surface(&root, qh, ());
        let xdg_toplevel = xdg_surface.get_toplevel(qh, ());

        let decoration = backend.decoration_manager.as_ref().map(|manager| {
            let decoration = manager.get_toplevel_decoration(&xdg_toplevel, qh, ());
            decoration.set_mode(outer_decoration::Mode::ServerSide);
            decoration
        });

        // The scene layer sits above every view; scripted overlays draw
        // into it.
        let scene_surface = backend.compositor.create_surface(qh, ());
        let empty = backend.compositor.create_region(qh, ());
        scene_surface.set_input_region(Some(&empty));
        empty.destroy();
        let scene_subsurface = backend
            .subcompositor
            .get_subsurface(&scene_surface, &root, qh, ());
        scene_subsurface.set_desync();

        let background_buffer = colors.color(background).log(loc!()).ok();

        Ok(Self {
            root,
            root_viewport,
            xdg_surface,
            xdg_toplevel,
            decoration,
            background: background_buffer,
            scene_surface,
            scene_subsurface,
            width: 0,
            height: 0,
            mapped: false,
            views: Vec::new(),
            next_view: 0,
        })
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.iter().find(|view| view.id == id)
    }

    pub fn view_mut(&mut self, id: ViewId) -> Option<&mut View> {
        self.views.iter_mut().find(|view| view.id == id)
    }

    pub fn view_for_surface(&self, surface: &WlSurface) -> Option<ViewId> {
        self.views
            .iter()
            .find(|view| view.surface.id() == surface.id())
            .map(|view| view.id)
    }
}

impl ServerState {
    /// Shows the root window. The null-attach/commit/roundtrip dance before
    /// attaching the background lets the host forget any previous mapping.
    pub fn ui_show(&mut self) -> Result<()> {
        if self.ui.mapped {
            return Ok(());
        }

        self.ui.root.attach(None, 0, 0);
        self.ui.root.commit();
        self.roundtrip().location(loc!())?;

        if let Some(background) = &self.ui.background {
            self.ui.root.attach(Some(background), 0, 0);
        }
        self.ui.root.commit();
        self.roundtrip().location(loc!())?;

        self.ui.xdg_toplevel.set_title("nestwall".to_string());
        self.ui.xdg_toplevel.set_app_id("nestwall".to_string());

        self.ui.mapped = true;
        Ok(())
    }

    pub fn ui_hide(&mut self) {
        if !self.ui.mapped {
            return;
        }
        self.ui.root.attach(None, 0, 0);
        self.ui.root.commit();
        self.ui.mapped = false;
    }

    /// Creates a view presenting `surface`, below the scene layer.
    pub fn create_view(&mut self, surface: &WlSurface, kind: ViewKind) -> ViewId {
        let qh = self.backend.qh.clone();
        let remote = surface_data(surface).remote.clone();

        let subsurface = self
            .backend
            .subcompositor
            .get_subsurface(&remote, &self.ui.root, &qh, ());
        subsurface.set_desync();
        subsurface.place_below(&self.ui.scene_surface);
        remote.commit();
        self.ui.root.commit();

        let viewport = self.backend.viewporter.get_viewport(&remote, &qh, ());

        self.ui.next_view += 1;
        let id = ViewId(self.ui.next_view);

        let buffer_size = surface_data(surface)
            .inner
            .lock()
            .unwrap()
            .current
            .buffer
            .as_ref()
            .and_then(|buffer| buffer_data(buffer).size())
            .unwrap_or((0, 0));

        self.ui.views.push(View {
            id,
            surface: surface.clone(),
            subsurface,
            viewport,
            kind,
            current: ViewState {
                visible: true,
                ..ViewState::default()
            },
            pending: ViewState::default(),
            buffer_size,
        });

        debug!("created view {id:?} for {} surface", self.ui.views.last().unwrap().kind.name());
        crate::signals::emit(self, |state| &mut state.events.view_create, &id);
        id
    }

    pub fn destroy_view(&mut self, id: ViewId) {
        let Some(index) = self.ui.views.iter().position(|view| view.id == id) else {
            return;
        };

        if self.seat.input_focus == Some(id) {
            self.set_input_focus(None);
        }

        let view = self.ui.views.remove(index);
        view.subsurface.destroy();
        view.viewport.destroy();
        self.ui.root.commit();

        debug!("destroyed view {id:?}");
        crate::signals::emit(self, |state| &mut state.events.view_destroy, &id);
    }

    pub fn destroy_view_for_surface(&mut self, surface: &WlSurface) {
        if let Some(id) = self.ui.view_for_surface(surface) {
            self.destroy_view(id);
        }
    }

    /// Post-commit bookkeeping shared by every role: view mapping for xdg
    /// toplevels, size tracking, and the resize signal.
    pub fn view_surface_committed(
        &mut self,
        surface: &WlSurface,
        next_buffer: Option<&wayland_server::protocol::wl_buffer::WlBuffer>,
    ) {
        let existing = self.ui.view_for_surface(surface);

        // Map/unmap xdg toplevel views; the XWM drives xwayland views.
        let role = surface_data(surface).inner.lock().unwrap().role.clone();
        if let crate::server::surface::Role::XdgToplevel { xdg_surface } = &role
            && xdg_surface.is_alive()
        {
            let toplevel = xdg_surface_data(xdg_surface)
                .state
                .lock()
                .unwrap()
                .toplevel
                .clone();
            if let Some(toplevel) = toplevel {
                let want = next_buffer.is_some();
                match (want, existing) {
                    (true, None) => {
                        let id = self.create_view(surface, ViewKind::XdgToplevel { toplevel });
                        let _ = id;
                    },
                    (false, Some(id)) => self.destroy_view(id),
                    _ => {},
                }
            }
        }

        // Track the buffer size for centering and the resize signal.
        let Some(id) = self.ui.view_for_surface(surface) else {
            return;
        };
        let new_size = next_buffer
            .and_then(|buffer| buffer_data(buffer).size())
            .unwrap_or((0, 0));

        let changed = {
            let view = self.ui.view_mut(id).unwrap();
            let changed = new_size != view.buffer_size && new_size != (0, 0);
            if changed {
                view.buffer_size = new_size;
            }
            changed
        };

        if changed {
            if self.ui.view(id).unwrap().current.centered {
                self.center_view(id);
            }
            crate::signals::emit(self, |state| &mut state.events.resize, &id);
        }
    }

    fn view_effective_size(&self, id: ViewId) -> (i32, i32) {
        let Some(view) = self.ui.view(id) else {
            return (0, 0);
        };
        if view.current.present & VIEW_STATE_SIZE != 0 {
            (view.current.width, view.current.height)
        } else {
            view.buffer_size
        }
    }

    fn center_view(&mut self, id: ViewId) {
        let (width, height) = self.view_effective_size(id);
        let (ui_width, ui_height) = (self.ui.width, self.ui.height);

        let Some(view) = self.ui.view_mut(id) else {
            return;
        };
        let x = (ui_width - width) / 2;
        let y = (ui_height - height) / 2;
        view.subsurface.set_position(x, y);
        view.current.x = x;
        view.current.y = y;

        let remote = surface_data(&view.surface).remote.clone();
        remote.commit();
        self.ui.root.commit();
    }

    pub fn view_set_pos(&mut self, id: ViewId, x: i32, y: i32) {
        if let Some(view) = self.ui.view_mut(id) {
            view.pending.x = x;
            view.pending.y = y;
            view.pending.present |= VIEW_STATE_POS;
        }
    }

    pub fn view_set_dest_size(&mut self, id: ViewId, width: i32, height: i32) {
        if let Some(view) = self.ui.view_mut(id) {
            view.pending.width = width;
            view.pending.height = height;
            view.pending.present |= VIEW_STATE_SIZE;
        }
    }

    pub fn view_set_centered(&mut self, id: ViewId, centered: bool) {
        if let Some(view) = self.ui.view_mut(id) {
            view.pending.centered = centered;
            view.pending.present |= VIEW_STATE_CENTERED;
        }
    }

    pub fn view_set_visible(&mut self, id: ViewId, visible: bool) {
        if let Some(view) = self.ui.view_mut(id) {
            view.pending.visible = visible;
            view.pending.present |= VIEW_STATE_VISIBLE;
        }
    }

    /// Applies a view's pending state with the minimal set of outer calls.
    pub fn commit_view(&mut self, id: ViewId) {
        let Some(view) = self.ui.view_mut(id) else {
            return;
        };

        let pending = std::mem::take(&mut view.pending);
        let mut dirty = false;

        if pending.present & VIEW_STATE_SIZE != 0
            && (pending.width != view.current.width || pending.height != view.current.height)
        {
            view.viewport.set_destination(pending.width, pending.height);
            view.current.width = pending.width;
            view.current.height = pending.height;
            view.current.present |= VIEW_STATE_SIZE;
            dirty = true;
        }

        if pending.present & VIEW_STATE_POS != 0
            && (pending.x != view.current.x || pending.y != view.current.y)
        {
            view.subsurface.set_position(pending.x, pending.y);
            view.current.x = pending.x;
            view.current.y = pending.y;
            dirty = true;
        }

        if pending.present & VIEW_STATE_CENTERED != 0 {
            view.current.centered = pending.centered;
        }

        if pending.present & VIEW_STATE_VISIBLE != 0 && pending.visible != view.current.visible {
            let remote = surface_data(&view.surface).remote.clone();
            if pending.visible {
                let buffer = surface_data(&view.surface)
                    .inner
                    .lock()
                    .unwrap()
                    .current
                    .buffer
                    .clone();
                if let Some(buffer) = buffer {
                    if let Some(outer) = buffer_data(&buffer).remote() {
                        remote.attach(Some(&outer), 0, 0);
                    }
                }
            } else {
                remote.attach(None, 0, 0);
            }
            view.current.visible = pending.visible;
            dirty = true;
        }

        let centered = view.current.centered;
        if dirty {
            let remote = surface_data(&view.surface).remote.clone();
            remote.commit();
            self.ui.root.commit();
        }
        if centered {
            self.center_view(id);
        }
    }

    /// Crops the view's source rectangle. Negative coordinates would make
    /// the host raise `out_of_buffer`, so they are clamped to zero; the
    /// caller computes a matching destination rectangle.
    pub fn view_set_crop(&mut self, id: ViewId, x: f64, y: f64, width: f64, height: f64) {
        let Some(view) = self.ui.view(id) else {
            return;
        };
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        view.viewport
            .set_source(x.max(0.0), y.max(0.0), width, height);
        let remote = surface_data(&view.surface).remote.clone();
        remote.commit();
    }

    pub fn view_unset_crop(&mut self, id: ViewId) {
        let Some(view) = self.ui.view(id) else {
            return;
        };
        view.viewport.set_source(-1.0, -1.0, -1.0, -1.0);
        let remote = surface_data(&view.surface).remote.clone();
        remote.commit();
    }

    /// Role-dispatched view operations for the scripting layer.
    pub fn view_close(&mut self, id: ViewId) {
        let Some(kind) = self.ui.view(id).map(|view| view.kind.clone()) else {
            return;
        };
        match kind {
            ViewKind::XdgToplevel { toplevel } => toplevel.close(),
            ViewKind::Xwayland { window } => self.xwm_close_window(window),
        }
    }

    pub fn view_pid(&self, id: ViewId) -> Option<i32> {
        let view = self.ui.view(id)?;
        match &view.kind {
            ViewKind::XdgToplevel { .. } => {
                let client = view.surface.client()?;
                client
                    .get_credentials(&self.dh)
                    .ok()
                    .map(|credentials| credentials.pid)
            },
            ViewKind::Xwayland { window } => self.xwm_window_pid(*window),
        }
    }

    pub fn view_title(&self, id: ViewId) -> Option<String> {
        let view = self.ui.view(id)?;
        match &view.kind {
            ViewKind::XdgToplevel { toplevel } => {
                toplevel_data(toplevel).state.lock().unwrap().title.clone()
            },
            ViewKind::Xwayland { window } => self.xwm_window_title(*window),
        }
    }

    /// Asks the client to resize. The actual size change arrives later via
    /// the usual commit path.
    pub fn view_set_size(&mut self, id: ViewId, width: i32, height: i32) {
        let Some(view) = self.ui.view(id) else {
            return;
        };
        match view.kind.clone() {
            ViewKind::XdgToplevel { toplevel } => {
                {
                    let data = toplevel_data(&toplevel);
                    let mut st = data.state.lock().unwrap();
                    st.width = width;
                    st.height = height;
                }
                self.send_toplevel_configure(&toplevel);
            },
            ViewKind::Xwayland { window } => {
                self.xwm_configure_window(window, width as u32, height as u32);
            },
        }
    }

    /// Warp the logical pointer position used for enter/motion translation.
    pub fn set_pointer_pos(&mut self, x: f64, y: f64) {
        self.seat.pointer_x = x;
        self.seat.pointer_y = y;
        self.send_pointer_motion_to_focus();
    }
}

impl wayland_client::Dispatch<OuterXdgWmBase, ()> for ServerState {
    fn event(
        _state: &mut Self,
        proxy: &OuterXdgWmBase,
        event: outer_xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            outer_xdg_wm_base::Event::Ping { serial } => proxy.pong(serial),
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<OuterXdgSurface, ()> for ServerState {
    fn event(
        state: &mut Self,
        proxy: &OuterXdgSurface,
        event: outer_xdg_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            outer_xdg_surface::Event::Configure { serial } => {
                proxy.set_window_geometry(0, 0, state.ui.width, state.ui.height);
                state
                    .ui
                    .root_viewport
                    .set_destination(state.ui.width, state.ui.height);
                proxy.ack_configure(serial);
                state.ui.root.commit();

                state.ui_resized();
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<OuterXdgToplevel, ()> for ServerState {
    fn event(
        state: &mut Self,
        _proxy: &OuterXdgToplevel,
        event: outer_xdg_toplevel::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            outer_xdg_toplevel::Event::Configure { width, height, .. } => {
                if width > 0 {
                    state.ui.width = width;
                } else if state.ui.width == 0 {
                    state.ui.width = DEFAULT_WIDTH;
                }
                if height > 0 {
                    state.ui.height = height;
                } else if state.ui.height == 0 {
                    state.ui.height = DEFAULT_HEIGHT;
                }
            },
            outer_xdg_toplevel::Event::Close => {
                if !state.ui.mapped {
                    warn!("received spurious xdg_toplevel.close from host compositor");
                    return;
                }
                state.ui_hide();
                crate::signals::emit(state, |state| &mut state.events.close, &());
            },
            _ => {},
        }
    }
}

impl ServerState {
    fn ui_resized(&mut self) {
        let centered: Vec<ViewId> = self
            .ui
            .views
            .iter()
            .filter(|view| view.current.centered)
            .map(|view| view.id)
            .collect();
        for id in centered {
            self.center_view(id);
        }

        self.output_resized();
        let size = (self.ui.width, self.ui.height);
        crate::signals::emit(self, |state| &mut state.events.ui_resize, &size);
    }

    fn send_pointer_motion_to_focus(&mut self) {
        let (x, y) = (self.seat.pointer_x, self.seat.pointer_y);
        self.handle_host_motion(x, y);
    }
}

impl wayland_client::Dispatch<OuterWlSubcompositor, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlSubcompositor,
        _event: <OuterWlSubcompositor as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl wayland_client::Dispatch<OuterWlSubsurface, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlSubsurface,
        _event: <OuterWlSubsurface as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl wayland_client::Dispatch<OuterWpViewporter, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWpViewporter,
        _event: <OuterWpViewporter as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl wayland_client::Dispatch<OuterWpViewport, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWpViewport,
        _event: <OuterWpViewport as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl wayland_client::Dispatch<OuterDecorationManager, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterDecorationManager,
        _event: <OuterDecorationManager as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl wayland_client::Dispatch<OuterToplevelDecoration, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterToplevelDecoration,
        _event: outer_decoration::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // The host decorates however it likes; nothing to relay.
    }
}
