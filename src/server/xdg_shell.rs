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

//! Inner `xdg_wm_base` / `xdg_surface` / `xdg_toplevel`.
//!
//! The game is the only real xdg client and it never needs popups or window
//! geometry, so this implements exactly the configure/ack cycle: on first
//! commit a configure is sent, its serial is pushed into a bounded ring, and
//! `ack_configure` consumes it. Maximize/fullscreen requests are no-ops that
//! still answer with a configure.
//!
//! TODO: send ping periodically so a hung game can be detected and reported
//! through the façade.

use std::sync::Mutex;

use wayland_protocols::xdg::shell::server::xdg_popup;
use wayland_protocols::xdg::shell::server::xdg_popup::XdgPopup;
use wayland_protocols::xdg::shell::server::xdg_positioner;
use wayland_protocols::xdg::shell::server::xdg_positioner::XdgPositioner;
use wayland_protocols::xdg::shell::server::xdg_surface;
use wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface;
use wayland_protocols::xdg::shell::server::xdg_toplevel;
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_protocols::xdg::shell::server::xdg_wm_base;
use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::prelude::*;
use crate::serial::SerialRing;
use crate::server::ServerState;
use crate::server::post_implementation_error;
use crate::server::post_no_memory;
use crate::server::surface::PendingState;
use crate::server::surface::Role;
use crate::server::surface::set_role;
use crate::server::surface::surface_data;

pub const XDG_WM_BASE_VERSION: u32 = 1;

/// User data of an inner `xdg_wm_base`: live xdg_surfaces for the
/// defunct-surfaces check at destroy time.
#[derive(Debug, Default)]
pub struct XdgWmBaseData {
    pub surfaces: Mutex<Vec<XdgSurface>>,
}

#[derive(Debug, Default)]
pub struct XdgSurfaceState {
    pub serials: SerialRing,
    pub initial_ack: bool,
    pub initial_commit: bool,
    pub toplevel: Option<XdgToplevel>,
}

/// User data of an inner `xdg_surface`.
#[derive(Debug)]
pub struct XdgSurfaceData {
    pub surface: WlSurface,
    pub wm_base: XdgWmBase,
    pub state: Mutex<XdgSurfaceState>,
}

pub fn xdg_surface_data(xdg_surface: &XdgSurface) -> &XdgSurfaceData {
    xdg_surface
        .data::<XdgSurfaceData>()
        .expect("xdg_surface without XdgSurfaceData")
}

#[derive(Debug, Default)]
pub struct ToplevelState {
    pub title: Option<String>,
    pub width: i32,
    pub height: i32,
}

/// User data of an inner `xdg_toplevel`.
#[derive(Debug)]
pub struct XdgToplevelData {
    pub xdg_surface: XdgSurface,
    pub state: Mutex<ToplevelState>,
}

pub fn toplevel_data(toplevel: &XdgToplevel) -> &XdgToplevelData {
    toplevel
        .data::<XdgToplevelData>()
        .expect("xdg_toplevel without XdgToplevelData")
}

impl GlobalDispatch<XdgWmBase, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<XdgWmBase>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, XdgWmBaseData::default());
    }
}

impl Dispatch<XdgWmBase, XdgWmBaseData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &XdgWmBase,
        request: xdg_wm_base::Request,
        data: &XdgWmBaseData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                {
                    let inner = surface_data(&surface).inner.lock().unwrap();
                    if !matches!(inner.role, Role::None) {
                        resource.post_error(
                            xdg_wm_base::Error::Role,
                            "cannot create xdg_surface for wl_surface with a role",
                        );
                        return;
                    }
                    if inner.current.buffer.is_some()
                        || inner.pending.buffer.as_ref().is_some_and(Option::is_some)
                    {
                        resource.post_error(
                            xdg_wm_base::Error::InvalidSurfaceState,
                            "cannot create xdg_surface for wl_surface with a buffer",
                        );
                        return;
                    }
                }

                let xdg_surface = data_init.init(
                    id,
                    XdgSurfaceData {
                        surface,
                        wm_base: resource.clone(),
                        state: Mutex::new(XdgSurfaceState::default()),
                    },
                );
                data.surfaces.lock().unwrap().push(xdg_surface);
            },
            xdg_wm_base::Request::CreatePositioner { id } => {
                // The new id must be initialised even though the request is
                // refused.
                data_init.init(id, ());
                post_implementation_error(resource, "xdg_wm_base.create_positioner is not supported");
            },
            xdg_wm_base::Request::Pong { .. } => {
                post_implementation_error(resource, "xdg_wm_base.pong should not be sent");
            },
            xdg_wm_base::Request::Destroy => {
                let surfaces = data.surfaces.lock().unwrap();
                if !surfaces.is_empty() {
                    resource.post_error(
                        xdg_wm_base::Error::DefunctSurfaces,
                        format!("xdg_wm_base destroyed with {} remaining surfaces", surfaces.len()),
                    );
                }
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgSurface, XdgSurfaceData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &XdgSurface,
        request: xdg_surface::Request,
        data: &XdgSurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                {
                    let inner = surface_data(&data.surface).inner.lock().unwrap();
                    match inner.role {
                        Role::None => {},
                        Role::XdgToplevel { .. } => {
                            if data.state.lock().unwrap().toplevel.is_some() {
                                data.wm_base.post_error(
                                    xdg_wm_base::Error::Role,
                                    "cannot have more than one xdg_toplevel per xdg_surface",
                                );
                                return;
                            }
                        },
                        _ => {
                            data.wm_base.post_error(
                                xdg_wm_base::Error::Role,
                                "cannot issue xdg_surface.get_toplevel on a surface with a role",
                            );
                            return;
                        },
                    }
                }

                let toplevel = data_init.init(
                    id,
                    XdgToplevelData {
                        xdg_surface: resource.clone(),
                        state: Mutex::new(ToplevelState::default()),
                    },
                );

                log_and_return!(set_role(
                    &data.surface,
                    Role::XdgToplevel {
                        xdg_surface: resource.clone(),
                    },
                ));
                data.state.lock().unwrap().toplevel = Some(toplevel);
            },
            xdg_surface::Request::AckConfigure { serial } => {
                let mut st = data.state.lock().unwrap();
                if st.serials.consume(serial).is_err() {
                    resource.post_error(
                        xdg_surface::Error::InvalidSerial,
                        format!("invalid serial {serial} given to xdg_surface.ack_configure"),
                    );
                    return;
                }
                st.initial_ack = true;
            },
            xdg_surface::Request::GetPopup { id, .. } => {
                data_init.init(id, ());
                post_implementation_error(resource, "xdg_surface.get_popup is not supported");
            },
            xdg_surface::Request::SetWindowGeometry { .. } => {
                post_implementation_error(resource, "xdg_surface.set_window_geometry is not supported");
            },
            xdg_surface::Request::Destroy => {
                if data.state.lock().unwrap().toplevel.is_some() {
                    resource.post_error(
                        xdg_surface::Error::DefunctRoleObject,
                        "xdg_surface destroyed before associated xdg_toplevel",
                    );
                }
            },
            _ => unreachable!(),
        }
        let _ = state;
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &XdgSurface,
        data: &XdgSurfaceData,
    ) {
        if let Some(wm_data) = data.wm_base.data::<XdgWmBaseData>() {
            wm_data
                .surfaces
                .lock()
                .unwrap()
                .retain(|xdg_surface| xdg_surface.id() != resource.id());
        }
    }
}

impl Dispatch<XdgToplevel, XdgToplevelData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &XdgToplevel,
        request: xdg_toplevel::Request,
        data: &XdgToplevelData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_toplevel::Request::SetTitle { title } => {
                data.state.lock().unwrap().title = Some(title);
            },
            xdg_toplevel::Request::SetMaximized
            | xdg_toplevel::Request::UnsetMaximized
            | xdg_toplevel::Request::SetFullscreen { .. }
            | xdg_toplevel::Request::UnsetFullscreen => {
                // No-ops, but the client expects a configure in response.
                state.send_toplevel_configure(resource);
            },
            xdg_toplevel::Request::SetParent { .. } => {
                post_implementation_error(resource, "xdg_toplevel.set_parent is not supported");
            },
            xdg_toplevel::Request::Move { .. }
            | xdg_toplevel::Request::Resize { .. }
            | xdg_toplevel::Request::SetAppId { .. }
            | xdg_toplevel::Request::SetMinimized
            | xdg_toplevel::Request::SetMaxSize { .. }
            | xdg_toplevel::Request::SetMinSize { .. }
            | xdg_toplevel::Request::ShowWindowMenu { .. } => {
                // Unused by the known clients.
            },
            xdg_toplevel::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &XdgToplevel,
        data: &XdgToplevelData,
    ) {
        let surface = {
            let xdg_data = xdg_surface_data(&data.xdg_surface);
            let mut st = xdg_data.state.lock().unwrap();
            if st
                .toplevel
                .as_ref()
                .is_some_and(|toplevel| toplevel.id() == resource.id())
            {
                st.toplevel = None;
            }
            xdg_data.surface.clone()
        };

        state.destroy_view_for_surface(&surface);
    }
}

impl ServerState {
    /// Sends the toplevel configure plus the xdg_surface configure that
    /// carries the serial.
    pub fn send_toplevel_configure(&mut self, toplevel: &XdgToplevel) {
        let data = toplevel_data(toplevel);
        let (width, height) = {
            let st = data.state.lock().unwrap();
            (st.width, st.height)
        };
        toplevel.configure(width, height, Vec::new());
        if toplevel.version() >= xdg_toplevel::EVT_WM_CAPABILITIES_SINCE {
            toplevel.wm_capabilities(Vec::new());
        }
        self.send_xdg_configure(&data.xdg_surface);
    }

    pub fn send_xdg_configure(&mut self, xdg_surface: &XdgSurface) {
        let data = xdg_surface_data(xdg_surface);

        let serial = self.serials.next();
        if data.state.lock().unwrap().serials.push(serial).is_err() {
            post_no_memory(xdg_surface);
            return;
        }
        xdg_surface.configure(serial);
    }

    /// Commit hook for surfaces with the xdg_toplevel role. Returns false
    /// when the commit is rejected.
    pub fn xdg_surface_pre_commit(
        &mut self,
        _surface: &WlSurface,
        xdg_surface: &XdgSurface,
        pending: &PendingState,
        _next_buffer: Option<&wayland_server::protocol::wl_buffer::WlBuffer>,
    ) -> bool {
        let data = xdg_surface_data(xdg_surface);

        let attaching = pending.buffer.as_ref().is_some_and(Option::is_some);
        let needs_initial = {
            let mut st = data.state.lock().unwrap();
            if !st.initial_ack && attaching {
                xdg_surface.post_error(
                    xdg_surface::Error::UnconfiguredBuffer,
                    "cannot call wl_surface.commit with buffer before configuring xdg_surface",
                );
                return false;
            }
            if st.initial_commit {
                false
            } else {
                st.initial_commit = true;
                true
            }
        };

        if needs_initial {
            let toplevel = data.state.lock().unwrap().toplevel.clone();
            match &toplevel {
                Some(toplevel) => self.send_toplevel_configure(toplevel),
                None => self.send_xdg_configure(xdg_surface),
            }
        }

        true
    }

    /// The wl_surface below an xdg_surface was destroyed first; that is a
    /// client error.
    pub fn xdg_surface_parent_destroyed(&mut self, xdg_surface: &XdgSurface) {
        xdg_surface.post_error(
            xdg_surface::Error::DefunctRoleObject,
            "wl_surface destroyed before associated xdg_surface",
        );
    }
}

impl Dispatch<XdgPositioner, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &XdgPositioner,
        _request: xdg_positioner::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // Only reachable from a refused create_positioner; the client is
        // already dead.
    }
}

impl Dispatch<XdgPopup, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &XdgPopup,
        _request: xdg_popup::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // Only reachable from a refused get_popup; the client is already
        // dead.
    }
}
