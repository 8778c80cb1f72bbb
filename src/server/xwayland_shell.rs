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

//! Inner `xwayland_shell_v1`. Only the Xwayland client may bind it.
//!
//! `set_serial` stages a serial; the association becomes real on the next
//! commit of the backing surface, at which point the XWM gets a chance to
//! pair the surface with the X11 window carrying the matching
//! `WL_SURFACE_SERIAL`.

use std::sync::Mutex;

use wayland_protocols::xwayland::shell::v1::server::xwayland_shell_v1;
use wayland_protocols::xwayland::shell::v1::server::xwayland_shell_v1::XwaylandShellV1;
use wayland_protocols::xwayland::shell::v1::server::xwayland_surface_v1;
use wayland_protocols::xwayland::shell::v1::server::xwayland_surface_v1::XwaylandSurfaceV1;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::post_implementation_error;
use crate::server::surface::Role;
use crate::server::surface::set_role;

pub const XWAYLAND_SHELL_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct XwaylandShellGlobal {
    /// The singleton binding; Xwayland binds once.
    pub resource: Option<XwaylandShellV1>,
}

impl XwaylandShellGlobal {
    pub fn bound(&self) -> bool {
        self.resource.is_some()
    }
}

#[derive(Debug, Default)]
pub struct XwaylandSurfaceState {
    pub serial: Option<u64>,
    pub pending_association: bool,
    pub associated: bool,
}

/// User data of an inner `xwayland_surface_v1`.
#[derive(Debug)]
pub struct XwaylandSurfaceData {
    pub surface: WlSurface,
    pub state: Mutex<XwaylandSurfaceState>,
}

pub fn xwayland_surface_data(resource: &XwaylandSurfaceV1) -> &XwaylandSurfaceData {
    resource
        .data::<XwaylandSurfaceData>()
        .expect("xwayland_surface_v1 without XwaylandSurfaceData")
}

impl GlobalDispatch<XwaylandShellV1, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<XwaylandShellV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let shell = data_init.init(resource, ());
        if state.xwayland_shell.bound() {
            post_implementation_error(&shell, "xwayland_shell was already bound");
            return;
        }
        state.xwayland_shell.resource = Some(shell);
    }

    fn can_view(client: Client, _global_data: &()) -> bool {
        client
            .get_data::<crate::server::ClientState>()
            .is_some_and(|data| data.xwayland)
    }
}

impl Dispatch<XwaylandShellV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &XwaylandShellV1,
        request: xwayland_shell_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xwayland_shell_v1::Request::GetXwaylandSurface { id, surface } => {
                let xwayland_surface = data_init.init(
                    id,
                    XwaylandSurfaceData {
                        surface: surface.clone(),
                        state: Mutex::new(XwaylandSurfaceState::default()),
                    },
                );

                if set_role(
                    &surface,
                    Role::Xwayland {
                        xwayland_surface: xwayland_surface.clone(),
                    },
                )
                .is_err()
                {
                    resource.post_error(
                        xwayland_shell_v1::Error::Role,
                        "cannot create xwayland_surface for surface with another role",
                    );
                    return;
                }

                state.xwm_new_unpaired_surface(xwayland_surface);
            },
            xwayland_shell_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &XwaylandShellV1,
        _data: &(),
    ) {
        if state
            .xwayland_shell
            .resource
            .as_ref()
            .is_some_and(|shell| shell.id() == resource.id())
        {
            state.xwayland_shell.resource = None;
        }
    }
}

impl Dispatch<XwaylandSurfaceV1, XwaylandSurfaceData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &XwaylandSurfaceV1,
        request: xwayland_surface_v1::Request,
        data: &XwaylandSurfaceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xwayland_surface_v1::Request::SetSerial { serial_lo, serial_hi } => {
                let serial = serial_lo as u64 | ((serial_hi as u64) << 32);

                let mut st = data.state.lock().unwrap();
                if st.associated {
                    resource.post_error(
                        xwayland_surface_v1::Error::AlreadyAssociated,
                        "xwayland_surface was already associated with an X11 window",
                    );
                    return;
                }
                st.serial = Some(serial);
                st.pending_association = true;
            },
            xwayland_surface_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &XwaylandSurfaceV1,
        _data: &XwaylandSurfaceData,
    ) {
        state.xwm_unpaired_surface_destroyed(resource);
    }
}

impl ServerState {
    /// Commit hook for surfaces with the xwayland role: a staged serial
    /// becomes a real association on the first commit after `set_serial`.
    pub fn xwayland_surface_pre_commit(&mut self, xwayland_surface: &XwaylandSurfaceV1) {
        let data = xwayland_surface_data(xwayland_surface);
        let serial = {
            let mut st = data.state.lock().unwrap();
            if st.associated || !st.pending_association {
                return;
            }
            st.pending_association = false;
            st.associated = true;
            st.serial
        };

        if let Some(serial) = serial {
            self.xwm_serial_associated(xwayland_surface, serial);
        }
    }
}
