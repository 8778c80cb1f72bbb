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

//! Inner `zxdg_decoration_manager_v1`. Decorations are always announced as
//! server-side, whatever the client asks for: the real decoration is the
//! host's, on our root toplevel.

use std::sync::Mutex;

use wayland_protocols::xdg::decoration::zv1::server::zxdg_decoration_manager_v1;
use wayland_protocols::xdg::decoration::zv1::server::zxdg_decoration_manager_v1::ZxdgDecorationManagerV1;
use wayland_protocols::xdg::decoration::zv1::server::zxdg_toplevel_decoration_v1;
use wayland_protocols::xdg::decoration::zv1::server::zxdg_toplevel_decoration_v1::ZxdgToplevelDecorationV1;
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;

use crate::server::ServerState;
use crate::server::surface::surface_data;
use crate::server::xdg_shell::toplevel_data;
use crate::server::xdg_shell::xdg_surface_data;

pub const XDG_DECORATION_VERSION: u32 = 1;

/// Which toplevels already carry a decoration object.
#[derive(Debug, Default)]
pub struct DecorationGlobal {
    pub decorations: Vec<ZxdgToplevelDecorationV1>,
}

/// User data of an inner `zxdg_toplevel_decoration_v1`.
#[derive(Debug)]
pub struct DecorationData {
    pub toplevel: Mutex<XdgToplevel>,
}

impl GlobalDispatch<ZxdgDecorationManagerV1, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZxdgDecorationManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<ZxdgDecorationManagerV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &ZxdgDecorationManagerV1,
        request: zxdg_decoration_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zxdg_decoration_manager_v1::Request::GetToplevelDecoration { id, toplevel } => {
                let duplicate = state.decorations.decorations.iter().any(|decoration| {
                    decoration
                        .data::<DecorationData>()
                        .is_some_and(|data| *data.toplevel.lock().unwrap() == toplevel)
                });

                let decoration = data_init.init(
                    id,
                    DecorationData {
                        toplevel: Mutex::new(toplevel.clone()),
                    },
                );

                if duplicate {
                    decoration.post_error(
                        zxdg_toplevel_decoration_v1::Error::AlreadyConstructed,
                        "xdg_toplevel already has an associated zxdg_toplevel_decoration",
                    );
                    return;
                }

                {
                    let xdg_surface = &toplevel_data(&toplevel).xdg_surface;
                    let surface = &xdg_surface_data(xdg_surface).surface;
                    let inner = surface_data(surface).inner.lock().unwrap();
                    if inner.current.buffer.is_some()
                        || inner.pending.buffer.as_ref().is_some_and(Option::is_some)
                    {
                        decoration.post_error(
                            zxdg_toplevel_decoration_v1::Error::AlreadyConstructed,
                            "xdg_toplevel associated with new zxdg_toplevel_decoration already has an attached buffer",
                        );
                        return;
                    }
                }

                decoration.configure(zxdg_toplevel_decoration_v1::Mode::ServerSide);
                let xdg_surface = toplevel_data(&toplevel).xdg_surface.clone();
                state.send_xdg_configure(&xdg_surface);

                state.decorations.decorations.push(decoration);
            },
            zxdg_decoration_manager_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZxdgToplevelDecorationV1, DecorationData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &ZxdgToplevelDecorationV1,
        request: zxdg_toplevel_decoration_v1::Request,
        data: &DecorationData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zxdg_toplevel_decoration_v1::Request::SetMode { .. }
            | zxdg_toplevel_decoration_v1::Request::UnsetMode => {
                // Server-side, regardless of the request.
                resource.configure(zxdg_toplevel_decoration_v1::Mode::ServerSide);
                let xdg_surface = toplevel_data(&data.toplevel.lock().unwrap()).xdg_surface.clone();
                state.send_xdg_configure(&xdg_surface);
            },
            zxdg_toplevel_decoration_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &ZxdgToplevelDecorationV1,
        _data: &DecorationData,
    ) {
        state
            .decorations
            .decorations
            .retain(|decoration| decoration.id() != resource.id());
    }
}
