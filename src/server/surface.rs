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

//! Inner `wl_compositor`, `wl_surface`, and `wl_region`.
//!
//! Each inner surface owns an outer surface and double-buffers its state:
//! requests accumulate into `pending`, and `commit` translates the delta into
//! the minimal set of outer requests. Roles are exclusive per surface; role
//! conflicts are protocol errors.

use std::sync::Mutex;

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_client::protocol::wl_callback::Event as OuterCallbackEvent;
use wayland_client::protocol::wl_callback::WlCallback as OuterWlCallback;
use wayland_client::protocol::wl_region::WlRegion as OuterWlRegion;
use wayland_client::protocol::wl_surface::Event as OuterSurfaceEvent;
use wayland_client::protocol::wl_surface::WlSurface as OuterWlSurface;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::Weak;
use wayland_server::protocol::wl_callback::WlCallback;
use wayland_server::protocol::wl_compositor;
use wayland_server::protocol::wl_compositor::WlCompositor;
use wayland_server::protocol::wl_region;
use wayland_server::protocol::wl_region::WlRegion;
use wayland_server::protocol::wl_surface;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::buffer::buffer_data;
use crate::server::post_implementation_error;

pub const COMPOSITOR_VERSION: u32 = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegionOp {
    pub add: bool,
    pub rect: Rect,
}

/// Exclusive behavioural tag attached to a surface.
#[derive(Clone, Debug, Default)]
pub enum Role {
    #[default]
    None,
    Cursor,
    XdgToplevel {
        xdg_surface: wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface,
    },
    Xwayland {
        xwayland_surface: wayland_protocols::xwayland::shell::v1::server::xwayland_surface_v1::XwaylandSurfaceV1,
    },
}

impl Role {
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Role::None => None,
            Role::Cursor => Some("cursor"),
            Role::XdgToplevel { .. } => Some("xdg_toplevel"),
            Role::Xwayland { .. } => Some("xwayland_surface"),
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingState {
    /// `Some(None)` is a null attach.
    pub buffer: Option<Option<wayland_server::protocol::wl_buffer::WlBuffer>>,
    pub damage: Vec<Rect>,
    pub buffer_damage: Vec<Rect>,
    pub scale: Option<i32>,
    pub opaque: Option<Vec<RegionOp>>,
}

impl PendingState {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_none()
            && self.damage.is_empty()
            && self.buffer_damage.is_empty()
            && self.scale.is_none()
            && self.opaque.is_none()
    }
}

#[derive(Debug)]
pub struct CurrentState {
    pub buffer: Option<wayland_server::protocol::wl_buffer::WlBuffer>,
    pub scale: i32,
}

impl Default for CurrentState {
    fn default() -> Self {
        Self {
            buffer: None,
            scale: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct SurfaceInner {
    pub pending: PendingState,
    pub current: CurrentState,
    pub role: Role,
}

/// User data of an inner `wl_surface`.
#[derive(Debug)]
pub struct SurfaceData {
    pub remote: OuterWlSurface,
    pub inner: Mutex<SurfaceInner>,
}

pub fn surface_data(surface: &WlSurface) -> &SurfaceData {
    surface.data::<SurfaceData>().expect("wl_surface without SurfaceData")
}

/// Assigns `role` to the surface. Assigning the same role twice is
/// idempotent; assigning a different role fails.
pub fn set_role(surface: &WlSurface, role: Role) -> Result<()> {
    let data = surface_data(surface);
    let mut inner = data.inner.lock().unwrap();
    match (&inner.role, &role) {
        (Role::None, _)
        | (Role::Cursor, Role::Cursor)
        | (Role::XdgToplevel { .. }, Role::XdgToplevel { .. })
        | (Role::Xwayland { .. }, Role::Xwayland { .. }) => {
            inner.role = role;
            Ok(())
        },
        (have, want) => bail!(
            "surface already has role {:?}, cannot assign {:?}",
            have.name(),
            want.name()
        ),
    }
}

/// User data of an inner `wl_region`. The op list is replayed onto a fresh
/// outer region at commit time.
#[derive(Debug)]
pub struct RegionData {
    pub remote: OuterWlRegion,
    pub ops: Mutex<Vec<RegionOp>>,
}

impl GlobalDispatch<WlCompositor, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WlCompositor, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let qh = state.backend.qh.clone();
                let remote = state.backend.compositor.create_surface(&qh, ());

                // Input must never be routed to a child surface; some hosts
                // deliver events through to subsurfaces unless the input
                // region is explicitly empty.
                let empty = state.backend.compositor.create_region(&qh, ());
                remote.set_input_region(Some(&empty));
                empty.destroy();

                let surface = data_init.init(
                    id,
                    SurfaceData {
                        remote,
                        inner: Mutex::new(SurfaceInner::default()),
                    },
                );

                state.on_new_inner_surface(client, &surface);
            },
            wl_compositor::Request::CreateRegion { id } => {
                let qh = state.backend.qh.clone();
                let remote = state.backend.compositor.create_region(&qh, ());
                data_init.init(
                    id,
                    RegionData {
                        remote,
                        ops: Mutex::new(Vec::new()),
                    },
                );
            },
            _ => {
                post_implementation_error(resource, "unknown wl_compositor request");
            },
        }
    }
}

impl Dispatch<WlRegion, RegionData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlRegion,
        request: wl_region::Request,
        data: &RegionData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_region::Request::Add { x, y, width, height } => {
                data.remote.add(x, y, width, height);
                data.ops.lock().unwrap().push(RegionOp {
                    add: true,
                    rect: Rect { x, y, width, height },
                });
            },
            wl_region::Request::Subtract { x, y, width, height } => {
                data.remote.subtract(x, y, width, height);
                data.ops.lock().unwrap().push(RegionOp {
                    add: false,
                    rect: Rect { x, y, width, height },
                });
            },
            wl_region::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        _resource: &WlRegion,
        data: &RegionData,
    ) {
        data.remote.destroy();
    }
}

impl Dispatch<WlSurface, SurfaceData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlSurface,
        request: wl_surface::Request,
        data: &SurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                if x != 0 || y != 0 {
                    if resource.version() >= 5 {
                        resource.post_error(
                            wl_surface::Error::InvalidOffset,
                            "non-zero offset provided to wl_surface.attach",
                        );
                    } else {
                        // GLFW and the Xserver never do this; Mesa passes
                        // explicit zeroes.
                        post_implementation_error(
                            resource,
                            "non-zero offset provided to wl_surface.attach",
                        );
                    }
                    return;
                }
                data.inner.lock().unwrap().pending.buffer = Some(buffer);
            },
            wl_surface::Request::Damage { x, y, width, height } => {
                data.inner.lock().unwrap().pending.damage.push(Rect {
                    x,
                    y,
                    width,
                    height,
                });
            },
            wl_surface::Request::DamageBuffer { x, y, width, height } => {
                data.inner.lock().unwrap().pending.buffer_damage.push(Rect {
                    x,
                    y,
                    width,
                    height,
                });
            },
            wl_surface::Request::SetBufferScale { scale } => {
                if scale <= 0 {
                    resource.post_error(wl_surface::Error::InvalidScale, "scale not positive");
                    return;
                }
                data.inner.lock().unwrap().pending.scale = Some(scale);
            },
            wl_surface::Request::SetOpaqueRegion { region } => {
                let ops = match &region {
                    Some(region) => region
                        .data::<RegionData>()
                        .map(|data| data.ops.lock().unwrap().clone())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                data.inner.lock().unwrap().pending.opaque = Some(ops);
            },
            wl_surface::Request::SetInputRegion { .. } => {
                // Ignored. Input is gated by the UI; the outer surface keeps
                // its permanently-empty input region.
            },
            wl_surface::Request::SetBufferTransform { .. } => {
                post_implementation_error(resource, "wl_surface.set_buffer_transform is not supported");
            },
            wl_surface::Request::Offset { .. } => {
                post_implementation_error(resource, "wl_surface.offset is not supported");
            },
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, ());
                let qh = state.backend.qh.clone();
                data.remote.frame(&qh, callback.downgrade());
            },
            wl_surface::Request::Commit => {
                state.commit_surface(resource);
            },
            wl_surface::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WlSurface,
        data: &SurfaceData,
    ) {
        state.on_surface_destroyed(resource, data);
        data.remote.destroy();
    }
}

impl Dispatch<WlCallback, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlCallback,
        _request: wayland_server::protocol::wl_callback::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // wl_callback has no requests.
    }
}

impl ServerState {
    /// Applies a surface's pending state to its outer counterpart.
    fn commit_surface(&mut self, surface: &WlSurface) {
        let data = surface_data(surface);

        let (pending, role, next_buffer) = {
            let mut inner = data.inner.lock().unwrap();
            let pending = std::mem::take(&mut inner.pending);
            let next_buffer = match &pending.buffer {
                Some(buffer) => buffer.clone(),
                None => inner.current.buffer.clone(),
            };
            (pending, inner.role.clone(), next_buffer)
        };

        // Role hooks observe the commit before it is applied so they can
        // inspect the buffer this commit will leave attached.
        if !self.pre_commit(surface, &role, &pending, next_buffer.as_ref()) {
            return;
        }

        if let Some(buffer) = &pending.buffer {
            match buffer {
                Some(buffer) => {
                    let buffer_data = buffer_data(buffer);
                    match buffer_data.remote() {
                        Some(remote) => data.remote.attach(Some(&remote), 0, 0),
                        None => {
                            post_implementation_error(
                                surface,
                                "attached wl_buffer was never successfully created",
                            );
                            return;
                        },
                    }
                },
                None => data.remote.attach(None, 0, 0),
            }
        }

        for rect in &pending.damage {
            data.remote.damage(rect.x, rect.y, rect.width, rect.height);
        }
        for rect in &pending.buffer_damage {
            data.remote
                .damage_buffer(rect.x, rect.y, rect.width, rect.height);
        }

        if let Some(scale) = pending.scale {
            data.remote.set_buffer_scale(scale);
        }

        if let Some(ops) = &pending.opaque {
            let qh = self.backend.qh.clone();
            let region = self.backend.compositor.create_region(&qh, ());
            for op in ops {
                if op.add {
                    region.add(op.rect.x, op.rect.y, op.rect.width, op.rect.height);
                } else {
                    region.subtract(op.rect.x, op.rect.y, op.rect.width, op.rect.height);
                }
            }
            data.remote.set_opaque_region(Some(&region));
            region.destroy();
        }

        {
            let mut inner = data.inner.lock().unwrap();
            if let Some(buffer) = &pending.buffer {
                inner.current.buffer = buffer.clone();
            }
            if let Some(scale) = pending.scale {
                inner.current.scale = scale;
            }
        }

        data.remote.commit();

        self.post_commit(surface, &role, next_buffer.as_ref());
    }

    /// Pre-apply role hooks. Returns false when the commit must not proceed
    /// (a protocol error has been posted).
    fn pre_commit(
        &mut self,
        surface: &WlSurface,
        role: &Role,
        pending: &PendingState,
        next_buffer: Option<&wayland_server::protocol::wl_buffer::WlBuffer>,
    ) -> bool {
        match role {
            // A destroyed role object leaves the role tag behind; there is
            // nothing left to consult then.
            Role::XdgToplevel { xdg_surface } if xdg_surface.is_alive() => {
                self.xdg_surface_pre_commit(surface, xdg_surface, pending, next_buffer)
            },
            Role::Xwayland { xwayland_surface } if xwayland_surface.is_alive() => {
                self.xwayland_surface_pre_commit(xwayland_surface);
                true
            },
            _ => true,
        }
    }

    fn post_commit(
        &mut self,
        surface: &WlSurface,
        role: &Role,
        next_buffer: Option<&wayland_server::protocol::wl_buffer::WlBuffer>,
    ) {
        match role {
            Role::Xwayland { .. } => {
                self.xwm_surface_committed(surface, next_buffer.is_some());
            },
            _ => {},
        }

        self.view_surface_committed(surface, next_buffer);
    }

    /// A freshly created inner surface; the XWM may be waiting to pair it
    /// with an X11 window by object id.
    fn on_new_inner_surface(&mut self, client: &Client, surface: &WlSurface) {
        if self.client_is_xwayland(client) {
            self.xwm_try_pair_by_id(surface);
        }
    }

    fn on_surface_destroyed(&mut self, surface: &WlSurface, data: &SurfaceData) {
        let role = data.inner.lock().unwrap().role.clone();
        match &role {
            Role::XdgToplevel { xdg_surface } if xdg_surface.is_alive() => {
                self.xdg_surface_parent_destroyed(xdg_surface);
            },
            _ => {},
        }

        self.xwm_surface_destroyed(surface);
        self.destroy_view_for_surface(surface);
        self.constraints_surface_destroyed(surface);
    }
}

impl wayland_client::Dispatch<OuterWlSurface, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlSurface,
        _event: OuterSurfaceEvent,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // enter/leave and preferred scale are irrelevant: inner clients only
        // ever see the synthetic output.
    }
}

impl wayland_client::Dispatch<OuterWlRegion, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlRegion,
        event: wayland_client::protocol::wl_region::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let _ = event; // wl_region has no events
    }
}

impl wayland_client::Dispatch<OuterWlCallback, Weak<WlCallback>> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlCallback,
        event: OuterCallbackEvent,
        data: &Weak<WlCallback>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            OuterCallbackEvent::Done { callback_data } => {
                if let Ok(inner) = data.upgrade() {
                    inner.done(callback_data);
                }
            },
            _ => {},
        }
    }
}
