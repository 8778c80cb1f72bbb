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

//! Inner `wl_drm` relay.
//!
//! Mesa only binds this to discover the render device; every buffer-creation
//! request is a linux-dmabuf fallback that should never fire here, so they
//! are all refused. Each inner bind gets its own outer `wl_drm` so the
//! device/format events replay naturally.

use wayland_client::Connection;
use wayland_client::Proxy;
use wayland_client::QueueHandle;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;

use crate::prelude::*;
use crate::protocol::drm::client::wl_drm as outer_drm;
use crate::protocol::drm::client::wl_drm::WlDrm as OuterWlDrm;
use crate::protocol::drm::server::wl_drm;
use crate::protocol::drm::server::wl_drm::WlDrm;
use crate::server::buffer::BufferData;
use crate::server::OuterRef;
use crate::server::ServerState;
use crate::server::post_implementation_error;

pub const DRM_VERSION: u32 = 2;

/// User data of an inner `wl_drm`.
#[derive(Debug)]
pub struct DrmData {
    pub remote: OuterWlDrm,
}

impl GlobalDispatch<WlDrm, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlDrm>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(drm_global) = state.backend.drm else {
            // The global is only created when the host advertises wl_drm.
            unreachable!("wl_drm global exists without a host wl_drm");
        };

        let qh = state.backend.qh.clone();
        let remote: OuterWlDrm = state.backend.registry.bind(
            drm_global.name,
            DRM_VERSION.min(drm_global.version),
            &qh,
            OuterRef::<WlDrm>::new(),
        );

        let drm = data_init.init(resource, DrmData { remote: remote.clone() });
        remote
            .data::<OuterRef<WlDrm>>()
            .unwrap()
            .set(drm.downgrade());
    }
}

impl Dispatch<WlDrm, DrmData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &WlDrm,
        request: wl_drm::Request,
        _data: &DrmData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_drm::Request::Authenticate { .. } => {
                post_implementation_error(resource, "wl_drm.authenticate is not implemented");
            },
            wl_drm::Request::CreateBuffer { id, .. } => {
                data_init.init(id, BufferData::invalid());
                post_implementation_error(resource, "wl_drm.create_buffer is not implemented");
            },
            wl_drm::Request::CreatePlanarBuffer { id, .. } => {
                data_init.init(id, BufferData::invalid());
                post_implementation_error(
                    resource,
                    "wl_drm.create_planar_buffer is not implemented",
                );
            },
            wl_drm::Request::CreatePrimeBuffer { id, name, .. } => {
                // Mesa only falls back to this when linux-dmabuf is missing,
                // which cannot happen: the dmabuf global is mandatory.
                data_init.init(id, BufferData::invalid());
                post_implementation_error(
                    resource,
                    "wl_drm.create_prime_buffer is not implemented",
                );
                drop(name);
            },
            _ => unreachable!(),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        _resource: &WlDrm,
        data: &DrmData,
    ) {
        // wl_drm has no destructor request; the outer object lives until the
        // connection closes. Mesa performs a handful of binds at most.
        let _ = &data.remote;
    }
}

impl wayland_client::Dispatch<OuterWlDrm, OuterRef<WlDrm>> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlDrm,
        event: outer_drm::Event,
        data: &OuterRef<WlDrm>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(inner) = data.get() else {
            return;
        };

        match event {
            outer_drm::Event::Device { name } => inner.device(name),
            outer_drm::Event::Format { format } => inner.format(format),
            outer_drm::Event::Authenticated => inner.authenticated(),
            outer_drm::Event::Capabilities { value } => inner.capabilities(value),
            _ => {},
        }
    }
}
