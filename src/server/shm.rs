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

//! Inner `wl_shm` / `wl_shm_pool` relay.
//!
//! Pools are forwarded 1:1 onto the outer `wl_shm`; buffer creation is
//! validated against the tracked pool size and the host's format set before
//! being forwarded.

use std::os::fd::AsFd;
use std::os::fd::OwnedFd;
use std::sync::Mutex;

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_client::protocol::wl_shm::Event as OuterShmEvent;
use wayland_client::protocol::wl_shm::WlShm as OuterWlShm;
use wayland_client::protocol::wl_shm_pool::WlShmPool as OuterWlShmPool;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_shm;
use wayland_server::protocol::wl_shm::WlShm;
use wayland_server::protocol::wl_shm_pool;
use wayland_server::protocol::wl_shm_pool::WlShmPool;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::buffer::BufferBacking;
use crate::server::buffer::BufferData;
use crate::server::buffer::buffer_data;
use crate::server::OuterRef;
use crate::server::wenum_raw;

pub const SHM_VERSION: u32 = 1;

/// Inner `wl_shm` bookkeeping: live resources for format fan-out.
#[derive(Debug, Default)]
pub struct ShmGlobal {
    pub resources: Vec<WlShm>,
}

/// User data of an inner `wl_shm_pool`.
#[derive(Debug)]
pub struct ShmPoolData {
    pub remote: OuterWlShmPool,
    pub fd: OwnedFd,
    pub size: Mutex<i32>,
}

impl GlobalDispatch<WlShm, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlShm>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());

        for format in &state.backend.shm_formats {
            if let Ok(format) = wl_shm::Format::try_from(*format) {
                shm.format(format);
            }
        }

        state.shm.resources.push(shm);
    }
}

impl Dispatch<WlShm, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm::Request::CreatePool { id, fd, size } => {
                if size <= 0 {
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!("invalid wl_shm_pool size {size}"),
                    );
                    return;
                }

                let qh = state.backend.qh.clone();
                let remote = state.backend.shm.create_pool(fd.as_fd(), size, &qh, ());
                data_init.init(
                    id,
                    ShmPoolData {
                        remote,
                        fd,
                        size: Mutex::new(size),
                    },
                );
            },
            _ => {},
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WlShm,
        _data: &(),
    ) {
        state.shm.resources.retain(|shm| shm.id() != resource.id());
    }
}

impl Dispatch<WlShmPool, ShmPoolData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlShmPool,
        request: wl_shm_pool::Request,
        data: &ShmPoolData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let pool_size = *data.size.lock().unwrap();
                let end = offset as i64 + height as i64 * stride as i64;
                if offset < 0 || end > pool_size as i64 {
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!(
                            "create_buffer: ({offset} + {height}x{stride}) exceeds pool size ({pool_size})"
                        ),
                    );
                    return;
                }

                let raw_format = wenum_raw(format);
                if !state.backend.shm_formats.contains(&raw_format) {
                    resource.post_error(
                        wl_shm::Error::InvalidFormat,
                        format!("create_buffer: invalid format {raw_format:#x}"),
                    );
                    return;
                }
                let Ok(outer_format) =
                    wayland_client::protocol::wl_shm::Format::try_from(raw_format)
                else {
                    resource.post_error(
                        wl_shm::Error::InvalidFormat,
                        format!("create_buffer: unknown format {raw_format:#x}"),
                    );
                    return;
                };

                let Ok(fd) = data.fd.try_clone() else {
                    post_no_memory(resource);
                    return;
                };

                let buffer = data_init.init(id, BufferData::invalid());
                let qh = state.backend.qh.clone();
                let remote = data.remote.create_buffer(
                    offset,
                    width,
                    height,
                    stride,
                    outer_format,
                    &qh,
                    OuterRef::with(buffer.downgrade()),
                );

                *buffer_data(&buffer).backing.lock().unwrap() = BufferBacking::Shm {
                    remote,
                    fd,
                    offset,
                    width,
                    height,
                    stride,
                    format: raw_format,
                };
            },
            wl_shm_pool::Request::Resize { size } => {
                let mut pool_size = data.size.lock().unwrap();
                if size < *pool_size {
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!("cannot shrink wl_shm_pool ({} -> {size})", *pool_size),
                    );
                    return;
                }
                *pool_size = size;
                data.remote.resize(size);
            },
            wl_shm_pool::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        _resource: &WlShmPool,
        data: &ShmPoolData,
    ) {
        data.remote.destroy();
    }
}

fn post_no_memory(resource: &WlShmPool) {
    // wl_display error code `no_memory` (no generated `wl_display` module
    // exists server-side, since wl_display is handled specially).
    const WL_DISPLAY_ERROR_NO_MEMORY: u32 = 2;
    resource.post_error(WL_DISPLAY_ERROR_NO_MEMORY, "out of file descriptors");
}

impl wayland_client::Dispatch<OuterWlShm, ()> for ServerState {
    fn event(
        state: &mut Self,
        _proxy: &OuterWlShm,
        event: OuterShmEvent,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            OuterShmEvent::Format { format } => {
                let raw = wenum_raw(format);
                state.backend.shm_formats.push(raw);

                // Formats seen after an inner client already bound wl_shm are
                // forwarded to it as well.
                if let Ok(format) = wl_shm::Format::try_from(raw) {
                    for shm in &state.shm.resources {
                        shm.format(format);
                    }
                }
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<OuterWlShmPool, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlShmPool,
        event: wayland_client::protocol::wl_shm_pool::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let _ = event; // wl_shm_pool has no events
    }
}
