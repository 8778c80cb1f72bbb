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

//! Inner `wl_buffer` resources and their outer counterparts.
//!
//! Every inner buffer owns at most one outer buffer. A buffer starts out
//! `Invalid` when it is created through a path that can fail asynchronously
//! (dmabuf); using an invalid buffer is a protocol error. The outer buffer's
//! `release` event is forwarded to the inner resource.

use std::os::fd::OwnedFd;
use std::sync::Mutex;

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_client::protocol::wl_buffer::Event as OuterBufferEvent;
use wayland_client::protocol::wl_buffer::WlBuffer as OuterWlBuffer;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::Resource;
use wayland_server::protocol::wl_buffer;
use wayland_server::protocol::wl_buffer::WlBuffer;

use crate::prelude::*;
use crate::server::OuterRef;
use crate::server::ServerState;

#[derive(Debug)]
pub struct DmabufPlane {
    pub fd: OwnedFd,
    pub offset: u32,
    pub stride: u32,
    pub modifier: u64,
}

#[derive(Debug)]
pub enum BufferBacking {
    /// Creation has not (yet) succeeded. Attaching this buffer is an error.
    Invalid,
    Shm {
        remote: OuterWlBuffer,
        fd: OwnedFd,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: u32,
    },
    Dmabuf {
        remote: OuterWlBuffer,
        width: i32,
        height: i32,
        format: u32,
        planes: Vec<DmabufPlane>,
    },
}

impl BufferBacking {
    pub fn remote(&self) -> Option<&OuterWlBuffer> {
        match self {
            BufferBacking::Invalid => None,
            BufferBacking::Shm { remote, .. } | BufferBacking::Dmabuf { remote, .. } => {
                Some(remote)
            },
        }
    }

    pub fn size(&self) -> Option<(i32, i32)> {
        match self {
            BufferBacking::Invalid => None,
            BufferBacking::Shm { width, height, .. }
            | BufferBacking::Dmabuf { width, height, .. } => Some((*width, *height)),
        }
    }
}

/// User data of an inner `wl_buffer`.
#[derive(Debug)]
pub struct BufferData {
    pub backing: Mutex<BufferBacking>,
}

impl BufferData {
    pub fn new(backing: BufferBacking) -> Self {
        Self {
            backing: Mutex::new(backing),
        }
    }

    pub fn invalid() -> Self {
        Self::new(BufferBacking::Invalid)
    }

    pub fn remote(&self) -> Option<OuterWlBuffer> {
        self.backing.lock().unwrap().remote().cloned()
    }

    pub fn size(&self) -> Option<(i32, i32)> {
        self.backing.lock().unwrap().size()
    }
}

impl Dispatch<WlBuffer, BufferData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlBuffer,
        request: wl_buffer::Request,
        _data: &BufferData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_buffer::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        _resource: &WlBuffer,
        data: &BufferData,
    ) {
        let backing = data.backing.lock().unwrap();
        if let Some(remote) = backing.remote() {
            remote.destroy();
        }
        // Plane/pool fds close when the backing drops.
    }
}

impl wayland_client::Dispatch<OuterWlBuffer, OuterRef<WlBuffer>> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterWlBuffer,
        event: OuterBufferEvent,
        data: &OuterRef<WlBuffer>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            OuterBufferEvent::Release => {
                let Some(inner) = data.get() else {
                    return;
                };
                inner.release();
            },
            _ => {},
        }
    }
}

/// Looks up the inner buffer state behind a `wl_buffer` resource.
pub fn buffer_data(buffer: &WlBuffer) -> &BufferData {
    buffer.data::<BufferData>().expect("wl_buffer without BufferData")
}
