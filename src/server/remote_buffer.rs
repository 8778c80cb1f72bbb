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

//! Refcounted pool of 1x1 solid-colour buffers on the outer shm.
//!
//! Used for the root background and scripted solid rectangles; the colour is
//! stretched by a viewport. At most 64 distinct colours are live at once.

use std::ffi::CStr;
use std::fs::File;
use std::os::unix::fs::FileExt;

use nix::sys::memfd::MFdFlags;
use nix::sys::memfd::memfd_create;
use wayland_client::Proxy;
use wayland_client::QueueHandle;
use wayland_client::protocol::wl_buffer::WlBuffer as OuterWlBuffer;
use wayland_client::protocol::wl_shm;
use wayland_client::protocol::wl_shm_pool::WlShmPool as OuterWlShmPool;
use wayland_server::protocol::wl_buffer::WlBuffer;

use crate::prelude::*;
use crate::server::OuterRef;
use crate::server::ServerState;
use crate::server::backend::Backend;

pub const MAX_COLORS: usize = 64;

#[derive(Debug)]
struct ColorSlot {
    argb: u32,
    offset: i32,
    buffer: Option<OuterWlBuffer>,
    refcount: usize,
}

pub struct RemoteBufferManager {
    pool: OuterWlShmPool,
    file: File,
    qh: QueueHandle<ServerState>,
    next_offset: i32,
    colors: Vec<ColorSlot>,
}

fn pack_argb(rgba: [u8; 4]) -> u32 {
    let [r, g, b, a] = rgba;
    ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

impl RemoteBufferManager {
    pub fn new(backend: &Backend) -> Result<Self> {
        let size = (MAX_COLORS * 4) as i32;

        let name = CStr::from_bytes_with_nul(b"nestwall-colors\0").unwrap();
        let fd = memfd_create(name, MFdFlags::MFD_CLOEXEC).location(loc!())?;
        let file = File::from(fd);
        file.set_len(size as u64).location(loc!())?;

        use std::os::fd::AsFd;
        let pool = backend
            .shm
            .create_pool(file.as_fd(), size, &backend.qh, ());

        Ok(Self {
            pool,
            file,
            qh: backend.qh.clone(),
            next_offset: 0,
            colors: Vec::new(),
        })
    }

    /// Returns a 1x1 buffer of the given colour, incrementing its refcount.
    pub fn color(&mut self, rgba: [u8; 4]) -> Result<OuterWlBuffer> {
        let argb = pack_argb(rgba);

        if let Some(slot) = self.colors.iter_mut().find(|slot| slot.argb == argb) {
            slot.refcount += 1;
            if let Some(buffer) = &slot.buffer {
                return Ok(buffer.clone());
            }
            let buffer = create_color_buffer(&self.pool, &self.qh, slot.offset);
            slot.buffer = Some(buffer.clone());
            return Ok(buffer);
        }

        let offset = if let Some(free) = self
            .colors
            .iter()
            .position(|slot| slot.refcount == 0 && slot.buffer.is_none())
        {
            let slot = self.colors.remove(free);
            slot.offset
        } else {
            if self.colors.len() == MAX_COLORS {
                bail!("colour pool exhausted ({MAX_COLORS} colours live)");
            }
            let offset = self.next_offset;
            self.next_offset += 4;
            offset
        };

        self.file
            .write_all_at(&argb.to_le_bytes(), offset as u64)
            .location(loc!())?;

        let buffer = create_color_buffer(&self.pool, &self.qh, offset);
        self.colors.push(ColorSlot {
            argb,
            offset,
            buffer: Some(buffer.clone()),
            refcount: 1,
        });
        Ok(buffer)
    }

    /// Drops one reference; the outer buffer is destroyed when the last
    /// reference goes.
    pub fn release(&mut self, buffer: &OuterWlBuffer) {
        let Some(slot) = self.colors.iter_mut().find(|slot| {
            slot.buffer
                .as_ref()
                .is_some_and(|slot_buffer| slot_buffer.id() == buffer.id())
        }) else {
            warn!("released a colour buffer the pool does not own");
            return;
        };

        slot.refcount = slot.refcount.saturating_sub(1);
        if slot.refcount == 0 {
            if let Some(buffer) = slot.buffer.take() {
                buffer.destroy();
            }
        }
    }
}

fn create_color_buffer(
    pool: &OuterWlShmPool,
    qh: &QueueHandle<ServerState>,
    offset: i32,
) -> OuterWlBuffer {
    pool.create_buffer(
        offset,
        1,
        1,
        4,
        wl_shm::Format::Argb8888,
        qh,
        OuterRef::<WlBuffer>::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::pack_argb;

    #[test]
    fn packs_argb_little_endian_pixel() {
        assert_eq!(pack_argb([0, 0, 0, 255]), 0xff000000);
        assert_eq!(pack_argb([255, 0, 0, 255]), 0xffff0000);
        assert_eq!(pack_argb([1, 2, 3, 4]), 0x04010203);
    }
}
