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

//! Inner `zwp_relative_pointer_manager_v1`.
//!
//! Relative motion from the host is scaled by the configured sensitivity.
//! The game's aim code is sensitive to sub-pixel motion, so only the integer
//! part of the accumulated delta is forwarded and the fractional residual is
//! carried into the next event.

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_protocols::wp::relative_pointer::zv1::client::zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1 as OuterRelativePointerManager;
use wayland_protocols::wp::relative_pointer::zv1::client::zwp_relative_pointer_v1 as outer_relative;
use wayland_protocols::wp::relative_pointer::zv1::client::zwp_relative_pointer_v1::ZwpRelativePointerV1 as OuterRelativePointer;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_protocols::wp::relative_pointer::zv1::server::zwp_relative_pointer_manager_v1;
use wayland_protocols::wp::relative_pointer::zv1::server::zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1;
use wayland_protocols::wp::relative_pointer::zv1::server::zwp_relative_pointer_v1;
use wayland_protocols::wp::relative_pointer::zv1::server::zwp_relative_pointer_v1::ZwpRelativePointerV1;

use crate::prelude::*;
use crate::server::ServerState;

pub const RELATIVE_POINTER_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct RelativePointer {
    pub resources: Vec<ZwpRelativePointerV1>,
    pub outer: Option<OuterRelativePointer>,
    pub sensitivity: f64,
    acc_x: f64,
    acc_y: f64,
}

impl RelativePointer {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            sensitivity,
            ..Self::default()
        }
    }

    /// Scales a delta and returns the whole-pixel part, retaining the
    /// fraction.
    pub fn accumulate(&mut self, dx: f64, dy: f64) -> (f64, f64) {
        self.acc_x += dx * self.sensitivity;
        self.acc_y += dy * self.sensitivity;

        let out_x = self.acc_x.trunc();
        let out_y = self.acc_y.trunc();
        self.acc_x -= out_x;
        self.acc_y -= out_y;
        (out_x, out_y)
    }
}

impl GlobalDispatch<ZwpRelativePointerManagerV1, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZwpRelativePointerManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<ZwpRelativePointerManagerV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &ZwpRelativePointerManagerV1,
        request: zwp_relative_pointer_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_relative_pointer_manager_v1::Request::GetRelativePointer { id, .. } => {
                let relative_pointer = data_init.init(id, ());
                state.relative.resources.push(relative_pointer);
            },
            zwp_relative_pointer_manager_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpRelativePointerV1, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &ZwpRelativePointerV1,
        request: zwp_relative_pointer_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_relative_pointer_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &ZwpRelativePointerV1,
        _data: &(),
    ) {
        state
            .relative
            .resources
            .retain(|relative_pointer| relative_pointer.id() != resource.id());
    }
}

impl ServerState {
    /// The host pointer appeared or disappeared; recreate the outer relative
    /// pointer accordingly.
    pub fn relative_pointer_reconcile(&mut self) {
        if let Some(outer) = self.relative.outer.take() {
            outer.destroy();
        }

        if let Some(pointer) = &self.backend.host_pointer {
            let qh = self.backend.qh.clone();
            self.relative.outer = Some(
                self.backend
                    .relative_pointer_manager
                    .get_relative_pointer(pointer, &qh, ()),
            );
        }
    }
}

impl wayland_client::Dispatch<OuterRelativePointer, ()> for ServerState {
    fn event(
        state: &mut Self,
        _proxy: &OuterRelativePointer,
        event: outer_relative::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            outer_relative::Event::RelativeMotion {
                utime_hi,
                utime_lo,
                dx,
                dy,
                dx_unaccel,
                dy_unaccel,
            } => {
                let (out_x, out_y) = state.relative.accumulate(dx, dy);
                let (out_ux, out_uy) = (dx_unaccel * state.relative.sensitivity, dy_unaccel * state.relative.sensitivity);

                if out_x == 0.0 && out_y == 0.0 {
                    return;
                }

                let Some(client) = state.focused_client() else {
                    return;
                };
                for relative_pointer in &state.relative.resources {
                    let matches = relative_pointer
                        .client()
                        .is_some_and(|resource_client| resource_client.id() == client.id());
                    if matches {
                        relative_pointer.relative_motion(
                            utime_hi, utime_lo, out_x, out_y, out_ux, out_uy,
                        );
                    }
                }
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<OuterRelativePointerManager, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterRelativePointerManager,
        _event: <OuterRelativePointerManager as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

#[cfg(test)]
mod tests {
    use super::RelativePointer;

    #[test]
    fn residual_carries_across_events() {
        let mut relative = RelativePointer::new(1.0);
        assert_eq!(relative.accumulate(0.6, 0.0), (0.0, 0.0));
        assert_eq!(relative.accumulate(0.6, 0.0), (1.0, 0.0));
        // 0.2 left over.
        assert_eq!(relative.accumulate(0.9, 0.0), (1.0, 0.0));
    }

    #[test]
    fn sensitivity_scales_before_truncation() {
        let mut relative = RelativePointer::new(0.5);
        assert_eq!(relative.accumulate(3.0, -3.0), (1.0, -1.0));
        // Residual is +0.5 / -0.5.
        assert_eq!(relative.accumulate(1.0, -1.0), (1.0, -1.0));
    }

    #[test]
    fn negative_motion_truncates_towards_zero() {
        let mut relative = RelativePointer::new(1.0);
        assert_eq!(relative.accumulate(-0.7, 0.0), (0.0, 0.0));
        assert_eq!(relative.accumulate(-0.7, 0.0), (-1.0, 0.0));
    }
}
