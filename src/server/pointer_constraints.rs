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

//! Inner `zwp_pointer_constraints_v1`.
//!
//! Only locks are supported (the game never confines). A lock registered by
//! an inner client becomes active when its view holds input focus and the
//! host has a pointer; the outer lock is created on the view's outer surface
//! and host `locked`/`unlocked` events are relayed inward and surfaced as
//! façade signals.

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_protocols::wp::pointer_constraints::zv1::client::zwp_locked_pointer_v1 as outer_locked;
use wayland_protocols::wp::pointer_constraints::zv1::client::zwp_locked_pointer_v1::ZwpLockedPointerV1 as OuterLockedPointer;
use wayland_protocols::wp::pointer_constraints::zv1::client::zwp_pointer_constraints_v1::Lifetime as OuterLifetime;
use wayland_protocols::wp::pointer_constraints::zv1::client::zwp_pointer_constraints_v1::ZwpPointerConstraintsV1 as OuterPointerConstraints;
use wayland_protocols::wp::pointer_constraints::zv1::server::zwp_confined_pointer_v1;
use wayland_protocols::wp::pointer_constraints::zv1::server::zwp_confined_pointer_v1::ZwpConfinedPointerV1;
use wayland_protocols::wp::pointer_constraints::zv1::server::zwp_locked_pointer_v1;
use wayland_protocols::wp::pointer_constraints::zv1::server::zwp_locked_pointer_v1::ZwpLockedPointerV1;
use wayland_protocols::wp::pointer_constraints::zv1::server::zwp_pointer_constraints_v1;
use wayland_protocols::wp::pointer_constraints::zv1::server::zwp_pointer_constraints_v1::ZwpPointerConstraintsV1;
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
use crate::server::surface::surface_data;

pub const POINTER_CONSTRAINTS_VERSION: u32 = 1;

#[derive(Debug)]
pub struct LockEntry {
    pub resource: ZwpLockedPointerV1,
    pub surface: WlSurface,
}

#[derive(Debug)]
pub struct ActiveLock {
    pub inner: ZwpLockedPointerV1,
    pub outer: OuterLockedPointer,
}

#[derive(Debug, Default)]
pub struct PointerConstraints {
    pub locks: Vec<LockEntry>,
    pub active: Option<ActiveLock>,
}

impl GlobalDispatch<ZwpPointerConstraintsV1, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZwpPointerConstraintsV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<ZwpPointerConstraintsV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &ZwpPointerConstraintsV1,
        request: zwp_pointer_constraints_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_pointer_constraints_v1::Request::LockPointer { id, surface, .. } => {
                let locked_pointer = data_init.init(id, ());
                state.constraints.locks.push(LockEntry {
                    resource: locked_pointer,
                    surface,
                });
                state.constraints_reconcile();
            },
            zwp_pointer_constraints_v1::Request::ConfinePointer { id, .. } => {
                // The known client only ever locks. Initialise the id so the
                // refusal is a clean protocol error.
                data_init.init(id, ());
                post_implementation_error(
                    resource,
                    "zwp_pointer_constraints.confine_pointer is not supported",
                );
            },
            zwp_pointer_constraints_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpLockedPointerV1, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &ZwpLockedPointerV1,
        request: zwp_locked_pointer_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_locked_pointer_v1::Request::SetCursorPositionHint { .. } => {
                // The game's idea of the cursor position is irrelevant.
            },
            zwp_locked_pointer_v1::Request::SetRegion { .. } => {
                // The lock region is irrelevant; the host locks in place.
            },
            zwp_locked_pointer_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &ZwpLockedPointerV1,
        _data: &(),
    ) {
        state
            .constraints
            .locks
            .retain(|lock| lock.resource.id() != resource.id());
        if state
            .constraints
            .active
            .as_ref()
            .is_some_and(|active| active.inner.id() == resource.id())
        {
            state.constraints_deactivate();
        }
    }
}

impl ServerState {
    /// Creates or destroys the outer lock so it matches the focused view.
    /// Called on focus changes, lock creation, and host pointer changes.
    pub fn constraints_reconcile(&mut self) {
        let wanted: Option<ZwpLockedPointerV1> = (|| {
            let view = self.seat.input_focus?;
            let view = self.ui.view(view)?;

            self.backend.host_pointer.as_ref()?;

            self.constraints
                .locks
                .iter()
                .find(|lock| lock.surface.id() == view.surface.id())
                .map(|lock| lock.resource.clone())
        })();

        match (&self.constraints.active, &wanted) {
            (Some(active), Some(wanted)) if active.inner.id() == wanted.id() => return,
            (None, None) => return,
            _ => {},
        }

        self.constraints_deactivate();

        if let Some(inner) = wanted {
            let Some(pointer) = self.backend.host_pointer.clone() else {
                return;
            };
            let Some(lock) = self
                .constraints
                .locks
                .iter()
                .find(|lock| lock.resource.id() == inner.id())
            else {
                return;
            };

            let remote_surface = surface_data(&lock.surface).remote.clone();
            let qh = self.backend.qh.clone();
            let outer = self.backend.pointer_constraints.lock_pointer(
                &remote_surface,
                &pointer,
                None,
                OuterLifetime::Persistent,
                &qh,
                (),
            );

            self.constraints.active = Some(ActiveLock { inner, outer });
        }
    }

    fn constraints_deactivate(&mut self) {
        if let Some(active) = self.constraints.active.take() {
            active.outer.destroy();
            if active.inner.is_alive() {
                active.inner.unlocked();
            }
            crate::signals::emit(self, |state| &mut state.events.pointer_unlock, &());
        }
    }

    /// A surface went away; drop any locks registered against it.
    pub fn constraints_surface_destroyed(&mut self, surface: &WlSurface) {
        if self
            .constraints
            .active
            .as_ref()
            .is_some_and(|active| {
                self.constraints
                    .locks
                    .iter()
                    .any(|lock| lock.resource.id() == active.inner.id()
                        && lock.surface.id() == surface.id())
            })
        {
            self.constraints_deactivate();
        }
        self.constraints
            .locks
            .retain(|lock| lock.surface.id() != surface.id());
    }
}

impl wayland_client::Dispatch<OuterLockedPointer, ()> for ServerState {
    fn event(
        state: &mut Self,
        proxy: &OuterLockedPointer,
        event: outer_locked::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let ours = state
            .constraints
            .active
            .as_ref()
            .is_some_and(|active| active.outer == *proxy);
        if !ours {
            return;
        }

        match event {
            outer_locked::Event::Locked => {
                if let Some(active) = &state.constraints.active {
                    active.inner.locked();
                }
                crate::signals::emit(state, |state| &mut state.events.pointer_lock, &());
            },
            outer_locked::Event::Unlocked => {
                if let Some(active) = &state.constraints.active {
                    active.inner.unlocked();
                }
                crate::signals::emit(state, |state| &mut state.events.pointer_unlock, &());
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<OuterPointerConstraints, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterPointerConstraints,
        _event: <OuterPointerConstraints as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl Dispatch<ZwpConfinedPointerV1, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &ZwpConfinedPointerV1,
        _request: zwp_confined_pointer_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // Only reachable from a refused confine_pointer; the client is
        // already dead.
    }
}
