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

//! The outer connection: registry fan-out and required-global checks.
//!
//! Every recognised global is bound at a hard-coded version; a missing
//! required global or one advertised below our minimum fails startup with a
//! single diagnostic.

use std::cell::RefCell;
use std::rc::Rc;

use wayland_client::Connection;
use wayland_client::EventQueue;
use wayland_client::QueueHandle;
use wayland_client::globals::BindError;
use wayland_client::globals::GlobalList;
use wayland_client::protocol::wl_compositor::WlCompositor as OuterWlCompositor;
use wayland_client::protocol::wl_data_device::WlDataDevice as HostWlDataDevice;
use wayland_client::protocol::wl_data_device_manager::WlDataDeviceManager as HostWlDataDeviceManager;
use wayland_client::protocol::wl_keyboard::WlKeyboard as HostWlKeyboard;
use wayland_client::protocol::wl_pointer::WlPointer as HostWlPointer;
use wayland_client::protocol::wl_registry::WlRegistry as OuterWlRegistry;
use wayland_client::protocol::wl_seat::WlSeat as HostWlSeat;
use wayland_client::protocol::wl_shm::WlShm as OuterWlShm;
use wayland_client::protocol::wl_subcompositor::WlSubcompositor as OuterWlSubcompositor;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1 as OuterDmabuf;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_manager_v1::WpLinuxDrmSyncobjManagerV1 as OuterSyncobjManager;
use wayland_protocols::wp::pointer_constraints::zv1::client::zwp_pointer_constraints_v1::ZwpPointerConstraintsV1 as OuterPointerConstraints;
use wayland_protocols::wp::relative_pointer::zv1::client::zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1 as OuterRelativePointerManager;
use wayland_protocols::wp::viewporter::client::wp_viewporter::WpViewporter as OuterWpViewporter;
use wayland_protocols::xdg::decoration::zv1::client::zxdg_decoration_manager_v1::ZxdgDecorationManagerV1 as OuterDecorationManager;
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase as OuterXdgWmBase;

use crate::prelude::*;
use crate::server::ServerState;

// Hard-coded versions we speak towards the host.
const USE_COMPOSITOR_VERSION: u32 = 5;
const USE_SUBCOMPOSITOR_VERSION: u32 = 1;
const USE_SHM_VERSION: u32 = 1;
const USE_SEAT_VERSION: u32 = 5;
const USE_XDG_WM_BASE_VERSION: u32 = 1;
const USE_VIEWPORTER_VERSION: u32 = 1;
const USE_LINUX_DMABUF_VERSION: u32 = 4;
const USE_POINTER_CONSTRAINTS_VERSION: u32 = 1;
const USE_RELATIVE_POINTER_MANAGER_VERSION: u32 = 1;
const USE_DATA_DEVICE_MANAGER_VERSION: u32 = 1;
const USE_DECORATION_MANAGER_VERSION: u32 = 1;
const USE_SYNCOBJ_MANAGER_VERSION: u32 = 1;

/// An advertised-but-unbound host global (wl_drm is bound lazily, once per
/// inner bind).
#[derive(Clone, Copy, Debug)]
pub struct DrmGlobal {
    pub name: u32,
    pub version: u32,
}

pub struct Backend {
    pub conn: Connection,
    pub qh: QueueHandle<ServerState>,
    pub queue: Rc<RefCell<EventQueue<ServerState>>>,
    pub registry: OuterWlRegistry,

    // Required globals.
    pub compositor: OuterWlCompositor,
    pub subcompositor: OuterWlSubcompositor,
    pub shm: OuterWlShm,
    pub viewporter: OuterWpViewporter,
    pub xdg_wm_base: OuterXdgWmBase,
    pub dmabuf: OuterDmabuf,
    pub pointer_constraints: OuterPointerConstraints,
    pub relative_pointer_manager: OuterRelativePointerManager,
    pub data_device_manager: HostWlDataDeviceManager,
    pub seat: HostWlSeat,

    // Optional globals.
    pub decoration_manager: Option<OuterDecorationManager>,
    pub syncobj_manager: Option<OuterSyncobjManager>,
    pub drm: Option<DrmGlobal>,

    // Host seat devices, tracked as capabilities come and go.
    pub host_keyboard: Option<HostWlKeyboard>,
    pub host_pointer: Option<HostWlPointer>,
    pub host_data_device: Option<HostWlDataDevice>,

    /// Formats announced on the outer wl_shm, replayed to inner binds.
    pub shm_formats: Vec<u32>,
}

fn required<I>(result: Result<I, BindError>, interface: &str, minimum: u32) -> Result<I> {
    result.with_context(loc!(), || {
        format!("host compositor does not provide {interface} >= {minimum}")
    })
}

impl Backend {
    pub fn bind(
        conn: Connection,
        globals: GlobalList,
        queue: EventQueue<ServerState>,
        qh: QueueHandle<ServerState>,
    ) -> Result<Self> {
        let compositor = required(
            globals.bind(&qh, USE_COMPOSITOR_VERSION..=USE_COMPOSITOR_VERSION, ()),
            "wl_compositor",
            USE_COMPOSITOR_VERSION,
        )?;
        let subcompositor = required(
            globals.bind(&qh, USE_SUBCOMPOSITOR_VERSION..=USE_SUBCOMPOSITOR_VERSION, ()),
            "wl_subcompositor",
            USE_SUBCOMPOSITOR_VERSION,
        )?;
        let shm = required(
            globals.bind(&qh, USE_SHM_VERSION..=USE_SHM_VERSION, ()),
            "wl_shm",
            USE_SHM_VERSION,
        )?;
        let viewporter = required(
            globals.bind(&qh, USE_VIEWPORTER_VERSION..=USE_VIEWPORTER_VERSION, ()),
            "wp_viewporter",
            USE_VIEWPORTER_VERSION,
        )?;
        let xdg_wm_base = required(
            globals.bind(&qh, USE_XDG_WM_BASE_VERSION..=USE_XDG_WM_BASE_VERSION, ()),
            "xdg_wm_base",
            USE_XDG_WM_BASE_VERSION,
        )?;
        let dmabuf = required(
            globals.bind(&qh, USE_LINUX_DMABUF_VERSION..=USE_LINUX_DMABUF_VERSION, ()),
            "zwp_linux_dmabuf_v1",
            USE_LINUX_DMABUF_VERSION,
        )?;
        let pointer_constraints = required(
            globals.bind(
                &qh,
                USE_POINTER_CONSTRAINTS_VERSION..=USE_POINTER_CONSTRAINTS_VERSION,
                (),
            ),
            "zwp_pointer_constraints_v1",
            USE_POINTER_CONSTRAINTS_VERSION,
        )?;
        let relative_pointer_manager = required(
            globals.bind(
                &qh,
                USE_RELATIVE_POINTER_MANAGER_VERSION..=USE_RELATIVE_POINTER_MANAGER_VERSION,
                (),
            ),
            "zwp_relative_pointer_manager_v1",
            USE_RELATIVE_POINTER_MANAGER_VERSION,
        )?;
        let data_device_manager: HostWlDataDeviceManager = required(
            globals.bind(
                &qh,
                USE_DATA_DEVICE_MANAGER_VERSION..=USE_DATA_DEVICE_MANAGER_VERSION,
                (),
            ),
            "wl_data_device_manager",
            USE_DATA_DEVICE_MANAGER_VERSION,
        )?;
        let seat: HostWlSeat = required(
            globals.bind(&qh, USE_SEAT_VERSION..=USE_SEAT_VERSION, ()),
            "wl_seat",
            USE_SEAT_VERSION,
        )?;

        let decoration_manager = globals
            .bind(
                &qh,
                USE_DECORATION_MANAGER_VERSION..=USE_DECORATION_MANAGER_VERSION,
                (),
            )
            .ok();
        let syncobj_manager = globals
            .bind(
                &qh,
                USE_SYNCOBJ_MANAGER_VERSION..=USE_SYNCOBJ_MANAGER_VERSION,
                (),
            )
            .ok();

        let drm = globals
            .contents()
            .clone_list()
            .iter()
            .find(|global| global.interface == "wl_drm")
            .map(|global| DrmGlobal {
                name: global.name,
                version: global.version,
            });

        let host_data_device = Some(data_device_manager.get_data_device(&seat, &qh, ()));

        Ok(Self {
            conn,
            qh,
            queue: Rc::new(RefCell::new(queue)),
            registry: globals.registry().clone(),
            compositor,
            subcompositor,
            shm,
            viewporter,
            xdg_wm_base,
            dmabuf,
            pointer_constraints,
            relative_pointer_manager,
            data_device_manager,
            seat,
            decoration_manager,
            syncobj_manager,
            drm,
            host_keyboard: None,
            host_pointer: None,
            host_data_device,
            shm_formats: Vec::new(),
        })
    }
}
