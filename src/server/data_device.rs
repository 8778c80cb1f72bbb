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

//! Clipboard bridge between inner clients and the host selection.
//!
//! The selection is a tagged state (`None` / `Local` / `Remote`) with a
//! generation counter bumped on every change; data offers remember the
//! generation they were minted for, which renders them inert once the
//! selection moves on (a `receive` against a stale offer just closes the fd).
//! Drag and drop is out of scope.

use std::os::fd::AsFd;
use std::sync::Mutex;

use wayland_client::Connection;
use wayland_client::Proxy;
use wayland_client::QueueHandle;
use wayland_client::protocol::wl_data_device::Event as HostDataDeviceEvent;
use wayland_client::protocol::wl_data_device::WlDataDevice as HostWlDataDevice;
use wayland_client::protocol::wl_data_device::EVT_DATA_OFFER_OPCODE;
use wayland_client::protocol::wl_data_device_manager::WlDataDeviceManager as HostWlDataDeviceManager;
use wayland_client::protocol::wl_data_offer::Event as HostDataOfferEvent;
use wayland_client::protocol::wl_data_offer::WlDataOffer as HostWlDataOffer;
use wayland_client::protocol::wl_data_source::Event as HostDataSourceEvent;
use wayland_client::protocol::wl_data_source::WlDataSource as HostWlDataSource;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_data_device;
use wayland_server::protocol::wl_data_device::WlDataDevice;
use wayland_server::protocol::wl_data_device_manager;
use wayland_server::protocol::wl_data_device_manager::WlDataDeviceManager;
use wayland_server::protocol::wl_data_offer;
use wayland_server::protocol::wl_data_offer::WlDataOffer;
use wayland_server::protocol::wl_data_source;
use wayland_server::protocol::wl_data_source::WlDataSource;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::post_implementation_error;

pub const DATA_DEVICE_MANAGER_VERSION: u32 = 1;

/// Mime types accumulated on a parked host offer.
#[derive(Debug, Default)]
pub struct HostOfferData {
    pub mime_types: Mutex<Vec<String>>,
}

/// User data of an inner `wl_data_source`.
#[derive(Debug, Default)]
pub struct DataSourceData {
    pub mime_types: Mutex<Vec<String>>,
    pub prepared: Mutex<bool>,
}

fn source_data(source: &WlDataSource) -> &DataSourceData {
    source
        .data::<DataSourceData>()
        .expect("wl_data_source without DataSourceData")
}

/// What an inner `wl_data_offer` refers to, frozen at mint time.
#[derive(Clone, Debug)]
pub enum OfferTarget {
    Local(WlDataSource),
    Remote(HostWlDataOffer),
}

/// User data of an inner `wl_data_offer`.
#[derive(Debug)]
pub struct DataOfferData {
    pub target: OfferTarget,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub enum Selection {
    #[default]
    None,
    Local {
        source: WlDataSource,
    },
    Remote {
        offer: HostWlDataOffer,
    },
}

#[derive(Debug, Default)]
pub struct SelectionState {
    pub devices: Vec<WlDataDevice>,
    pub selection: Selection,
    pub generation: u64,

    /// Outer source mirroring a Local selection.
    pub remote_source: Option<HostWlDataSource>,
    /// Host offers announced but not yet consumed by selection/enter.
    pub pending_offers: Vec<HostWlDataOffer>,
    /// A host drag offer we accepted into a slot only to drop it on leave.
    pub dnd_offer: Option<HostWlDataOffer>,
}

impl GlobalDispatch<WlDataDeviceManager, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlDataDeviceManager>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WlDataDeviceManager, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &WlDataDeviceManager,
        request: wl_data_device_manager::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device_manager::Request::CreateDataSource { id } => {
                data_init.init(id, DataSourceData::default());
            },
            wl_data_device_manager::Request::GetDataDevice { id, .. } => {
                let device = data_init.init(id, ());
                state.selection.devices.push(device);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataSource, DataSourceData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlDataSource,
        request: wl_data_source::Request,
        data: &DataSourceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_source::Request::Offer { mime_type } => {
                if *data.prepared.lock().unwrap() {
                    post_implementation_error(
                        resource,
                        "wl_data_source.offer called on prepared data source",
                    );
                    return;
                }
                data.mime_types.lock().unwrap().push(mime_type);
            },
            wl_data_source::Request::Destroy => {},
            _ => unreachable!(),
        }
        let _ = state;
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WlDataSource,
        _data: &DataSourceData,
    ) {
        // If the destroyed source was the live selection, the selection is
        // gone on the host side too.
        let was_selection = matches!(
            &state.selection.selection,
            Selection::Local { source } if source.id() == resource.id()
        );
        if was_selection {
            state.set_selection_state(Selection::None);
            if let Some(remote_source) = state.selection.remote_source.take() {
                remote_source.destroy();
            }
            let serial = state.seat.last_host_serial;
            if let Some(remote_device) = &state.backend.host_data_device {
                remote_device.set_selection(None, serial);
            }
        }
    }
}

impl Dispatch<WlDataDevice, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlDataDevice,
        request: wl_data_device::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device::Request::SetSelection { source, .. } => {
                state.destroy_previous_selection();

                let Some(source) = source else {
                    // A null source unsets the selection.
                    let serial = state.seat.last_host_serial;
                    if let Some(remote_device) = &state.backend.host_data_device {
                        remote_device.set_selection(None, serial);
                    }
                    return;
                };

                {
                    let data = source_data(&source);
                    let mut prepared = data.prepared.lock().unwrap();
                    if *prepared {
                        post_implementation_error(
                            resource,
                            "cannot reuse wl_data_source for wl_data_device.set_selection",
                        );
                        return;
                    }
                    *prepared = true;
                }

                let mime_types = source_data(&source).mime_types.lock().unwrap().clone();
                state.set_selection_state(Selection::Local { source });

                // Mirror the source on the host and take the host selection.
                let qh = state.backend.qh.clone();
                let remote_source = state
                    .backend
                    .data_device_manager
                    .create_data_source(&qh, ());
                for mime_type in &mime_types {
                    remote_source.offer(mime_type.clone());
                }
                let serial = state.seat.last_host_serial;
                if let Some(remote_device) = &state.backend.host_data_device {
                    remote_device.set_selection(Some(&remote_source), serial);
                }
                state.selection.remote_source = Some(remote_source);

                state.send_selection_to_focus();
            },
            wl_data_device::Request::StartDrag { .. } => {
                post_implementation_error(resource, "wl_data_device.start_drag is not implemented");
            },
            wl_data_device::Request::Release => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WlDataDevice,
        _data: &(),
    ) {
        state
            .selection
            .devices
            .retain(|device| device.id() != resource.id());
    }
}

impl Dispatch<WlDataOffer, DataOfferData> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlDataOffer,
        request: wl_data_offer::Request,
        data: &DataOfferData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_offer::Request::Receive { mime_type, fd } => {
                // A stale offer gets its fd closed without any forwarding.
                if data.generation != state.selection.generation {
                    drop(fd);
                    return;
                }

                match &data.target {
                    OfferTarget::Local(source) => {
                        source.send(mime_type, fd.as_fd());
                    },
                    OfferTarget::Remote(offer) => {
                        offer.receive(mime_type, fd.as_fd());
                    },
                }
                // Our duplicate of the fd closes here; the reader holds the
                // other end.
            },
            wl_data_offer::Request::Accept { .. } => {
                post_implementation_error(resource, "wl_data_offer.accept is not implemented");
            },
            wl_data_offer::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl ServerState {
    fn set_selection_state(&mut self, selection: Selection) {
        self.selection.selection = selection;
        self.selection.generation += 1;
    }

    fn destroy_previous_selection(&mut self) {
        match std::mem::take(&mut self.selection.selection) {
            Selection::None => return,
            Selection::Local { source } => {
                if source.is_alive() {
                    source.cancelled();
                }
                if let Some(remote_source) = self.selection.remote_source.take() {
                    remote_source.destroy();
                }
            },
            Selection::Remote { offer } => {
                offer.destroy();
            },
        }
        self.selection.generation += 1;
    }

    /// Announces the current selection to the keyboard-focus client.
    pub fn send_selection_to_focus(&mut self) {
        let Some(client) = self.focused_client() else {
            return;
        };
        let generation = self.selection.generation;

        let devices: Vec<WlDataDevice> = self
            .selection
            .devices
            .iter()
            .filter(|device| {
                device
                    .client()
                    .is_some_and(|device_client| device_client.id() == client.id())
            })
            .cloned()
            .collect();

        for device in devices {
            let (target, mime_types) = match &self.selection.selection {
                Selection::None => {
                    device.selection(None);
                    continue;
                },
                Selection::Local { source } => (
                    OfferTarget::Local(source.clone()),
                    source_data(source).mime_types.lock().unwrap().clone(),
                ),
                Selection::Remote { offer } => (
                    OfferTarget::Remote(offer.clone()),
                    offer
                        .data::<HostOfferData>()
                        .map(|data| data.mime_types.lock().unwrap().clone())
                        .unwrap_or_default(),
                ),
            };

            let Ok(offer) = client.create_resource::<WlDataOffer, DataOfferData, ServerState>(
                &self.dh,
                device.version(),
                DataOfferData { target, generation },
            ) else {
                warn!("failed to create wl_data_offer resource");
                continue;
            };

            device.data_offer(&offer);
            for mime_type in &mime_types {
                offer.offer(mime_type.clone());
            }
            device.selection(Some(&offer));
        }
    }

    /// Focus moved; the new focus client learns about the current selection.
    pub fn selection_focus_changed(&mut self) {
        if self.seat.input_focus.is_some() {
            self.send_selection_to_focus();
        }
    }

    fn take_pending_offer(&mut self, offer: &HostWlDataOffer) -> Option<HostWlDataOffer> {
        let index = self
            .selection
            .pending_offers
            .iter()
            .position(|pending| pending == offer)?;
        Some(self.selection.pending_offers.remove(index))
    }
}

impl wayland_client::Dispatch<HostWlDataDevice, ()> for ServerState {
    fn event(
        state: &mut Self,
        _proxy: &HostWlDataDevice,
        event: HostDataDeviceEvent,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            HostDataDeviceEvent::DataOffer { id } => {
                state.selection.pending_offers.push(id);
            },
            HostDataDeviceEvent::Selection { id } => {
                // Hosts helpfully offer back the selection we just set; if
                // our own source is live, discard the echo.
                if state.selection.remote_source.is_some() {
                    if let Some(id) = id {
                        if let Some(offer) = state.take_pending_offer(&id) {
                            offer.destroy();
                        }
                    }
                    return;
                }

                state.destroy_previous_selection();

                let Some(id) = id else {
                    state.set_selection_state(Selection::None);
                    return;
                };

                let Some(offer) = state.take_pending_offer(&id) else {
                    warn!("received wl_data_device.selection with unknown offer");
                    return;
                };

                state.set_selection_state(Selection::Remote { offer });
                state.send_selection_to_focus();
            },
            HostDataDeviceEvent::Enter { id, .. } => {
                // We never accept drags; park the offer so leave can drop it.
                if state.selection.dnd_offer.is_some() {
                    warn!("host sent a second concurrent drag offer");
                }
                if let Some(id) = id {
                    state.selection.dnd_offer = state.take_pending_offer(&id);
                }
            },
            HostDataDeviceEvent::Leave => {
                if let Some(offer) = state.selection.dnd_offer.take() {
                    offer.destroy();
                }
            },
            HostDataDeviceEvent::Motion { .. } | HostDataDeviceEvent::Drop => {},
            _ => {},
        }
    }

    wayland_client::event_created_child!(ServerState, HostWlDataDevice, [
        EVT_DATA_OFFER_OPCODE => (HostWlDataOffer, HostOfferData::default())
    ]);
}

impl wayland_client::Dispatch<HostWlDataOffer, HostOfferData> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &HostWlDataOffer,
        event: HostDataOfferEvent,
        data: &HostOfferData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            HostDataOfferEvent::Offer { mime_type } => {
                data.mime_types.lock().unwrap().push(mime_type);
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<HostWlDataSource, ()> for ServerState {
    fn event(
        state: &mut Self,
        proxy: &HostWlDataSource,
        event: HostDataSourceEvent,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let ours = state
            .selection
            .remote_source
            .as_ref()
            .is_some_and(|source| source == proxy);

        match event {
            HostDataSourceEvent::Send { mime_type, fd } => {
                if !ours {
                    drop(fd);
                    return;
                }
                if let Selection::Local { source } = &state.selection.selection {
                    source.send(mime_type, fd.as_fd());
                } else {
                    warn!("host requested selection data but no local source is set");
                }
                // fd closes on drop after the forward.
            },
            HostDataSourceEvent::Cancelled => {
                if ours {
                    state.selection.remote_source = None;
                }
                proxy.destroy();
            },
            HostDataSourceEvent::Target { .. } => {
                warn!("received wl_data_source.target on a clipboard source");
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<HostWlDataDeviceManager, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &HostWlDataDeviceManager,
        _event: <HostWlDataDeviceManager as Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}
