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

//! Inner `wp_linux_drm_syncobj_v1` relay. Only created when the host offers
//! the manager. Timeline fds are owned by the inner timeline resource;
//! acquire/release points are forwarded against the outer timeline object.

use std::os::fd::AsFd;
use std::os::fd::OwnedFd;
use std::sync::Mutex;

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_manager_v1::WpLinuxDrmSyncobjManagerV1 as OuterSyncobjManager;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_surface_v1::WpLinuxDrmSyncobjSurfaceV1 as OuterSyncobjSurface;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_timeline_v1::WpLinuxDrmSyncobjTimelineV1 as OuterSyncobjTimeline;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_manager_v1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_manager_v1::WpLinuxDrmSyncobjManagerV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_surface_v1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_surface_v1::WpLinuxDrmSyncobjSurfaceV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_timeline_v1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_timeline_v1::WpLinuxDrmSyncobjTimelineV1;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::Weak;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::surface::surface_data;

pub const SYNCOBJ_VERSION: u32 = 1;

/// User data of an inner timeline. The imported fd stays alive as long as
/// any acquire/release point may still reference the timeline.
#[derive(Debug)]
pub struct TimelineData {
    pub remote: OuterSyncobjTimeline,
    pub fd: OwnedFd,
}

/// User data of an inner syncobj surface.
#[derive(Debug)]
pub struct SyncobjSurfaceData {
    pub remote: OuterSyncobjSurface,
    pub surface: Mutex<Option<Weak<WlSurface>>>,
}

impl GlobalDispatch<WpLinuxDrmSyncobjManagerV1, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WpLinuxDrmSyncobjManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WpLinuxDrmSyncobjManagerV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WpLinuxDrmSyncobjManagerV1,
        request: wp_linux_drm_syncobj_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(manager) = state.backend.syncobj_manager.clone() else {
            unreachable!("syncobj global exists without a host manager");
        };
        let qh = state.backend.qh.clone();

        match request {
            wp_linux_drm_syncobj_manager_v1::Request::GetSurface { id, surface } => {
                if state.syncobj_surface_exists(&surface) {
                    resource.post_error(
                        wp_linux_drm_syncobj_manager_v1::Error::SurfaceExists,
                        "wp_linux_drm_syncobj_surface_v1 already exists for given surface",
                    );
                    return;
                }

                let remote_surface = surface_data(&surface).remote.clone();
                let remote = manager.get_surface(&remote_surface, &qh, ());
                let syncobj_surface = data_init.init(
                    id,
                    SyncobjSurfaceData {
                        remote,
                        surface: Mutex::new(Some(surface.downgrade())),
                    },
                );
                state.syncobj_surfaces.push(syncobj_surface);
            },
            wp_linux_drm_syncobj_manager_v1::Request::ImportTimeline { id, fd } => {
                let remote = manager.import_timeline(fd.as_fd(), &qh, ());
                data_init.init(id, TimelineData { remote, fd });
            },
            wp_linux_drm_syncobj_manager_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WpLinuxDrmSyncobjTimelineV1, TimelineData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WpLinuxDrmSyncobjTimelineV1,
        request: wp_linux_drm_syncobj_timeline_v1::Request,
        _data: &TimelineData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wp_linux_drm_syncobj_timeline_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        _resource: &WpLinuxDrmSyncobjTimelineV1,
        data: &TimelineData,
    ) {
        data.remote.destroy();
    }
}

impl Dispatch<WpLinuxDrmSyncobjSurfaceV1, SyncobjSurfaceData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &WpLinuxDrmSyncobjSurfaceV1,
        request: wp_linux_drm_syncobj_surface_v1::Request,
        data: &SyncobjSurfaceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let live = data
            .surface
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|weak| weak.upgrade().is_ok());

        match request {
            wp_linux_drm_syncobj_surface_v1::Request::SetAcquirePoint {
                timeline,
                point_hi,
                point_lo,
            } => {
                if !live {
                    resource.post_error(
                        wp_linux_drm_syncobj_surface_v1::Error::NoSurface,
                        "wl_surface associated with wp_linux_drm_syncobj_surface_v1 already destroyed",
                    );
                    return;
                }
                let timeline_data = timeline.data::<TimelineData>().unwrap();
                data.remote
                    .set_acquire_point(&timeline_data.remote, point_hi, point_lo);
            },
            wp_linux_drm_syncobj_surface_v1::Request::SetReleasePoint {
                timeline,
                point_hi,
                point_lo,
            } => {
                if !live {
                    resource.post_error(
                        wp_linux_drm_syncobj_surface_v1::Error::NoSurface,
                        "wl_surface associated with wp_linux_drm_syncobj_surface_v1 already destroyed",
                    );
                    return;
                }
                let timeline_data = timeline.data::<TimelineData>().unwrap();
                data.remote
                    .set_release_point(&timeline_data.remote, point_hi, point_lo);
            },
            wp_linux_drm_syncobj_surface_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WpLinuxDrmSyncobjSurfaceV1,
        data: &SyncobjSurfaceData,
    ) {
        data.remote.destroy();
        state
            .syncobj_surfaces
            .retain(|surface| surface.id() != resource.id());
    }
}

impl ServerState {
    fn syncobj_surface_exists(&self, surface: &WlSurface) -> bool {
        self.syncobj_surfaces.iter().any(|syncobj_surface| {
            syncobj_surface
                .data::<SyncobjSurfaceData>()
                .and_then(|data| data.surface.lock().unwrap().clone())
                .is_some_and(|weak| {
                    weak.upgrade().is_ok_and(|live| live.id() == surface.id())
                })
        })
    }
}

impl wayland_client::Dispatch<OuterSyncobjManager, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterSyncobjManager,
        _event: <OuterSyncobjManager as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl wayland_client::Dispatch<OuterSyncobjTimeline, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterSyncobjTimeline,
        _event: <OuterSyncobjTimeline as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}

impl wayland_client::Dispatch<OuterSyncobjSurface, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterSyncobjSurface,
        _event: <OuterSyncobjSurface as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // No events.
    }
}
