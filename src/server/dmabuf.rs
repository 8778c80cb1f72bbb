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

//! Inner `zwp_linux_dmabuf_v1` relay, v4 only.
//!
//! Buffer creation round-trips the outer connection synchronously so the
//! inner client gets its `created`/`failed` answer in order. Versions below 4
//! would require synthesising the deprecated format/modifier events and are
//! refused.

use std::os::fd::AsFd;
use std::sync::Mutex;

use wayland_client::Connection;
use wayland_client::Proxy;
use wayland_client::QueueHandle;
use wayland_client::WEnum;
use wayland_client::protocol::wl_buffer::WlBuffer as OuterWlBuffer;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1 as OuterDmabuf;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_buffer_params_v1 as outer_params;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1 as OuterParams;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_feedback_v1 as outer_feedback;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_feedback_v1::ZwpLinuxDmabufFeedbackV1 as OuterFeedback;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_buffer_params_v1;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_feedback_v1;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_feedback_v1::ZwpLinuxDmabufFeedbackV1;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_v1;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_buffer::WlBuffer;

use crate::prelude::*;
use crate::server::OuterRef;
use crate::server::ServerState;
use crate::server::buffer::BufferBacking;
use crate::server::buffer::BufferData;
use crate::server::buffer::DmabufPlane;
use crate::server::buffer::buffer_data;
use crate::server::post_implementation_error;
use crate::server::surface::surface_data;

pub const DMABUF_VERSION: u32 = 4;
const MAX_PLANES: u32 = 4;

#[derive(Debug, Default)]
pub struct ParamsState {
    pub planes: Vec<DmabufPlane>,
    pub planes_set: u32,
    pub used: bool,
    pub ok: bool,
    pub width: i32,
    pub height: i32,
    pub format: u32,
    pub buffer: Option<WlBuffer>,
}

/// User data of an inner `zwp_linux_buffer_params_v1`.
#[derive(Debug)]
pub struct ParamsData {
    pub remote: OuterParams,
    pub state: Mutex<ParamsState>,
}

fn params_data(params: &ZwpLinuxBufferParamsV1) -> &ParamsData {
    params
        .data::<ParamsData>()
        .expect("zwp_linux_buffer_params_v1 without ParamsData")
}

/// User data of an inner `zwp_linux_dmabuf_feedback_v1`.
#[derive(Debug)]
pub struct FeedbackData {
    pub remote: OuterFeedback,
}

impl GlobalDispatch<ZwpLinuxDmabufV1, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZwpLinuxDmabufV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let dmabuf = data_init.init(resource, ());
        if dmabuf.version() < 4 {
            // Older versions want the deprecated format/modifier events.
            post_implementation_error(&dmabuf, "zwp_linux_dmabuf versions below 4 are unsupported");
        }
    }
}

impl Dispatch<ZwpLinuxDmabufV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &ZwpLinuxDmabufV1,
        request: zwp_linux_dmabuf_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let qh = state.backend.qh.clone();
        match request {
            zwp_linux_dmabuf_v1::Request::CreateParams { params_id } => {
                let remote = state
                    .backend
                    .dmabuf
                    .create_params(&qh, OuterRef::<ZwpLinuxBufferParamsV1>::new());
                let params = data_init.init(
                    params_id,
                    ParamsData {
                        remote: remote.clone(),
                        state: Mutex::new(ParamsState::default()),
                    },
                );
                remote
                    .data::<OuterRef<ZwpLinuxBufferParamsV1>>()
                    .unwrap()
                    .set(params.downgrade());
            },
            zwp_linux_dmabuf_v1::Request::GetDefaultFeedback { id } => {
                let remote = state
                    .backend
                    .dmabuf
                    .get_default_feedback(&qh, OuterRef::<ZwpLinuxDmabufFeedbackV1>::new());
                let feedback = data_init.init(id, FeedbackData { remote: remote.clone() });
                remote
                    .data::<OuterRef<ZwpLinuxDmabufFeedbackV1>>()
                    .unwrap()
                    .set(feedback.downgrade());
            },
            zwp_linux_dmabuf_v1::Request::GetSurfaceFeedback { id, surface } => {
                let remote_surface = surface_data(&surface).remote.clone();
                let remote = state.backend.dmabuf.get_surface_feedback(
                    &remote_surface,
                    &qh,
                    OuterRef::<ZwpLinuxDmabufFeedbackV1>::new(),
                );
                let feedback = data_init.init(id, FeedbackData { remote: remote.clone() });
                remote
                    .data::<OuterRef<ZwpLinuxDmabufFeedbackV1>>()
                    .unwrap()
                    .set(feedback.downgrade());
            },
            zwp_linux_dmabuf_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpLinuxBufferParamsV1, ParamsData> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &ZwpLinuxBufferParamsV1,
        request: zwp_linux_buffer_params_v1::Request,
        data: &ParamsData,
        dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_linux_buffer_params_v1::Request::Add {
                fd,
                plane_idx,
                offset,
                stride,
                modifier_hi,
                modifier_lo,
            } => {
                if plane_idx >= MAX_PLANES {
                    resource.post_error(
                        zwp_linux_buffer_params_v1::Error::PlaneIdx,
                        format!("plane {plane_idx} exceeds max of {MAX_PLANES}"),
                    );
                    return;
                }

                let mut params = data.state.lock().unwrap();
                let mask = 1 << plane_idx;
                if params.planes_set & mask != 0 {
                    resource.post_error(
                        zwp_linux_buffer_params_v1::Error::PlaneSet,
                        format!("plane {plane_idx} already set"),
                    );
                    return;
                }

                data.remote
                    .add(fd.as_fd(), plane_idx, offset, stride, modifier_hi, modifier_lo);

                params.planes.push(DmabufPlane {
                    fd,
                    offset,
                    stride,
                    modifier: ((modifier_hi as u64) << 32) | modifier_lo as u64,
                });
                params.planes_set |= mask;
            },
            zwp_linux_buffer_params_v1::Request::Create {
                width,
                height,
                format,
                flags,
            } => {
                {
                    let mut params = data.state.lock().unwrap();
                    if params.used {
                        resource.post_error(
                            zwp_linux_buffer_params_v1::Error::AlreadyUsed,
                            "cannot call create on the same zwp_linux_buffer_params twice",
                        );
                        return;
                    }
                    params.used = true;
                    params.width = width;
                    params.height = height;
                    params.format = format;

                    let Ok(buffer) = client.create_resource::<WlBuffer, BufferData, ServerState>(
                        dhandle,
                        1,
                        BufferData::invalid(),
                    ) else {
                        post_implementation_error(resource, "failed to create wl_buffer resource");
                        return;
                    };
                    params.buffer = Some(buffer);
                }

                let flags = outer_params::Flags::from_bits_truncate(raw_flags(flags));
                data.remote.create(width, height, format, flags);

                // The inner client expects a synchronous created/failed
                // answer, so this is one of the few places we block.
                if let Err(e) = state.roundtrip() {
                    error!("outer roundtrip failed during dmabuf create: {e:?}");
                }

                let params = data.state.lock().unwrap();
                if params.ok {
                    resource.created(params.buffer.as_ref().unwrap());
                } else {
                    resource.failed();
                }
            },
            zwp_linux_buffer_params_v1::Request::CreateImmed {
                buffer_id,
                width,
                height,
                format,
                flags,
            } => {
                let buffer = data_init.init(buffer_id, BufferData::invalid());

                {
                    let mut params = data.state.lock().unwrap();
                    if params.used {
                        resource.post_error(
                            zwp_linux_buffer_params_v1::Error::AlreadyUsed,
                            "cannot call create on the same zwp_linux_buffer_params twice",
                        );
                        return;
                    }
                    params.used = true;
                    params.ok = true;
                    params.width = width;
                    params.height = height;
                    params.format = format;
                    params.buffer = Some(buffer.clone());
                }

                let qh = state.backend.qh.clone();
                let flags = outer_params::Flags::from_bits_truncate(raw_flags(flags));
                let remote = data.remote.create_immed(
                    width,
                    height,
                    format,
                    flags,
                    &qh,
                    OuterRef::<WlBuffer>::with(buffer.downgrade()),
                );

                if let Err(e) = state.roundtrip() {
                    error!("outer roundtrip failed during dmabuf create_immed: {e:?}");
                }

                let mut params = data.state.lock().unwrap();
                if params.ok {
                    *buffer_data(&buffer).backing.lock().unwrap() = BufferBacking::Dmabuf {
                        remote,
                        width,
                        height,
                        format,
                        planes: std::mem::take(&mut params.planes),
                    };
                } else {
                    resource.failed();
                }
            },
            zwp_linux_buffer_params_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        _resource: &ZwpLinuxBufferParamsV1,
        data: &ParamsData,
    ) {
        // Unconsumed plane fds close when the state drops.
        data.remote.destroy();
    }
}

impl Dispatch<ZwpLinuxDmabufFeedbackV1, FeedbackData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &ZwpLinuxDmabufFeedbackV1,
        request: zwp_linux_dmabuf_feedback_v1::Request,
        _data: &FeedbackData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_linux_dmabuf_feedback_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_backend::server::ClientId,
        _resource: &ZwpLinuxDmabufFeedbackV1,
        data: &FeedbackData,
    ) {
        data.remote.destroy();
    }
}

fn raw_flags(flags: wayland_server::WEnum<zwp_linux_buffer_params_v1::Flags>) -> u32 {
    match flags {
        wayland_server::WEnum::Value(flags) => flags.bits(),
        wayland_server::WEnum::Unknown(raw) => raw,
    }
}

impl wayland_client::Dispatch<OuterParams, OuterRef<ZwpLinuxBufferParamsV1>> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterParams,
        event: outer_params::Event,
        data: &OuterRef<ZwpLinuxBufferParamsV1>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(inner) = data.get() else {
            return;
        };
        let inner_data = params_data(&inner);

        match event {
            outer_params::Event::Created { buffer } => {
                let mut params = inner_data.state.lock().unwrap();
                params.ok = true;

                let Some(inner_buffer) = params.buffer.clone() else {
                    warn!("host sent zwp_linux_buffer_params.created for unused params");
                    return;
                };
                buffer
                    .data::<OuterRef<WlBuffer>>()
                    .unwrap()
                    .set(inner_buffer.downgrade());

                *buffer_data(&inner_buffer).backing.lock().unwrap() = BufferBacking::Dmabuf {
                    remote: buffer,
                    width: params.width,
                    height: params.height,
                    format: params.format,
                    planes: std::mem::take(&mut params.planes),
                };
            },
            outer_params::Event::Failed => {
                inner_data.state.lock().unwrap().ok = false;
            },
            _ => {},
        }
    }

    wayland_client::event_created_child!(ServerState, OuterParams, [
        outer_params::EVT_CREATED_OPCODE => (OuterWlBuffer, OuterRef::<WlBuffer>::new())
    ]);
}

impl wayland_client::Dispatch<OuterFeedback, OuterRef<ZwpLinuxDmabufFeedbackV1>> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterFeedback,
        event: outer_feedback::Event,
        data: &OuterRef<ZwpLinuxDmabufFeedbackV1>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(inner) = data.get() else {
            return;
        };

        match event {
            outer_feedback::Event::Done => inner.done(),
            outer_feedback::Event::FormatTable { fd, size } => {
                inner.format_table(fd.as_fd(), size);
                // fd closes on drop after forwarding.
            },
            outer_feedback::Event::MainDevice { device } => inner.main_device(device),
            outer_feedback::Event::TrancheDone => inner.tranche_done(),
            outer_feedback::Event::TrancheTargetDevice { device } => {
                inner.tranche_target_device(device)
            },
            outer_feedback::Event::TrancheFormats { indices } => inner.tranche_formats(indices),
            outer_feedback::Event::TrancheFlags { flags } => {
                let raw = match flags {
                    WEnum::Value(flags) => flags.bits(),
                    WEnum::Unknown(raw) => raw,
                };
                inner.tranche_flags(
                    zwp_linux_dmabuf_feedback_v1::TrancheFlags::from_bits_truncate(raw),
                );
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<OuterDmabuf, ()> for ServerState {
    fn event(
        _state: &mut Self,
        _proxy: &OuterDmabuf,
        _event: wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // format/modifier events are not sent at v4.
    }
}
