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

//! Synthetic `wl_output` tracking the root window size. Inner clients never
//! see host outputs.

use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_output;
use wayland_server::protocol::wl_output::WlOutput;

use crate::server::ServerState;

pub const OUTPUT_VERSION: u32 = 4;

#[derive(Debug, Default)]
pub struct OutputGlobal {
    pub resources: Vec<WlOutput>,
}

fn send_geometry(output: &WlOutput, width: i32, height: i32) {
    output.geometry(
        0,
        0,
        0,
        0,
        wl_output::Subpixel::Unknown,
        "nestwall".to_string(),
        "nestwall".to_string(),
        wl_output::Transform::Normal,
    );
    output.mode(wl_output::Mode::Current, width, height, 0);

    if output.version() >= 4 {
        output.name("nestwall output".to_string());
        output.description("nestwall output".to_string());
    }
    if output.version() >= 2 {
        output.done();
    }
}

impl GlobalDispatch<WlOutput, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlOutput>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let output = data_init.init(resource, ());
        send_geometry(&output, state.ui.width, state.ui.height);
        state.output.resources.push(output);
    }
}

impl Dispatch<WlOutput, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlOutput,
        request: wl_output::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_output::Request::Release => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WlOutput,
        _data: &(),
    ) {
        state
            .output
            .resources
            .retain(|output| output.id() != resource.id());
    }
}

impl ServerState {
    /// Pushes the new root size to every bound output.
    pub fn output_resized(&mut self) {
        for output in &self.output.resources {
            output.mode(wl_output::Mode::Current, self.ui.width, self.ui.height, 0);
            if output.version() >= 2 {
                output.done();
            }
        }
    }
}
