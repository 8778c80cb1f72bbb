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

//! Out-of-tree protocol bindings.
//!
//! `wl_drm` is Mesa-private and not shipped by wayland-protocols, so it is
//! generated here from the XML in `protocol/`, in the same
//! `__interfaces`/`client`/`server` layout wayland-protocols uses.

#![allow(missing_docs)]

pub mod drm {
    #![allow(non_upper_case_globals)]

    pub mod client {
        use wayland_client;
        use wayland_client::protocol::*;

        pub mod __interfaces {
            use wayland_client::protocol::__interfaces::*;
            wayland_scanner::generate_interfaces!("protocol/wayland-drm.xml");
        }
        use self::__interfaces::*;

        wayland_scanner::generate_client_code!("protocol/wayland-drm.xml");
    }

    pub mod server {
        use wayland_server;
        use wayland_server::protocol::*;

        pub mod __interfaces {
            use wayland_server::protocol::__interfaces::*;
            wayland_scanner::generate_interfaces!("protocol/wayland-drm.xml");
        }
        use self::__interfaces::*;

        wayland_scanner::generate_server_code!("protocol/wayland-drm.xml");
    }
}
