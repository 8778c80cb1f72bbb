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

//! The X11 window manager.
//!
//! This is not an ICCCM/EWMH-compliant WM; GLFW requires next to nothing and
//! it is the only X11 client that matters here. The jobs are: pair X11
//! windows with inner Wayland surfaces (via WL_SURFACE_ID or
//! WL_SURFACE_SERIAL, in either arrival order), gate view creation on
//! "mapped in X11 and has a buffer", inject input via XTEST, and serve the
//! CLIPBOARD selection.
//!
//! Every X11 window the WM has seen owns an entry in `surfaces`, paired or
//! not; `unpaired` holds xwayland-shell objects still waiting for their X11
//! peer. Window teardown order matters: the view dies before the window
//! entry so a forced close cannot leave the commit path holding a stale
//! window reference.

use std::os::unix::net::UnixStream;

use wayland_protocols::xwayland::shell::v1::server::xwayland_surface_v1::XwaylandSurfaceV1;
use wayland_server::Resource;
use wayland_server::protocol::wl_surface::WlSurface;
use x11rb::connection::Connection as _;
use x11rb::protocol::Event;
use x11rb::protocol::composite::ConnectionExt as _;
use x11rb::protocol::composite::Redirect;
use x11rb::protocol::res;
use x11rb::protocol::res::ConnectionExt as _;
use x11rb::protocol::xproto;
use x11rb::protocol::xproto::AtomEnum;
use x11rb::protocol::xproto::ChangeWindowAttributesAux;
use x11rb::protocol::xproto::ClientMessageEvent;
use x11rb::protocol::xproto::ConfigureWindowAux;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::protocol::xproto::CreateWindowAux;
use x11rb::protocol::xproto::EnterNotifyEvent;
use x11rb::protocol::xproto::EventMask;
use x11rb::protocol::xproto::LeaveNotifyEvent;
use x11rb::protocol::xproto::PropMode;
use x11rb::protocol::xproto::WindowClass;
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::DefaultStream;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::seat::SynKey;
use crate::server::surface::surface_data;
use crate::server::ui::ViewId;
use crate::server::ui::ViewKind;
use crate::server::xwayland_shell::xwayland_surface_data;

// Evdev keycodes are offset by 8 in the X11 keycode space.
const X11_KEYCODE_OFFSET: u32 = 8;
const TITLE_MAX_LEN: u32 = 4096;

x11rb::atom_manager! {
    pub Atoms:
    AtomsCookie {
        CLIPBOARD,
        TARGETS,
        UTF8_STRING,
        WL_SURFACE_ID,
        WL_SURFACE_SERIAL,
        WM_DELETE_WINDOW,
        WM_PROTOCOLS,
        WM_S0,
        _NET_SUPPORTED,
        _NET_SUPPORTING_WM_CHECK,
        _NET_WM_NAME,
        _NET_WM_STATE_FULLSCREEN,
    }
}

/// How an X11 window has announced its Wayland pairing, if at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Association {
    None,
    SurfaceId(u32),
    SurfaceSerial(u64),
}

pub fn serial_from_parts(lo: u32, hi: u32) -> u64 {
    lo as u64 | ((hi as u64) << 32)
}

/// A view should exist for a window exactly when both hold.
pub fn should_map(has_buffer: bool, mapped_x11: bool) -> bool {
    has_buffer && mapped_x11
}

/// State for every X11 window the WM has seen.
#[derive(Debug)]
pub struct XSurface {
    pub window: u32,
    pub association: Association,
    pub surface: Option<WlSurface>,
    pub title: Option<String>,
    pub pid: Option<i32>,
    pub mapped_x11: bool,
    pub view: Option<ViewId>,
}

/// An xwayland-shell surface still waiting for its X11 peer.
#[derive(Debug)]
pub struct Unpaired {
    pub resource: XwaylandSurfaceV1,
    pub serial: Option<u64>,
}

pub struct Xwm {
    conn: RustConnection,
    root: u32,
    atoms: Atoms,
    ewmh_window: u32,
    pub surfaces: Vec<XSurface>,
    pub unpaired: Vec<Unpaired>,
    clipboard: Option<String>,
}

impl Xwm {
    pub fn new(stream: UnixStream) -> Result<Self> {
        stream.set_nonblocking(true).location(loc!())?;
        let (stream, _) = DefaultStream::from_unix_stream(stream).location(loc!())?;
        let conn = RustConnection::connect_to_stream(stream, 0).location(loc!())?;

        let root = conn.setup().roots[0].root;
        let root_visual = conn.setup().roots[0].root_visual;

        let atoms = Atoms::new(&conn).location(loc!())?.reply().location(loc!())?;

        // XRes for window PIDs, XTEST for input injection; both are hard
        // requirements.
        let res_version = conn
            .res_query_version(1, 2)
            .location(loc!())?
            .reply()
            .context(loc!(), "XRes extension is missing")?;
        if (res_version.server_major, res_version.server_minor) < (1, 2) {
            bail!(
                "XRes {}.{} is too old",
                res_version.server_major,
                res_version.server_minor
            );
        }
        let xtest_version = conn
            .xtest_get_version(2, 2)
            .location(loc!())?
            .reply()
            .context(loc!(), "XTEST extension is missing")?;
        info!(
            "XRes {}.{}, XTEST {}.{}",
            res_version.server_major,
            res_version.server_minor,
            xtest_version.major_version,
            xtest_version.minor_version
        );

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(
                EventMask::SUBSTRUCTURE_REDIRECT
                    | EventMask::SUBSTRUCTURE_NOTIFY
                    | EventMask::PROPERTY_CHANGE,
            ),
        )
        .location(loc!())?;

        // EWMH check window; also the WM_S0 and CLIPBOARD selection owner.
        let ewmh_window = conn.generate_id().location(loc!())?;
        conn.create_window(
            x11rb::COPY_FROM_PARENT as u8,
            ewmh_window,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            root_visual,
            &CreateWindowAux::new(),
        )
        .location(loc!())?;

        conn.change_property8(
            PropMode::REPLACE,
            ewmh_window,
            atoms._NET_WM_NAME,
            atoms.UTF8_STRING,
            b"wm",
        )
        .location(loc!())?;
        conn.change_property32(
            PropMode::REPLACE,
            ewmh_window,
            atoms._NET_SUPPORTING_WM_CHECK,
            AtomEnum::WINDOW,
            &[ewmh_window],
        )
        .location(loc!())?;
        conn.change_property32(
            PropMode::REPLACE,
            root,
            atoms._NET_SUPPORTING_WM_CHECK,
            AtomEnum::WINDOW,
            &[ewmh_window],
        )
        .location(loc!())?;
        conn.change_property32(
            PropMode::REPLACE,
            root,
            atoms._NET_SUPPORTED,
            AtomEnum::ATOM,
            &[atoms._NET_WM_STATE_FULLSCREEN],
        )
        .location(loc!())?;
        conn.set_selection_owner(ewmh_window, atoms.WM_S0, x11rb::CURRENT_TIME)
            .location(loc!())?;

        // Xwayland refuses surface association without the redirect.
        conn.composite_redirect_subwindows(root, Redirect::MANUAL)
            .location(loc!())?;

        conn.flush().location(loc!())?;

        Ok(Self {
            conn,
            root,
            atoms,
            ewmh_window,
            surfaces: Vec::new(),
            unpaired: Vec::new(),
            clipboard: None,
        })
    }

    pub fn connection_fd(&self) -> i32 {
        use std::os::fd::AsRawFd;
        self.conn.stream().as_raw_fd()
    }

    fn xsurface(&self, window: u32) -> Option<&XSurface> {
        self.surfaces.iter().find(|surface| surface.window == window)
    }

    fn xsurface_mut(&mut self, window: u32) -> Option<&mut XSurface> {
        self.surfaces
            .iter_mut()
            .find(|surface| surface.window == window)
    }

    fn window_pid(&self, window: u32) -> Option<i32> {
        let spec = res::ClientIdSpec {
            client: window,
            mask: res::ClientIdMask::LOCAL_CLIENT_PID.into(),
        };
        let reply = self
            .conn
            .res_query_client_ids(&[spec])
            .ok()?
            .reply()
            .warn(loc!())
            .ok()?;

        for id in reply.ids {
            if u32::from(id.spec.mask) & u32::from(res::ClientIdMask::LOCAL_CLIENT_PID) != 0 {
                if let Some(pid) = id.value.first() {
                    return Some(*pid as i32);
                }
            }
        }
        None
    }

    fn create_xsurface(&mut self, window: u32) -> Result<()> {
        self.conn
            .change_window_attributes(
                window,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
            )
            .location(loc!())?;

        let pid = self.window_pid(window);
        info!("xsurface created for window {window} (pid {pid:?})");

        self.surfaces.push(XSurface {
            window,
            association: Association::None,
            surface: None,
            title: None,
            pid,
            mapped_x11: false,
            view: None,
        });
        Ok(())
    }

    fn read_title(&mut self, window: u32) -> Result<Option<String>> {
        let reply = self
            .conn
            .get_property(
                false,
                window,
                self.atoms._NET_WM_NAME,
                AtomEnum::ANY,
                0,
                TITLE_MAX_LEN / 4,
            )
            .location(loc!())?
            .reply()
            .location(loc!())?;

        if reply.type_ != self.atoms.UTF8_STRING && reply.type_ != u32::from(AtomEnum::STRING) {
            return Ok(None);
        }
        if reply.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()))
    }

    fn send_close(&self, window: u32) -> Result<()> {
        // GLFW supports WM_DELETE_WINDOW, which is all we need.
        let event = ClientMessageEvent::new(
            32,
            window,
            self.atoms.WM_PROTOCOLS,
            [self.atoms.WM_DELETE_WINDOW, x11rb::CURRENT_TIME, 0, 0, 0],
        );
        self.conn
            .send_event(true, window, EventMask::NO_EVENT, event)
            .location(loc!())?;
        self.conn.flush().location(loc!())?;
        Ok(())
    }

    fn configure(&self, window: u32, width: u32, height: u32) -> Result<()> {
        self.conn
            .configure_window(
                window,
                &ConfigureWindowAux::new().width(width).height(height),
            )
            .location(loc!())?;
        self.conn.flush().location(loc!())?;
        Ok(())
    }

    fn set_focus(&self, window: Option<u32>) -> Result<()> {
        self.conn
            .set_input_focus(
                xproto::InputFocus::NONE,
                window.unwrap_or(x11rb::NONE),
                x11rb::CURRENT_TIME,
            )
            .location(loc!())?;
        self.conn.flush().location(loc!())?;
        Ok(())
    }

    pub fn set_clipboard(&mut self, content: String) -> Result<()> {
        self.clipboard = Some(content);
        self.conn
            .set_selection_owner(self.ewmh_window, self.atoms.CLIPBOARD, x11rb::CURRENT_TIME)
            .location(loc!())?;
        self.conn.flush().location(loc!())?;
        Ok(())
    }

    fn handle_selection_request(&mut self, event: &xproto::SelectionRequestEvent) -> Result<()> {
        let Some(content) = self.clipboard.clone() else {
            warn!("X11 client requested clipboard content while none was set");
            return Ok(());
        };

        // Only the clipboard; no primary selection or other transfers.
        if event.selection != self.atoms.CLIPBOARD {
            return Ok(());
        }

        let owner = self
            .conn
            .get_selection_owner(self.atoms.CLIPBOARD)
            .location(loc!())?
            .reply()
            .location(loc!())?;
        if owner.owner != self.ewmh_window {
            return Ok(());
        }

        if event.target == self.atoms.TARGETS && event.property != x11rb::NONE {
            self.conn
                .change_property32(
                    PropMode::REPLACE,
                    event.requestor,
                    event.property,
                    AtomEnum::ATOM,
                    &[self.atoms.UTF8_STRING],
                )
                .location(loc!())?;
        } else if event.target == self.atoms.UTF8_STRING && event.property != x11rb::NONE {
            self.conn
                .change_property8(
                    PropMode::REPLACE,
                    event.requestor,
                    event.property,
                    self.atoms.UTF8_STRING,
                    content.as_bytes(),
                )
                .location(loc!())?;
        }

        let notify = xproto::SelectionNotifyEvent {
            response_type: xproto::SELECTION_NOTIFY_EVENT,
            sequence: event.sequence,
            time: event.time,
            requestor: event.requestor,
            selection: event.selection,
            target: event.target,
            property: event.property,
        };
        self.conn
            .send_event(false, event.requestor, EventMask::NO_EVENT, notify)
            .location(loc!())?;
        self.conn.flush().location(loc!())?;
        Ok(())
    }

    fn fake_key(&self, window: u32, keycode: u32, pressed: bool, time: u32) -> Result<()> {
        let kind = if pressed {
            xproto::KEY_PRESS_EVENT
        } else {
            xproto::KEY_RELEASE_EVENT
        };
        self.conn
            .xtest_fake_input(
                kind,
                (keycode + X11_KEYCODE_OFFSET) as u8,
                time,
                window,
                0,
                0,
                0,
            )
            .location(loc!())?;
        Ok(())
    }

    fn fake_button(&self, window: u32, button: u8, pressed: bool, time: u32) -> Result<()> {
        let kind = if pressed {
            xproto::BUTTON_PRESS_EVENT
        } else {
            xproto::BUTTON_RELEASE_EVENT
        };
        self.conn
            .xtest_fake_input(kind, button, time, window, 0, 0, 0)
            .location(loc!())?;
        Ok(())
    }

    /// Synthetic crossing events; GLFW reads the cursor position from
    /// these, so a click is preceded by leave+enter.
    fn fake_crossing(&self, window: u32, leave_time: u32, enter_time: u32) -> Result<()> {
        let leave = LeaveNotifyEvent {
            response_type: xproto::LEAVE_NOTIFY_EVENT,
            detail: xproto::NotifyDetail::NONLINEAR,
            sequence: 0,
            time: leave_time,
            root: self.root,
            event: window,
            child: x11rb::NONE,
            root_x: 0,
            root_y: 0,
            event_x: 0,
            event_y: 0,
            state: xproto::KeyButMask::default(),
            mode: xproto::NotifyMode::NORMAL,
            same_screen_focus: 1,
        };
        self.conn
            .send_event(true, window, EventMask::LEAVE_WINDOW, leave)
            .location(loc!())?;

        let enter = EnterNotifyEvent {
            response_type: xproto::ENTER_NOTIFY_EVENT,
            detail: xproto::NotifyDetail::NONLINEAR,
            sequence: 0,
            time: enter_time,
            root: self.root,
            event: window,
            child: x11rb::NONE,
            root_x: 0,
            root_y: 0,
            event_x: 0,
            event_y: 0,
            state: xproto::KeyButMask::default(),
            mode: xproto::NotifyMode::NORMAL,
            same_screen_focus: 1,
        };
        self.conn
            .send_event(true, window, EventMask::ENTER_WINDOW, enter)
            .location(loc!())?;
        Ok(())
    }

    fn flush(&self) {
        if let Err(e) = self.conn.flush() {
            error!("xcb flush failed: {e}");
        }
    }
}

impl ServerState {
    fn with_xwm<R>(&mut self, f: impl FnOnce(&mut Self, &mut Xwm) -> R) -> Option<R> {
        let mut xwm = self.xwm.take()?;
        let result = f(self, &mut xwm);
        // A façade call from inside f cannot have replaced it; the slot is
        // None while taken.
        self.xwm = Some(xwm);
        Some(result)
    }

    /// Drains and handles pending X11 events. Returns false when the
    /// connection died and the XWM was torn down.
    pub fn xwm_dispatch(&mut self) -> bool {
        let alive = self
            .with_xwm(|state, xwm| {
                let mut count = 0;
                loop {
                    match xwm.conn.poll_for_event() {
                        Ok(Some(event)) => {
                            count += 1;
                            state.xwm_handle_event(xwm, event);
                        },
                        Ok(None) => break,
                        Err(e) => {
                            // Losing X11 does not kill the server; the game
                            // keeps running if it is already mapped.
                            error!("xcb connection error: {e}");
                            return false;
                        },
                    }
                }
                if count > 0 {
                    xwm.flush();
                }
                true
            })
            .unwrap_or(true);

        if !alive {
            warn!("tearing down the X11 window manager");
            self.xwm_teardown();
        }
        alive
    }

    fn xwm_teardown(&mut self) {
        let views: Vec<ViewId> = self
            .xwm
            .as_ref()
            .map(|xwm| {
                xwm.surfaces
                    .iter()
                    .filter_map(|xsurface| xsurface.view)
                    .collect()
            })
            .unwrap_or_default();
        for view in views {
            self.destroy_view(view);
        }
        self.xwm = None;
    }

    fn xwm_handle_event(&mut self, xwm: &mut Xwm, event: Event) {
        match event {
            Event::CreateNotify(event) => {
                if event.window == xwm.ewmh_window {
                    return;
                }
                if event.override_redirect {
                    // The game never creates override-redirect windows;
                    // killing them keeps them from bypassing the WM.
                    warn!(
                        "X11 client created window {} with override-redirect",
                        event.window
                    );
                    let _ = xwm.conn.kill_client(event.window).warn(loc!());
                    return;
                }
                xwm.create_xsurface(event.window).log_and_ignore(loc!());
            },
            Event::DestroyNotify(event) => {
                // The view goes first; only then is the window entry
                // dropped (a commit mid-teardown must not resolve it).
                let view = xwm
                    .xsurface(event.window)
                    .and_then(|xsurface| xsurface.view);
                if let Some(view) = view {
                    self.destroy_view(view);
                }
                if let Some(xsurface) = xwm.xsurface_mut(event.window) {
                    xsurface.view = None;
                }
                xwm.surfaces.retain(|xsurface| xsurface.window != event.window);
                info!("xsurface destroyed for window {}", event.window);
            },
            Event::MapRequest(event) => {
                if xwm.xsurface(event.window).is_none() {
                    return;
                }
                let _ = xwm.conn.map_window(event.window).warn(loc!());
                if let Some(xsurface) = xwm.xsurface_mut(event.window) {
                    xsurface.mapped_x11 = true;
                }
                self.xwm_update_view(xwm, event.window, None);
            },
            Event::UnmapNotify(event) => {
                if let Some(xsurface) = xwm.xsurface_mut(event.window) {
                    xsurface.mapped_x11 = false;
                }
                self.xwm_update_view(xwm, event.window, None);
            },
            Event::ConfigureRequest(event) => {
                // Width and height only; position is ours.
                let _ = xwm
                    .conn
                    .configure_window(
                        event.window,
                        &ConfigureWindowAux::new()
                            .width(event.width as u32)
                            .height(event.height as u32),
                    )
                    .warn(loc!());
            },
            Event::PropertyNotify(event) => {
                if event.atom != xwm.atoms._NET_WM_NAME {
                    return;
                }
                if xwm.xsurface(event.window).is_none() {
                    return;
                }
                let title = xwm.read_title(event.window).warn(loc!()).ok().flatten();
                if let Some(xsurface) = xwm.xsurface_mut(event.window) {
                    xsurface.title = title;
                }
            },
            Event::ClientMessage(event) => {
                if event.type_ == xwm.atoms.WL_SURFACE_ID {
                    self.xwm_msg_surface_id(xwm, &event);
                } else if event.type_ == xwm.atoms.WL_SURFACE_SERIAL {
                    self.xwm_msg_surface_serial(xwm, &event);
                }
            },
            Event::SelectionRequest(event) => {
                xwm.handle_selection_request(&event).log_and_ignore(loc!());
            },
            Event::ConfigureNotify(_)
            | Event::MapNotify(_)
            | Event::MappingNotify(_)
            | Event::ReparentNotify(_) => {},
            Event::Error(error) => {
                error!(
                    "xcb error: opcode {}:{}, error code {:?}, sequence {}",
                    error.major_opcode, error.minor_opcode, error.error_kind, error.sequence
                );
            },
            other => {
                debug!("unhandled X11 event: {other:?}");
            },
        }
    }

    fn xwm_msg_surface_id(&mut self, xwm: &mut Xwm, event: &ClientMessageEvent) {
        if self.xwayland_shell.bound() {
            warn!("Xwayland is using WL_SURFACE_ID despite binding xwayland-shell");
            return;
        }

        let id = event.data.as_data32()[0];
        let Some(xsurface) = xwm.xsurface_mut(event.window) else {
            return;
        };
        if xsurface.surface.is_some() {
            warn!(
                "extraneous association between X11 window {} and WL_SURFACE_ID {id}",
                event.window
            );
            return;
        }
        xsurface.association = Association::SurfaceId(id);

        // The wl_surface may not exist yet; if it does, pair right away.
        let Some(xwayland) = &self.xwayland else {
            return;
        };
        let Ok(surface) = xwayland
            .client
            .object_from_protocol_id::<WlSurface>(&self.dh, id)
        else {
            return;
        };

        let window = event.window;
        pair(xwm, window, surface);
        self.xwm_update_view(xwm, window, None);
    }

    fn xwm_msg_surface_serial(&mut self, xwm: &mut Xwm, event: &ClientMessageEvent) {
        let data = event.data.as_data32();
        let serial = serial_from_parts(data[0], data[1]);

        let Some(xsurface) = xwm.xsurface_mut(event.window) else {
            return;
        };
        if xsurface.surface.is_some() {
            warn!(
                "extraneous association between X11 window {} and WL_SURFACE_SERIAL {serial}",
                event.window
            );
            return;
        }
        xsurface.association = Association::SurfaceSerial(serial);

        // An xwayland-shell surface may already be waiting with this serial.
        let unpaired_index = xwm
            .unpaired
            .iter()
            .position(|unpaired| unpaired.serial == Some(serial));
        if let Some(index) = unpaired_index {
            let unpaired = xwm.unpaired.remove(index);
            let surface = xwayland_surface_data(&unpaired.resource).surface.clone();
            let window = event.window;
            pair(xwm, window, surface);
            self.xwm_update_view(xwm, window, None);
        }
    }

    /// A new wl_surface from the Xwayland client; WL_SURFACE_ID may have
    /// arrived first.
    pub fn xwm_try_pair_by_id(&mut self, surface: &WlSurface) {
        let surface = surface.clone();
        self.with_xwm(|state, xwm| {
            let id = surface.id().protocol_id();
            let window = xwm
                .surfaces
                .iter()
                .find(|xsurface| {
                    xsurface.surface.is_none()
                        && xsurface.association == Association::SurfaceId(id)
                })
                .map(|xsurface| xsurface.window);

            if let Some(window) = window {
                pair(xwm, window, surface.clone());
                state.xwm_update_view(xwm, window, None);
            }
        });
    }

    /// xwayland-shell bookkeeping.
    pub fn xwm_new_unpaired_surface(&mut self, resource: XwaylandSurfaceV1) {
        self.with_xwm(|_, xwm| {
            xwm.unpaired.push(Unpaired {
                resource,
                serial: None,
            });
        });
    }

    pub fn xwm_unpaired_surface_destroyed(&mut self, resource: &XwaylandSurfaceV1) {
        self.with_xwm(|_, xwm| {
            xwm.unpaired
                .retain(|unpaired| unpaired.resource.id() != resource.id());
        });
    }

    /// `set_serial` took effect on commit; try to find the X11 window with
    /// the matching WL_SURFACE_SERIAL.
    pub fn xwm_serial_associated(&mut self, resource: &XwaylandSurfaceV1, serial: u64) {
        let resource = resource.clone();
        self.with_xwm(|state, xwm| {
            if let Some(unpaired) = xwm
                .unpaired
                .iter_mut()
                .find(|unpaired| unpaired.resource.id() == resource.id())
            {
                unpaired.serial = Some(serial);
            }

            let window = xwm
                .surfaces
                .iter()
                .find(|xsurface| {
                    xsurface.surface.is_none()
                        && xsurface.association == Association::SurfaceSerial(serial)
                })
                .map(|xsurface| xsurface.window);

            if let Some(window) = window {
                xwm.unpaired
                    .retain(|unpaired| unpaired.resource.id() != resource.id());
                let surface = xwayland_surface_data(&resource).surface.clone();
                pair(xwm, window, surface);
                state.xwm_update_view(xwm, window, None);
            }
        });
    }

    /// Re-evaluates view existence for the window paired with `surface`.
    pub fn xwm_surface_committed(&mut self, surface: &WlSurface, has_buffer: bool) {
        let surface = surface.clone();
        self.with_xwm(|state, xwm| {
            let window = xwm
                .surfaces
                .iter()
                .find(|xsurface| {
                    xsurface
                        .surface
                        .as_ref()
                        .is_some_and(|paired| paired.id() == surface.id())
                })
                .map(|xsurface| xsurface.window);
            if let Some(window) = window {
                state.xwm_update_view(xwm, window, Some(has_buffer));
            }
        });
    }

    pub fn xwm_surface_destroyed(&mut self, surface: &WlSurface) {
        let surface = surface.clone();
        self.with_xwm(|state, xwm| {
            let entry = xwm.surfaces.iter_mut().find(|xsurface| {
                xsurface
                    .surface
                    .as_ref()
                    .is_some_and(|paired| paired.id() == surface.id())
            });
            let Some(xsurface) = entry else {
                return;
            };

            let window = xsurface.window;
            let view = xsurface.view.take();
            xsurface.surface = None;
            xsurface.association = Association::None;
            info!("deassociated X11 window {window} from destroyed surface");

            if let Some(view) = view {
                state.destroy_view(view);
            }
        });
    }

    /// Creates or destroys the window's view per the mapping rule. When the
    /// caller just observed a commit it passes the buffer state; otherwise
    /// it is read from the paired surface.
    fn xwm_update_view(&mut self, xwm: &mut Xwm, window: u32, has_buffer: Option<bool>) {
        let Some(xsurface) = xwm.xsurface_mut(window) else {
            return;
        };
        let Some(surface) = xsurface.surface.clone() else {
            debug_assert!(xsurface.view.is_none());
            return;
        };

        let has_buffer = has_buffer.unwrap_or_else(|| {
            surface_data(&surface)
                .inner
                .lock()
                .unwrap()
                .current
                .buffer
                .is_some()
        });

        let want = should_map(has_buffer, xsurface.mapped_x11);
        let view = xsurface.view;

        match (want, view) {
            (true, None) => {
                let id = self.create_view(&surface, ViewKind::Xwayland { window });
                if let Some(xsurface) = xwm.xsurface_mut(window) {
                    xsurface.view = Some(id);
                }
            },
            (false, Some(id)) => {
                if let Some(xsurface) = xwm.xsurface_mut(window) {
                    xsurface.view = None;
                }
                self.destroy_view(id);
            },
            _ => {},
        }
    }

    /// Input focus moved; mirror it into the X11 world.
    pub fn xwm_focus_changed(&mut self) {
        let target = self.seat.input_focus.and_then(|view| {
            self.ui.view(view).and_then(|view| match view.kind {
                ViewKind::Xwayland { window } => Some(window),
                _ => None,
            })
        });
        self.with_xwm(|_, xwm| {
            xwm.set_focus(target).log_and_ignore(loc!());
        });
    }

    pub fn xwm_send_keys(&mut self, view: ViewId, keys: &[SynKey]) {
        let Some(window) = self.view_window(view) else {
            return;
        };
        let keys = keys.to_vec();
        self.with_xwm(|state, xwm| {
            for key in &keys {
                let time = state.clock.next_ms();
                xwm.fake_key(window, key.keycode, key.pressed, time)
                    .log_and_ignore(loc!());
            }
            xwm.flush();
        });
    }

    pub fn xwm_send_click(&mut self, view: ViewId) {
        let Some(window) = self.view_window(view) else {
            return;
        };
        self.with_xwm(|state, xwm| {
            let leave = state.clock.next_ms();
            let enter = state.clock.next_ms();
            xwm.fake_crossing(window, leave, enter).log_and_ignore(loc!());
            let press = state.clock.next_ms();
            xwm.fake_button(window, 1, true, press).log_and_ignore(loc!());
            let release = state.clock.next_ms();
            xwm.fake_button(window, 1, false, release)
                .log_and_ignore(loc!());
            xwm.flush();
        });
    }

    pub fn xwm_close_window(&mut self, window: u32) {
        self.with_xwm(|_, xwm| {
            xwm.send_close(window).log_and_ignore(loc!());
        });
    }

    pub fn xwm_configure_window(&mut self, window: u32, width: u32, height: u32) {
        self.with_xwm(|_, xwm| {
            xwm.configure(window, width, height).log_and_ignore(loc!());
        });
    }

    pub fn xwm_window_pid(&self, window: u32) -> Option<i32> {
        self.xwm
            .as_ref()
            .and_then(|xwm| xwm.xsurface(window))
            .and_then(|xsurface| xsurface.pid)
    }

    pub fn xwm_window_title(&self, window: u32) -> Option<String> {
        self.xwm
            .as_ref()
            .and_then(|xwm| xwm.xsurface(window))
            .and_then(|xsurface| xsurface.title.clone())
    }

    pub fn xwm_set_clipboard(&mut self, content: String) -> Result<()> {
        self.with_xwm(|_, xwm| xwm.set_clipboard(content))
            .unwrap_or_else(|| bail!("no X11 window manager"))
    }

    fn view_window(&self, view: ViewId) -> Option<u32> {
        self.ui.view(view).and_then(|view| match view.kind {
            ViewKind::Xwayland { window } => Some(window),
            _ => None,
        })
    }
}

/// Records a pairing between an X11 window and a Wayland surface.
fn pair(xwm: &mut Xwm, window: u32, surface: WlSurface) {
    let Some(xsurface) = xwm.xsurface_mut(window) else {
        return;
    };
    debug_assert!(xsurface.surface.is_none());
    info!("associated X11 window {window} with surface {:?}", surface.id());
    xsurface.surface = Some(surface);
}

#[cfg(test)]
mod tests {
    use super::Association;
    use super::serial_from_parts;
    use super::should_map;

    #[test]
    fn serial_halves_combine() {
        assert_eq!(serial_from_parts(0x42, 0), 0x42);
        assert_eq!(serial_from_parts(0, 1), 1 << 32);
        assert_eq!(
            serial_from_parts(0xdead_beef, 0x1234_5678),
            0x1234_5678_dead_beef
        );
    }

    #[test]
    fn view_requires_buffer_and_x11_map() {
        assert!(!should_map(false, false));
        assert!(!should_map(true, false));
        assert!(!should_map(false, true));
        assert!(should_map(true, true));
    }

    #[test]
    fn association_matches_exactly() {
        assert_eq!(Association::SurfaceId(7), Association::SurfaceId(7));
        assert_ne!(Association::SurfaceId(7), Association::SurfaceSerial(7));
        assert_ne!(Association::None, Association::SurfaceId(0));
    }
}
