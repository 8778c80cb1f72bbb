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

//! Seat: keyboard/pointer routing between the host seat and inner clients.
//!
//! Input from the host always lands on the root surface; which inner client
//! receives it is decided purely by `set_input_focus`. Every forwarded event
//! gets a fresh inner serial. The optional listener (the scripting layer) is
//! consulted before key/button events are forwarded; consumed events stop
//! there, but releases always leave the pressed set so focus changes cannot
//! wedge keys down.

use std::os::fd::AsFd;
use std::os::fd::OwnedFd;

use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_client::WEnum;
use wayland_client::protocol::wl_keyboard::Event as HostKeyboardEvent;
use wayland_client::protocol::wl_keyboard::WlKeyboard as HostWlKeyboard;
use wayland_client::protocol::wl_pointer::Event as HostPointerEvent;
use wayland_client::protocol::wl_pointer::WlPointer as HostWlPointer;
use wayland_client::protocol::wl_seat::Capability;
use wayland_client::protocol::wl_seat::Event as HostSeatEvent;
use wayland_client::protocol::wl_seat::WlSeat as HostWlSeat;
use wayland_server::Client;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_keyboard;
use wayland_server::protocol::wl_keyboard::WlKeyboard;
use wayland_server::protocol::wl_pointer;
use wayland_server::protocol::wl_pointer::WlPointer;
use wayland_server::protocol::wl_seat;
use wayland_server::protocol::wl_seat::WlSeat;
use wayland_server::protocol::wl_touch;
use wayland_server::protocol::wl_touch::WlTouch;

use crate::prelude::*;
use crate::server::ServerState;
use crate::server::post_implementation_error;
use crate::server::surface::Role;
use crate::server::surface::set_role;
use crate::server::ui::ViewId;
use crate::server::wenum_raw;

pub const SEAT_VERSION: u32 = 5;

/// A synthetic key transition.
#[derive(Clone, Copy, Debug)]
pub struct SynKey {
    pub keycode: u32,
    pub pressed: bool,
}

/// Hook consulted before host input is forwarded. Implemented by the
/// scripting layer; `true` from `key`/`button` consumes the event.
pub trait SeatListener {
    fn key(&mut self, state: &mut ServerState, keycode: u32, pressed: bool) -> bool;
    fn button(&mut self, state: &mut ServerState, button: u32, pressed: bool) -> bool;
    fn motion(&mut self, state: &mut ServerState, x: f64, y: f64);
    fn modifiers(&mut self, state: &mut ServerState, mods: Modifiers);
    fn keymap(&mut self, state: &mut ServerState, fd: &OwnedFd, size: u32);
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Modifiers {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

#[derive(Debug)]
pub struct Keymap {
    pub fd: OwnedFd,
    pub size: u32,
}

#[derive(Default)]
pub struct Seat {
    pub keyboards: Vec<WlKeyboard>,
    pub pointers: Vec<WlPointer>,

    pub keymap: Option<Keymap>,
    pub repeat: Option<(i32, i32)>,
    pub mods: Modifiers,
    pub pressed: Vec<u32>,

    pub pointer_x: f64,
    pub pointer_y: f64,

    pub input_focus: Option<ViewId>,
    pub listener: Option<Box<dyn SeatListener>>,

    /// Serial of the most recent host input event; used when talking back to
    /// the host (selection, cursor).
    pub last_host_serial: u32,
    /// Serial of the most recent host pointer enter.
    pub last_enter_serial: u32,
}

impl GlobalDispatch<WlSeat, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlSeat>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let seat = data_init.init(resource, ());
        if seat.version() >= 2 {
            seat.name("nestwall seat".to_string());
        }
        seat.capabilities(wl_seat::Capability::Keyboard | wl_seat::Capability::Pointer);
    }
}

impl Dispatch<WlSeat, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetKeyboard { id } => {
                let keyboard = data_init.init(id, ());

                if let Some(keymap) = &state.seat.keymap {
                    keyboard.keymap(
                        wl_keyboard::KeymapFormat::XkbV1,
                        keymap.fd.as_fd(),
                        keymap.size,
                    );
                }
                if keyboard.version() >= 4 {
                    if let Some((rate, delay)) = state.seat.repeat {
                        let rate = state.config.repeat_rate.unwrap_or(rate);
                        let delay = state.config.repeat_delay.unwrap_or(delay);
                        keyboard.repeat_info(rate, delay);
                    }
                }

                state.seat.keyboards.push(keyboard);
            },
            wl_seat::Request::GetPointer { id } => {
                let pointer = data_init.init(id, ());
                state.seat.pointers.push(pointer);
            },
            wl_seat::Request::GetTouch { id } => {
                // The new id must be initialised even though touch is
                // refused.
                data_init.init(id, ());
                post_implementation_error(resource, "wl_seat.get_touch is not supported");
            },
            wl_seat::Request::Release => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlKeyboard, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlKeyboard,
        request: wl_keyboard::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_keyboard::Request::Release => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WlKeyboard,
        _data: &(),
    ) {
        state
            .seat
            .keyboards
            .retain(|keyboard| keyboard.id() != resource.id());
    }
}

impl Dispatch<WlPointer, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_pointer::Request::SetCursor { surface, .. } => {
                // The client-provided cursor is never shown, but the role
                // bookkeeping still applies.
                if let Some(surface) = surface {
                    if set_role(&surface, Role::Cursor).is_err() {
                        resource.post_error(
                            wl_pointer::Error::Role,
                            "cannot call wl_pointer.set_cursor with a surface that has another role",
                        );
                    }
                }
            },
            wl_pointer::Request::Release => {},
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_backend::server::ClientId,
        resource: &WlPointer,
        _data: &(),
    ) {
        state
            .seat
            .pointers
            .retain(|pointer| pointer.id() != resource.id());
    }
}

impl ServerState {
    pub(crate) fn focused_client(&self) -> Option<Client> {
        let view = self.seat.input_focus?;
        let surface = self.ui.view(view)?.surface.clone();
        surface.client()
    }

    fn focused_view_pos(&self) -> (i32, i32) {
        self.seat
            .input_focus
            .and_then(|view| self.ui.view(view))
            .map(|view| (view.current.x, view.current.y))
            .unwrap_or((0, 0))
    }

    pub(crate) fn focused_surface(&self) -> Option<wayland_server::protocol::wl_surface::WlSurface> {
        let view = self.seat.input_focus?;
        Some(self.ui.view(view)?.surface.clone())
    }

    fn pressed_keys_bytes(&self) -> Vec<u8> {
        self.seat
            .pressed
            .iter()
            .flat_map(|key| key.to_ne_bytes())
            .collect()
    }

    fn send_keyboard_enter(&mut self) {
        let Some(surface) = self.focused_surface() else {
            return;
        };
        let Some(client) = surface.client() else {
            return;
        };
        let keys = self.pressed_keys_bytes();
        let mods = self.seat.mods;

        let serial = self.serials.next();
        for keyboard in client_keyboards(&self.seat.keyboards, &client) {
            keyboard.enter(serial, &surface, keys.clone());
            keyboard.modifiers(serial, mods.depressed, mods.latched, mods.locked, mods.group);
        }
    }

    fn send_keyboard_leave(&mut self) {
        let Some(surface) = self.focused_surface() else {
            return;
        };
        let Some(client) = surface.client() else {
            return;
        };

        // Release anything still held so the client doesn't end up with a
        // stuck key, then zero the forwarded modifiers.
        let pressed: Vec<u32> = self.seat.pressed.clone();
        for key in pressed {
            self.send_key_to_focus(key, false);
        }

        let serial = self.serials.next();
        for keyboard in client_keyboards(&self.seat.keyboards, &client) {
            keyboard.modifiers(serial, 0, 0, 0, 0);
            keyboard.leave(serial, &surface);
        }
    }

    fn send_pointer_enter(&mut self) {
        let Some(surface) = self.focused_surface() else {
            return;
        };
        let Some(client) = surface.client() else {
            return;
        };
        let (vx, vy) = self.focused_view_pos();
        let x = self.seat.pointer_x - vx as f64;
        let y = self.seat.pointer_y - vy as f64;

        let serial = self.serials.next();
        for pointer in client_pointers(&self.seat.pointers, &client) {
            pointer.enter(serial, &surface, x, y);
        }
    }

    fn send_pointer_leave(&mut self) {
        let Some(surface) = self.focused_surface() else {
            return;
        };
        let Some(client) = surface.client() else {
            return;
        };

        let serial = self.serials.next();
        for pointer in client_pointers(&self.seat.pointers, &client) {
            pointer.leave(serial, &surface);
        }
    }

    fn send_key_to_focus(&mut self, key: u32, pressed: bool) {
        let Some(client) = self.focused_client() else {
            return;
        };
        let serial = self.serials.next();
        let time = self.clock.now_ms();
        let key_state = if pressed {
            wl_keyboard::KeyState::Pressed
        } else {
            wl_keyboard::KeyState::Released
        };
        for keyboard in client_keyboards(&self.seat.keyboards, &client) {
            keyboard.key(serial, time, key, key_state);
        }
    }

    fn send_modifiers_to_focus(&mut self) {
        let Some(client) = self.focused_client() else {
            return;
        };
        let mods = self.seat.mods;
        let serial = self.serials.next();
        for keyboard in client_keyboards(&self.seat.keyboards, &client) {
            keyboard.modifiers(serial, mods.depressed, mods.latched, mods.locked, mods.group);
        }
    }

    /// The only way input focus changes.
    pub fn set_input_focus(&mut self, view: Option<ViewId>) {
        if self.seat.input_focus == view {
            return;
        }

        self.send_keyboard_leave();
        self.send_pointer_leave();

        self.seat.input_focus = view;

        if self.seat.input_focus.is_some() {
            self.send_keyboard_enter();
            self.send_pointer_enter();
        }

        self.selection_focus_changed();
        self.constraints_reconcile();
        self.xwm_focus_changed();
        crate::signals::emit(self, |state| &mut state.events.input_focus, &view);
    }

    /// Dispatches a host key event through the listener and on to the
    /// focused client.
    fn handle_host_key(&mut self, key: u32, pressed: bool) {
        if pressed {
            if self.seat.pressed.contains(&key) {
                warn!("duplicate key press event received");
                return;
            }
            self.seat.pressed.push(key);
        } else {
            // Releases leave the pressed set no matter what the listener
            // says, to avoid stuck keys after focus changes.
            self.seat.pressed.retain(|pressed_key| *pressed_key != key);
        }

        let consumed = self.with_listener(|listener, state| listener.key(state, key, pressed));
        if consumed {
            return;
        }

        self.send_key_to_focus(key, pressed);
    }

    fn handle_host_button(&mut self, button: u32, pressed: bool) {
        let consumed =
            self.with_listener(|listener, state| listener.button(state, button, pressed));
        if consumed {
            return;
        }

        let Some(client) = self.focused_client() else {
            return;
        };
        let serial = self.serials.next();
        let time = self.clock.now_ms();
        let button_state = if pressed {
            wl_pointer::ButtonState::Pressed
        } else {
            wl_pointer::ButtonState::Released
        };
        for pointer in client_pointers(&self.seat.pointers, &client) {
            pointer.button(serial, time, button, button_state);
        }
    }

    pub(crate) fn handle_host_motion(&mut self, x: f64, y: f64) {
        self.seat.pointer_x = x;
        self.seat.pointer_y = y;

        self.with_listener(|listener, state| {
            listener.motion(state, x, y);
        });

        let Some(client) = self.focused_client() else {
            return;
        };
        let (vx, vy) = self.focused_view_pos();
        let time = self.clock.now_ms();
        for pointer in client_pointers(&self.seat.pointers, &client) {
            pointer.motion(time, x - vx as f64, y - vy as f64);
        }
    }

    /// Runs `f` with the listener temporarily taken out of the state so it
    /// can call back into the façade.
    fn with_listener<R: Default>(
        &mut self,
        f: impl FnOnce(&mut dyn SeatListener, &mut ServerState) -> R,
    ) -> R {
        let Some(mut listener) = self.seat.listener.take() else {
            return R::default();
        };
        let result = f(listener.as_mut(), self);
        if self.seat.listener.is_none() {
            self.seat.listener = Some(listener);
        }
        result
    }

    /// Installs the seat listener. The stored keymap (if any) is replayed so
    /// a listener attached late still learns the layout.
    pub fn set_seat_listener(&mut self, listener: Box<dyn SeatListener>) {
        assert!(self.seat.listener.is_none(), "seat listener already set");
        self.seat.listener = Some(listener);

        if self.seat.keymap.is_some() {
            self.with_listener(|listener, state| {
                let keymap = state.seat.keymap.take();
                if let Some(keymap) = &keymap {
                    listener.keymap(state, &keymap.fd, keymap.size);
                }
                state.seat.keymap = keymap;
            });
        }
    }

    /// Synthetic key sequence towards a view, dispatched by role.
    pub fn send_keys(&mut self, view: ViewId, keys: &[SynKey]) {
        let (is_xwayland, surface) = {
            let Some(target) = self.ui.view(view) else {
                return;
            };
            (target.kind.is_xwayland(), target.surface.clone())
        };

        if is_xwayland {
            self.xwm_send_keys(view, keys);
            return;
        }

        let Some(client) = surface.client() else {
            return;
        };

        // The protocol requires keyboard focus for key events, so wrap the
        // batch in enter/leave when the view is not focused.
        let focused = self.seat.input_focus == Some(view);
        if !focused {
            let keys_bytes = self.pressed_keys_bytes();
            let serial = self.serials.next();
            for keyboard in client_keyboards(&self.seat.keyboards, &client) {
                keyboard.enter(serial, &surface, keys_bytes.clone());
            }
        }

        for syn_key in keys {
            let serial = self.serials.next();
            let time = self.clock.next_ms();
            let key_state = if syn_key.pressed {
                wl_keyboard::KeyState::Pressed
            } else {
                wl_keyboard::KeyState::Released
            };
            for keyboard in client_keyboards(&self.seat.keyboards, &client) {
                keyboard.key(serial, time, syn_key.keycode, key_state);
            }
        }

        if !focused {
            let serial = self.serials.next();
            for keyboard in client_keyboards(&self.seat.keyboards, &client) {
                keyboard.leave(serial, &surface);
            }
        }
    }

    /// Synthetic left click towards a view, dispatched by role.
    pub fn send_click(&mut self, view: ViewId) {
        let (is_xwayland, surface, vx, vy) = {
            let Some(target) = self.ui.view(view) else {
                return;
            };
            (
                target.kind.is_xwayland(),
                target.surface.clone(),
                target.current.x,
                target.current.y,
            )
        };

        if is_xwayland {
            self.xwm_send_click(view);
            return;
        }

        let Some(client) = surface.client() else {
            return;
        };
        let x = self.seat.pointer_x - vx as f64;
        let y = self.seat.pointer_y - vy as f64;

        const BTN_LEFT: u32 = 0x110;
        let enter_serial = self.serials.next();
        for pointer in client_pointers(&self.seat.pointers, &client) {
            pointer.enter(enter_serial, &surface, x, y);
        }
        for pressed in [true, false] {
            let serial = self.serials.next();
            let time = self.clock.next_ms();
            let button_state = if pressed {
                wl_pointer::ButtonState::Pressed
            } else {
                wl_pointer::ButtonState::Released
            };
            for pointer in client_pointers(&self.seat.pointers, &client) {
                pointer.button(serial, time, BTN_LEFT, button_state);
            }
        }
        let leave_serial = self.serials.next();
        for pointer in client_pointers(&self.seat.pointers, &client) {
            pointer.leave(leave_serial, &surface);
        }

        // Restore the real state for the focused view.
        if self.seat.input_focus.is_some() && self.seat.input_focus != Some(view) {
            self.send_pointer_enter();
        }
    }

    /// The host keyboard went away (capability drop or seat removal) while
    /// keys may still be pressed.
    pub fn host_keyboard_gone(&mut self) {
        let pressed: Vec<u32> = self.seat.pressed.clone();
        for key in pressed {
            self.send_key_to_focus(key, false);
        }
        self.seat.pressed.clear();

        self.seat.mods = Modifiers::default();
        self.send_modifiers_to_focus();
    }
}

fn client_keyboards<'a>(keyboards: &'a [WlKeyboard], client: &Client) -> Vec<&'a WlKeyboard> {
    keyboards
        .iter()
        .filter(|keyboard| {
            keyboard
                .client()
                .is_some_and(|keyboard_client| keyboard_client.id() == client.id())
        })
        .collect()
}

fn client_pointers<'a>(pointers: &'a [WlPointer], client: &Client) -> Vec<&'a WlPointer> {
    pointers
        .iter()
        .filter(|pointer| {
            pointer
                .client()
                .is_some_and(|pointer_client| pointer_client.id() == client.id())
        })
        .collect()
}

impl wayland_client::Dispatch<HostWlSeat, ()> for ServerState {
    fn event(
        state: &mut Self,
        proxy: &HostWlSeat,
        event: HostSeatEvent,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            HostSeatEvent::Capabilities { capabilities } => {
                let caps = match capabilities {
                    WEnum::Value(caps) => caps,
                    WEnum::Unknown(raw) => Capability::from_bits_truncate(raw),
                };

                let has_keyboard = caps.contains(Capability::Keyboard);
                if has_keyboard != state.backend.host_keyboard.is_some() {
                    if let Some(keyboard) = state.backend.host_keyboard.take() {
                        keyboard.release();
                        state.host_keyboard_gone();
                    } else {
                        state.backend.host_keyboard = Some(proxy.get_keyboard(qh, ()));
                    }
                }

                let has_pointer = caps.contains(Capability::Pointer);
                if has_pointer != state.backend.host_pointer.is_some() {
                    if let Some(pointer) = state.backend.host_pointer.take() {
                        pointer.release();
                    } else {
                        state.backend.host_pointer = Some(proxy.get_pointer(qh, ()));
                    }
                    state.host_pointer_changed();
                }
            },
            HostSeatEvent::Name { .. } => {},
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<HostWlKeyboard, ()> for ServerState {
    fn event(
        state: &mut Self,
        _proxy: &HostWlKeyboard,
        event: HostKeyboardEvent,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            HostKeyboardEvent::Keymap { format, fd, size } => {
                if wenum_raw(format) != 1 {
                    warn!("received keymap of unknown format");
                    return;
                }
                state.seat.keymap = Some(Keymap { fd, size });

                state.with_listener(|listener, state| {
                    let keymap = state.seat.keymap.take();
                    if let Some(keymap) = &keymap {
                        listener.keymap(state, &keymap.fd, keymap.size);
                    }
                    state.seat.keymap = keymap;
                });

                // Clients that already have keyboards learn the new map too.
                let keyboards = state.seat.keyboards.clone();
                if let Some(keymap) = &state.seat.keymap {
                    for keyboard in keyboards {
                        keyboard.keymap(
                            wl_keyboard::KeymapFormat::XkbV1,
                            keymap.fd.as_fd(),
                            keymap.size,
                        );
                    }
                }
            },
            HostKeyboardEvent::Key {
                serial,
                key,
                state: key_state,
                ..
            } => {
                state.seat.last_host_serial = serial;
                state.handle_host_key(key, wenum_raw(key_state) == 1);
            },
            HostKeyboardEvent::Modifiers {
                serial,
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
            } => {
                state.seat.last_host_serial = serial;
                state.seat.mods = Modifiers {
                    depressed: mods_depressed,
                    latched: mods_latched,
                    locked: mods_locked,
                    group,
                };
                let mods = state.seat.mods;
                state.with_listener(|listener, state| listener.modifiers(state, mods));
                state.send_modifiers_to_focus();
            },
            HostKeyboardEvent::Leave { .. } => {
                state.host_keyboard_gone();
            },
            HostKeyboardEvent::Enter { serial, .. } => {
                state.seat.last_host_serial = serial;
            },
            HostKeyboardEvent::RepeatInfo { rate, delay } => {
                state.seat.repeat = Some((rate, delay));
            },
            _ => {},
        }
    }
}

impl wayland_client::Dispatch<HostWlPointer, ()> for ServerState {
    fn event(
        state: &mut Self,
        _proxy: &HostWlPointer,
        event: HostPointerEvent,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            HostPointerEvent::Enter {
                serial,
                surface_x,
                surface_y,
                ..
            } => {
                state.seat.last_host_serial = serial;
                state.seat.last_enter_serial = serial;
                state.seat.pointer_x = surface_x;
                state.seat.pointer_y = surface_y;
                state.cursor_on_pointer_enter(serial);
            },
            HostPointerEvent::Leave { .. } => {},
            HostPointerEvent::Motion {
                surface_x,
                surface_y,
                ..
            } => {
                state.handle_host_motion(surface_x, surface_y);
            },
            HostPointerEvent::Button {
                serial,
                button,
                state: button_state,
                ..
            } => {
                state.seat.last_host_serial = serial;
                state.handle_host_button(button, wenum_raw(button_state) == 1);
            },
            HostPointerEvent::Axis { axis, value, .. } => {
                let Some(client) = state.focused_client() else {
                    return;
                };
                let Ok(axis) = wl_pointer::Axis::try_from(wenum_raw(axis)) else {
                    return;
                };
                let time = state.clock.now_ms();
                for pointer in client_pointers(&state.seat.pointers, &client) {
                    pointer.axis(time, axis, value);
                }
            },
            HostPointerEvent::AxisSource { axis_source } => {
                let Some(client) = state.focused_client() else {
                    return;
                };
                let Ok(source) = wl_pointer::AxisSource::try_from(wenum_raw(axis_source)) else {
                    return;
                };
                for pointer in client_pointers(&state.seat.pointers, &client) {
                    if pointer.version() >= wl_pointer::EVT_AXIS_SOURCE_SINCE {
                        pointer.axis_source(source);
                    }
                }
            },
            HostPointerEvent::AxisStop { axis, .. } => {
                let Some(client) = state.focused_client() else {
                    return;
                };
                let Ok(axis) = wl_pointer::Axis::try_from(wenum_raw(axis)) else {
                    return;
                };
                let time = state.clock.now_ms();
                for pointer in client_pointers(&state.seat.pointers, &client) {
                    if pointer.version() >= wl_pointer::EVT_AXIS_STOP_SINCE {
                        pointer.axis_stop(time, axis);
                    }
                }
            },
            HostPointerEvent::AxisDiscrete { axis, discrete } => {
                let Some(client) = state.focused_client() else {
                    return;
                };
                let Ok(axis) = wl_pointer::Axis::try_from(wenum_raw(axis)) else {
                    return;
                };
                for pointer in client_pointers(&state.seat.pointers, &client) {
                    if pointer.version() >= wl_pointer::EVT_AXIS_DISCRETE_SINCE {
                        pointer.axis_discrete(axis, discrete);
                    }
                }
            },
            HostPointerEvent::Frame => {
                let Some(client) = state.focused_client() else {
                    return;
                };
                for pointer in client_pointers(&state.seat.pointers, &client) {
                    if pointer.version() >= wl_pointer::EVT_FRAME_SINCE {
                        pointer.frame();
                    }
                }
            },
            _ => {},
        }
    }
}

impl Dispatch<WlTouch, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlTouch,
        _request: wl_touch::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // Only reachable from a refused get_touch; the client is already
        // dead.
    }
}
