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

//! Host-side cursor: an xcursor theme loaded onto the outer shm and attached
//! to the host pointer on enter.

use wayland_client::Connection;
use wayland_client::protocol::wl_buffer::WlBuffer as OuterWlBuffer;
use wayland_client::protocol::wl_surface::WlSurface as OuterWlSurface;
use wayland_cursor::CursorTheme;

use crate::config::Config;
use crate::prelude::*;
use crate::server::ServerState;
use crate::server::backend::Backend;

pub struct CursorConfig {
    // Owns the shm pool backing the image buffer.
    _theme: CursorTheme,
    pub buffer: OuterWlBuffer,
    pub hotspot: (i32, i32),
}

pub struct Cursor {
    pub surface: OuterWlSurface,
    pub config: CursorConfig,
    pub show: bool,
}

fn load_cursor_config(conn: &Connection, backend: &Backend, config: &Config) -> Result<CursorConfig> {
    let mut theme = if config.cursor_theme.is_empty() {
        CursorTheme::load(conn, backend.shm.clone(), config.cursor_size)
    } else {
        CursorTheme::load_from_name(
            conn,
            backend.shm.clone(),
            &config.cursor_theme,
            config.cursor_size,
        )
    }
    .with_context(loc!(), || {
        format!("failed to load cursor theme {:?}", config.cursor_theme)
    })?;

    let cursor = theme.get_cursor(&config.cursor_icon).with_context(loc!(), || {
        format!(
            "cursor theme {:?} does not contain {:?}",
            config.cursor_theme, config.cursor_icon
        )
    })?;

    let image = &cursor[0];
    let (hx, hy) = image.hotspot();
    let buffer: OuterWlBuffer = (**image).clone();

    Ok(CursorConfig {
        _theme: theme,
        buffer,
        hotspot: (hx as i32, hy as i32),
    })
}

impl Cursor {
    pub fn new(conn: &Connection, backend: &Backend, config: &Config) -> Result<Self> {
        let cursor_config = load_cursor_config(conn, backend, config).location(loc!())?;

        let surface = backend.compositor.create_surface(&backend.qh, ());
        surface.attach(Some(&cursor_config.buffer), 0, 0);
        surface.commit();

        Ok(Self {
            surface,
            config: cursor_config,
            show: true,
        })
    }
}

impl ServerState {
    /// Host pointer entered the root surface; (re-)announce our cursor with
    /// the enter serial.
    pub fn cursor_on_pointer_enter(&mut self, serial: u32) {
        let Some(pointer) = &self.backend.host_pointer else {
            return;
        };
        let Some(cursor) = &self.cursor else {
            return;
        };

        if cursor.show {
            pointer.set_cursor(
                serial,
                Some(&cursor.surface),
                cursor.config.hotspot.0,
                cursor.config.hotspot.1,
            );
        } else {
            pointer.set_cursor(serial, None, 0, 0);
        }
    }

    pub fn cursor_show(&mut self) {
        if self.cursor.as_ref().is_none_or(|cursor| cursor.show) {
            return;
        }
        if let Some(cursor) = &mut self.cursor {
            cursor.show = true;
        }
        let serial = self.seat.last_enter_serial;
        self.cursor_on_pointer_enter(serial);
    }

    pub fn cursor_hide(&mut self) {
        if self.cursor.as_ref().is_none_or(|cursor| !cursor.show) {
            return;
        }
        if let Some(cursor) = &mut self.cursor {
            cursor.show = false;
        }
        let serial = self.seat.last_enter_serial;
        self.cursor_on_pointer_enter(serial);
    }

    /// Reloads the cursor theme from a new config. On failure the previous
    /// cursor stays in place.
    pub fn cursor_use_config(&mut self, config: &Config) -> Result<()> {
        let Some(cursor) = &mut self.cursor else {
            bail!("no cursor loaded");
        };

        let new_config =
            load_cursor_config(&self.backend.conn, &self.backend, config).location(loc!())?;

        cursor.surface.attach(Some(&new_config.buffer), 0, 0);
        cursor.surface.commit();
        cursor.config = new_config;
        let visible = cursor.show;

        if visible {
            let serial = self.seat.last_enter_serial;
            self.cursor_on_pointer_enter(serial);
        }
        Ok(())
    }
}
