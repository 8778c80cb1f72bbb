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

//! One-shot timers on the main event loop, exposed to the scripting layer.
//!
//! Every timer has two hooks: `fire` runs when the deadline passes, `destroy`
//! runs when the timer is cancelled or the manager is torn down before the
//! deadline. Exactly one of the two runs: the entry is removed from the table
//! before either hook is invoked, so the other path finds nothing to run.

use std::collections::HashMap;
use std::time::Duration;

use calloop::RegistrationToken;
use calloop::timer::TimeoutAction;
use calloop::timer::Timer;

use crate::prelude::*;
use crate::server::ServerState;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimerId(u64);

pub struct TimerEntry {
    token: RegistrationToken,
    destroy: Option<Box<dyn FnOnce(&mut ServerState)>>,
}

#[derive(Default)]
pub struct Timers {
    entries: HashMap<TimerId, TimerEntry>,
    next: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ServerState {
    pub fn add_timer(
        &mut self,
        duration: Duration,
        fire: impl FnOnce(&mut ServerState) + 'static,
        destroy: impl FnOnce(&mut ServerState) + 'static,
    ) -> Result<TimerId> {
        self.timers.next += 1;
        let id = TimerId(self.timers.next);

        let mut fire = Some(fire);
        let token = self
            .lh
            .insert_source(Timer::from_duration(duration), move |_, _, state| {
                // Disarm the destroy hook before firing; returning Drop
                // deregisters the source itself.
                state.timers.entries.remove(&id);
                if let Some(fire) = fire.take() {
                    fire(state);
                }
                TimeoutAction::Drop
            })
            .map_err(|e| anyhow!("failed to arm timer: {e}"))?;

        self.timers.entries.insert(
            id,
            TimerEntry {
                token,
                destroy: Some(Box::new(destroy)),
            },
        );
        Ok(id)
    }

    /// Cancels a pending timer, running its destroy hook. Cancelling a timer
    /// that already fired is a no-op.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(mut entry) = self.timers.entries.remove(&id) {
            self.lh.remove(entry.token);
            if let Some(destroy) = entry.destroy.take() {
                destroy(self);
            }
        }
    }

    /// Tears down every pending timer, running destroy hooks. Called once at
    /// shutdown.
    pub fn drop_all_timers(&mut self) {
        let ids: Vec<TimerId> = self.timers.entries.keys().copied().collect();
        for id in ids {
            self.cancel_timer(id);
        }
    }
}
