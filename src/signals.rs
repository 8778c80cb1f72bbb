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

//! Typed observer lists.
//!
//! A `Signal` lives inside the application state, so dispatching takes the
//! signal out of the state first (`std::mem::take`), runs the subscribers
//! with `&mut State`, and then merges back any connects/disconnects that
//! happened during dispatch. Subscribers are invoked in insertion order and
//! cannot invalidate each other mid-dispatch; a disconnect issued while
//! dispatching takes effect on the next emit.

use std::mem;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Subscription(u64);

type Callback<S, T> = Box<dyn FnMut(&mut S, &T)>;

pub struct Signal<S, T> {
    subs: Vec<(Subscription, Callback<S, T>)>,
    removed: Vec<Subscription>,
}

impl<S, T> Default for Signal<S, T> {
    fn default() -> Self {
        Self {
            subs: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<S, T> Signal<S, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, callback: impl FnMut(&mut S, &T) + 'static) -> Subscription {
        let id = Subscription(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.subs.push((id, Box::new(callback)));
        id
    }

    pub fn disconnect(&mut self, id: Subscription) {
        self.subs.retain(|(i, _)| *i != id);
        self.removed.push(id);
    }

    fn run(&mut self, state: &mut S, payload: &T) {
        for (_, callback) in &mut self.subs {
            callback(state, payload);
        }
    }

    fn absorb(&mut self, mut other: Self) {
        for id in other.removed.drain(..) {
            self.subs.retain(|(i, _)| *i != id);
        }
        self.subs.append(&mut other.subs);
    }
}

/// Dispatches the signal selected by `pick` with the take/merge pattern
/// described in the module docs.
pub fn emit<S, T>(state: &mut S, pick: impl Fn(&mut S) -> &mut Signal<S, T>, payload: &T) {
    let mut signal = mem::take(pick(state));
    signal.run(state, payload);
    let during_dispatch = mem::take(pick(state));
    signal.absorb(during_dispatch);
    *pick(state) = signal;
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::Signal;
    use super::emit;

    #[derive(Default)]
    struct State {
        sig: Signal<State, u32>,
        seen: Vec<u32>,
    }

    #[test]
    fn subscribers_run_in_insertion_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut state = State::default();

        for tag in 0..3 {
            let order = order.clone();
            state.sig.connect(move |_, payload| {
                order.borrow_mut().push((tag, *payload));
            });
        }

        emit(&mut state, |s| &mut s.sig, &7);
        assert_eq!(*order.borrow(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn subscribers_may_mutate_state() {
        let mut state = State::default();
        state.sig.connect(|s, payload| s.seen.push(*payload));

        emit(&mut state, |s| &mut s.sig, &1);
        emit(&mut state, |s| &mut s.sig, &2);
        assert_eq!(state.seen, vec![1, 2]);
    }

    #[test]
    fn connect_during_dispatch_fires_on_next_emit() {
        let mut state = State::default();
        state.sig.connect(|s, payload| {
            if *payload == 1 {
                s.sig.connect(|s, p| s.seen.push(*p + 100));
            }
            s.seen.push(*payload);
        });

        emit(&mut state, |s| &mut s.sig, &1);
        assert_eq!(state.seen, vec![1]);
        emit(&mut state, |s| &mut s.sig, &2);
        assert_eq!(state.seen, vec![1, 2, 102]);
    }

    #[test]
    fn disconnect_during_dispatch_takes_effect_afterwards() {
        let mut state = State::default();
        let id = state.sig.connect(|s, payload| s.seen.push(*payload));
        state.sig.connect(move |s, _| s.sig.disconnect(id));

        emit(&mut state, |s| &mut s.sig, &1);
        emit(&mut state, |s| &mut s.sig, &2);
        assert_eq!(state.seen, vec![1]);
    }
}
