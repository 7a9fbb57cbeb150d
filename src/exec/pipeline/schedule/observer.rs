// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Observable primitives for scheduling events.
//!
//! Responsibilities:
//! - Provides callback registration and deferred notification helpers for port state changes.
//! - Used by ports to tell a scheduler that a processor should be re-prepared.
//!
//! Key exported interfaces:
//! - Types: `Observer`, `Observable`, `DeferNotify`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::novarocks_logging::trace;

static NOTIFY_COUNT: AtomicU64 = AtomicU64::new(0);

const OBSERVER_LOG_EVERY: u64 = 1024;

/// Callback type invoked when observable scheduling events are triggered.
pub type Observer = Arc<dyn Fn() + Send + Sync + 'static>;

/// Observable helper that stores and notifies subscribed scheduler callbacks.
pub struct Observable {
    observers: Mutex<Vec<Observer>>,
}

impl Observable {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Observer) {
        let mut guard = self.observers.lock().expect("observable lock");
        guard.push(observer);
    }

    // Create a deferred notifier that triggers on drop if armed.
    pub fn defer_notify(self: &Arc<Self>) -> DeferNotify {
        DeferNotify::new(Arc::clone(self))
    }

    fn notify_observers(&self) {
        let observers = {
            let guard = self.observers.lock().expect("observable lock");
            guard.clone()
        };
        let notify_count = NOTIFY_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        if notify_count % OBSERVER_LOG_EVERY == 0 {
            trace!(
                "Observable notify: count={} observers={}",
                notify_count,
                observers.len()
            );
        }
        for observer in observers {
            observer();
        }
    }

    pub fn num_observers(&self) -> usize {
        let guard = self.observers.lock().expect("observable lock");
        guard.len()
    }
}

impl Default for Observable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII helper that defers observable notification until scope exit.
///
/// Notifications must happen outside of locks: create the notifier before
/// taking the lock and call `arm()` once the state change is committed.
#[must_use]
pub struct DeferNotify {
    observable: Arc<Observable>,
    armed: AtomicBool,
}

impl DeferNotify {
    pub fn new(observable: Arc<Observable>) -> Self {
        Self {
            observable,
            armed: AtomicBool::new(false),
        }
    }

    // Arm the notifier so drop will deliver the notification.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }
}

impl Drop for DeferNotify {
    fn drop(&mut self) {
        if self.armed.load(Ordering::Acquire) {
            self.observable.notify_observers();
        }
    }
}
