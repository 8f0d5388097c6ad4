//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Accept task
//!
//! Each listening acceptor is driven by one task. The factory controls it through an
//! [`AcceptorHandle`]: `register` resumes accepting, `unregister` pauses it, and `finish`
//! makes the task close the acceptor and report back through
//! [`Inner::acceptor_finished`](crate::factory::Inner::acceptor_finished).

use crate::factory::Inner;
use std::sync::Weak;
use switchyard_transport::{Acceptor, Error};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Paused,
    Accepting,
    Finish,
}

/// Control side of a running accept task
pub(crate) struct AcceptorHandle {
    generation: u64,
    control: watch::Sender<Control>,
    task: JoinHandle<()>,
}

impl AcceptorHandle {
    /// Spawn the task driving an already listening `acceptor`
    pub(crate) fn spawn(
        acceptor: Box<dyn Acceptor>,
        factory: Weak<Inner>,
        generation: u64,
        accepting: bool,
    ) -> Self {
        let initial = if accepting {
            Control::Accepting
        } else {
            Control::Paused
        };
        let (control, receiver) = watch::channel(initial);
        let task = tokio::spawn(run(acceptor, receiver, factory, generation));
        Self {
            generation,
            control,
            task,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Resume accepting
    pub(crate) fn register(&self) {
        self.set(Control::Accepting);
    }

    /// Pause accepting
    pub(crate) fn unregister(&self) {
        self.set(Control::Paused);
    }

    /// Close the acceptor and report back
    pub(crate) fn finish(&self) {
        self.set(Control::Finish);
    }

    fn set(&self, next: Control) {
        self.control.send_if_modified(|current| {
            if *current == Control::Finish || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        if *self.control.borrow() != Control::Finish {
            self.task.abort();
        }
    }
}

/// How the accept loop ended
enum Exit {
    /// Finish was requested
    Finished,
    /// The acceptor failed and should be recreated
    Failed,
    /// The factory is gone
    Orphaned,
}

async fn run(
    mut acceptor: Box<dyn Acceptor>,
    mut control: watch::Receiver<Control>,
    factory: Weak<Inner>,
    generation: u64,
) {
    let exit = accept_loop(acceptor.as_mut(), &mut control, &factory).await;
    acceptor.close().await;
    tracing::debug!(acceptor = %acceptor, "Acceptor closed");

    if let Some(inner) = factory.upgrade() {
        match exit {
            Exit::Finished => inner.acceptor_finished(generation, true),
            Exit::Failed => inner.acceptor_finished(generation, false),
            Exit::Orphaned => {}
        }
    }
}

async fn accept_loop(
    acceptor: &mut dyn Acceptor,
    control: &mut watch::Receiver<Control>,
    factory: &Weak<Inner>,
) -> Exit {
    loop {
        let mode = match control.wait_for(|mode| *mode != Control::Paused).await {
            Ok(mode) => *mode,
            Err(_) => return Exit::Orphaned,
        };
        if mode == Control::Finish {
            return Exit::Finished;
        }

        tracing::trace!(acceptor = %acceptor, "Trying to accept connection");
        let accepted = tokio::select! {
            accepted = acceptor.accept() => accepted,
            changed = control.changed() => {
                if changed.is_err() {
                    return Exit::Orphaned;
                }
                continue;
            }
        };

        let Some(inner) = factory.upgrade() else {
            return Exit::Orphaned;
        };
        match accepted {
            Ok(transceiver) => {
                tracing::debug!(
                    acceptor = %acceptor,
                    transceiver = %transceiver,
                    "Accepted connection"
                );
                inner.accepted(transceiver);
            }
            Err(err) if err.is_resource_exhausted() => {
                inner.metrics.accept_error();
                tracing::error!(
                    acceptor = %acceptor,
                    error = %err,
                    "Can't accept more connections, stopping acceptor"
                );
                return Exit::Failed;
            }
            Err(Error::Io(err)) => {
                inner.metrics.accept_error();
                tracing::debug!(acceptor = %acceptor, error = %err, "Accept failed");
            }
            Err(err) => {
                inner.metrics.accept_error();
                if inner.config.warn_connections {
                    tracing::warn!(acceptor = %acceptor, error = %err, "Connection exception");
                }
            }
        }
    }
}
