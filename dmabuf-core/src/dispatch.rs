//! Message codec & dispatch (component E).
//!
//! Decodes a [`Frame`]'s command and routes it to whichever registry
//! owns that behavior. `Export` is the one command a [`Dispatcher`] must
//! *not* finish inline — it only needs to be queued, so the back-ring
//! ISR never allocates under ring-slot contention; everything else is
//! bounded, constant-ish work and is handled and acknowledged in the
//! same call.

use dmabuf_abi::{Command, Frame, VmId, command::Status};

/// Handlers for each wire command, implemented by [`crate::Service`].
/// Kept as a trait (rather than folding dispatch directly into
/// `Service`) so the codec/routing logic here can be unit tested against
/// a minimal fake independent of the full registry machinery.
pub trait Dispatcher {
    /// Enqueue a newly announced buffer for worker-queue processing.
    /// Must not block or fail — any failure surfaces later, from the
    /// worker, as a dropped announcement (logged, not returned to the
    /// exporter — the exporter isn't waiting on this).
    fn on_export(&self, remote: VmId, frame: Frame);
    fn on_notify_unexport(&self, remote: VmId, frame: Frame) -> Status;
    fn on_export_fd(&self, remote: VmId, frame: Frame) -> Status;
    fn on_export_fd_failed(&self, remote: VmId, frame: Frame) -> Status;
    fn on_ops_to_source(&self, remote: VmId, frame: Frame) -> Status;
}

fn respond(mut frame: Frame, status: Status) -> Frame {
    frame.status = status as u32;
    frame
}

/// Entry point called from [`crate::transport::Transport::pump_rx`] for
/// every request consumed off a peer's rx ring.
pub fn handle_request(dispatcher: &impl Dispatcher, remote: VmId, request: Frame) -> Frame {
    match Command::from_u32(request.command) {
        Some(Command::Export) => {
            dispatcher.on_export(remote, request);
            respond(request, Status::Processed)
        }
        Some(Command::NotifyUnexport) => {
            respond(request, dispatcher.on_notify_unexport(remote, request))
        }
        Some(Command::ExportFd) => respond(request, dispatcher.on_export_fd(remote, request)),
        Some(Command::ExportFdFailed) => {
            respond(request, dispatcher.on_export_fd_failed(remote, request))
        }
        Some(Command::OpsToSource) => {
            respond(request, dispatcher.on_ops_to_source(remote, request))
        }
        Some(Command::OpsToRemote) | None => respond(request, Status::Error),
    }
}
