//! Attended (consultative) transfer
//!
//! ```text
//!   init(target)        complete(new)                    cancel(new)
//!   hold original       unhold original                  hang up new
//!   call target   ───▶  wait 50 ms                 or    unhold original
//!                       refer original → new
//!                       hang up original
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::client::calls::{CallController, TRANSFER_SETTLE_DELAY};
use crate::error::ClientResult;
use crate::signaling::{SessionHandle, SessionId};

/// Attended transfer of one original session
#[derive(Debug, Clone)]
pub struct AttendedTransfer {
    controller: Arc<CallController>,
    original: SessionHandle,
}

impl AttendedTransfer {
    pub(crate) fn new(controller: Arc<CallController>, original: SessionHandle) -> Self {
        Self { controller, original }
    }

    pub fn original(&self) -> &SessionHandle {
        &self.original
    }

    /// Hold the original session and call the transfer target
    pub async fn init(&self, target: &str) -> ClientResult<SessionHandle> {
        self.controller.hold(&self.original).await?;
        let video = self.controller.video_enabled();
        let consult = self.controller.call(target, video).await?;
        info!(
            "Consulting {} for transfer of {}",
            SessionId::of(consult.as_ref()),
            SessionId::of(self.original.as_ref())
        );
        Ok(consult)
    }

    /// Hand the original party over to `new_session`
    pub async fn complete(&self, new_session: &SessionHandle) -> ClientResult<()> {
        let original = SessionId::of(self.original.as_ref());
        self.controller.unhold(&self.original).await?;
        tokio::time::sleep(TRANSFER_SETTLE_DELAY).await;
        self.original.refer_to_session(new_session).await.map_err(|e| {
            warn!("Attended transfer of {} failed: {}", original, e);
            e
        })?;
        info!("Transferred {} to {}", original, SessionId::of(new_session.as_ref()));
        self.controller.hangup(&self.original).await;
        Ok(())
    }

    /// Abandon the consultation and resume the original session
    pub async fn cancel(&self, new_session: &SessionHandle) -> ClientResult<()> {
        self.controller.hangup(new_session).await;
        self.controller.unhold(&self.original).await
    }
}

impl CallController {
    /// Start an attended transfer of `session`
    pub fn attended_transfer(self: &Arc<Self>, session: &SessionHandle) -> AttendedTransfer {
        AttendedTransfer::new(self.clone(), session.clone())
    }
}
