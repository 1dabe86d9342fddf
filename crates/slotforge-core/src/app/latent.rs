//! Latent - callback の代わりに「後で poll する」ハンドルを返す API
//!
//! スクリプト側から使う非同期エントリポイント向け。結果は
//! `OpStatus`（Succeeded / Failed / Rejected）と値の組で解決する。

use std::task::Poll;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use super::manager::SaveManager;
use crate::domain::{OpStatus, ScreenshotSize, SlotError, SlotId, SlotInfo};

/// Pending result of a manager operation, resolved by `SaveManager::tick`.
#[derive(Debug)]
pub struct Latent<T> {
    state: LatentState<T>,
}

#[derive(Debug)]
enum LatentState<T> {
    Pending(oneshot::Receiver<Result<T, SlotError>>),
    Resolved(OpStatus, Result<T, SlotError>),
}

impl<T> Latent<T> {
    fn rejected(err: SlotError) -> Self {
        Self {
            state: LatentState::Resolved(OpStatus::Rejected, Err(err)),
        }
    }

    /// Wire a latent to a manager request that takes a completion callback.
    fn request<F>(start: F) -> Self
    where
        F: FnOnce(Box<dyn FnOnce(Result<T, SlotError>)>) -> Result<(), SlotError>,
        T: 'static,
    {
        let (tx, rx) = oneshot::channel();
        let on_done: Box<dyn FnOnce(Result<T, SlotError>)> = Box::new(move |result| {
            let _ = tx.send(result);
        });
        match start(on_done) {
            Ok(()) => Self {
                state: LatentState::Pending(rx),
            },
            Err(err) => Self::rejected(err),
        }
    }

    /// Non-blocking. Once `Ready`, stays ready with the same status.
    pub fn poll(&mut self) -> Poll<OpStatus> {
        if let LatentState::Pending(rx) = &mut self.state {
            let resolved = match rx.try_recv() {
                Ok(Ok(value)) => LatentState::Resolved(OpStatus::Succeeded, Ok(value)),
                Ok(Err(err)) => LatentState::Resolved(OpStatus::Failed, Err(err)),
                Err(TryRecvError::Empty) => return Poll::Pending,
                // manager が callback を呼ばずに消えた
                Err(TryRecvError::Closed) => {
                    LatentState::Resolved(OpStatus::Failed, Err(SlotError::Cancelled))
                }
            };
            self.state = resolved;
        }
        match &self.state {
            LatentState::Resolved(status, _) => Poll::Ready(*status),
            LatentState::Pending(_) => Poll::Pending,
        }
    }

    pub fn status(&self) -> Option<OpStatus> {
        match &self.state {
            LatentState::Resolved(status, _) => Some(*status),
            LatentState::Pending(_) => None,
        }
    }

    /// The outcome, once `poll` has returned `Ready`.
    pub fn into_result(self) -> Option<Result<T, SlotError>> {
        match self.state {
            LatentState::Resolved(_, result) => Some(result),
            LatentState::Pending(_) => None,
        }
    }
}

impl SaveManager {
    pub fn save_slot_latent(
        &mut self,
        id: SlotId,
        overwrite: bool,
        screenshot: Option<ScreenshotSize>,
    ) -> Latent<SlotInfo> {
        Latent::request(|on_done| {
            self.save_slot(id, overwrite, screenshot, on_done)
                .map(|_| ())
        })
    }

    pub fn load_slot_latent(&mut self, id: SlotId) -> Latent<SlotInfo> {
        Latent::request(|on_done| self.load_slot(id, on_done).map(|_| ()))
    }

    pub fn load_all_slot_infos_latent(&mut self, sort_by_recent: bool) -> Latent<Vec<SlotInfo>> {
        Latent::request(|on_done| {
            self.load_all_slot_infos(sort_by_recent, on_done)
                .map(|_| ())
        })
    }

    pub fn delete_all_slots_latent(&mut self) -> Latent<Vec<SlotId>> {
        Latent::request(|on_done| self.delete_all_slots(on_done).map(|_| ()))
    }
}
