//! No concurrency control: every request is granted.

use super::{Acquire, Release};
use crate::error::ErrorCode;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoneLock;

impl NoneLock {
    pub fn lock<W>(&self, waiter: W) -> Acquire<W> {
        Acquire::Granted(waiter)
    }

    pub fn unlock<W>(&self) -> Release<W> {
        Release::new(ErrorCode::Success)
    }
}
