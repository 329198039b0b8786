/*!
 * Last Error
 * Per-thread error slot read back by foreign callers after a failed call
 */

use crate::ipc::shm::ShmError;
use std::cell::RefCell;

thread_local! {
    static LAST_ERROR: RefCell<Option<ShmError>> = const { RefCell::new(None) };
}

pub fn set_last_error(err: ShmError) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err));
}

pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Clone of this thread's most recent error, if the last call failed
pub fn last_error() -> Option<ShmError> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}
