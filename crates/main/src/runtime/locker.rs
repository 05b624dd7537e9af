use crate::{error::ScriptResult, runtime::Runtime};

/// Explicit thread ownership of a [Runtime].
///
/// Acquiring a locker binds the runtime to the calling thread; dropping the
/// outermost locker releases the binding entirely, letting another thread
/// claim the runtime. Lockers nest on the owning thread.
///
/// Acquisition from a thread while another thread owns the runtime fails
/// with [LockConflict](crate::ScriptError::LockConflict) instead of
/// blocking.
pub struct Locker<'a> {
    runtime: &'a Runtime,
}

impl<'a> Locker<'a> {
    pub(crate) fn new(runtime: &'a Runtime) -> ScriptResult<Self> {
        runtime.shared.lock_enter()?;

        Ok(Self { runtime })
    }

    #[inline(always)]
    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }
}

impl Drop for Locker<'_> {
    fn drop(&mut self) {
        self.runtime.shared.lock_exit();
    }
}
