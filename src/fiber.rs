// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Cooperative fiber scheduling.
//!
//! Each fiber is backed by its own OS thread. Exactly one fiber's thread
//! runs at a time; a pair of counting semaphores hands control back and
//! forth so the invariant holds without busy-waiting. `resume` blocks the
//! caller's thread until the callee either yields or terminates; `yield_`
//! (called from inside the running fiber) hands control back and blocks
//! until resumed again.
//!
//! GC roots inside a fiber are tracked precisely rather than by scanning
//! the OS stack: `dispatch` pushes a [`crate::frame::Frame`] onto the
//! fiber's shadow stack before entering a function body and pops it on
//! return, so `trace_roots` only ever needs to walk that explicit list.

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Created but never resumed.
    Ready,
    /// Currently the single running fiber.
    Running,
    /// Yielded; waiting to be resumed.
    Suspended,
    /// Body returned or threw; cannot be resumed again.
    Terminated,
}

/// A minimal counting semaphore used for the resume/yield handshake.
struct Semaphore {
    count: Mutex<u32>,
    condvar: Condvar,
}

impl Semaphore {
    fn new(initial: u32) -> Self {
        Self { count: Mutex::new(initial), condvar: Condvar::new() }
    }

    fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.condvar.wait(&mut count);
        }
        *count -= 1;
    }

    fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.condvar.notify_one();
    }
}

/// Shared, thread-safe fiber state — the part that must outlive any single
/// call into `resume`, since it is read and written from two OS threads
/// (the caller's and the fiber's own).
struct FiberControl {
    resume_permit: Semaphore,
    yield_permit: Semaphore,
    status: Mutex<FiberStatus>,
    /// Value handed resume -> fiber on wakeup, and fiber -> caller on
    /// yield or return.
    transfer: Mutex<Value>,
    /// Set if the fiber's body raised an error that escaped uncaught.
    failure: Mutex<Option<Error>>,
    frames: Mutex<Vec<Frame>>,
}

/// The GC-visible payload of a `Fiber` object.
pub struct FiberData {
    control: Arc<FiberControl>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

thread_local! {
    static CURRENT_FIBER: std::cell::RefCell<Option<Value>> = const { std::cell::RefCell::new(None) };
}

/// The fiber whose OS thread is currently executing, or `None` on the
/// runtime's initial (main) thread.
#[must_use]
pub fn current_fiber() -> Option<Value> {
    CURRENT_FIBER.with(|cell| *cell.borrow())
}

impl FiberData {
    /// Spawn the backing OS thread for a fiber whose body is `body`,
    /// called with the receiver `self_value` fixed at creation and the
    /// first `resume` argument as its single parameter. `fiber_value` is
    /// the `Value` the new fiber will see as [`current_fiber`] once
    /// running; it must already hold this `FiberData`.
    pub fn spawn(
        stack_size: usize,
        fiber_value: Value,
        self_value: Value,
        body: impl FnOnce(Value, Value) -> Result<Value> + Send + 'static,
    ) -> Self {
        let control = Arc::new(FiberControl {
            resume_permit: Semaphore::new(0),
            yield_permit: Semaphore::new(0),
            status: Mutex::new(FiberStatus::Ready),
            transfer: Mutex::new(Value::NIL),
            failure: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
        });

        let thread_control = Arc::clone(&control);
        let handle = std::thread::Builder::new()
            .stack_size(stack_size)
            .spawn(move || {
                thread_control.resume_permit.acquire();
                CURRENT_FIBER.with(|cell| *cell.borrow_mut() = Some(fiber_value));
                let arg = *thread_control.transfer.lock();
                let result = body(self_value, arg);
                match result {
                    Ok(value) => *thread_control.transfer.lock() = value,
                    Err(err) => *thread_control.failure.lock() = Some(err),
                }
                *thread_control.status.lock() = FiberStatus::Terminated;
                thread_control.yield_permit.release();
            })
            .expect("spawning a fiber's backing OS thread");

        Self { control, handle: Mutex::new(Some(handle)) }
    }

    #[must_use]
    pub fn status(&self) -> FiberStatus {
        *self.control.status.lock()
    }

    /// Hand control to this fiber and block until it yields or terminates.
    pub fn resume(&self, arg: Value) -> Result<Value> {
        {
            let mut status = self.control.status.lock();
            match *status {
                FiberStatus::Ready | FiberStatus::Suspended => *status = FiberStatus::Running,
                FiberStatus::Running => return Err(Error::FiberState("already running")),
                FiberStatus::Terminated => return Err(Error::FiberState("terminated")),
            }
        }
        *self.control.transfer.lock() = arg;
        self.control.resume_permit.release();
        self.control.yield_permit.acquire();

        if let Some(err) = self.control.failure.lock().take() {
            return Err(err);
        }
        Ok(*self.control.transfer.lock())
    }

    /// Called from inside the running fiber's own thread: hand control
    /// back to whoever called `resume`, carrying `value`, and block until
    /// resumed again.
    pub fn yield_now(&self, value: Value) -> Value {
        *self.control.transfer.lock() = value;
        *self.control.status.lock() = FiberStatus::Suspended;
        self.control.yield_permit.release();
        self.control.resume_permit.acquire();
        *self.control.status.lock() = FiberStatus::Running;
        *self.control.transfer.lock()
    }

    pub fn push_frame(&self, frame: Frame) {
        self.control.frames.lock().push(frame);
    }

    pub fn pop_frame(&self) -> Option<Frame> {
        self.control.frames.lock().pop()
    }

    /// Liberate the top of this fiber's shadow stack onto the heap,
    /// returning the resulting environment. `None` if the shadow stack is
    /// empty (a closure built with no enclosing call, e.g. at module top
    /// level).
    pub fn liberate_top_frame(&self, rt: &crate::runtime::Runtime, local_count: usize) -> Option<Value> {
        let mut frames = self.control.frames.lock();
        Some(frames.last_mut()?.liberate(rt, local_count))
    }

    /// Read a lexical reference relative to the top of this fiber's shadow
    /// stack: `level` 0 is the running frame's own locals (its heap copy,
    /// if liberated); `level >= 1` walks into `parent_env`.
    #[must_use]
    pub fn read_lexical(&self, level: usize, index: usize) -> Value {
        let frames = self.control.frames.lock();
        let Some(frame) = frames.last() else { return Value::UNDEFINED };
        if level == 0 {
            if let Some(env) = frame.liberated {
                return with_environment(env, |env| crate::frame::resolve_lexical(env, 0, index)).unwrap_or(Value::UNDEFINED);
            }
            return frame.get_local(index);
        }
        let Some(parent) = frame.parent_env else { return Value::UNDEFINED };
        with_environment(parent, |env| crate::frame::resolve_lexical(env, level - 1, index)).unwrap_or(Value::UNDEFINED)
    }

    /// Write a lexical reference relative to the top of this fiber's
    /// shadow stack, per the same `(level, index)` addressing as
    /// [`FiberData::read_lexical`].
    pub fn assign_lexical(&self, level: usize, index: usize, value: Value) {
        let mut frames = self.control.frames.lock();
        let Some(frame) = frames.last_mut() else { return };
        if level == 0 {
            if let Some(env) = frame.liberated {
                with_environment(env, |env| crate::frame::assign_lexical(env, 0, index, value));
            } else {
                frame.set_local(index, value);
            }
            return;
        }
        let Some(parent) = frame.parent_env else { return };
        with_environment(parent, |env| crate::frame::assign_lexical(env, level - 1, index, value));
    }

    /// One descriptive line per live shadow-stack frame, innermost last —
    /// used by `exception::throw` to snapshot a backtrace at the raise
    /// site.
    #[must_use]
    pub fn backtrace(&self) -> Vec<String> {
        self.control.frames.lock().iter().map(|frame| format!("self={:?}", frame.self_value)).collect()
    }

    /// Mark every Value reachable from this fiber's live (non-liberated)
    /// shadow-stack frames and its in-flight transfer value.
    pub fn trace_roots(&self, mark: &mut dyn FnMut(Value)) {
        mark(*self.control.transfer.lock());
        for frame in self.control.frames.lock().iter() {
            if let Some(env) = frame.liberated {
                mark(env);
            } else {
                mark(frame.self_value);
                for local in &frame.locals {
                    mark(*local);
                }
                if let Some(parent) = frame.parent_env {
                    mark(parent);
                }
            }
        }
    }
}

/// Borrow the `EnvironmentData` behind `env` and run `f` over it, or
/// `None` if `env` doesn't point at an `Environment` object.
fn with_environment<R>(env: Value, f: impl FnOnce(&crate::frame::EnvironmentData) -> R) -> Option<R> {
    let obj = env.as_object()?;
    let crate::object::Payload::Environment(data) = &obj.get().payload else { return None };
    Some(f(data))
}

impl Drop for FiberData {
    fn drop(&mut self) {
        // A fiber that never ran to completion still has its thread parked
        // on `resume_permit`; there is no well-defined "cancel" operation,
        // so we only reap threads that already finished on their own.
        if let Some(handle) = self.handle.get_mut().take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;

    #[test]
    fn ping_pong_resume_and_yield() {
        let fiber_value = Value::int(1); // placeholder identity for this unit test
        let data = FiberData::spawn(16 * 1024, fiber_value, Value::NIL, |_self_value, first| {
            assert_eq!(first, Value::int(10));
            Ok(Value::int(first.as_int().unwrap() + 1))
        });

        assert_eq!(data.status(), FiberStatus::Ready);
        let result = data.resume(Value::int(10)).unwrap();
        assert_eq!(result, Value::int(11));
        assert_eq!(data.status(), FiberStatus::Terminated);
    }

    #[test]
    fn liberated_frame_locals_survive_as_a_parent_env_for_a_later_frame() {
        let rt = Runtime::new(RuntimeConfig::default());
        let data = FiberData::spawn(16 * 1024, Value::int(1), Value::NIL, |_, v| Ok(v));

        let mut outer = Frame::new(Value::NIL);
        outer.set_local(0, Value::int(10));
        data.push_frame(outer);

        let env = data.liberate_top_frame(&rt, 1).expect("a frame is on the stack");
        assert_eq!(data.read_lexical(0, 0), Value::int(10), "level 0 reads the just-liberated frame's own local");

        data.push_frame(Frame::with_parent_env(Value::NIL, Some(env)));
        assert_eq!(data.read_lexical(1, 0), Value::int(10), "level 1 from the inner frame reaches the captured outer local");

        data.assign_lexical(1, 0, Value::int(99));
        assert_eq!(data.read_lexical(1, 0), Value::int(99), "upward write is visible through the same environment pointer");

        data.pop_frame();
        assert_eq!(data.read_lexical(0, 0), Value::int(99), "outer frame's liberated copy reflects the write made through it");
    }

    #[test]
    fn resuming_a_terminated_fiber_errors() {
        let fiber_value = Value::int(2);
        let data = FiberData::spawn(16 * 1024, fiber_value, Value::NIL, |_, v| Ok(v));
        data.resume(Value::NIL).unwrap();
        let err = data.resume(Value::NIL).unwrap_err();
        assert!(matches!(err, Error::FiberState("terminated")));
    }
}
