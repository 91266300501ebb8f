//! Task-wide thread suspension using Mach thread APIs.

use std::sync::Mutex;

use mach2::kern_return::KERN_SUCCESS;
use mach2::mach_init::mach_thread_self;
use mach2::mach_port::mach_port_deallocate;
use mach2::mach_types::{thread_act_array_t, thread_act_t};
use mach2::message::mach_msg_type_number_t;
use mach2::task::task_threads;
use mach2::thread_act::{thread_resume, thread_suspend};
use mach2::traps::mach_task_self;
use mach2::vm::mach_vm_deallocate;
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

use crate::core::HostError;

/// Threads of the current task suspended by us, in suspension order
#[derive(Debug, Default)]
pub struct TaskThreads {
    suspended: Mutex<Vec<thread_act_t>>,
}

impl TaskThreads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend every thread of the task except the caller
    pub fn suspend_others(&self) -> Result<(), HostError> {
        let mut suspended = self
            .suspended
            .lock()
            .map_err(|_| HostError::SuspendFailed("thread list poisoned".into()))?;
        if !suspended.is_empty() {
            return Err(HostError::SuspendFailed("threads already suspended".into()));
        }

        let threads = list_threads()?;
        let task = unsafe { mach_task_self() };
        let current = unsafe { mach_thread_self() };

        for thread in threads {
            if thread == current {
                unsafe { mach_port_deallocate(task, thread) };
                continue;
            }
            let kr = unsafe { thread_suspend(thread) };
            if kr == KERN_SUCCESS {
                suspended.push(thread);
            } else {
                // The thread may have exited since the snapshot
                log::debug!("thread_suspend({:#x}) failed: {}", thread, kr);
                unsafe { mach_port_deallocate(task, thread) };
            }
        }

        unsafe { mach_port_deallocate(task, current) };
        log::info!("Suspended {} threads", suspended.len());
        Ok(())
    }

    /// Resume and release every thread suspended by `suspend_others`
    pub fn resume_others(&self) -> Result<(), HostError> {
        let mut suspended = self
            .suspended
            .lock()
            .map_err(|_| HostError::ResumeFailed("thread list poisoned".into()))?;
        let task = unsafe { mach_task_self() };

        let mut failures = 0usize;
        for thread in suspended.drain(..) {
            let kr = unsafe { thread_resume(thread) };
            if kr != KERN_SUCCESS {
                failures += 1;
                log::warn!("thread_resume({:#x}) failed: {}", thread, kr);
            }
            unsafe { mach_port_deallocate(task, thread) };
        }

        if failures > 0 {
            return Err(HostError::ResumeFailed(format!(
                "{} threads failed to resume",
                failures
            )));
        }
        log::info!("Resumed threads");
        Ok(())
    }
}

fn list_threads() -> Result<Vec<thread_act_t>, HostError> {
    let mut list: thread_act_array_t = std::ptr::null_mut();
    let mut count: mach_msg_type_number_t = 0;

    unsafe {
        let task = mach_task_self();
        let kr = task_threads(task, &mut list, &mut count);
        if kr != KERN_SUCCESS {
            return Err(HostError::SuspendFailed(format!("task_threads failed: {}", kr)));
        }

        let threads = std::slice::from_raw_parts(list, count as usize).to_vec();

        mach_vm_deallocate(
            task,
            list as mach_vm_address_t,
            (count as usize * std::mem::size_of::<thread_act_t>()) as mach_vm_size_t,
        );

        Ok(threads)
    }
}
