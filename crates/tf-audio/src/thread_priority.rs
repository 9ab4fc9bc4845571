//! Scheduler thread priority
//!
//! The wall-clock strategy runs on a dedicated thread whose priority is a
//! configuration hint, not a guarantee: platforms that refuse elevation keep
//! the thread at default priority and the scheduler carries on. Outcomes are
//! logged once per applied hint.
//!
//! Platform paths:
//! - **macOS**: pthread QoS class USER_INTERACTIVE
//! - **Windows**: MMCSS "Pro Audio" class, falling back to
//!   `THREAD_PRIORITY_TIME_CRITICAL`
//! - **Linux**: SCHED_FIFO, then SCHED_RR, then `pthread_setschedparam`

/// Priority requested for a scheduler's execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPriorityHint {
    /// Elevate to the platform's real-time/audio class
    #[default]
    Realtime,
    /// Leave the thread at its default priority
    Normal,
}

/// What applying a hint actually achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityOutcome {
    /// Elevation applied
    Applied,
    /// Platform refused elevation; default priority remains
    Failed,
    /// No elevation path exists on this platform
    Unsupported,
    /// Hint was `Normal`, nothing attempted
    Skipped,
}

/// Apply the hint to the current thread. Call once after spawning the
/// scheduler thread, not per tick.
pub fn apply_priority_hint(hint: ThreadPriorityHint) -> PriorityOutcome {
    if hint == ThreadPriorityHint::Normal {
        return PriorityOutcome::Skipped;
    }

    let outcome = platform_elevate();
    match outcome {
        PriorityOutcome::Applied => {
            log::info!("scheduler thread elevated to real-time priority");
        }
        PriorityOutcome::Failed => {
            log::warn!("real-time priority unavailable, continuing at normal priority");
        }
        PriorityOutcome::Unsupported => {
            log::debug!("real-time priority not supported on this platform");
        }
        PriorityOutcome::Skipped => {}
    }
    outcome
}

// ═══════════════════════════════════════════════════════════════════════════════
// macOS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(target_os = "macos")]
fn platform_elevate() -> PriorityOutcome {
    // Highest non-realtime QoS; enough to keep ~8ms wakeups on time.
    const QOS_CLASS_USER_INTERACTIVE: u32 = 0x21;

    unsafe extern "C" {
        fn pthread_set_qos_class_self_np(qos_class: u32, relative_priority: i32) -> i32;
    }

    let rc = unsafe { pthread_set_qos_class_self_np(QOS_CLASS_USER_INTERACTIVE, 0) };
    if rc == 0 {
        PriorityOutcome::Applied
    } else {
        log::debug!("pthread_set_qos_class_self_np failed: {}", rc);
        PriorityOutcome::Failed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Windows
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(target_os = "windows")]
fn platform_elevate() -> PriorityOutcome {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Threading::{
        AvSetMmThreadCharacteristicsW, GetCurrentThread, SetThreadPriority,
        THREAD_PRIORITY_TIME_CRITICAL,
    };
    use windows::core::PCWSTR;

    // MMCSS first; the scheduler service knows how to budget audio threads.
    let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
    let mut task_index: u32 = 0;
    let mmcss = unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) };

    if !mmcss.is_invalid() {
        log::debug!("MMCSS Pro Audio class registered (task index {})", task_index);
        return PriorityOutcome::Applied;
    }

    log::debug!("MMCSS registration failed, falling back to thread priority");

    let thread: HANDLE = unsafe { GetCurrentThread() };
    let ok = unsafe { SetThreadPriority(thread, THREAD_PRIORITY_TIME_CRITICAL) };
    if ok.as_bool() {
        PriorityOutcome::Applied
    } else {
        PriorityOutcome::Failed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Linux
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(target_os = "linux")]
fn platform_elevate() -> PriorityOutcome {
    use libc::{SCHED_FIFO, SCHED_RR, pthread_self, pthread_setschedparam, sched_param,
        sched_setscheduler};

    fn with_scheduler(policy: i32, priority: i32) -> bool {
        let param = sched_param {
            sched_priority: priority,
        };
        unsafe { sched_setscheduler(0, policy, &param) == 0 }
    }

    // SCHED_FIFO needs CAP_SYS_NICE or root; priority 80 stays below
    // kernel threads.
    if with_scheduler(SCHED_FIFO, 80) {
        return PriorityOutcome::Applied;
    }
    log::debug!("SCHED_FIFO denied, trying SCHED_RR");

    if with_scheduler(SCHED_RR, 70) {
        return PriorityOutcome::Applied;
    }
    log::debug!("SCHED_RR denied, trying pthread_setschedparam");

    let param = sched_param { sched_priority: 50 };
    let rc = unsafe { pthread_setschedparam(pthread_self(), SCHED_FIFO, &param) };
    if rc == 0 {
        PriorityOutcome::Applied
    } else {
        log::debug!("pthread_setschedparam failed: {}", rc);
        PriorityOutcome::Failed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Unsupported platforms
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
fn platform_elevate() -> PriorityOutcome {
    PriorityOutcome::Unsupported
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_normal_hint_is_skipped() {
        assert_eq!(
            apply_priority_hint(ThreadPriorityHint::Normal),
            PriorityOutcome::Skipped
        );
    }

    #[test]
    #[serial]
    fn test_realtime_hint_reports_outcome() {
        // Elevation may be denied in unprivileged environments; any outcome
        // except Skipped is valid, and repeating the call must be safe.
        let first = apply_priority_hint(ThreadPriorityHint::Realtime);
        let second = apply_priority_hint(ThreadPriorityHint::Realtime);
        for outcome in [first, second] {
            assert!(matches!(
                outcome,
                PriorityOutcome::Applied | PriorityOutcome::Failed | PriorityOutcome::Unsupported
            ));
        }
    }
}
