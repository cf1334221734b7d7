//! Per-period notifications to the Java host.
//!
//! The audio threads only bump a counter and unpark the notifier thread.
//! That thread is attached to the JVM once and calls the static
//! `javaOnRecord()` / `javaOnPlay()` methods of the host class, so the
//! real-time threads never enter the JVM.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use jni::objects::{GlobalRef, JClass};
use jni::JavaVM;

use crate::audio::PeriodObserver;

const IDLE_PARK: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Pending {
    record: AtomicU64,
    play: AtomicU64,
    running: AtomicBool,
}

/// Observer installed on the engine; cheap enough for the audio threads.
pub(crate) struct JavaPeriodObserver {
    pending: Arc<Pending>,
    worker: Thread,
}

impl PeriodObserver for JavaPeriodObserver {
    fn on_capture(&self, _frames: &[i16]) {
        self.pending.record.fetch_add(1, Ordering::Release);
        self.worker.unpark();
    }

    fn on_playback(&self, _frames: &[i16]) {
        self.pending.play.fetch_add(1, Ordering::Release);
        self.worker.unpark();
    }
}

/// Owns the notifier thread; stops and joins it on drop.
pub(crate) struct JavaNotifier {
    pending: Arc<Pending>,
    thread: Option<JoinHandle<()>>,
}

impl JavaNotifier {
    pub(crate) fn spawn(
        vm: JavaVM,
        host_class: GlobalRef,
    ) -> std::io::Result<(Self, Arc<JavaPeriodObserver>)> {
        let pending = Arc::new(Pending::default());
        pending.running.store(true, Ordering::Release);

        let worker_pending = Arc::clone(&pending);
        let thread = thread::Builder::new()
            .name("live-effect-notifier".to_string())
            .spawn(move || run(vm, host_class, worker_pending))?;

        let observer = Arc::new(JavaPeriodObserver {
            pending: Arc::clone(&pending),
            worker: thread.thread().clone(),
        });
        Ok((
            Self {
                pending,
                thread: Some(thread),
            },
            observer,
        ))
    }
}

impl Drop for JavaNotifier {
    fn drop(&mut self) {
        self.pending.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("[JavaNotifier] Notifier thread panicked");
            }
        }
    }
}

fn run(vm: JavaVM, host_class: GlobalRef, pending: Arc<Pending>) {
    let mut env = match vm.attach_current_thread_permanently() {
        Ok(env) => env,
        Err(err) => {
            log::error!("[JavaNotifier] Failed to attach to the JVM: {}", err);
            return;
        }
    };
    let class: &JClass = host_class.as_obj().into();

    while pending.running.load(Ordering::Acquire) {
        let records = pending.record.swap(0, Ordering::AcqRel);
        let plays = pending.play.swap(0, Ordering::AcqRel);
        if records == 0 && plays == 0 {
            thread::park_timeout(IDLE_PARK);
            continue;
        }

        // One Java call per wake-up; bursts are coalesced.
        for (count, method) in [(records, "javaOnRecord"), (plays, "javaOnPlay")] {
            if count == 0 {
                continue;
            }
            if let Err(err) = env.call_static_method(class, method, "()V", &[]) {
                log::warn!("[JavaNotifier] {} failed: {}", method, err);
                let _ = env.exception_clear();
            }
        }
    }
    log::debug!("[JavaNotifier] Stopped");
}
