use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use plugval_utils::Deadline;

use crate::error::ThreadError;
use crate::main_thread;

/// Unit of work executed by a [`ManagedThread`]. Shared so it can run again on restart.
pub type Task = Arc<dyn Fn() + Send + Sync + 'static>;

/// Lifecycle of a [`ManagedThread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Never started.
    Idle,
    /// The worker body is executing.
    Running,
    /// The worker body returned, was stopped, or panicked.
    Completed,
}

/// Read side of a thread's cooperative cancellation flag.
///
/// Clone it into the task closure and poll [`StopSignal::should_run`] from
/// long-running loops.
#[derive(Debug, Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    #[inline]
    pub fn should_run(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct Shared {
    should_run: Arc<AtomicBool>,
    state: Mutex<ThreadState>,
    state_changed: Condvar,
}

impl Shared {
    fn set_state(&self, next: ThreadState) {
        let mut state = self.state.lock();
        *state = next;
        self.state_changed.notify_all();
    }
}

/// Named background worker with explicit start/stop/restart control.
pub struct ManagedThread {
    name: String,
    shared: Arc<Shared>,
    task: Mutex<Option<Task>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    worker_id: Mutex<Option<ThreadId>>,
}

impl ManagedThread {
    pub fn new() -> Self {
        Self::named(String::new())
    }

    /// Creates an idle thread. A non-empty name is also given to the OS thread.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                should_run: Arc::new(AtomicBool::new(true)),
                state: Mutex::new(ThreadState::Idle),
                state_changed: Condvar::new(),
            }),
            task: Mutex::new(None),
            handle: Mutex::new(None),
            worker_id: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        *self.shared.state.lock()
    }

    pub fn running(&self) -> bool {
        self.state() == ThreadState::Running
    }

    /// True when nothing is executing. An idle thread counts as completed.
    pub fn completed(&self) -> bool {
        self.state() != ThreadState::Running
    }

    pub fn should_run(&self) -> bool {
        self.shared.should_run.load(Ordering::Acquire)
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            flag: Arc::clone(&self.shared.should_run),
        }
    }

    /// Installs the work unit run by the next [`start`](Self::start).
    ///
    /// Rejected with [`ThreadError::Running`] while a worker is executing;
    /// the current task is kept in that case.
    pub fn set_task<F>(&self, task: F) -> Result<(), ThreadError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.replace_task(Some(Arc::new(task)))
    }

    pub fn clear_task(&self) -> Result<(), ThreadError> {
        self.replace_task(None)
    }

    fn replace_task(&self, task: Option<Task>) -> Result<(), ThreadError> {
        let mut slot = self.task.lock();
        if self.running() {
            tracing::warn!(thread = %self.name, "ignoring task replacement while running");
            return Err(ThreadError::Running {
                name: self.name.clone(),
            });
        }
        *slot = task;
        Ok(())
    }

    /// Launches the worker. Does nothing if it is already running.
    pub fn start(&self) -> Result<(), ThreadError> {
        let mut handle = self.handle.lock();
        if self.running() {
            return Ok(());
        }
        if let Some(previous) = handle.take() {
            join_worker(previous);
        }

        self.shared.should_run.store(true, Ordering::Release);
        self.shared.set_state(ThreadState::Running);
        let task = self.task.lock().clone();
        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();

        let mut builder = thread::Builder::new();
        if !self.name.is_empty() {
            builder = builder.name(self.name.clone());
        }
        match builder.spawn(move || run_worker(&name, &shared, task)) {
            Ok(worker) => {
                tracing::debug!(thread = %self.name, "worker started");
                *self.worker_id.lock() = Some(worker.thread().id());
                *handle = Some(worker);
                Ok(())
            }
            Err(source) => {
                self.shared.set_state(ThreadState::Completed);
                Err(ThreadError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Asks the worker to stop and blocks until it has been joined.
    ///
    /// A no-op when no worker has been started. Called from inside the
    /// worker it only clears the flag; the owner's next `stop` does the join.
    /// A concurrent caller that finds the join already under way waits for
    /// the worker to leave [`ThreadState::Running`].
    pub fn stop(&self) {
        let current = thread::current().id();
        if *self.worker_id.lock() == Some(current) {
            self.shared.should_run.store(false, Ordering::Release);
            return;
        }

        let mut handle = self.handle.lock();
        match handle.take() {
            Some(worker) if worker.thread().id() == current => {
                self.shared.should_run.store(false, Ordering::Release);
                *handle = Some(worker);
            }
            Some(worker) => {
                drop(handle);
                self.shared.should_run.store(false, Ordering::Release);
                join_worker(worker);
                tracing::debug!(thread = %self.name, "worker stopped");
            }
            None => {
                drop(handle);
                let mut state = self.shared.state.lock();
                if *state != ThreadState::Running {
                    return;
                }
                self.shared.should_run.store(false, Ordering::Release);
                while *state == ThreadState::Running {
                    self.shared.state_changed.wait(&mut state);
                }
            }
        }
    }

    /// Waits up to `timeout` for the worker to finish. Returns `false` on timeout.
    ///
    /// A timeout too large to represent waits without a limit.
    pub fn wait_for_end(&self, timeout: Duration) -> bool {
        let deadline = Deadline::after(timeout);
        let mut state = self.shared.state.lock();
        while *state == ThreadState::Running {
            match deadline.instant() {
                Some(until) => {
                    if self
                        .shared
                        .state_changed
                        .wait_until(&mut state, until)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.shared.state_changed.wait(&mut state),
            }
        }
        *state != ThreadState::Running
    }

    pub fn sleep(duration: Duration) {
        thread::sleep(duration);
    }

    pub fn yield_now() {
        thread::yield_now();
    }

    pub fn set_as_main_thread() {
        main_thread::set_as_main_thread();
    }

    pub fn is_main_thread() -> bool {
        main_thread::is_main_thread()
    }
}

impl Default for ManagedThread {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("should_run", &self.should_run())
            .field("has_task", &self.task.lock().is_some())
            .finish()
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(name: &str, shared: &Shared, task: Option<Task>) {
    if let Some(task) = task {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task())) {
            tracing::error!(thread = %name, "worker task panicked: {}", panic_message(&*payload));
        }
    }
    shared.set_state(ThreadState::Completed);
}

fn join_worker(worker: JoinHandle<()>) {
    if worker.thread().id() == thread::current().id() {
        return;
    }
    if worker.join().is_err() {
        tracing::error!("worker thread exited abnormally");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;

    use super::*;

    const WAIT: Duration = Duration::from_millis(1000);

    #[test]
    fn fresh_thread_is_idle() {
        let thread = ManagedThread::named("test_thread");
        assert_eq!(thread.name(), "test_thread");
        assert_eq!(thread.state(), ThreadState::Idle);
        assert!(!thread.running());
        assert!(thread.completed());
        assert!(thread.should_run());
    }

    #[test]
    fn runs_task_to_completion() {
        let thread = ManagedThread::named("test_thread");
        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);
        thread
            .set_task(move || flag.store(true, Ordering::SeqCst))
            .unwrap();

        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert!(!thread.running());
        assert!(thread.completed());
        assert_eq!(thread.state(), ThreadState::Completed);
        assert!(executed.load(Ordering::SeqCst));
        thread.stop();
    }

    #[test]
    fn starts_without_task() {
        let thread = ManagedThread::new();
        thread.start().unwrap();
        assert!(thread.wait_for_end(Duration::from_millis(100)));
        assert!(!thread.running());
        assert!(thread.completed());
    }

    #[test]
    fn stop_interrupts_polling_worker() {
        let thread = ManagedThread::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let signal = thread.stop_signal();
        let count = Arc::clone(&counter);
        thread
            .set_task(move || {
                while signal.should_run() {
                    count.fetch_add(1, Ordering::SeqCst);
                    ManagedThread::sleep(Duration::from_millis(10));
                }
            })
            .unwrap();

        thread.start().unwrap();
        ManagedThread::sleep(Duration::from_millis(50));
        thread.stop();

        assert!(!thread.running());
        assert!(!thread.should_run());
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn wait_times_out_on_long_task() {
        let thread = ManagedThread::new();
        let signal = thread.stop_signal();
        thread
            .set_task(move || {
                while signal.should_run() {
                    ManagedThread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        thread.start().unwrap();
        assert!(!thread.wait_for_end(Duration::from_millis(20)));
        assert!(thread.running());
        thread.stop();
        assert!(thread.completed());
    }

    #[test]
    fn restart_reruns_task() {
        let thread = ManagedThread::new();
        let executions = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&executions);
        thread
            .set_task(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn replaced_task_runs_on_restart() {
        let thread = ManagedThread::new();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&first);
        thread
            .set_task(move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert!(first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));

        let flag = Arc::clone(&second);
        thread
            .set_task(move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert!(second.load(Ordering::SeqCst));
    }

    #[test]
    fn task_replacement_rejected_while_running() {
        let thread = ManagedThread::named("busy");
        let signal = thread.stop_signal();
        let replaced = Arc::new(AtomicBool::new(false));
        thread
            .set_task(move || {
                while signal.should_run() {
                    ManagedThread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        thread.start().unwrap();

        let flag = Arc::clone(&replaced);
        let result = thread.set_task(move || flag.store(true, Ordering::SeqCst));
        assert!(matches!(result, Err(ThreadError::Running { .. })));
        assert!(thread.clear_task().is_err());

        thread.stop();
        assert!(!replaced.load(Ordering::SeqCst));
    }

    #[test]
    fn double_start_is_ignored() {
        let thread = ManagedThread::new();
        let executions = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&executions);
        let signal = thread.stop_signal();
        thread
            .set_task(move || {
                count.fetch_add(1, Ordering::SeqCst);
                while signal.should_run() {
                    ManagedThread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();

        thread.start().unwrap();
        thread.start().unwrap();
        thread.stop();
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_on_idle_thread_is_noop() {
        let thread = ManagedThread::new();
        thread.stop();
        thread.stop();
        assert_eq!(thread.state(), ThreadState::Idle);
        assert!(thread.should_run());
    }

    #[test]
    fn should_run_resets_on_restart() {
        let thread = ManagedThread::new();
        let observed = Arc::new(AtomicBool::new(false));
        let signal = thread.stop_signal();
        let seen = Arc::clone(&observed);
        thread
            .set_task(move || seen.store(signal.should_run(), Ordering::SeqCst))
            .unwrap();

        thread.start().unwrap();
        thread.stop();
        assert!(!thread.should_run());

        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_task_completes_and_restarts() {
        let thread = ManagedThread::named("panicky");
        let runs = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&runs);
        thread
            .set_task(move || {
                count.fetch_add(1, Ordering::SeqCst);
                panic!("task failure");
            })
            .unwrap();

        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert_eq!(thread.state(), ThreadState::Completed);

        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn worker_carries_thread_name() {
        let thread = ManagedThread::named("plugval-named");
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        thread
            .set_task(move || {
                *slot.lock() = thread::current().name().map(str::to_owned);
            })
            .unwrap();
        thread.start().unwrap();
        assert!(thread.wait_for_end(WAIT));
        assert_eq!(seen.lock().as_deref(), Some("plugval-named"));
    }

    #[test]
    fn wait_after_completion_returns_immediately() {
        let thread = ManagedThread::new();
        thread.set_task(|| {}).unwrap();
        thread.start().unwrap();
        thread.stop();
        assert!(thread.completed());
        assert!(thread.wait_for_end(Duration::ZERO));
        assert!(thread.wait_for_end(Duration::ZERO));
    }

    #[test]
    fn unbounded_wait_returns_when_worker_ends() {
        let thread = ManagedThread::new();
        thread
            .set_task(|| ManagedThread::sleep(Duration::from_millis(20)))
            .unwrap();
        thread.start().unwrap();
        assert!(thread.wait_for_end(Duration::MAX));
        assert!(thread.completed());
    }

    #[test]
    fn concurrent_stop_waits_for_worker() {
        let thread = Arc::new(ManagedThread::named("slow-exit"));
        let exits = Arc::new(AtomicUsize::new(0));
        let signal = thread.stop_signal();
        let count = Arc::clone(&exits);
        thread
            .set_task(move || {
                while signal.should_run() {
                    ManagedThread::sleep(Duration::from_millis(1));
                }
                ManagedThread::sleep(Duration::from_millis(200));
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        thread.start().unwrap();

        let first = {
            let thread = Arc::clone(&thread);
            thread::spawn(move || thread.stop())
        };
        ManagedThread::sleep(Duration::from_millis(20));
        thread.stop();

        assert!(!thread.running());
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        first.join().unwrap();
    }

    #[test]
    fn stop_from_inside_worker_keeps_join() {
        let thread = Arc::new(ManagedThread::named("self-stop"));
        let exits = Arc::new(AtomicUsize::new(0));
        let signal = thread.stop_signal();
        let count = Arc::clone(&exits);
        let inner = Arc::downgrade(&thread);
        thread
            .set_task(move || {
                if let Some(owner) = inner.upgrade() {
                    owner.stop();
                }
                assert!(!signal.should_run());
                ManagedThread::sleep(Duration::from_millis(100));
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        thread.start().unwrap();

        ManagedThread::sleep(Duration::from_millis(20));
        thread.stop();
        assert!(!thread.running());
        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_stops_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let thread = ManagedThread::new();
            let signal = thread.stop_signal();
            let count = Arc::clone(&counter);
            thread
                .set_task(move || {
                    while signal.should_run() {
                        ManagedThread::sleep(Duration::from_millis(1));
                    }
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            thread.start().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
