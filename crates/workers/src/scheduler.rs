//! Cooperative idle-poll scheduler
//!
//! The host event loop calls [`IdleScheduler::tick`] periodically. Each
//! registered task has a `busy?` check, a completion callback run once the
//! check reports idle, and an error callback run once its timeout elapses.
//! Callbacks get the scheduler back so they can register the next phase.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// `busy?` check
type PollFn<C> = Box<dyn FnMut(&mut C) -> bool + Send>;
/// Runs once the check reports idle
type CompleteFn<C> = Box<dyn FnOnce(&mut C, &mut IdleScheduler<C>) + Send>;
/// Runs once the timeout elapses; receives the time waited in ms
type ErrorFn<C> = Box<dyn FnOnce(&mut C, &mut IdleScheduler<C>, u64) + Send>;

/// Registered task id
pub type TaskId = u64;

struct IdleTask<C> {
    id: TaskId,
    name: &'static str,
    registered: Instant,
    timeout: Duration,
    poll: PollFn<C>,
    complete: CompleteFn<C>,
    error: ErrorFn<C>,
}

/// Idle-poll scheduler over a context `C`
pub struct IdleScheduler<C> {
    tasks: Vec<IdleTask<C>>,
    next_id: TaskId,
}

impl<C> fmt::Debug for IdleScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleScheduler")
            .field("tasks", &self.tasks.iter().map(|t| t.name).collect::<Vec<_>>())
            .finish()
    }
}

impl<C> Default for IdleScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> IdleScheduler<C> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
        }
    }

    /// Register a poll / complete / error triple
    pub fn register<P, F, E>(
        &mut self,
        name: &'static str,
        poll: P,
        complete: F,
        error: E,
        timeout: Duration,
    ) -> TaskId
    where
        P: FnMut(&mut C) -> bool + Send + 'static,
        F: FnOnce(&mut C, &mut IdleScheduler<C>) + Send + 'static,
        E: FnOnce(&mut C, &mut IdleScheduler<C>, u64) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        trace!(task = name, id, timeout_ms = timeout.as_millis() as u64, "idle task registered");
        self.tasks.push(IdleTask {
            id,
            name,
            registered: Instant::now(),
            timeout,
            poll: Box::new(poll),
            complete: Box::new(complete),
            error: Box::new(error),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name).collect()
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        before != self.tasks.len()
    }

    /// Drop every task without running its callbacks
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.tasks.len();
        if dropped > 0 {
            debug!(dropped, "idle tasks cancelled");
        }
        self.tasks.clear();
        dropped
    }

    /// Poll every task once; returns how many resolved
    pub fn tick(&mut self, ctx: &mut C) -> usize {
        let pending = std::mem::take(&mut self.tasks);
        let mut kept = Vec::with_capacity(pending.len());
        let mut resolved = 0;

        for mut task in pending {
            if !(task.poll)(ctx) {
                trace!(task = task.name, "idle task complete");
                (task.complete)(ctx, self);
                resolved += 1;
            } else if task.registered.elapsed() > task.timeout {
                let waited_ms = task.registered.elapsed().as_millis() as u64;
                debug!(task = task.name, waited_ms, "idle task timed out");
                (task.error)(ctx, self, waited_ms);
                resolved += 1;
            } else {
                kept.push(task);
            }
        }

        // tasks registered by callbacks run after the survivors
        kept.append(&mut self.tasks);
        self.tasks = kept;
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        busy_polls: u32,
        log: Vec<String>,
    }

    #[test]
    fn test_complete_after_busy_check_idle() {
        let mut scheduler = IdleScheduler::<Ctx>::new();
        let mut ctx = Ctx {
            busy_polls: 2,
            ..Default::default()
        };
        scheduler.register(
            "wait",
            |c| {
                if c.busy_polls == 0 {
                    return false;
                }
                c.busy_polls -= 1;
                true
            },
            |c, _| c.log.push("done".into()),
            |c, _, _| c.log.push("timeout".into()),
            Duration::from_secs(5),
        );
        assert_eq!(scheduler.tick(&mut ctx), 0);
        assert_eq!(scheduler.tick(&mut ctx), 0);
        assert_eq!(scheduler.tick(&mut ctx), 1);
        assert_eq!(ctx.log, vec!["done"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_timeout_runs_error_callback() {
        let mut scheduler = IdleScheduler::<Ctx>::new();
        let mut ctx = Ctx::default();
        scheduler.register(
            "stuck",
            |_| true,
            |c, _| c.log.push("done".into()),
            |c, _, waited| c.log.push(format!("timeout {}", waited >= 1)),
            Duration::from_millis(1),
        );
        std::thread::sleep(Duration::from_millis(3));
        scheduler.tick(&mut ctx);
        assert_eq!(ctx.log, vec!["timeout true"]);
    }

    #[test]
    fn test_callback_registers_next_task() {
        let mut scheduler = IdleScheduler::<Ctx>::new();
        let mut ctx = Ctx::default();
        scheduler.register(
            "first",
            |_| false,
            |c, s| {
                c.log.push("first".into());
                s.register(
                    "second",
                    |_| false,
                    |c, _| c.log.push("second".into()),
                    |_, _, _| {},
                    Duration::from_secs(1),
                );
            },
            |_, _, _| {},
            Duration::from_secs(1),
        );
        scheduler.tick(&mut ctx);
        assert_eq!(scheduler.task_names(), vec!["second"]);
        scheduler.tick(&mut ctx);
        assert_eq!(ctx.log, vec!["first", "second"]);
        assert_eq!(scheduler.cancel_all(), 0);
    }
}
