// Task queue
// FIFO handoff between the producer (stdin reader) and the worker
// pool. A condition variable wakes one waiter per enqueue; the
// shutdown flag is part of the wait predicate, so draining workers
// observe it without a race and spurious wakeups are harmless.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::command::Task;

pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    ready: Condvar,
    shut_down: AtomicBool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Append a task and wake one waiting worker.
    pub fn enqueue(&self, task: Task) {
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.push_back(task);
        drop(tasks);
        self.ready.notify_one();
    }

    /// Block until a task is available. Returns `None` once the queue
    /// is empty and shutdown has been signaled; queued tasks are still
    /// drained after the signal.
    pub fn dequeue(&self) -> Option<Task> {
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(task) = tasks.pop_front() {
                return Some(task);
            }
            if self.shut_down.load(Ordering::SeqCst) {
                return None;
            }
            tasks = match self.ready.wait(tasks) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Signal shutdown and wake every waiter. The flag is flipped
    /// under the queue lock so no waiter can slip between its predicate
    /// check and the wait.
    pub fn shutdown(&self) {
        let tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.shut_down.store(true, Ordering::SeqCst);
        drop(tasks);
        self.ready.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{parse_task, CommandKind};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let queue = TaskQueue::new();
        queue.enqueue(parse_task("touch a"));
        queue.enqueue(parse_task("touch b"));
        queue.enqueue(parse_task("ls"));

        assert_eq!(queue.dequeue().unwrap().args, vec!["a"]);
        assert_eq!(queue.dequeue().unwrap().args, vec!["b"]);
        assert_eq!(queue.dequeue().unwrap().kind, CommandKind::Ls);
    }

    #[test]
    fn shutdown_drains_remaining_tasks() {
        let queue = TaskQueue::new();
        queue.enqueue(parse_task("ls"));
        queue.shutdown();

        // the queued task is still handed out, then the sentinel
        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue(parse_task("ls"));

        let task = consumer.join().unwrap();
        assert_eq!(task.unwrap().kind, CommandKind::Ls);
    }

    #[test]
    fn blocked_consumer_wakes_on_shutdown() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(50));
        queue.shutdown();

        assert!(consumer.join().unwrap().is_none());
        assert!(queue.is_shut_down());
    }
}
