//! Batching buffer for deletion tasks

use parking_lot::Mutex;

use crate::model::Task;

/// What caused a batch to leave the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTrigger {
    /// Buffer reached `batch_size`
    Size,
    /// Periodic flush tick
    Tick,
    /// Final drain on shutdown
    Shutdown,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Size => write!(f, "size"),
            Self::Tick => write!(f, "tick"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Accumulates tasks in arrival order until a flush takes them
///
/// The lock is held only while the vector is mutated. Flushing swaps the
/// contents out so the sink call never runs under the lock.
pub(crate) struct BatchBuffer {
    batch_size: usize,
    tasks: Mutex<Vec<Task>>,
}

impl BatchBuffer {
    pub(crate) fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            tasks: Mutex::new(Vec::with_capacity(batch_size)),
        }
    }

    /// Append a task, returning a full batch once `batch_size` is reached
    pub(crate) fn push(&self, task: Task) -> Option<Vec<Task>> {
        let mut tasks = self.tasks.lock();
        tasks.push(task);
        if tasks.len() >= self.batch_size {
            Some(std::mem::replace(
                &mut *tasks,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    /// Take everything buffered so far, if anything
    pub(crate) fn take(&self) -> Option<Vec<Task>> {
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            return None;
        }
        Some(std::mem::replace(
            &mut *tasks,
            Vec::with_capacity(self.batch_size),
        ))
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(n: usize) -> Task {
        Task::new(format!("id-{n}"), "owner")
    }

    #[test]
    fn test_push_below_batch_size_keeps_buffering() {
        let buffer = BatchBuffer::new(3);
        assert!(buffer.push(task(1)).is_none());
        assert!(buffer.push(task(2)).is_none());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_push_returns_full_batch_in_order() {
        let buffer = BatchBuffer::new(3);
        buffer.push(task(1));
        buffer.push(task(2));

        let batch = buffer.push(task(3)).expect("batch should be full");
        assert_eq!(batch, vec![task(1), task(2), task(3)]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_take_empty_buffer() {
        let buffer = BatchBuffer::new(3);
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_take_drains_partial_batch() {
        let buffer = BatchBuffer::new(10);
        for n in 0..4 {
            buffer.push(task(n));
        }

        let batch = buffer.take().unwrap();
        assert_eq!(batch.len(), 4);
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_batches_never_exceed_batch_size() {
        let buffer = BatchBuffer::new(5);
        let batches: Vec<Vec<Task>> = (0..12).filter_map(|n| buffer.push(task(n))).collect();

        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 5));
        assert_eq!(buffer.take().map(|b| b.len()), Some(2));
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let buffer = BatchBuffer::new(0);
        assert_eq!(buffer.push(task(1)).map(|b| b.len()), Some(1));
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(FlushTrigger::Size.to_string(), "size");
        assert_eq!(FlushTrigger::Tick.to_string(), "tick");
        assert_eq!(FlushTrigger::Shutdown.to_string(), "shutdown");
    }
}
