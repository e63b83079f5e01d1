//! Fila de threads prontas.

use crate::proc::kthread::Kthread;
use crate::sync::Spinlock;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// Fila de execução global (Single Core).
///
/// Armazena as threads no estado `Run` que aguardam tempo de CPU.
/// Política FIFO, sem prioridades.
pub struct RunQueue {
    queue: VecDeque<Arc<Kthread>>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Adiciona thread ao final da fila
    pub fn push(&mut self, thr: Arc<Kthread>) {
        self.queue.push_back(thr);
    }

    /// Remove a próxima thread (início da fila)
    pub fn pop(&mut self) -> Option<Arc<Kthread>> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Runqueue global
pub static RUNQUEUE: Spinlock<RunQueue> = Spinlock::new(RunQueue::new());
