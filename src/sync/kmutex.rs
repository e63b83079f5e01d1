//! KMutex - mutex que pode bloquear a thread.
//!
//! # Diferença do Spinlock
//!
//! - KMutex PODE dormir (chama o scheduler)
//! - Spinlock NÃO pode dormir (busy-wait)
//!
//! A posse é entregue em ordem FIFO: o unlock transfere o mutex diretamente
//! para a primeira thread da fila de espera, sem janela para furar a fila.
//! Aquisição recursiva é proibida (assert fatal).

use crate::sched::waitqueue::WaitQueue;
use crate::sync::Spinlock;

/// Mutex de kernel.
pub struct KMutex {
    /// tid do dono atual (None = livre)
    holder: Spinlock<Option<u64>>,
    /// Threads aguardando a posse
    waiters: WaitQueue,
}

impl KMutex {
    pub const fn new() -> Self {
        Self {
            holder: Spinlock::new(None),
            waiters: WaitQueue::new(),
        }
    }

    /// Adquire o mutex (pode bloquear).
    pub fn lock(&self) {
        let me = crate::sched::current_tid();
        {
            let mut holder = self.holder.lock();
            if holder.is_none() {
                *holder = Some(me);
                return;
            }
            assert!(
                *holder != Some(me),
                "kmutex: aquisição recursiva pela thread {}",
                me
            );
        }

        // Contenção: dormir. O dono nos entrega a posse no unlock.
        self.waiters.wait_on();
        debug_assert_eq!(*self.holder.lock(), Some(me));
    }

    /// Libera o mutex, transferindo a posse para a primeira thread da fila.
    pub fn unlock(&self) {
        let me = crate::sched::current_tid();
        let mut holder = self.holder.lock();
        assert_eq!(*holder, Some(me), "kmutex: unlock por thread que não é dona");

        match self.waiters.wake_one() {
            Some(next) => {
                // Hand-off FIFO: a posse muda antes mesmo de `next` rodar
                *holder = Some(next.tid());
            }
            None => *holder = None,
        }
    }

    /// Aquisição com liberação garantida em todos os caminhos de saída.
    pub fn guard(&self) -> KMutexGuard<'_> {
        self.lock();
        KMutexGuard { mutex: self }
    }

    /// Verdadeiro se a thread corrente é a dona
    pub fn held_by_current(&self) -> bool {
        *self.holder.lock() == Some(crate::sched::current_tid())
    }
}

impl Default for KMutex {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KMutexGuard<'a> {
    mutex: &'a KMutex,
}

impl Drop for KMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock_uncontended() {
        let _g = crate::proc::test_guard();
        let m = KMutex::new();
        m.lock();
        assert!(m.held_by_current());
        m.unlock();
        assert!(!m.held_by_current());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let _g = crate::proc::test_guard();
        let m = KMutex::new();
        {
            let _held = m.guard();
            assert!(m.held_by_current());
        }
        assert!(!m.held_by_current());
    }

    #[test]
    #[should_panic]
    fn test_recursive_lock_is_fatal() {
        let _g = crate::proc::test_guard();
        let m = KMutex::new();
        m.lock();
        m.lock();
    }
}
