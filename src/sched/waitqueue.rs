//! Canais de espera (wait queues).
//!
//! Um canal é um conjunto FIFO de threads bloqueadas numa condição. Uma
//! thread está em no máximo um canal por vez; o endereço do canal fica
//! registrado na thread enquanto ela dorme (é o `wchan`), o que permite ao
//! cancelamento localizá-la e removê-la.

use crate::proc::kthread::{Kthread, KthreadState};
use crate::sched;
use crate::sync::Spinlock;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// Resultado de um sono cancelável
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepResult {
    /// Acordada por wake_one/wake_all
    Normal,
    /// Acordada por cancelamento (o chamador deve devolver EINTR)
    Interrupted,
}

/// Canal de espera FIFO.
pub struct WaitQueue {
    waiters: Spinlock<VecDeque<Arc<Kthread>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Spinlock::new(VecDeque::new()),
        }
    }

    fn addr(&self) -> usize {
        self as *const WaitQueue as usize
    }

    /// Bloqueia a thread corrente neste canal (sono não cancelável).
    pub fn wait_on(&self) {
        self.sleep(KthreadState::Sleeping);
    }

    /// Bloqueia a thread corrente; um `kthread_cancel` encerra a espera com
    /// `SleepResult::Interrupted`.
    pub fn wait_on_cancellable(&self) -> SleepResult {
        let thr = match sched::current_thread() {
            Some(t) => t,
            None => return SleepResult::Normal,
        };

        // Ponto de cancelamento: um cancel pendente vale antes de dormir
        if thr.cancelled() {
            return SleepResult::Interrupted;
        }

        self.sleep(KthreadState::SleepingCancellable);

        if thr.cancelled() {
            SleepResult::Interrupted
        } else {
            SleepResult::Normal
        }
    }

    fn sleep(&self, state: KthreadState) {
        let thr = match sched::current_thread() {
            Some(t) => t,
            None => {
                log::error!("(WaitQueue) wait chamado sem thread corrente");
                return;
            }
        };

        debug_assert_eq!(thr.wchan(), 0, "thread já está em outro canal");

        thr.set_state(state);
        thr.set_wchan(self.addr());
        self.waiters.lock().push_back(thr);

        // A thread volta daqui quando for acordada e reescalonada
        sched::sched_switch();
    }

    /// Acorda a primeira thread da fila, movendo-a para a runqueue.
    pub fn wake_one(&self) -> Option<Arc<Kthread>> {
        let thr = self.waiters.lock().pop_front()?;
        thr.clear_wchan();
        sched::sched_make_runnable(thr.clone());
        Some(thr)
    }

    /// Acorda todas as threads da fila. Retorna quantas acordou.
    pub fn wake_all(&self) -> usize {
        let mut count = 0;
        while self.wake_one().is_some() {
            count += 1;
        }
        count
    }

    /// Remove uma thread específica (cancelamento). Retorna true se ela
    /// estava nesta fila.
    pub fn cancel(&self, thr: &Arc<Kthread>) -> bool {
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|t| Arc::ptr_eq(t, thr)) {
            let t = waiters.remove(pos).expect("posição válida");
            drop(waiters);
            t.clear_wchan();
            sched::sched_make_runnable(t);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Enfileira diretamente, sem dormir (montagem de cenários de teste).
    #[cfg(test)]
    pub fn push_for_test(&self, thr: Arc<Kthread>) {
        self.waiters.lock().push_back(thr);
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}
