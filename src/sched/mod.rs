//! Scheduler cooperativo.
//!
//! Single-CPU, sem preempção de threads de kernel: uma thread roda até ceder
//! (`sched_switch`) ou bloquear em um canal de espera. A fila de execução é
//! FIFO, sem prioridades. No alvo real as interrupções ficam mascaradas
//! enquanto as filas são manipuladas; a transferência de controle em si é o
//! contrato `arch::context_switch`.

pub mod runqueue;
pub mod waitqueue;

pub use waitqueue::{SleepResult, WaitQueue};

use crate::arch;
use crate::proc::kthread::{Kthread, KthreadState};
use crate::sync::Spinlock;
use alloc::sync::Arc;
use runqueue::RUNQUEUE;

/// Thread atualmente executando.
/// TODO: tornar per-cpu quando houver suporte a SMP
pub static CURRENT: Spinlock<Option<Arc<Kthread>>> = Spinlock::new(None);

/// Thread corrente (clone do Arc)
pub fn current_thread() -> Option<Arc<Kthread>> {
    CURRENT.lock().clone()
}

/// tid da thread corrente; 0 identifica o contexto de boot
pub fn current_tid() -> u64 {
    current_thread().map(|t| t.tid()).unwrap_or(0)
}

/// Instala a thread corrente (bootstrap e retomada pós-reap).
pub fn set_current(thr: Option<Arc<Kthread>>) {
    *CURRENT.lock() = thr;
}

/// Coloca a thread na fila de execução (final da fila, FIFO).
pub fn sched_make_runnable(thr: Arc<Kthread>) {
    debug_assert!(thr.wchan() == 0, "thread runnable ainda ligada a um wchan");
    thr.set_state(KthreadState::Run);
    RUNQUEUE.lock().push(thr);
}

/// Escolhe a próxima thread e troca o contexto.
///
/// Pré-condição: a thread corrente já foi estacionada em algum lugar (fila de
/// execução, canal de espera) ou está saindo. Com a fila vazia o processador
/// entra em idle até alguém ser acordado.
pub fn sched_switch() {
    let next = RUNQUEUE.lock().pop();
    let prev = CURRENT.lock().take();

    match next {
        Some(next) => {
            next.set_state(KthreadState::Run);
            *CURRENT.lock() = Some(next.clone());

            match prev {
                Some(prev) if !Arc::ptr_eq(&prev, &next) => {
                    let new_ctx = next.ctx.lock().clone();
                    arch::context_switch(&mut prev.ctx.lock(), &new_ctx);
                }
                _ => {
                    arch::context_make_active(&next.ctx.lock());
                }
            }
        }
        None => {
            // Sem threads prontas: idle. No alvo real, halt até interrupção.
            log::trace!("(Sched) runqueue vazia, idle");
        }
    }
}

/// Cede a CPU voluntariamente: volta para o fim da fila e reescalona.
pub fn sched_yield() {
    if let Some(thr) = current_thread() {
        sched_make_runnable(thr);
    }
    sched_switch();
}

/// Dorme no canal dado (não cancelável).
pub fn sched_sleep_on(q: &WaitQueue) {
    q.wait_on();
}

/// Dorme no canal dado; acorda com `SleepResult::Interrupted` se a thread
/// tiver sido cancelada.
pub fn sched_cancellable_sleep_on(q: &WaitQueue) -> SleepResult {
    q.wait_on_cancellable()
}

/// Acorda a primeira thread do canal.
pub fn sched_wakeup_on(q: &WaitQueue) -> bool {
    q.wake_one().is_some()
}

/// Acorda todas as threads do canal.
pub fn sched_broadcast_on(q: &WaitQueue) -> usize {
    q.wake_all()
}
