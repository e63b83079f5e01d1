//! Threads de kernel.
//!
//! Cada thread possui uma pilha de kernel própria, um contexto de máquina
//! salvo e uma referência (fraca) ao processo dono. O ciclo de vida segue o
//! protocolo cooperativo: `Run` → (`Sleeping` | `SleepingCancellable`)* →
//! `Exited`; a pilha só é liberada quando o pai colhe o processo no waitpid.

use crate::arch::{self, Context, KStack};
use crate::proc::Process;
use crate::sched::{self, WaitQueue};
use crate::sync::Spinlock;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// ID de thread (único desde o boot; 0 é reservado ao contexto de boot)
pub type Tid = u64;

/// Estado de uma thread de kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KthreadState {
    /// Pronta ou executando
    Run,
    /// Bloqueada em um canal de espera
    Sleeping,
    /// Bloqueada, mas um cancelamento a acorda
    SleepingCancellable,
    /// Saiu; aguardando o reap do pai
    Exited,
}

/// Thread de kernel.
pub struct Kthread {
    tid: Tid,
    proc: Weak<Process>,
    /// Contexto de máquina salvo
    pub ctx: Spinlock<Context>,
    /// Pilha de kernel (viva até o reap)
    #[allow(dead_code)]
    stack: KStack,
    state: Spinlock<KthreadState>,
    retval: Spinlock<i32>,
    cancelled: AtomicBool,
    /// Endereço do canal de espera em que a thread dorme (0 = nenhum)
    wchan: AtomicUsize,
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

impl Kthread {
    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn proc(&self) -> Option<Arc<Process>> {
        self.proc.upgrade()
    }

    pub fn state(&self) -> KthreadState {
        *self.state.lock()
    }

    pub fn set_state(&self, st: KthreadState) {
        *self.state.lock() = st;
    }

    pub fn retval(&self) -> i32 {
        *self.retval.lock()
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn wchan(&self) -> usize {
        self.wchan.load(Ordering::Acquire)
    }

    pub fn set_wchan(&self, addr: usize) {
        self.wchan.store(addr, Ordering::Release);
    }

    pub fn clear_wchan(&self) {
        self.wchan.store(0, Ordering::Release);
    }
}

/// Cria uma thread para `proc` que começará em `entry(arg1, arg2)`, e a
/// liga à lista de threads do processo. A thread nasce fora da runqueue.
pub fn kthread_create(
    proc: &Arc<Process>,
    entry: arch::context::ContextFn,
    arg1: usize,
    arg2: usize,
) -> Arc<Kthread> {
    let stack = KStack::alloc();
    let ctx = arch::context_setup(entry, arg1, arg2, &stack, proc.pagedir());

    let thr = Arc::new(Kthread {
        tid: NEXT_TID.fetch_add(1, Ordering::Relaxed),
        proc: Arc::downgrade(proc),
        ctx: Spinlock::new(ctx),
        stack,
        state: Spinlock::new(KthreadState::Run),
        retval: Spinlock::new(0),
        cancelled: AtomicBool::new(false),
        wchan: AtomicUsize::new(0),
    });

    proc.threads.lock().push(thr.clone());
    thr
}

/// Clona a thread para um novo processo (fork): pilha nova, contexto copiado
/// apontando para o diretório de páginas do processo destino.
pub fn kthread_clone(thr: &Arc<Kthread>, newproc: &Arc<Process>) -> Arc<Kthread> {
    let stack = KStack::alloc();
    let mut ctx = thr.ctx.lock().clone();
    ctx.sp = stack.top();
    ctx.bp = stack.top();
    ctx.pagedir = newproc.pagedir();

    let newthr = Arc::new(Kthread {
        tid: NEXT_TID.fetch_add(1, Ordering::Relaxed),
        proc: Arc::downgrade(newproc),
        ctx: Spinlock::new(ctx),
        stack,
        state: Spinlock::new(KthreadState::Run),
        retval: Spinlock::new(0),
        cancelled: AtomicBool::new(false),
        wchan: AtomicUsize::new(0),
    });

    newproc.threads.lock().push(newthr.clone());
    newthr
}

/// Encerra a thread corrente com `retval` e escalona outra.
///
/// No alvo real esta função nunca devolve o controle: a troca de contexto
/// final abandona o contexto da thread. Sair duas vezes é erro de programação.
pub fn kthread_exit(retval: i32) {
    let thr = sched::current_thread().expect("kthread_exit sem thread corrente");

    assert_eq!(thr.wchan(), 0, "thread saindo ainda ligada a um canal");
    assert!(
        thr.state() != KthreadState::Exited,
        "double-exit da thread {}",
        thr.tid()
    );

    *thr.retval.lock() = retval;
    thr.set_state(KthreadState::Exited);

    log::debug!("(Kthread) thread {} saiu com {}", thr.tid(), retval);
    crate::proc::proc_thread_exited(retval);
}

/// Marca a thread como cancelada.
///
/// Se ela estiver num sono cancelável, é removida do canal e acordada; o
/// sono devolve `SleepResult::Interrupted`. Sonos não canceláveis não são
/// interrompidos: o cancelamento vale no próximo ponto de cancelamento.
pub fn kthread_cancel(thr: &Arc<Kthread>, status: i32) {
    thr.cancelled.store(true, Ordering::Release);
    *thr.retval.lock() = status;

    if thr.state() == KthreadState::SleepingCancellable {
        let addr = thr.wchan();
        if addr != 0 {
            // SAFETY: uma thread só dorme em canais que sobrevivem enquanto
            // houver dormentes (fila do processo pai, de pframe, de mutex);
            // em modo kernel cooperativo o canal não é destruído sob nós.
            let q = unsafe { &*(addr as *const WaitQueue) };
            q.cancel(thr);
        }
    }
}

/// Corpo vazio, usado pelo idle e pelos testes
pub fn entry_noop(_arg1: usize, _arg2: usize) -> i32 {
    0
}

/// Lista auxiliar: tids de um vetor de threads (debug)
pub fn tids(threads: &[Arc<Kthread>]) -> Vec<Tid> {
    threads.iter().map(|t| t.tid()).collect()
}
