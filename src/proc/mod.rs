//! Gerenciamento de Processos.
//!
//! Um processo é um contêiner nomeado: PID único, pai, filhos, threads,
//! tabela de file descriptors, diretório de trabalho, diretório de páginas e
//! mapa de endereços. PID 0 é o idle (sem pai); PID 1 é o init, que adota
//! todos os órfãos. Um processo DEAD permanece na lista até o pai colhê-lo
//! com waitpid — só aí a pilha das threads e o diretório de páginas são
//! liberados (não dá para liberar a pilha em que se está rodando).

pub mod fork;
pub mod kthread;

pub use fork::do_fork;

use crate::arch::PageDir;
use crate::mm::vmmap::Vmmap;
use crate::sched::{self, WaitQueue};
use crate::sync::Spinlock;
use crate::sys::{Errno, KResult, Pid, NFILES, PID_IDLE, PID_INIT, PROC_MAX_COUNT};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use kthread::{kthread_cancel, kthread_exit, Kthread};

/// Estado do processo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Dead,
}

/// Faixa do heap do processo (brk)
#[derive(Debug, Clone, Copy, Default)]
pub struct BrkRange {
    pub start: usize,
    pub end: usize,
}

/// Processo.
pub struct Process {
    pid: Pid,
    name: String,
    state: Spinlock<ProcState>,
    status: Spinlock<i32>,
    parent: Spinlock<Option<Weak<Process>>>,
    pub children: Spinlock<Vec<Arc<Process>>>,
    pub threads: Spinlock<Vec<Arc<Kthread>>>,
    /// Canal em que o pai dorme no waitpid
    pub wait: WaitQueue,
    pagedir: Spinlock<Option<PageDir>>,
    /// Mapa de endereços virtuais do processo
    pub vmmap: Spinlock<Vmmap>,
    /// Tabela de file descriptors (tamanho fixo NFILES)
    pub files: Spinlock<Vec<Option<Arc<crate::fs::vfs::file::File>>>>,
    /// Diretório de trabalho corrente
    pub cwd: Spinlock<Option<Arc<crate::fs::vfs::Vnode>>>,
    /// Faixa do heap (do_brk)
    pub brk: Spinlock<BrkRange>,
}

impl Process {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcState {
        *self.state.lock()
    }

    pub fn is_dead(&self) -> bool {
        self.state() == ProcState::Dead
    }

    pub fn status(&self) -> i32 {
        *self.status.lock()
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().as_ref().and_then(|w| w.upgrade())
    }

    /// Diretório de páginas do processo.
    ///
    /// Pânico se o processo já foi colhido (invariante: ninguém usa o
    /// pagedir depois do reap).
    pub fn pagedir(&self) -> PageDir {
        self.pagedir
            .lock()
            .clone()
            .expect("pagedir acessado depois do reap")
    }
}

// --- Estado global do subsistema ---

/// Lista de todos os processos vivos (inclui DEAD ainda não colhidos)
pub static PROC_LIST: Spinlock<Vec<Arc<Process>>> = Spinlock::new(Vec::new());

/// Processo init (PID 1); destino dos órfãos
pub static INIT_PROC: Spinlock<Option<Arc<Process>>> = Spinlock::new(None);

static NEXT_PID: Spinlock<Pid> = Spinlock::new(0);

/// Processo da thread corrente
pub fn curproc() -> Option<Arc<Process>> {
    sched::current_thread().and_then(|t| t.proc())
}

/// Busca por PID na lista global
pub fn proc_lookup(pid: Pid) -> Option<Arc<Process>> {
    PROC_LIST.lock().iter().find(|p| p.pid == pid).cloned()
}

/// Aloca o próximo PID livre: varredura linear a partir do último entregue,
/// com wrap-around; falha quando o espaço está esgotado.
fn alloc_pid() -> Option<Pid> {
    let list = PROC_LIST.lock();
    let mut next = NEXT_PID.lock();
    let start = *next;
    let mut pid = start;
    loop {
        if !list.iter().any(|p| p.pid == pid) {
            *next = (pid + 1) % PROC_MAX_COUNT;
            return Some(pid);
        }
        pid = (pid + 1) % PROC_MAX_COUNT;
        if pid == start {
            return None;
        }
    }
}

/// Cria um processo novo no estado RUNNING, filho do processo corrente.
///
/// O cwd é herdado (com vref) exceto para idle e init — o init recebe o cwd
/// só depois da montagem do root fs. O primeiro processo com PID 1 vira a
/// referência global de init.
pub fn proc_create(name: &str) -> KResult<Arc<Process>> {
    let pid = alloc_pid().ok_or(Errno::EAGAIN)?;

    // cwd herdado do pai (com incremento de refcount)
    let cwd = if pid != PID_IDLE && pid != PID_INIT {
        let parent = curproc().expect("proc_create sem processo corrente");
        let cwd = parent.cwd.lock().clone();
        if let Some(ref vn) = cwd {
            crate::fs::vfs::vref(vn);
        }
        cwd
    } else {
        None
    };

    let proc = Arc::new(Process {
        pid,
        name: String::from(name),
        state: Spinlock::new(ProcState::Running),
        status: Spinlock::new(0),
        parent: Spinlock::new(None),
        children: Spinlock::new(Vec::new()),
        threads: Spinlock::new(Vec::new()),
        wait: WaitQueue::new(),
        pagedir: Spinlock::new(Some(PageDir::new())),
        vmmap: Spinlock::new(Vmmap::new()),
        files: Spinlock::new(vec![None; NFILES]),
        cwd: Spinlock::new(cwd),
        brk: Spinlock::new(BrkRange::default()),
    });

    if pid != PID_IDLE {
        let parent = curproc().expect("todo processo (exceto idle) tem pai");
        *proc.parent.lock() = Some(Arc::downgrade(&parent));
        parent.children.lock().push(proc.clone());
    }

    if pid == PID_INIT {
        log::info!("(Proc) processo init registrado");
        *INIT_PROC.lock() = Some(proc.clone());
    }

    PROC_LIST.lock().push(proc.clone());
    log::debug!("(Proc) criado processo {} [{}]", pid, name);
    Ok(proc)
}

/// Limpeza feita de dentro do próprio processo ao sair:
/// acorda o pai, re-parenteia os filhos para o init, marca DEAD com o
/// status, fecha os fds e solta o cwd. A desalocação de pilhas e do
/// diretório de páginas fica para o waitpid do pai.
pub fn proc_cleanup(status: i32) {
    let cur = curproc().expect("proc_cleanup sem processo corrente");

    // 1. acordar o pai, se estiver esperando
    if let Some(parent) = cur.parent() {
        parent.wait.wake_one();
    }

    let init = INIT_PROC.lock().clone();
    if let Some(ref init) = init {
        if Arc::ptr_eq(init, &cur) {
            assert!(
                cur.children.lock().is_empty(),
                "init saiu com filhos pendentes"
            );
        }
    }

    // 2. re-parentear filhos para o init
    let orphans: Vec<Arc<Process>> = core::mem::take(&mut *cur.children.lock());
    if !orphans.is_empty() {
        let init = init.expect("órfãos sem init para adotá-los");
        for child in orphans {
            log::debug!("(Proc) re-parenteando {} para init", child.pid);
            *child.parent.lock() = Some(Arc::downgrade(&init));
            init.children.lock().push(child);
        }
    }

    // 3. estado e status
    *cur.state.lock() = ProcState::Dead;
    *cur.status.lock() = status;

    // 4. fechar todos os fds abertos
    let files: Vec<_> = cur.files.lock().iter_mut().filter_map(|f| f.take()).collect();
    for f in files {
        crate::fs::vfs::file::fput(f);
    }

    // 5. soltar o cwd
    if let Some(cwd) = cur.cwd.lock().take() {
        crate::fs::vfs::vput(cwd);
    };
}

/// Chamado por kthread_exit: encerra o processo e escalona outra thread.
pub fn proc_thread_exited(retval: i32) {
    proc_cleanup(retval);
    let cur = curproc();
    log::debug!(
        "(Proc) processo {:?} saiu; trocando de contexto",
        cur.map(|p| p.pid)
    );
    sched::sched_switch();
}

/// Cancela todas as threads irmãs e encerra a thread corrente.
pub fn do_exit(status: i32) {
    let cur = curproc().expect("do_exit sem processo corrente");
    let me = sched::current_thread().expect("do_exit sem thread corrente");

    let siblings: Vec<Arc<Kthread>> = cur
        .threads
        .lock()
        .iter()
        .filter(|t| !Arc::ptr_eq(t, &me))
        .cloned()
        .collect();
    for thr in siblings {
        kthread_cancel(&thr, status);
    }

    kthread_exit(status);
}

/// Mata um processo (sem relação com sinais): sobre o corrente equivale a
/// do_exit; sobre outro, cancela cada thread dele.
pub fn proc_kill(p: &Arc<Process>, status: i32) {
    if let Some(cur) = curproc() {
        if Arc::ptr_eq(&cur, p) {
            do_exit(status);
            return;
        }
    }
    for thr in p.threads.lock().iter() {
        kthread_cancel(thr, status);
    }
}

/// Mata todos os processos exceto os filhos diretos do idle, depois sai.
pub fn proc_kill_all() {
    let victims: Vec<Arc<Process>> = PROC_LIST.lock().clone();
    let cur = curproc();
    for p in victims {
        let direct_child_of_idle = p
            .parent()
            .map(|parent| parent.pid == PID_IDLE)
            .unwrap_or(true);
        let is_cur = cur.as_ref().map(|c| Arc::ptr_eq(c, &p)).unwrap_or(false);
        if !direct_child_of_idle && !is_cur {
            proc_kill(&p, 0);
        }
    }
    do_exit(0);
}

/// Colhe o filho morto: libera pilhas de kernel e diretório de páginas e o
/// remove das listas. Retorna o status de saída.
fn reap(parent: &Arc<Process>, child: &Arc<Process>) -> i32 {
    debug_assert!(child.is_dead());

    // pilhas das threads caem junto com os últimos Arc
    child.threads.lock().clear();
    // destruir diretório de páginas
    *child.pagedir.lock() = None;

    PROC_LIST.lock().retain(|p| !Arc::ptr_eq(p, child));
    parent
        .children
        .lock()
        .retain(|p| !Arc::ptr_eq(p, child));

    let status = child.status();
    log::debug!("(Proc) processo {} colhido (status {})", child.pid, status);
    status
}

/// waitpid(2).
///
/// `pid == -1`: colhe qualquer filho morto (dormindo até um sair);
/// `pid > 0`: espera aquele filho específico. Sem filhos (ou pid que não é
/// filho) → ECHILD. Outros pids e options != 0 → EINVAL.
pub fn do_waitpid(pid: Pid, options: i32) -> KResult<(Pid, i32)> {
    if options != 0 {
        return Err(Errno::EINVAL);
    }
    if pid == 0 || pid < -1 {
        return Err(Errno::EINVAL);
    }

    let cur = curproc().expect("waitpid sem processo corrente");

    if cur.children.lock().is_empty() {
        return Err(Errno::ECHILD);
    }

    loop {
        let mut dead_child: Option<Arc<Process>> = None;
        {
            let children = cur.children.lock();
            if pid == -1 {
                dead_child = children.iter().find(|c| c.is_dead()).cloned();
            } else {
                match children.iter().find(|c| c.pid == pid) {
                    Some(c) => {
                        if c.is_dead() {
                            dead_child = Some(c.clone());
                        }
                    }
                    None => return Err(Errno::ECHILD),
                }
            }
        }

        match dead_child {
            Some(child) => {
                let status = reap(&cur, &child);
                return Ok((child.pid, status));
            }
            None => {
                // nenhum filho morto ainda: dormir até um exit nos acordar
                sched::sched_sleep_on(&cur.wait);
            }
        }
    }
}

/// Despejo legível da lista de processos (debug).
pub fn proc_list_info() -> String {
    use core::fmt::Write;
    let mut out = String::new();
    let _ = writeln!(out, "{:>5} {:<13} {:>6} {:>8}", "PID", "NAME", "PARENT", "STATE");
    for p in PROC_LIST.lock().iter() {
        let parent = p.parent().map(|pp| pp.pid).unwrap_or(-1);
        let _ = writeln!(
            out,
            "{:>5} {:<13} {:>6} {:>8?}",
            p.pid,
            p.name,
            parent,
            p.state()
        );
    }
    out
}

/// Bootstrap do subsistema: cria o idle (PID 0) com uma thread ligada ao
/// contexto de boot e o init (PID 1), e escalona o init.
pub fn bootstrap() -> (Arc<Process>, Arc<Process>) {
    let idle = proc_create("idle").expect("falha criando idle");
    assert_eq!(idle.pid, PID_IDLE);
    let idle_thr = kthread::kthread_create(&idle, kthread::entry_noop, 0, 0);
    sched::set_current(Some(idle_thr));

    let init = proc_create("init").expect("falha criando init");
    assert_eq!(init.pid, PID_INIT);
    let init_thr = kthread::kthread_create(&init, kthread::entry_noop, 0, 0);

    // o idle entrega a CPU ao init
    sched::sched_make_runnable(init_thr);
    sched::sched_switch();

    (idle, init)
}

/// Serializa os testes que mexem no estado global de processos/scheduler e
/// zera esse estado antes de cada um.
#[cfg(test)]
pub fn test_guard() -> spin::MutexGuard<'static, ()> {
    static TEST_LOCK: Spinlock<()> = Spinlock::new(());
    let guard = TEST_LOCK.lock();

    sched::set_current(None);
    while crate::sched::runqueue::RUNQUEUE.lock().pop().is_some() {}
    PROC_LIST.lock().clear();
    *INIT_PROC.lock() = None;
    *NEXT_PID.lock() = 0;
    crate::fs::test_reset_root();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::kthread::{entry_noop, kthread_create};

    /// Prepara idle+init e deixa o init como processo corrente.
    fn setup() -> (Arc<Process>, Arc<Process>) {
        bootstrap()
    }

    #[test]
    fn test_bootstrap_pids() {
        let _g = test_guard();
        let (idle, init) = setup();
        assert_eq!(idle.pid(), PID_IDLE);
        assert_eq!(init.pid(), PID_INIT);
        assert!(idle.parent().is_none());
        assert_eq!(init.parent().unwrap().pid(), PID_IDLE);
        assert_eq!(curproc().unwrap().pid(), PID_INIT);
    }

    #[test]
    fn test_proc_create_links_parent() {
        let _g = test_guard();
        let (_idle, init) = setup();

        let child = proc_create("filho").unwrap();
        assert_eq!(child.parent().unwrap().pid(), PID_INIT);
        assert!(init
            .children
            .lock()
            .iter()
            .any(|c| c.pid() == child.pid()));
    }

    #[test]
    fn test_pid_allocation_skips_live() {
        let _g = test_guard();
        let (_idle, _init) = setup();

        let a = proc_create("a").unwrap();
        let b = proc_create("b").unwrap();
        assert_ne!(a.pid(), b.pid());
        assert!(proc_lookup(a.pid()).is_some());
    }

    #[test]
    fn test_pid_allocation_wraps_around() {
        let _g = test_guard();
        let (_idle, _init) = setup();

        // força o alocador para o fim do espaço de PIDs
        *NEXT_PID.lock() = PROC_MAX_COUNT - 1;
        let high = proc_create("alto").unwrap();
        assert_eq!(high.pid(), PROC_MAX_COUNT - 1);

        // o próximo dá a volta, pulando 0 (idle) e 1 (init)
        let wrapped = proc_create("voltou").unwrap();
        assert_eq!(wrapped.pid(), 2);
    }

    #[test]
    fn test_waitpid_rejects_bad_args() {
        let _g = test_guard();
        let (_idle, _init) = setup();

        assert_eq!(do_waitpid(-1, 1), Err(Errno::EINVAL));
        assert_eq!(do_waitpid(0, 0), Err(Errno::EINVAL));
        assert_eq!(do_waitpid(-2, 0), Err(Errno::EINVAL));
        // init sem filhos
        assert_eq!(do_waitpid(-1, 0), Err(Errno::ECHILD));
    }

    #[test]
    fn test_exit_then_waitpid_reaps() {
        let _g = test_guard();
        let (_idle, init) = setup();

        let child = proc_create("filho").unwrap();
        let child_thr = kthread_create(&child, entry_noop, 0, 0);
        let child_pid = child.pid();

        // o filho roda e sai com status 7
        sched::set_current(Some(child_thr));
        do_exit(7);
        assert!(child.is_dead());
        assert_eq!(child.status(), 7);

        // o pai colhe
        let init_thr = init.threads.lock()[0].clone();
        sched::set_current(Some(init_thr));
        let (pid, status) = do_waitpid(-1, 0).unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status, 7);
        assert!(proc_lookup(child_pid).is_none());
        assert!(init.children.lock().is_empty());
    }

    #[test]
    fn test_waitpid_specific_pid() {
        let _g = test_guard();
        let (_idle, init) = setup();

        let child = proc_create("alvo").unwrap();
        let thr = kthread_create(&child, entry_noop, 0, 0);
        let pid = child.pid();

        sched::set_current(Some(thr));
        do_exit(3);

        let init_thr = init.threads.lock()[0].clone();
        sched::set_current(Some(init_thr));

        // pid que não é filho
        assert_eq!(do_waitpid(999, 0), Err(Errno::ECHILD));

        let (got, status) = do_waitpid(pid, 0).unwrap();
        assert_eq!(got, pid);
        assert_eq!(status, 3);
    }

    #[test]
    fn test_waitpid_two_children_statuses() {
        let _g = test_guard();
        let (_idle, init) = setup();

        let c1 = proc_create("c1").unwrap();
        let t1 = kthread_create(&c1, entry_noop, 0, 0);
        let c2 = proc_create("c2").unwrap();
        let t2 = kthread_create(&c2, entry_noop, 0, 0);

        sched::set_current(Some(t1));
        do_exit(7);
        sched::set_current(Some(t2));
        do_exit(9);

        let init_thr = init.threads.lock()[0].clone();
        sched::set_current(Some(init_thr));

        let (_, s1) = do_waitpid(-1, 0).unwrap();
        let (_, s2) = do_waitpid(-1, 0).unwrap();
        let mut statuses = [s1, s2];
        statuses.sort();
        assert_eq!(statuses, [7, 9]);
    }

    #[test]
    fn test_exit_reparents_children_to_init() {
        let _g = test_guard();
        let (_idle, init) = setup();

        let parent = proc_create("pai").unwrap();
        let parent_thr = kthread_create(&parent, entry_noop, 0, 0);

        sched::set_current(Some(parent_thr));
        let grandchild = proc_create("neto").unwrap();
        let _gthr = kthread_create(&grandchild, entry_noop, 0, 0);

        do_exit(0);

        // o neto agora é filho do init
        assert_eq!(grandchild.parent().unwrap().pid(), PID_INIT);
        assert!(init
            .children
            .lock()
            .iter()
            .any(|c| Arc::ptr_eq(c, &grandchild)));
    }

    #[test]
    fn test_cancel_wakes_cancellable_sleeper() {
        let _g = test_guard();
        let (_idle, init) = setup();

        let p = proc_create("dorminhoco").unwrap();
        let thr = kthread_create(&p, entry_noop, 0, 0);

        // simula a thread entrando num sono cancelável
        thr.set_state(kthread::KthreadState::SleepingCancellable);
        thr.set_wchan(&p.wait as *const WaitQueue as usize);
        p.wait_enqueue_for_test(&thr);

        kthread_cancel(&thr, -1);
        assert!(thr.cancelled());
        assert_eq!(thr.wchan(), 0);
        assert!(p.wait.is_empty());

        let _ = init;
    }
}

#[cfg(test)]
impl Process {
    /// Enfileira uma thread no canal de espera (só para testes de cancel).
    pub fn wait_enqueue_for_test(&self, thr: &Arc<Kthread>) {
        self.wait.push_for_test(thr.clone());
    }
}
