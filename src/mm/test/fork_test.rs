//! Teste do COW de fork no nível do espaço de endereçamento.

use crate::arch;
use crate::mm::vmmap::{Dir, MapFlags, Prot};
use crate::mm::{pn_to_addr, USER_PAGE_LOW};
use crate::proc::{self, test_guard};
use crate::sched;

#[test]
fn test_fork_cow_isolation() {
    let _g = test_guard();
    let (_idle, init) = proc::bootstrap();

    // área privada anônima no espaço do init
    let vpn = {
        let mut map = init.vmmap.lock();
        map.map(
            None,
            USER_PAGE_LOW + 64,
            4,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE,
            0,
            Dir::LoHi,
        )
        .unwrap()
    };
    let vaddr = pn_to_addr(vpn);

    // o pai escreve 'A'
    init.vmmap.lock().write(vaddr, b"A").unwrap();

    let flushes_before = arch::tlb_flush_all_count();
    let child_pid = proc::do_fork().unwrap();
    let child = proc::proc_lookup(child_pid).unwrap();

    // fork desfez as traduções do pai e limpou a TLB
    assert!(arch::tlb_flush_all_count() > flushes_before);
    assert_eq!(init.pagedir().mapped_count(), 0);

    // ambas as áreas agora são shadows distintos
    {
        let pmap = init.vmmap.lock();
        let cmap = child.vmmap.lock();
        let pa = pmap.lookup(vpn).unwrap();
        let ca = cmap.lookup(vpn).unwrap();
        assert!(pa.obj.is_shadow());
        assert!(ca.obj.is_shadow());
        assert!(!alloc::sync::Arc::ptr_eq(&pa.obj, &ca.obj));
    }

    // até a primeira escrita, os dois leem o mesmo byte
    let mut buf = [0u8; 1];
    init.vmmap.lock().read(vaddr, &mut buf).unwrap();
    assert_eq!(&buf, b"A");
    child.vmmap.lock().read(vaddr, &mut buf).unwrap();
    assert_eq!(&buf, b"A");

    // o filho escreve 'B'; cada lado mantém a própria visão
    child.vmmap.lock().write(vaddr, b"B").unwrap();

    init.vmmap.lock().read(vaddr, &mut buf).unwrap();
    assert_eq!(&buf, b"A");
    child.vmmap.lock().read(vaddr, &mut buf).unwrap();
    assert_eq!(&buf, b"B");

    // e a escrita do pai também não vaza para o filho
    init.vmmap.lock().write(vaddr, b"C").unwrap();
    child.vmmap.lock().read(vaddr, &mut buf).unwrap();
    assert_eq!(&buf, b"B");
}

#[test]
fn test_fork_clones_fd_table_and_enqueues_child() {
    let _g = test_guard();
    let (_idle, init) = proc::bootstrap();

    let child_pid = proc::do_fork().unwrap();
    let child = proc::proc_lookup(child_pid).unwrap();

    // o filho tem uma thread pronta na runqueue
    assert_eq!(child.threads.lock().len(), 1);
    let queued = crate::sched::runqueue::RUNQUEUE.lock().pop().unwrap();
    assert!(alloc::sync::Arc::ptr_eq(
        &queued,
        &child.threads.lock()[0]
    ));

    // pai continua sendo o processo corrente
    assert_eq!(proc::curproc().unwrap().pid(), init.pid());
    let _ = sched::current_thread().unwrap();
}

#[test]
fn test_fork_then_waitpid_returns_status() {
    let _g = test_guard();
    let (_idle, init) = proc::bootstrap();

    let child_pid = proc::do_fork().unwrap();

    // simular o despacho do filho e o exit(42)
    let child_thr = crate::sched::runqueue::RUNQUEUE.lock().pop().unwrap();
    assert_eq!(child_thr.proc().unwrap().pid(), child_pid);
    sched::set_current(Some(child_thr));
    proc::do_exit(42);

    // o pai colhe exatamente o status do filho
    let init_thr = init.threads.lock()[0].clone();
    sched::set_current(Some(init_thr));
    let (pid, status) = proc::do_waitpid(child_pid, 0).unwrap();
    assert_eq!(pid, child_pid);
    assert_eq!(status, 42);
}
