//! Cenários fim-a-fim: VFS + S5FS + VM + processos trabalhando juntos.

use crate::fs::vfs::file::{O_CREAT, O_RDWR, SEEK_SET};
use crate::fs::vfs::syscall::*;
use crate::mm::vmmap::{Dir, MapFlags, Prot};
use crate::mm::{mmap::do_mmap, pn_to_addr, PAGE_SIZE};
use crate::proc::{self, test_guard};
use crate::sched;
use crate::sys::Errno;
use alloc::vec;

fn setup() -> alloc::sync::Arc<proc::Process> {
    crate::init::kernel_bootstrap().unwrap()
}

#[test]
fn test_scenario_mkdir_rmdir_roundtrip() {
    let _g = test_guard();
    let _init = setup();

    assert!(do_mkdir("/a").is_ok());
    assert!(do_mkdir("/a/b").is_ok());
    assert!(do_rmdir("/a/b").is_ok());
    assert!(do_rmdir("/a").is_ok());

    // tudo de volta: /a não existe mais
    assert_eq!(do_stat("/a"), Err(Errno::ENOENT));
}

#[test]
fn test_scenario_rmdir_nonempty() {
    let _g = test_guard();
    let _init = setup();

    do_mkdir("/d").unwrap();
    let fd = do_open("/d/f", O_CREAT).unwrap() as i32;
    do_close(fd).unwrap();

    assert_eq!(do_rmdir("/d"), Err(Errno::ENOTEMPTY));

    do_unlink("/d/f").unwrap();
    assert!(do_rmdir("/d").is_ok());
}

#[test]
fn test_scenario_waitpid_two_children() {
    let _g = test_guard();
    let init = setup();

    let pid1 = proc::do_fork().unwrap();
    let pid2 = proc::do_fork().unwrap();
    let c2 = proc::proc_lookup(pid2).unwrap();

    // despacho cooperativo: a primeira thread da fila é a do filho 1
    let t1 = crate::sched::runqueue::RUNQUEUE.lock().pop().unwrap();
    assert_eq!(t1.proc().unwrap().pid(), pid1);
    sched::set_current(Some(t1));

    // filho 1 sai com 7; o switch entrega a CPU ao filho 2
    proc::do_exit(7);
    let now = sched::current_thread().unwrap();
    assert!(alloc::sync::Arc::ptr_eq(
        &now.proc().unwrap(),
        &c2
    ));

    // filho 2 sai com 9
    proc::do_exit(9);

    let init_thr = init.threads.lock()[0].clone();
    sched::set_current(Some(init_thr));

    let (ra, sa) = proc::do_waitpid(-1, 0).unwrap();
    let (rb, sb) = proc::do_waitpid(-1, 0).unwrap();

    let mut pids = [ra, rb];
    pids.sort();
    let mut expected = [pid1, pid2];
    expected.sort();
    assert_eq!(pids, expected);

    let mut statuses = [sa, sb];
    statuses.sort();
    assert_eq!(statuses, [7, 9]);

    // mais nenhum filho
    assert_eq!(proc::do_waitpid(-1, 0), Err(Errno::ECHILD));
}

#[test]
fn test_scenario_mmap_file_shared_sees_writes() {
    let _g = test_guard();
    let init = setup();

    let fd = do_open("/mapa", O_RDWR | O_CREAT).unwrap() as i32;
    do_write(fd, b"conteudo original").unwrap();

    let addr = do_mmap(
        0,
        PAGE_SIZE,
        Prot::READ | Prot::WRITE,
        MapFlags::SHARED,
        fd,
        0,
    )
    .unwrap();

    // leitura pelo mapeamento enxerga o arquivo
    let mut buf = [0u8; 8];
    init.vmmap.lock().read(addr, &mut buf).unwrap();
    assert_eq!(&buf, b"conteudo");

    // escrita SHARED aparece no arquivo
    init.vmmap.lock().write(addr, b"CONTEUDO").unwrap();
    do_lseek(fd, 0, SEEK_SET).unwrap();
    let mut out = [0u8; 8];
    do_read(fd, &mut out).unwrap();
    assert_eq!(&out, b"CONTEUDO");

    crate::mm::mmap::do_munmap(addr, PAGE_SIZE).unwrap();
    do_close(fd).unwrap();
    do_unlink("/mapa").unwrap();
}

#[test]
fn test_scenario_mmap_private_does_not_touch_file() {
    let _g = test_guard();
    let init = setup();

    let fd = do_open("/privado", O_RDWR | O_CREAT).unwrap() as i32;
    do_write(fd, b"original").unwrap();

    let addr = do_mmap(
        0,
        PAGE_SIZE,
        Prot::READ | Prot::WRITE,
        MapFlags::PRIVATE,
        fd,
        0,
    )
    .unwrap();

    // escrita privada fica no shadow; o arquivo não muda
    init.vmmap.lock().write(addr, b"ALTERADO").unwrap();

    let mut view = [0u8; 8];
    init.vmmap.lock().read(addr, &mut view).unwrap();
    assert_eq!(&view, b"ALTERADO");

    do_lseek(fd, 0, SEEK_SET).unwrap();
    let mut out = [0u8; 8];
    do_read(fd, &mut out).unwrap();
    assert_eq!(&out, b"original");

    crate::mm::mmap::do_munmap(addr, PAGE_SIZE).unwrap();
    do_close(fd).unwrap();
    do_unlink("/privado").unwrap();
}

#[test]
fn test_scenario_sparse_block_under_cow() {
    let _g = test_guard();
    let init = setup();

    // arquivo com buraco: página 0 nunca escrita
    let fd = do_open("/esparso", O_RDWR | O_CREAT).unwrap() as i32;
    do_lseek(fd, (2 * PAGE_SIZE) as isize, SEEK_SET).unwrap();
    do_write(fd, b"fim").unwrap();

    let addr = do_mmap(
        0,
        3 * PAGE_SIZE,
        Prot::READ | Prot::WRITE,
        MapFlags::PRIVATE,
        fd,
        0,
    )
    .unwrap();

    // o buraco lê zeros através do shadow
    let mut buf = [7u8; 4];
    init.vmmap.lock().read(addr, &mut buf).unwrap();
    assert_eq!(buf, [0, 0, 0, 0]);

    // escrever no buraco dentro da região COW: cópia privada, arquivo
    // continua esparso
    init.vmmap.lock().write(addr, b"oi").unwrap();
    let st = do_stat("/esparso").unwrap();
    assert_eq!(st.blocks, 1);

    do_lseek(fd, 0, SEEK_SET).unwrap();
    let mut out = [9u8; 2];
    do_read(fd, &mut out).unwrap();
    assert_eq!(out, [0, 0]);

    crate::mm::mmap::do_munmap(addr, 3 * PAGE_SIZE).unwrap();
    do_close(fd).unwrap();
    do_unlink("/esparso").unwrap();
}

#[test]
fn test_scenario_mmap_validation() {
    let _g = test_guard();
    let _init = setup();

    // comprimento zero, endereço torto, flags trocadas
    assert_eq!(
        do_mmap(0, 0, Prot::READ, MapFlags::PRIVATE, -1, 0),
        Err(Errno::EINVAL)
    );
    assert_eq!(
        do_mmap(0x1001, PAGE_SIZE, Prot::READ, MapFlags::PRIVATE, -1, 0),
        Err(Errno::EINVAL)
    );
    assert_eq!(
        do_mmap(
            0,
            PAGE_SIZE,
            Prot::READ,
            MapFlags::PRIVATE | MapFlags::SHARED,
            -1,
            0
        ),
        Err(Errno::EINVAL)
    );
    // FIXED sem endereço
    assert_eq!(
        do_mmap(
            0,
            PAGE_SIZE,
            Prot::READ,
            MapFlags::PRIVATE | MapFlags::FIXED,
            -1,
            0
        ),
        Err(Errno::EINVAL)
    );
    // fd inválido sem ANON
    assert_eq!(
        do_mmap(0, PAGE_SIZE, Prot::READ, MapFlags::PRIVATE, -1, 0),
        Err(Errno::EBADF)
    );

    // anônimo válido funciona
    let addr = do_mmap(
        0,
        PAGE_SIZE,
        Prot::READ | Prot::WRITE,
        MapFlags::PRIVATE | MapFlags::ANON,
        -1,
        0,
    )
    .unwrap();
    assert!(addr >= crate::mm::USER_MEM_LOW);
    crate::mm::mmap::do_munmap(addr, PAGE_SIZE).unwrap();
}

#[test]
fn test_scenario_fault_demand_paging() {
    let _g = test_guard();
    let init = setup();

    use crate::mm::fault::{handle_pagefault, FaultCause, FaultResult};

    let vpn = {
        let mut map = init.vmmap.lock();
        map.map(
            None,
            0,
            2,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE,
            0,
            Dir::LoHi,
        )
        .unwrap()
    };
    let vaddr = pn_to_addr(vpn);

    // falta de leitura instala o mapeamento
    assert_eq!(
        handle_pagefault(vaddr, FaultCause::empty()),
        FaultResult::Success
    );
    let entry = init.pagedir().pt_lookup(vpn).unwrap();
    assert!(!entry.flags.contains(crate::arch::PtFlags::EXECUTABLE));

    // endereço sem área: mataria o processo com EFAULT
    assert_eq!(
        handle_pagefault(pn_to_addr(vpn + 100), FaultCause::empty()),
        FaultResult::NoMapping
    );

    // escrita em área sem permissão de escrita
    let ro_vpn = {
        let mut map = init.vmmap.lock();
        map.map(None, 0, 1, Prot::READ, MapFlags::PRIVATE, 0, Dir::LoHi)
            .unwrap()
    };
    assert_eq!(
        handle_pagefault(pn_to_addr(ro_vpn), FaultCause::WRITE),
        FaultResult::ProtectionViolation
    );
}

#[test]
fn test_scenario_syscall_dispatch_paths() {
    let _g = test_guard();
    let init = setup();

    use crate::syscall::{numbers::*, syscall_dispatch, SyscallArgs};

    // getpid via tabela de dispatch
    let ret = syscall_dispatch(SYS_GETPID, SyscallArgs::default());
    assert_eq!(ret, init.pid() as isize);

    // brk(0) devolve o fim corrente do heap
    let ret = syscall_dispatch(
        SYS_BRK,
        SyscallArgs {
            a1: 0,
            ..Default::default()
        },
    );
    assert!(ret >= 0);

    // número inexistente
    assert_eq!(
        syscall_dispatch(250, SyscallArgs::default()),
        Errno::ENOSYS.as_isize()
    );
}

#[test]
fn test_scenario_brk_grow_and_shrink() {
    let _g = test_guard();
    let init = setup();

    use crate::mm::mmap::do_brk;

    let base = crate::mm::USER_MEM_LOW + 0x10000;
    assert_eq!(do_brk(base).unwrap(), base);

    // crescer o heap mapeia área anônima
    let grown = base + 3 * PAGE_SIZE;
    assert_eq!(do_brk(grown).unwrap(), grown);
    assert_eq!(do_brk(0).unwrap(), grown);

    // o heap é utilizável
    init.vmmap.lock().write(base, b"heap").unwrap();
    let mut buf = [0u8; 4];
    init.vmmap.lock().read(base, &mut buf).unwrap();
    assert_eq!(&buf, b"heap");

    // encolher de volta
    assert_eq!(do_brk(base).unwrap(), base);
    assert!(do_brk(base - PAGE_SIZE).is_err());
}

#[test]
fn test_scenario_exec_replaces_address_space() {
    let _g = test_guard();
    let init = setup();

    // imagem crua de duas páginas
    let fd = do_open("/bin-img", O_RDWR | O_CREAT).unwrap() as i32;
    let image = vec![0x90u8; PAGE_SIZE + 100];
    do_write(fd, &image).unwrap();
    do_close(fd).unwrap();

    // suja o espaço atual com uma área qualquer
    {
        let mut map = init.vmmap.lock();
        map.map(
            None,
            0,
            2,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE,
            0,
            Dir::LoHi,
        )
        .unwrap();
    }

    crate::syscall::process::do_exec("/bin-img").unwrap();

    // espaço novo: imagem na base + pilha no topo, heap logo após a imagem
    {
        let map = init.vmmap.lock();
        assert_eq!(map.areas().len(), 2);
        let image_area = map.lookup(crate::mm::USER_PAGE_LOW).unwrap();
        assert_eq!(image_area.npages(), 2);
        assert!(image_area.obj.is_shadow());
    }
    let brk = init.brk.lock();
    assert_eq!(brk.start, pn_to_addr(crate::mm::USER_PAGE_LOW + 2));
    drop(brk);

    // a imagem é legível através do mapeamento
    let mut buf = [0u8; 4];
    init.vmmap
        .lock()
        .read(pn_to_addr(crate::mm::USER_PAGE_LOW), &mut buf)
        .unwrap();
    assert_eq!(buf, [0x90; 4]);

    // exec de coisas que não são imagem válida
    assert_eq!(
        crate::syscall::process::do_exec("/inexistente"),
        Err(Errno::ENOENT)
    );
    do_mkdir("/um-dir").unwrap();
    assert_eq!(
        crate::syscall::process::do_exec("/um-dir"),
        Err(Errno::EACCES)
    );
}

#[test]
fn test_scenario_kill_cancels_target() {
    let _g = test_guard();
    let _init = setup();

    let pid = proc::do_fork().unwrap();
    let child = proc::proc_lookup(pid).unwrap();
    let child_thr = child.threads.lock()[0].clone();
    assert!(!child_thr.cancelled());

    use crate::syscall::{numbers::SYS_KILL, syscall_dispatch, SyscallArgs};
    let ret = syscall_dispatch(
        SYS_KILL,
        SyscallArgs {
            a1: pid as usize,
            a2: Errno::EFAULT as i32 as usize,
            ..Default::default()
        },
    );
    assert_eq!(ret, 0);
    assert!(child_thr.cancelled());

    // pid inexistente
    let ret = syscall_dispatch(
        SYS_KILL,
        SyscallArgs {
            a1: 900,
            ..Default::default()
        },
    );
    assert_eq!(ret, Errno::ESRCH.as_isize());
}

#[test]
fn test_scenario_write_survives_vnode_recycle() {
    let _g = test_guard();
    let _init = setup();

    // escreve e fecha (o vnode é descartado e limpo), depois reabre
    let fd = do_open("/ciclo", O_RDWR | O_CREAT).unwrap() as i32;
    let data = vec![0xABu8; PAGE_SIZE + 17];
    do_write(fd, &data).unwrap();
    do_close(fd).unwrap();

    let fd = do_open("/ciclo", O_RDWR).unwrap() as i32;
    let mut out = vec![0u8; data.len()];
    assert_eq!(do_read(fd, &mut out).unwrap(), data.len());
    assert_eq!(out, data);
    do_close(fd).unwrap();
    do_unlink("/ciclo").unwrap();
}
