//! Handlers de syscall de processo.

use super::abi::{copy_str_from_user, copy_to_user, SyscallArgs};
use crate::fs::vfs::{path::open_namev, vput};
use crate::mm::vmmap::{Dir, MapFlags, Prot, Vmmap};
use crate::mm::{pages_spanned, pn_to_addr, USER_PAGE_HIGH, USER_PAGE_LOW};
use crate::proc::{self, BrkRange};
use crate::sys::{Errno, KResult, Pid};

/// Páginas da pilha de usuário montada pelo exec
const EXEC_STACK_PAGES: usize = 32;

/// exit(status)
pub fn sys_exit(args: &SyscallArgs) -> KResult<usize> {
    proc::do_exit(args.a1 as i32);
    Ok(0)
}

/// fork()
pub fn sys_fork(_args: &SyscallArgs) -> KResult<usize> {
    let pid = proc::do_fork()?;
    Ok(pid as usize)
}

/// waitpid(pid, status_ptr, options)
pub fn sys_waitpid(args: &SyscallArgs) -> KResult<usize> {
    let (pid, status) = proc::do_waitpid(args.a1 as Pid, args.a3 as i32)?;
    if args.a2 != 0 {
        copy_to_user(args.a2, &status.to_le_bytes())?;
    }
    Ok(pid as usize)
}

/// getpid()
pub fn sys_getpid(_args: &SyscallArgs) -> KResult<usize> {
    let cur = proc::curproc().ok_or(Errno::EFAULT)?;
    Ok(cur.pid() as usize)
}

/// kill(pid, status): sem sinais — cancela as threads do alvo.
pub fn sys_kill(args: &SyscallArgs) -> KResult<usize> {
    let target = proc::proc_lookup(args.a1 as Pid).ok_or(Errno::ESRCH)?;
    proc::proc_kill(&target, args.a2 as i32);
    Ok(0)
}

/// exec(path): substitui o espaço de endereçamento pela imagem do arquivo.
///
/// O parsing de formato (ELF) fica com os carregadores, fora do núcleo: o
/// arquivo é mapeado cru, PRIVATE, na base do espaço de usuário, com uma
/// pilha anônima no topo. Os fds e o cwd sobrevivem ao exec.
pub fn sys_exec(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    do_exec(&path)?;
    Ok(0)
}

pub fn do_exec(path: &str) -> KResult<()> {
    let vn = open_namev(path, false, None)?;

    if !vn.mode().is_regular() {
        vput(vn);
        return Err(Errno::EACCES);
    }
    let size = vn.len();
    if size == 0 {
        vput(vn);
        return Err(Errno::ENOEXEC);
    }

    let cur = proc::curproc().ok_or(Errno::EFAULT)?;

    // montar o espaço novo por inteiro antes de trocar: falha no meio não
    // pode deixar o processo sem mapa
    let mut map = Vmmap::new();
    let npages = pages_spanned(size);
    let image_res = map.map(
        Some(&vn),
        USER_PAGE_LOW,
        npages,
        Prot::READ | Prot::WRITE | Prot::EXEC,
        MapFlags::PRIVATE,
        0,
        Dir::LoHi,
    );
    if let Err(e) = image_res {
        vput(vn);
        return Err(e);
    }
    let stack_res = map.map(
        None,
        0,
        EXEC_STACK_PAGES,
        Prot::READ | Prot::WRITE,
        MapFlags::PRIVATE,
        0,
        Dir::HiLo,
    );
    if let Err(e) = stack_res {
        vput(vn);
        return Err(e);
    }

    // troca: o mapa velho cai (soltando as referências das áreas)
    *cur.vmmap.lock() = map;

    let heap_base = pn_to_addr(USER_PAGE_LOW + npages);
    *cur.brk.lock() = BrkRange {
        start: heap_base,
        end: heap_base,
    };

    cur.pagedir().pt_unmap_range(USER_PAGE_LOW, USER_PAGE_HIGH);
    crate::arch::tlb_flush_all();

    // o mapeamento segura o vnode; a referência do open_namev sai de cena
    vput(vn);

    log::debug!("(Exec) processo {} executando {}", cur.pid(), path);
    Ok(())
}
