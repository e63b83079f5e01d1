//! mmap(2), munmap(2) e brk(2).
//!
//! Validação dos argumentos do usuário e delegação ao vmmap do processo
//! corrente. Alinhamento é estrito (inclusive com MAP_FIXED): endereço,
//! comprimento e offset fora de página são EINVAL, sem arredondamento
//! silencioso.

use crate::arch;
use crate::mm::vmmap::{Dir, MapFlags, Prot};
use crate::mm::{
    addr_to_pn, page_aligned, pages_spanned, PAGE_SIZE, USER_MEM_HIGH, USER_MEM_LOW,
};
use crate::proc;
use crate::sys::{Errno, KResult};

fn valid_user_range(addr: usize, len: usize) -> bool {
    addr >= USER_MEM_LOW && addr.checked_add(len).map_or(false, |end| end <= USER_MEM_HIGH)
}

/// mmap(2) com MAP_SHARED, MAP_PRIVATE, MAP_FIXED e MAP_ANON.
/// Retorna o endereço do mapeamento.
pub fn do_mmap(
    addr: usize,
    len: usize,
    prot: Prot,
    flags: MapFlags,
    fd: i32,
    off: usize,
) -> KResult<usize> {
    if len == 0 || !page_aligned(addr) || !page_aligned(off) {
        return Err(Errno::EINVAL);
    }
    // exatamente um tipo de mapeamento
    if flags.contains(MapFlags::SHARED) == flags.contains(MapFlags::PRIVATE) {
        return Err(Errno::EINVAL);
    }

    let fixed = flags.contains(MapFlags::FIXED);
    if fixed && addr == 0 {
        return Err(Errno::EINVAL);
    }
    if addr != 0 && !valid_user_range(addr, len) {
        return Err(Errno::EINVAL);
    }

    let npages = pages_spanned(len);

    let cur = proc::curproc().ok_or(Errno::EFAULT)?;

    // resolver o arquivo, se o mapeamento não for anônimo
    let file = if flags.contains(MapFlags::ANON) {
        None
    } else {
        let f = crate::fs::vfs::file::fget(&cur, fd).ok_or(Errno::EBADF)?;
        // PRIVATE exige leitura; SHARED com escrita exige modo de escrita
        if !f.mode().contains(crate::fs::vfs::file::FileMode::READ) {
            crate::fs::vfs::file::fput(f);
            return Err(Errno::EACCES);
        }
        if flags.contains(MapFlags::SHARED)
            && prot.contains(Prot::WRITE)
            && !f.mode().contains(crate::fs::vfs::file::FileMode::WRITE)
        {
            crate::fs::vfs::file::fput(f);
            return Err(Errno::EACCES);
        }
        Some(f)
    };

    let lopage = addr_to_pn(addr);
    let res = {
        let mut map = cur.vmmap.lock();
        map.map(
            file.as_ref().map(|f| f.vnode()),
            lopage,
            npages,
            prot,
            flags,
            off / PAGE_SIZE,
            Dir::HiLo,
        )
    };

    // a referência temporária do fget não é mais necessária (o mapeamento
    // segura o vnode através do objeto de memória)
    if let Some(f) = file {
        crate::fs::vfs::file::fput(f);
    }

    let start = res?;

    // limpar traduções velhas da faixa
    let pagedir = cur.pagedir();
    pagedir.pt_unmap_range(start, start + npages);
    arch::tlb_flush_range(start, start + npages);

    Ok(crate::mm::pn_to_addr(start))
}

/// munmap(2).
pub fn do_munmap(addr: usize, len: usize) -> KResult<()> {
    if len == 0 || !page_aligned(addr) || !valid_user_range(addr, len) {
        return Err(Errno::EINVAL);
    }

    let cur = proc::curproc().ok_or(Errno::EFAULT)?;
    let lopage = addr_to_pn(addr);
    let npages = pages_spanned(len);

    cur.vmmap.lock().remove(lopage, npages);

    let pagedir = cur.pagedir();
    pagedir.pt_unmap_range(lopage, lopage + npages);
    arch::tlb_flush_range(lopage, lopage + npages);

    Ok(())
}

/// brk(2): ajusta o fim do heap do processo. `addr == 0` consulta o valor
/// corrente. O heap é uma área anônima privada entre start_brk e brk.
pub fn do_brk(addr: usize) -> KResult<usize> {
    let cur = proc::curproc().ok_or(Errno::EFAULT)?;
    let mut brk = cur.brk.lock();

    if addr == 0 {
        return Ok(brk.end);
    }

    // primeiro uso estabelece a base do heap
    if brk.start == 0 {
        if !valid_user_range(crate::mm::page_align_down(addr), PAGE_SIZE) {
            return Err(Errno::EINVAL);
        }
        brk.start = addr;
        brk.end = addr;
        return Ok(addr);
    }

    if addr < brk.start || !valid_user_range(brk.start, addr - brk.start) {
        return Err(Errno::EINVAL);
    }

    let old_hi = addr_to_pn(crate::mm::page_align_up(brk.end));
    let new_hi = addr_to_pn(crate::mm::page_align_up(addr));

    let mut map = cur.vmmap.lock();
    if new_hi > old_hi {
        // crescimento: o espaço precisa estar livre
        if !map.is_range_empty(old_hi, new_hi - old_hi) {
            return Err(Errno::ENOMEM);
        }
        map.map(
            None,
            old_hi,
            new_hi - old_hi,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE,
            0,
            Dir::LoHi,
        )?;
    } else if new_hi < old_hi {
        map.remove(new_hi, old_hi - new_hi);
        let pagedir = cur.pagedir();
        pagedir.pt_unmap_range(new_hi, old_hi);
        arch::tlb_flush_range(new_hi, old_hi);
    }
    drop(map);

    brk.end = addr;
    Ok(addr)
}
