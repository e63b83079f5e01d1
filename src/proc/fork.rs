//! fork(2).
//!
//! Clona o mapa de endereços do processo corrente compartilhando os objetos
//! de memória e, para cada área PRIVATE, religa os dois lados através de
//! shadows novos (um para o pai, um para o filho) sobre o objeto antes
//! compartilhado — é isso que materializa o copy-on-write. As traduções do
//! pai são desfeitas para forçar faltas que resolvam pelo caminho novo.
//! Áreas SHARED ficam como estão.

use crate::arch;
use crate::mm::mmobj;
use crate::mm::vmmap::{MapFlags, Vmmap};
use crate::mm::{USER_PAGE_HIGH, USER_PAGE_LOW};
use crate::proc::{self, kthread};
use crate::sched;
use crate::sys::{KResult, Pid};

/// Religa cada par de áreas PRIVATE (pai/filho) através de shadows novos.
///
/// Pressupõe `child` recém-clonado de `parent`: as áreas casam por índice e
/// ainda apontam para o mesmo objeto.
fn vmmap_shadow(parent: &mut Vmmap, child: &mut Vmmap) {
    debug_assert_eq!(parent.areas().len(), child.areas().len());

    for (pa, ca) in parent
        .areas_mut()
        .iter_mut()
        .zip(child.areas_mut().iter_mut())
    {
        if pa.flags.contains(MapFlags::SHARED) {
            debug_assert!(ca.flags.contains(MapFlags::SHARED));
            continue;
        }

        debug_assert!(pa.flags.contains(MapFlags::PRIVATE));
        debug_assert_eq!(pa.start, ca.start);
        debug_assert_eq!(pa.off, ca.off);
        debug_assert!(alloc::sync::Arc::ptr_eq(&pa.obj, &ca.obj));

        // cada lado embrulha a própria referência num shadow novo; o objeto
        // antes compartilhado vira o `shadowed` dos dois
        let pa_old = pa.obj.clone();
        pa.obj = mmobj::shadow_wrap(pa_old);

        let ca_old = ca.obj.clone();
        ca.obj = mmobj::shadow_wrap(ca_old);
    }
}

/// fork(2): retorna o PID do filho no pai.
pub fn do_fork() -> KResult<Pid> {
    let cur = proc::curproc().expect("fork sem processo corrente");
    let curthr = sched::current_thread().expect("fork sem thread corrente");

    // 1. clonar o vmmap (objetos compartilhados, referências incrementadas)
    let newmap = cur.vmmap.lock().clone_map();

    // 2. criar o processo filho; o vmmap vazio dele é substituído pelo clone
    let newproc = proc::proc_create(cur.name())?;
    *newproc.vmmap.lock() = newmap;

    // 3. religar as áreas privadas com shadows (dos dois lados)
    {
        let mut pmap = cur.vmmap.lock();
        let mut cmap = newproc.vmmap.lock();
        vmmap_shadow(&mut pmap, &mut cmap);
    }

    // 4. duplicar a tabela de fds (descritores compartilham o file)
    {
        let parent_files = cur.files.lock();
        let mut child_files = newproc.files.lock();
        for (slot, parent_slot) in child_files.iter_mut().zip(parent_files.iter()) {
            if let Some(f) = parent_slot {
                crate::fs::vfs::file::fref(f);
                *slot = Some(f.clone());
            }
        }
    }

    // heap herdado
    *newproc.brk.lock() = *cur.brk.lock();

    // 5. clonar a thread corrente para o filho
    let newthr = kthread::kthread_clone(&curthr, &newproc);

    // 6. desfazer as traduções do pai: o próximo acesso de cada lado falta
    //    e resolve através do shadow correspondente
    cur.pagedir().pt_unmap_range(USER_PAGE_LOW, USER_PAGE_HIGH);
    arch::tlb_flush_all();

    // 7. filho entra na fila de execução
    sched::sched_make_runnable(newthr);

    log::debug!("(Fork) {} -> filho {}", cur.pid(), newproc.pid());
    Ok(newproc.pid())
}
