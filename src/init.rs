//! Inicialização do kernel.
//!
//! Ordem de subida dos subsistemas com estado global: os caches de memória
//! (pframe, anon/shadow, vmmap) são preguiçosos e não precisam de init;
//! depois vêm processos e threads (idle + init), dispositivos de bloco e de
//! caractere, e por fim o VFS com o root fs montado. O init recebe a raiz
//! como cwd e povoa /dev via mknod.

use crate::drivers::block::{blockdev_register, RamDisk};
use crate::drivers::chardev::chardev_init;
use crate::fs::s5fs::S5fs;
use crate::fs::vfs::syscall::{do_mkdir, do_mknod};
use crate::fs::vfs::{vref, Filesystem, VnodeMode};
use crate::proc;
use crate::sys::{
    DeviceId, KResult, DISK_MAJOR, MEM_NULL_DEVID, MEM_ZERO_DEVID, TTY_MAJOR,
};
use alloc::format;
use alloc::sync::Arc;

/// Blocos do disco raiz padrão (RamDisk)
const ROOT_DISK_BLOCKS: usize = 1024;
/// Inodes do root fs recém-formatado
const ROOT_FS_INODES: u32 = 256;
/// Terminais criados em /dev
const NTERMS: u8 = 3;

/// Sobe o núcleo inteiro: processos, dispositivos, root fs e /dev.
/// Retorna o processo init, já com o cwd na raiz.
pub fn kernel_bootstrap() -> KResult<Arc<proc::Process>> {
    // processos: idle (PID 0) e init (PID 1)
    let (_idle, init) = proc::bootstrap();

    // dispositivos de caractere padrão
    chardev_init();

    // disco raiz: bloco major/minor 0, formatado se virgem
    let disk = Arc::new(RamDisk::new(ROOT_DISK_BLOCKS));
    let root_devid = DeviceId::new(DISK_MAJOR, 0);
    S5fs::format(&*disk, ROOT_FS_INODES)?;
    let bdev = blockdev_register(root_devid, disk);

    let fs = S5fs::mount(bdev)?;
    let fs_dyn: Arc<dyn Filesystem> = fs;
    crate::fs::mount_root(&fs_dyn)?;

    // cwd do init = raiz (com referência própria)
    let root = crate::fs::vfs_root().expect("raiz recém-montada");
    vref(&root);
    *init.cwd.lock() = Some(root);

    // /dev e os nós well-known
    do_mkdir("/dev")?;
    do_mknod("/dev/null", VnodeMode::Chr(MEM_NULL_DEVID))?;
    do_mknod("/dev/zero", VnodeMode::Chr(MEM_ZERO_DEVID))?;
    for i in 0..NTERMS {
        let path = format!("/dev/tty{}", i);
        do_mknod(&path, VnodeMode::Chr(DeviceId::new(TTY_MAJOR, i)))?;
    }

    log::info!("(Init) bootstrap completo");
    Ok(init)
}
