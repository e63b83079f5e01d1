//! Operações de arquivo do nível VFS (a família do_*).
//!
//! Cada operação valida fd e modo, segura o file com `fget`, delega à
//! operação do vnode/filesystem e solta com `fput`. Nenhum caminho de
//! retorno pode vazar referência — todo erro passa pelo fput/vput
//! correspondente antes de subir.

use crate::drivers::chardev::chardev_lookup;
use crate::fs::vfs::file::{
    fget, fput, get_empty_fd, File, FileMode, O_APPEND, O_CREAT, O_RDONLY, O_RDWR, O_WRONLY,
    SEEK_CUR, SEEK_END, SEEK_SET,
};
use crate::fs::vfs::path::{dir_namev, lookup, open_namev};
use crate::fs::vfs::{vput, Dirent, Stat, Vnode, VnodeMode};
use crate::mm::{pframe, PAGE_SIZE};
use crate::proc::curproc;
use crate::sys::{Errno, KResult};
use alloc::sync::Arc;

fn cur() -> KResult<Arc<crate::proc::Process>> {
    curproc().ok_or(Errno::EFAULT)
}

/// open(2). Retorna o novo fd.
pub fn do_open(pathname: &str, oflags: u32) -> KResult<usize> {
    // validar flags: modo 0..2 e apenas bits conhecidos
    let rw = oflags & 0x3;
    if rw == 3 || oflags & !(0x3 | O_CREAT | O_APPEND) != 0 {
        return Err(Errno::EINVAL);
    }

    let proc = cur()?;
    let fd = get_empty_fd(&proc)?;

    let mut mode = match rw {
        O_RDONLY => FileMode::READ,
        O_WRONLY => FileMode::WRITE,
        O_RDWR => FileMode::READ | FileMode::WRITE,
        _ => unreachable!(),
    };
    if oflags & O_APPEND != 0 {
        mode |= FileMode::APPEND;
    }

    let vn = open_namev(pathname, oflags & O_CREAT != 0, None)?;

    // diretório só abre para leitura
    if vn.mode().is_dir() && mode.contains(FileMode::WRITE) {
        vput(vn);
        return Err(Errno::EISDIR);
    }

    // dispositivo precisa existir
    match vn.mode() {
        VnodeMode::Chr(id) => {
            if chardev_lookup(id).is_none() {
                vput(vn);
                return Err(Errno::ENXIO);
            }
        }
        VnodeMode::Blk(id) => {
            if crate::drivers::block::blockdev_lookup(id).is_none() {
                vput(vn);
                return Err(Errno::ENXIO);
            }
        }
        _ => {}
    }

    let f = File::new(vn, mode);
    proc.files.lock()[fd] = Some(f);
    Ok(fd)
}

/// close(2).
pub fn do_close(fd: i32) -> KResult<()> {
    let proc = cur()?;
    if fd < 0 || fd as usize >= crate::sys::NFILES {
        return Err(Errno::EBADF);
    }
    let f = proc.files.lock()[fd as usize].take().ok_or(Errno::EBADF)?;
    fput(f);
    Ok(())
}

/// Leitura/escrita crua de um dispositivo de bloco, através do cache de
/// páginas do próprio dispositivo.
fn blockdev_read(id: crate::sys::DeviceId, off: usize, buf: &mut [u8]) -> KResult<usize> {
    let bdev = crate::drivers::block::blockdev_lookup(id).ok_or(Errno::ENXIO)?;
    let size = bdev.dev.blocks() * PAGE_SIZE;
    if off >= size {
        return Ok(0);
    }
    let len = core::cmp::min(buf.len(), size - off);

    let mut done = 0;
    while done < len {
        let pos = off + done;
        let pf = pframe::get(&bdev.obj, pos / PAGE_SIZE)?;
        let poff = pos % PAGE_SIZE;
        let chunk = core::cmp::min(PAGE_SIZE - poff, len - done);
        pf.with_data(|data| buf[done..done + chunk].copy_from_slice(&data[poff..poff + chunk]));
        done += chunk;
    }
    Ok(len)
}

fn blockdev_write(id: crate::sys::DeviceId, off: usize, buf: &[u8]) -> KResult<usize> {
    let bdev = crate::drivers::block::blockdev_lookup(id).ok_or(Errno::ENXIO)?;
    let size = bdev.dev.blocks() * PAGE_SIZE;
    if off + buf.len() > size {
        return Err(Errno::ENOSPC);
    }

    let mut done = 0;
    while done < buf.len() {
        let pos = off + done;
        let pf = pframe::get(&bdev.obj, pos / PAGE_SIZE)?;
        let poff = pos % PAGE_SIZE;
        let chunk = core::cmp::min(PAGE_SIZE - poff, buf.len() - done);
        pf.with_data_mut(|data| data[poff..poff + chunk].copy_from_slice(&buf[done..done + chunk]));
        pframe::dirty(&pf)?;
        done += chunk;
    }
    Ok(buf.len())
}

/// read(2).
pub fn do_read(fd: i32, buf: &mut [u8]) -> KResult<usize> {
    let proc = cur()?;
    let f = fget(&proc, fd).ok_or(Errno::EBADF)?;

    if !f.mode().contains(FileMode::READ) {
        fput(f);
        return Err(Errno::EBADF);
    }
    if f.vnode().mode().is_dir() {
        fput(f);
        return Err(Errno::EISDIR);
    }

    let res = match f.vnode().mode() {
        VnodeMode::Regular => f.vnode().fs().read(f.vnode(), f.pos(), buf),
        VnodeMode::Chr(id) => match chardev_lookup(id) {
            Some(dev) => dev.read(f.pos(), buf),
            None => Err(Errno::ENXIO),
        },
        VnodeMode::Blk(id) => blockdev_read(id, f.pos(), buf),
        VnodeMode::Directory => unreachable!(),
    };

    if let Ok(n) = res {
        f.advance(n);
    }
    fput(f);
    res
}

/// write(2). Com O_APPEND a posição salta para o fim antes de escrever.
pub fn do_write(fd: i32, buf: &[u8]) -> KResult<usize> {
    let proc = cur()?;
    let f = fget(&proc, fd).ok_or(Errno::EBADF)?;

    if !f.mode().contains(FileMode::WRITE) {
        fput(f);
        return Err(Errno::EBADF);
    }
    if f.vnode().mode().is_dir() {
        fput(f);
        return Err(Errno::EISDIR);
    }

    if f.mode().contains(FileMode::APPEND) {
        f.set_pos(f.vnode().len());
    }

    let res = match f.vnode().mode() {
        VnodeMode::Regular => f.vnode().fs().write(f.vnode(), f.pos(), buf),
        VnodeMode::Chr(id) => match chardev_lookup(id) {
            Some(dev) => dev.write(f.pos(), buf),
            None => Err(Errno::ENXIO),
        },
        VnodeMode::Blk(id) => blockdev_write(id, f.pos(), buf),
        VnodeMode::Directory => unreachable!(),
    };

    if let Ok(n) = res {
        f.advance(n);
    }
    fput(f);
    res
}

/// dup(2): novo fd apontando para o mesmo file.
pub fn do_dup(fd: i32) -> KResult<usize> {
    let proc = cur()?;
    let f = fget(&proc, fd).ok_or(Errno::EBADF)?;

    let newfd = match get_empty_fd(&proc) {
        Ok(fd) => fd,
        Err(e) => {
            fput(f);
            return Err(e);
        }
    };

    proc.files.lock()[newfd] = Some(f);
    Ok(newfd)
}

/// dup2(2): como dup, mas no fd pedido (fechando o que estiver lá).
pub fn do_dup2(ofd: i32, nfd: i32) -> KResult<usize> {
    let proc = cur()?;
    let f = fget(&proc, ofd).ok_or(Errno::EBADF)?;

    if nfd < 0 || nfd as usize >= crate::sys::NFILES {
        fput(f);
        return Err(Errno::EBADF);
    }

    if ofd == nfd {
        fput(f);
        return Ok(nfd as usize);
    }

    let old = proc.files.lock()[nfd as usize].replace(f);
    if let Some(old) = old {
        fput(old);
    }
    Ok(nfd as usize)
}

/// mknod(2): só arquivos especiais de dispositivo.
pub fn do_mknod(pathname: &str, mode: VnodeMode) -> KResult<()> {
    if !matches!(mode, VnodeMode::Chr(_) | VnodeMode::Blk(_)) {
        return Err(Errno::EINVAL);
    }

    let (dir, name) = dir_namev(pathname, None)?;

    match lookup(&dir, &name) {
        Ok(existing) => {
            vput(existing);
            vput(dir);
            return Err(Errno::EEXIST);
        }
        Err(Errno::ENOENT) => {}
        Err(e) => {
            vput(dir);
            return Err(e);
        }
    }

    let res = dir.fs().mknod(&dir, &name, mode);
    vput(dir);
    res
}

/// mkdir(2).
pub fn do_mkdir(pathname: &str) -> KResult<()> {
    let (dir, name) = dir_namev(pathname, None)?;

    match lookup(&dir, &name) {
        Ok(existing) => {
            vput(existing);
            vput(dir);
            return Err(Errno::EEXIST);
        }
        Err(Errno::ENOENT) => {}
        Err(e) => {
            vput(dir);
            return Err(e);
        }
    }

    let res = dir.fs().mkdir(&dir, &name);
    vput(dir);
    res
}

/// rmdir(2). "." final é EINVAL; ".." final é ENOTEMPTY.
pub fn do_rmdir(pathname: &str) -> KResult<()> {
    let (dir, name) = dir_namev(pathname, None)?;

    if !dir.mode().is_dir() {
        vput(dir);
        return Err(Errno::ENOTDIR);
    }
    if name == "." {
        vput(dir);
        return Err(Errno::EINVAL);
    }
    if name == ".." {
        vput(dir);
        return Err(Errno::ENOTEMPTY);
    }

    let res = dir.fs().rmdir(&dir, &name);
    vput(dir);
    res
}

/// unlink(2). Diretórios não: EISDIR.
pub fn do_unlink(pathname: &str) -> KResult<()> {
    let (dir, name) = dir_namev(pathname, None)?;

    match lookup(&dir, &name) {
        Ok(vn) => {
            let is_dir = vn.mode().is_dir();
            vput(vn);
            if is_dir {
                vput(dir);
                return Err(Errno::EISDIR);
            }
        }
        Err(e) => {
            vput(dir);
            return Err(e);
        }
    }

    let res = dir.fs().unlink(&dir, &name);
    vput(dir);
    res
}

/// link(2): cria `to` apontando para o mesmo inode de `from`.
pub fn do_link(from: &str, to: &str) -> KResult<()> {
    let from_vn = open_namev(from, false, None)?;

    if from_vn.mode().is_dir() {
        vput(from_vn);
        return Err(Errno::EPERM);
    }

    let (todir, name) = match dir_namev(to, None) {
        Ok(r) => r,
        Err(e) => {
            vput(from_vn);
            return Err(e);
        }
    };

    // sem links cruzando filesystems
    if !Arc::ptr_eq(from_vn.fs(), todir.fs()) {
        vput(from_vn);
        vput(todir);
        return Err(Errno::EXDEV);
    }

    match lookup(&todir, &name) {
        Ok(existing) => {
            vput(existing);
            vput(from_vn);
            vput(todir);
            return Err(Errno::EEXIST);
        }
        Err(Errno::ENOENT) => {}
        Err(e) => {
            vput(from_vn);
            vput(todir);
            return Err(e);
        }
    }

    let res = todir.fs().link(&from_vn, &todir, &name);
    vput(from_vn);
    vput(todir);
    res
}

/// rename(2) = link + unlink (não atômico).
pub fn do_rename(oldname: &str, newname: &str) -> KResult<()> {
    do_link(oldname, newname)?;
    do_unlink(oldname)
}

/// chdir(2).
pub fn do_chdir(pathname: &str) -> KResult<()> {
    let new_cwd = open_namev(pathname, false, None)?;

    if !new_cwd.mode().is_dir() {
        vput(new_cwd);
        return Err(Errno::ENOTDIR);
    }

    let proc = cur()?;
    let old = proc.cwd.lock().replace(new_cwd);
    if let Some(old) = old {
        vput(old);
    }
    Ok(())
}

/// lseek(2). Retorna a nova posição.
pub fn do_lseek(fd: i32, offset: isize, whence: i32) -> KResult<usize> {
    let proc = cur()?;
    let f = fget(&proc, fd).ok_or(Errno::EBADF)?;

    let base = match whence {
        SEEK_SET => 0,
        SEEK_CUR => f.pos() as isize,
        SEEK_END => f.vnode().len() as isize,
        _ => {
            fput(f);
            return Err(Errno::EINVAL);
        }
    };

    let newpos = base + offset;
    if newpos < 0 {
        fput(f);
        return Err(Errno::EINVAL);
    }

    f.set_pos(newpos as usize);
    fput(f);
    Ok(newpos as usize)
}

/// stat(2).
pub fn do_stat(pathname: &str) -> KResult<Stat> {
    let vn = open_namev(pathname, false, None)?;
    let res = vn.fs().stat(&vn);
    vput(vn);
    res
}

/// getdent(2): próxima entrada do diretório, ou None no fim.
pub fn do_getdent(fd: i32) -> KResult<Option<Dirent>> {
    let proc = cur()?;
    let f = fget(&proc, fd).ok_or(Errno::EBADF)?;

    if !f.vnode().mode().is_dir() {
        fput(f);
        return Err(Errno::ENOTDIR);
    }

    let res = f.vnode().fs().readdir(f.vnode(), f.pos());
    let out = match res {
        Ok(Some((dirent, consumed))) => {
            f.advance(consumed);
            Ok(Some(dirent))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(e),
    };

    fput(f);
    out
}

/// Leitura a partir de um vnode sem passar por fd (carregadores internos).
pub fn vn_read(vn: &Arc<Vnode>, off: usize, buf: &mut [u8]) -> KResult<usize> {
    match vn.mode() {
        VnodeMode::Regular => vn.fs().read(vn, off, buf),
        VnodeMode::Directory => Err(Errno::EISDIR),
        VnodeMode::Chr(id) => match chardev_lookup(id) {
            Some(dev) => dev.read(off, buf),
            None => Err(Errno::ENXIO),
        },
        VnodeMode::Blk(id) => blockdev_read(id, off, buf),
    }
}
