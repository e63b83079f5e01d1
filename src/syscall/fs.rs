//! Handlers de syscall de filesystem: cópia de argumentos e delegação para
//! a família do_* do VFS.

use super::abi::{copy_from_user, copy_str_from_user, copy_to_user, SyscallArgs};
use crate::fs::vfs::syscall as vfs_sc;
use crate::fs::vfs::VnodeMode;
use crate::sys::{DeviceId, Errno, KResult, NAME_LEN};

// tipos de nó para sys_mknod
const MKNOD_CHR: usize = 1;
const MKNOD_BLK: usize = 2;

/// open(path, flags)
pub fn sys_open(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    vfs_sc::do_open(&path, args.a2 as u32)
}

/// close(fd)
pub fn sys_close(args: &SyscallArgs) -> KResult<usize> {
    vfs_sc::do_close(args.a1 as i32)?;
    Ok(0)
}

/// read(fd, buf, nbytes)
pub fn sys_read(args: &SyscallArgs) -> KResult<usize> {
    let mut buf = alloc::vec![0u8; args.a3];
    let n = vfs_sc::do_read(args.a1 as i32, &mut buf)?;
    copy_to_user(args.a2, &buf[..n])?;
    Ok(n)
}

/// write(fd, buf, nbytes)
pub fn sys_write(args: &SyscallArgs) -> KResult<usize> {
    let buf = copy_from_user(args.a2, args.a3)?;
    vfs_sc::do_write(args.a1 as i32, &buf)
}

/// lseek(fd, offset, whence)
pub fn sys_lseek(args: &SyscallArgs) -> KResult<usize> {
    vfs_sc::do_lseek(args.a1 as i32, args.a2 as isize, args.a3 as i32)
}

/// dup(fd)
pub fn sys_dup(args: &SyscallArgs) -> KResult<usize> {
    vfs_sc::do_dup(args.a1 as i32)
}

/// dup2(ofd, nfd)
pub fn sys_dup2(args: &SyscallArgs) -> KResult<usize> {
    vfs_sc::do_dup2(args.a1 as i32, args.a2 as i32)
}

/// mkdir(path)
pub fn sys_mkdir(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    vfs_sc::do_mkdir(&path)?;
    Ok(0)
}

/// rmdir(path)
pub fn sys_rmdir(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    vfs_sc::do_rmdir(&path)?;
    Ok(0)
}

/// mknod(path, tipo, devid)
pub fn sys_mknod(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    let devid = DeviceId(args.a3 as u16);
    let mode = match args.a2 {
        MKNOD_CHR => VnodeMode::Chr(devid),
        MKNOD_BLK => VnodeMode::Blk(devid),
        _ => return Err(Errno::EINVAL),
    };
    vfs_sc::do_mknod(&path, mode)?;
    Ok(0)
}

/// link(from, to)
pub fn sys_link(args: &SyscallArgs) -> KResult<usize> {
    let from = copy_str_from_user(args.a1)?;
    let to = copy_str_from_user(args.a2)?;
    vfs_sc::do_link(&from, &to)?;
    Ok(0)
}

/// unlink(path)
pub fn sys_unlink(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    vfs_sc::do_unlink(&path)?;
    Ok(0)
}

/// rename(old, new)
pub fn sys_rename(args: &SyscallArgs) -> KResult<usize> {
    let old = copy_str_from_user(args.a1)?;
    let new = copy_str_from_user(args.a2)?;
    vfs_sc::do_rename(&old, &new)?;
    Ok(0)
}

/// chdir(path)
pub fn sys_chdir(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    vfs_sc::do_chdir(&path)?;
    Ok(0)
}

/// stat(path, statbuf): seis campos de 32 bits em LE
/// (ino, modo, nlink, size, blksize, blocks).
pub fn sys_stat(args: &SyscallArgs) -> KResult<usize> {
    let path = copy_str_from_user(args.a1)?;
    let st = vfs_sc::do_stat(&path)?;

    let mode_raw: u32 = match st.mode {
        VnodeMode::Regular => 1,
        VnodeMode::Directory => 2,
        VnodeMode::Chr(_) => 3,
        VnodeMode::Blk(_) => 4,
    };

    let mut buf = [0u8; 24];
    for (i, v) in [
        st.ino,
        mode_raw,
        st.nlink,
        st.size as u32,
        st.blksize as u32,
        st.blocks as u32,
    ]
    .iter()
    .enumerate()
    {
        buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
    copy_to_user(args.a2, &buf)?;
    Ok(0)
}

/// getdent(fd, dirent_buf): inode (4 bytes) + nome NUL-terminado.
/// Retorna o tamanho da entrada, ou 0 no fim do diretório.
pub fn sys_getdent(args: &SyscallArgs) -> KResult<usize> {
    match vfs_sc::do_getdent(args.a1 as i32)? {
        Some(d) => {
            let mut buf = [0u8; 4 + NAME_LEN];
            buf[0..4].copy_from_slice(&d.ino.to_le_bytes());
            let n = core::cmp::min(d.name.len(), NAME_LEN - 1);
            buf[4..4 + n].copy_from_slice(&d.name.as_bytes()[..n]);
            copy_to_user(args.a2, &buf)?;
            Ok(buf.len())
        }
        None => Ok(0),
    }
}
