//! ABI de syscall: argumentos crus e cópia de/para o usuário.

use crate::proc::curproc;
use crate::sys::{Errno, KResult};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

/// Comprimento máximo aceito para um caminho vindo do usuário
pub const PATH_MAX: usize = 1024;

/// Argumentos crus de uma syscall (valores dos registradores)
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallArgs {
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
}

/// Copia `len` bytes do espaço do usuário.
pub fn copy_from_user(uaddr: usize, len: usize) -> KResult<Vec<u8>> {
    let proc = curproc().ok_or(Errno::EFAULT)?;
    let mut buf = vec![0u8; len];
    proc.vmmap.lock().read(uaddr, &mut buf)?;
    Ok(buf)
}

/// Copia `buf` para o espaço do usuário.
pub fn copy_to_user(uaddr: usize, buf: &[u8]) -> KResult<()> {
    let proc = curproc().ok_or(Errno::EFAULT)?;
    let result = proc.vmmap.lock().write(uaddr, buf);
    result
}

/// Copia uma string NUL-terminada do usuário (até PATH_MAX bytes).
pub fn copy_str_from_user(uaddr: usize) -> KResult<String> {
    let proc = curproc().ok_or(Errno::EFAULT)?;
    let map = proc.vmmap.lock();

    let mut bytes = Vec::new();
    let mut addr = uaddr;
    loop {
        if bytes.len() >= PATH_MAX {
            return Err(Errno::ENAMETOOLONG);
        }
        let mut byte = [0u8; 1];
        map.read(addr, &mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
        addr += 1;
    }

    String::from_utf8(bytes).map_err(|_| Errno::EINVAL)
}
