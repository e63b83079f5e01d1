//! Handlers de syscall de memória.

use super::abi::SyscallArgs;
use crate::mm::mmap::{do_brk, do_mmap, do_munmap};
use crate::mm::vmmap::{MapFlags, Prot};
use crate::sys::KResult;

/// mmap(addr, len, prot, flags, fd, off)
pub fn sys_mmap(args: &SyscallArgs) -> KResult<usize> {
    let prot = Prot::from_bits_truncate(args.a3 as u8);
    let flags = MapFlags::from_bits_truncate(args.a4 as u8);
    do_mmap(args.a1, args.a2, prot, flags, args.a5 as i32, args.a6)
}

/// munmap(addr, len)
pub fn sys_munmap(args: &SyscallArgs) -> KResult<usize> {
    do_munmap(args.a1, args.a2)?;
    Ok(0)
}

/// brk(addr)
pub fn sys_brk(args: &SyscallArgs) -> KResult<usize> {
    do_brk(args.a1)
}
