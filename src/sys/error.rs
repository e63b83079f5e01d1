//! Códigos de Erro do Sistema (Errno).
//!
//! Segue o padrão POSIX/Linux para facilitar compatibilidade e entendimento.
//! Internamente os erros trafegam como `KResult<T>`; a conversão para o valor
//! negativo (`isize`) acontece apenas na fronteira de syscall.

/// Resultado padrão do kernel
pub type KResult<T> = Result<T, Errno>;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EPERM = 1,         // Operation not permitted
    ENOENT = 2,        // No such file or directory
    ESRCH = 3,         // No such process
    EINTR = 4,         // Interrupted system call
    EIO = 5,           // I/O error
    ENXIO = 6,         // No such device or address
    ENOEXEC = 8,       // Exec format error
    EBADF = 9,         // Bad file number
    ECHILD = 10,       // No child processes
    EAGAIN = 11,       // Try again
    ENOMEM = 12,       // Out of memory
    EACCES = 13,       // Permission denied
    EFAULT = 14,       // Bad address
    EBUSY = 16,        // Device or resource busy
    EEXIST = 17,       // File exists
    EXDEV = 18,        // Cross-device link
    ENODEV = 19,       // No such device
    ENOTDIR = 20,      // Not a directory
    EISDIR = 21,       // Is a directory
    EINVAL = 22,       // Invalid argument
    ENFILE = 23,       // File table overflow
    EMFILE = 24,       // Too many open files
    EFBIG = 27,        // File too large
    ENOSPC = 28,       // No space left on device
    ESPIPE = 29,       // Illegal seek
    EROFS = 30,        // Read-only file system
    EMLINK = 31,       // Too many links
    ERANGE = 34,       // Math result not representable
    ENAMETOOLONG = 36, // File name too long
    ENOSYS = 38,       // Function not implemented
    ENOTEMPTY = 39,    // Directory not empty
}

impl Errno {
    /// Valor para retorno de syscall (negativo)
    pub fn as_isize(self) -> isize {
        -(self as i32) as isize
    }
}

/// Converte um `KResult` no valor bruto de retorno de syscall.
pub fn result_to_isize(res: KResult<usize>) -> isize {
    match res {
        Ok(v) => v as isize,
        Err(e) => e.as_isize(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_negative() {
        assert_eq!(Errno::ENOENT.as_isize(), -2);
        assert_eq!(Errno::ENOTEMPTY.as_isize(), -39);
    }

    #[test]
    fn test_result_to_isize() {
        assert_eq!(result_to_isize(Ok(5)), 5);
        assert_eq!(result_to_isize(Err(Errno::EBADF)), -9);
    }
}
