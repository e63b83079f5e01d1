//! # Tratador de Page Fault
//!
//! Todas as faltas de página de usuário entram por aqui. O caminho feliz:
//! achar a vmarea, validar permissões, pedir a página ao objeto da área
//! (`lookuppage` resolve o COW de shadows de forma transparente), sujar se
//! for escrita e instalar o mapeamento no diretório de páginas. Falta sem
//! área ou sem permissão mata o processo com EFAULT.

use crate::arch::PtFlags;
use crate::mm::vmmap::Prot;
use crate::mm::{addr_to_pn, pframe};
use crate::proc;
use crate::sys::Errno;
use bitflags::bitflags;

bitflags! {
    /// Bits de causa da falta (vindos do hardware)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCause: u32 {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const USER = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResult {
    Success,
    /// Endereço fora de qualquer vmarea
    NoMapping,
    /// A área existe mas não permite o acesso
    ProtectionViolation,
    OutOfMemory,
}

/// Resolve uma falta de página. Retorna o veredito sem matar o processo
/// (isso é papel de `pagefault_entry`).
pub fn handle_pagefault(vaddr: usize, cause: FaultCause) -> FaultResult {
    let vpn = addr_to_pn(vaddr);

    let cur = match proc::curproc() {
        Some(p) => p,
        None => {
            log::error!("(Fault) falta de página sem processo corrente");
            return FaultResult::NoMapping;
        }
    };

    // 1. procurar a vmarea
    let area = match cur.vmmap.lock().lookup(vpn) {
        Some(a) => a.clone(),
        None => {
            log::debug!("(Fault) sem vmarea para vaddr {:#x}", vaddr);
            return FaultResult::NoMapping;
        }
    };

    // 2. validar permissões
    let forwrite = cause.contains(FaultCause::WRITE);
    if forwrite && !area.prot.contains(Prot::WRITE) {
        return FaultResult::ProtectionViolation;
    }
    if cause.contains(FaultCause::EXEC) && !area.prot.contains(Prot::EXEC) {
        return FaultResult::ProtectionViolation;
    }
    if !area.prot.contains(Prot::READ) && !forwrite {
        return FaultResult::ProtectionViolation;
    }

    // 3+4. página dentro do objeto (o shadow resolve o COW aqui)
    let pagenum = area.obj_pagenum(vpn);
    let pf = match pframe::lookup(&area.obj, pagenum, forwrite) {
        Ok(pf) => pf,
        Err(e) => {
            log::error!("(Fault) lookuppage falhou: {:?}", e);
            return FaultResult::OutOfMemory;
        }
    };

    // 5. escrita suja a página (pode alocar backing esparso)
    if forwrite {
        if let Err(e) = pframe::dirty(&pf) {
            log::error!("(Fault) dirtypage falhou: {:?}", e);
            return FaultResult::OutOfMemory;
        }
    }

    // 6. instalar o mapeamento
    let mut flags = PtFlags::PRESENT | PtFlags::USER;
    if area.prot.contains(Prot::WRITE) {
        flags |= PtFlags::WRITABLE;
    }
    if area.prot.contains(Prot::EXEC) {
        flags |= PtFlags::EXECUTABLE;
    }
    cur.pagedir().pt_map(vpn, pf.paddr(), flags);

    FaultResult::Success
}

/// Entrada chamada pelo trap: uma falta não resolvível encerra o processo
/// com status EFAULT (o kernel continua).
pub fn pagefault_entry(vaddr: usize, cause: FaultCause) {
    match handle_pagefault(vaddr, cause) {
        FaultResult::Success => {}
        res => {
            log::error!(
                "(Fault) falta fatal em {:#x} ({:?}): matando processo",
                vaddr,
                res
            );
            proc::do_exit(Errno::EFAULT as i32);
        }
    }
}
