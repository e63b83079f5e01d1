//! Contexto de execução salvo de uma thread de kernel.

use super::pagetable::PageDir;
use alloc::boxed::Box;
use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// Tamanho da pilha de kernel de cada thread
pub const DEFAULT_STACK_SIZE: usize = 4 * crate::mm::PAGE_SIZE;

/// Assinatura do ponto de entrada de uma thread de kernel
pub type ContextFn = fn(usize, usize) -> i32;

/// Pilha de kernel (propriedade da thread; liberada só no reap do pai).
pub struct KStack {
    mem: Box<[u8]>,
}

impl KStack {
    pub fn alloc() -> Self {
        Self {
            mem: vec![0u8; DEFAULT_STACK_SIZE].into_boxed_slice(),
        }
    }

    /// Topo da pilha (cresce para baixo)
    pub fn top(&self) -> usize {
        self.mem.as_ptr() as usize + self.mem.len()
    }

    pub fn base(&self) -> usize {
        self.mem.as_ptr() as usize
    }
}

/// Contexto de máquina salvo: ponteiros de instrução/pilha/base mais o
/// diretório de páginas a ativar na retomada.
///
/// Num alvo real o campo `entry` vive na pilha montada por um trampolim em
/// assembly; aqui ele fica explícito para o agendador conseguir inspecioná-lo.
#[derive(Clone)]
pub struct Context {
    pub entry: Option<ContextFn>,
    pub arg1: usize,
    pub arg2: usize,
    /// Ponteiro de pilha salvo (topo da pilha de kernel na criação)
    pub sp: usize,
    pub bp: usize,
    /// Diretório de páginas ativo ao retomar esta thread
    pub pagedir: PageDir,
}

static SWITCH_COUNT: AtomicU64 = AtomicU64::new(0);

/// Monta um contexto que, ao ser ativado, executa `entry(arg1, arg2)` em modo
/// kernel sobre a pilha dada.
pub fn context_setup(
    entry: ContextFn,
    arg1: usize,
    arg2: usize,
    stack: &KStack,
    pagedir: PageDir,
) -> Context {
    Context {
        entry: Some(entry),
        arg1,
        arg2,
        sp: stack.top(),
        bp: stack.top(),
        pagedir,
    }
}

/// Troca de contexto: salva o estado corrente em `old` e retoma `new`.
///
/// No alvo real isto é assembly que só "retorna" quando `old` voltar a ser
/// agendado. Na forma hospedada a transferência de controle é fictícia; todo
/// o estado de agendamento (filas, CURRENT, estados de thread) já foi
/// atualizado pelo chamador e é ele que os testes observam.
pub fn context_switch(_old: &mut Context, new: &Context) {
    SWITCH_COUNT.fetch_add(1, Ordering::Relaxed);
    log::trace!("(Arch) context_switch: ativando pagedir {}", new.pagedir.id());
}

/// Ativa um contexto inicial sem salvar o anterior (primeira thread).
pub fn context_make_active(new: &Context) {
    SWITCH_COUNT.fetch_add(1, Ordering::Relaxed);
    log::trace!("(Arch) context_make_active: pagedir {}", new.pagedir.id());
}

/// Total de trocas de contexto desde o boot
pub fn context_switch_count() -> u64 {
    SWITCH_COUNT.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_stub(_a: usize, _b: usize) -> i32 {
        0
    }

    #[test]
    fn test_context_setup_points_at_stack_top() {
        let stack = KStack::alloc();
        let ctx = context_setup(entry_stub, 1, 2, &stack, PageDir::new());
        assert_eq!(ctx.sp, stack.top());
        assert_eq!(ctx.sp - stack.base(), DEFAULT_STACK_SIZE);
        assert_eq!(ctx.arg1, 1);
        assert_eq!(ctx.arg2, 2);
    }
}
