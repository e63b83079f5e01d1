//! Mapa de endereços virtuais do processo (vmmap/vmarea).
//!
//! Uma sequência ordenada de áreas virtuais, sem sobreposição, cada uma
//! ligada a exatamente um objeto de memória com um deslocamento em páginas.
//! Toda mutação preserva as duas invariantes (ordenação e disjunção);
//! operações que podem falhar não tocam a lista antes de todas as alocações
//! darem certo.

use crate::mm::mmobj::{self, MemObj};
use crate::mm::{pframe, PAGE_SIZE, USER_PAGE_HIGH, USER_PAGE_LOW};
use crate::sys::{Errno, KResult};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// Proteção de uma área
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

bitflags! {
    /// Flags de mapeamento
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u8 {
        const SHARED = 1 << 0;
        const PRIVATE = 1 << 1;
        const FIXED = 1 << 2;
        const ANON = 1 << 3;
    }
}

/// Direção da busca por espaço livre
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    /// Menor gap possível (endereços baixos primeiro)
    LoHi,
    /// Maior gap possível (endereços altos primeiro)
    HiLo,
}

/// Área de memória virtual: `[start, end)` em números de página.
#[derive(Clone)]
pub struct Vmarea {
    pub start: usize,
    pub end: usize,
    /// Deslocamento (em páginas) dentro do objeto
    pub off: usize,
    pub prot: Prot,
    pub flags: MapFlags,
    pub obj: Arc<MemObj>,
}

impl Vmarea {
    pub fn npages(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, vpn: usize) -> bool {
        vpn >= self.start && vpn < self.end
    }

    /// Página correspondente dentro do objeto
    pub fn obj_pagenum(&self, vpn: usize) -> usize {
        debug_assert!(self.contains(vpn));
        vpn - self.start + self.off
    }
}

/// Mapa de endereços de um processo.
pub struct Vmmap {
    /// Ordenado por `start`, sem sobreposições
    areas: Vec<Vmarea>,
}

impl Vmmap {
    pub fn new() -> Self {
        Self { areas: Vec::new() }
    }

    pub fn areas(&self) -> &[Vmarea] {
        &self.areas
    }

    /// Acesso mutável às áreas (religação dos objetos no fork). O chamador
    /// não pode alterar início/fim/ordem.
    pub(crate) fn areas_mut(&mut self) -> &mut [Vmarea] {
        &mut self.areas
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Insere mantendo a ordenação; sobreposição é erro de programação.
    pub fn insert(&mut self, area: Vmarea) {
        debug_assert!(area.end > area.start);
        let pos = self
            .areas
            .iter()
            .position(|a| a.start >= area.end)
            .unwrap_or(self.areas.len());
        if pos > 0 {
            debug_assert!(
                self.areas[pos - 1].end <= area.start,
                "vmmap_insert: área sobrepõe a anterior"
            );
        }
        self.areas.insert(pos, area);
    }

    /// Primeiro gap de `npages` páginas, na direção pedida (first fit).
    pub fn find_range(&self, npages: usize, dir: Dir) -> Option<usize> {
        debug_assert!(npages > 0);
        match dir {
            Dir::LoHi => {
                let mut candidate = USER_PAGE_LOW;
                for area in &self.areas {
                    if area.start >= candidate && area.start - candidate >= npages {
                        return Some(candidate);
                    }
                    if area.end > candidate {
                        candidate = area.end;
                    }
                }
                if USER_PAGE_HIGH >= candidate && USER_PAGE_HIGH - candidate >= npages {
                    Some(candidate)
                } else {
                    None
                }
            }
            Dir::HiLo => {
                let mut candidate = USER_PAGE_HIGH;
                for area in self.areas.iter().rev() {
                    if candidate >= area.end && candidate - area.end >= npages {
                        return Some(candidate - npages);
                    }
                    if area.start < candidate {
                        candidate = area.start;
                    }
                }
                if candidate >= USER_PAGE_LOW && candidate - USER_PAGE_LOW >= npages {
                    Some(candidate - npages)
                } else {
                    None
                }
            }
        }
    }

    /// Área que contém o vpn, se houver.
    pub fn lookup(&self, vpn: usize) -> Option<&Vmarea> {
        self.areas.iter().find(|a| a.contains(vpn))
    }

    /// Cópia profunda das áreas; o objeto de cada área é compartilhado, com
    /// a contagem de referências incrementada.
    pub fn clone_map(&self) -> Vmmap {
        let mut new = Vmmap::new();
        for area in &self.areas {
            mmobj::ref_obj(&area.obj);
            new.areas.push(area.clone());
        }
        new
    }

    /// Verdadeiro se `[startvfn, startvfn+npages)` não toca nenhuma área.
    pub fn is_range_empty(&self, startvfn: usize, npages: usize) -> bool {
        let hi = startvfn + npages;
        !self
            .areas
            .iter()
            .any(|a| a.start < hi && a.end > startvfn)
    }

    /// Insere um mapeamento de `npages` páginas.
    ///
    /// Com `lopage == 0` o espaço é escolhido por `find_range(dir)`; caso
    /// contrário a faixa pedida é usada, removendo qualquer mapeamento que a
    /// sobreponha — mas só depois que nada mais pode falhar. Sem arquivo (ou
    /// com ANON) o backing é um objeto anônimo; senão, o objeto do vnode.
    /// PRIVATE embrulha o objeto num shadow novo.
    ///
    /// Retorna o vpn inicial do mapeamento.
    pub fn map(
        &mut self,
        file: Option<&Arc<crate::fs::vfs::Vnode>>,
        lopage: usize,
        npages: usize,
        prot: Prot,
        flags: MapFlags,
        off_pages: usize,
        dir: Dir,
    ) -> KResult<usize> {
        debug_assert!(npages > 0);
        debug_assert!(
            flags.contains(MapFlags::SHARED) != flags.contains(MapFlags::PRIVATE),
            "exatamente um entre SHARED e PRIVATE"
        );

        let start = if lopage == 0 {
            self.find_range(npages, dir).ok_or(Errno::ENOMEM)?
        } else {
            lopage
        };
        let needs_remove = lopage != 0 && !self.is_range_empty(start, npages);

        // 1. obter o objeto de backing
        let obj = match file {
            None => MemObj::new_anon(),
            Some(_) if flags.contains(MapFlags::ANON) => MemObj::new_anon(),
            Some(vn) => crate::fs::vfs::vnode_mmap(vn)?,
        };

        // 2. PRIVATE: embrulhar num shadow (a referência do passo 1 migra
        //    para o campo shadowed)
        let obj = if flags.contains(MapFlags::PRIVATE) {
            mmobj::shadow_wrap(obj)
        } else {
            obj
        };

        // 3. daqui em diante nada falha: remover sobreposições e inserir
        if needs_remove {
            self.remove(start, npages);
        }
        self.insert(Vmarea {
            start,
            end: start + npages,
            off: off_pages,
            prot,
            flags,
            obj,
        });

        Ok(start)
    }

    /// Remove `[lopage, lopage+npages)` do mapa.
    ///
    /// Cada área afetada cai num de quatro casos:
    ///
    /// ```text
    /// caso 1:  [   ******    ]   divide em duas (ref extra no objeto)
    /// caso 2:  [      *******]** trunca o fim
    /// caso 3: *[*****        ]   avança o início (e o offset)
    /// caso 4: *[*************]** remove inteira (put no objeto)
    /// ```
    pub fn remove(&mut self, lopage: usize, npages: usize) {
        let hipage = lopage + npages;
        let mut out: Vec<Vmarea> = Vec::with_capacity(self.areas.len() + 1);

        for mut area in self.areas.drain(..) {
            // sem interseção
            if area.start >= hipage || area.end <= lopage {
                out.push(area);
                continue;
            }

            if area.start < lopage && area.end > hipage {
                // caso 1: buraco no meio; as duas metades compartilham o objeto
                let mut right = area.clone();
                mmobj::ref_obj(&right.obj);
                right.off = hipage - right.start + right.off;
                right.start = hipage;

                area.end = lopage;
                out.push(area);
                out.push(right);
            } else if area.start < lopage {
                // caso 2
                area.end = lopage;
                out.push(area);
            } else if area.end > hipage {
                // caso 3
                area.off = hipage - area.start + area.off;
                area.start = hipage;
                out.push(area);
            } else {
                // caso 4
                mmobj::put(&area.obj);
            }
        }

        self.areas = out;
    }

    /// Lê `buf.len()` bytes do espaço virtual a partir de `vaddr`.
    ///
    /// Não checa proteções: os chamadores (syscalls copiando argumentos)
    /// respondem por isso. Endereço fora de qualquer área é EFAULT.
    pub fn read(&self, vaddr: usize, buf: &mut [u8]) -> KResult<()> {
        let mut vpn = crate::mm::addr_to_pn(vaddr);
        let mut offset = crate::mm::page_offset(vaddr);
        let mut copied = 0usize;

        while copied < buf.len() {
            let area = self.lookup(vpn).ok_or(Errno::EFAULT)?;
            let pf = pframe::lookup(&area.obj, area.obj_pagenum(vpn), false)?;
            let chunk = core::cmp::min(PAGE_SIZE - offset, buf.len() - copied);
            pf.with_data(|data| {
                buf[copied..copied + chunk].copy_from_slice(&data[offset..offset + chunk]);
            });
            copied += chunk;
            offset = 0;
            vpn += 1;
        }
        Ok(())
    }

    /// Escreve `buf` no espaço virtual a partir de `vaddr`, sujando as
    /// páginas tocadas.
    pub fn write(&self, vaddr: usize, buf: &[u8]) -> KResult<()> {
        let mut vpn = crate::mm::addr_to_pn(vaddr);
        let mut offset = crate::mm::page_offset(vaddr);
        let mut copied = 0usize;

        while copied < buf.len() {
            let area = self.lookup(vpn).ok_or(Errno::EFAULT)?;
            let pf = pframe::lookup(&area.obj, area.obj_pagenum(vpn), true)?;
            let chunk = core::cmp::min(PAGE_SIZE - offset, buf.len() - copied);
            pf.with_data_mut(|data| {
                data[offset..offset + chunk].copy_from_slice(&buf[copied..copied + chunk]);
            });
            pframe::dirty(&pf)?;
            copied += chunk;
            offset = 0;
            vpn += 1;
        }
        Ok(())
    }

    /// Despejo legível dos mapeamentos (debug).
    pub fn mapping_info(&self) -> alloc::string::String {
        use core::fmt::Write;
        let mut out = alloc::string::String::new();
        let _ = writeln!(out, "{:>12} {:>4} {:>8} {:>6} {:>8}", "VFN RANGE", "PROT", "FLAGS", "OFF", "OBJ");
        for a in &self.areas {
            let _ = writeln!(
                out,
                "{:#07x}-{:#07x} {}{}{} {:>8} {:>6} {:>8}",
                a.start,
                a.end,
                if a.prot.contains(Prot::READ) { 'r' } else { '-' },
                if a.prot.contains(Prot::WRITE) { 'w' } else { '-' },
                if a.prot.contains(Prot::EXEC) { 'x' } else { '-' },
                if a.flags.contains(MapFlags::SHARED) { "SHARED" } else { "PRIVATE" },
                a.off,
                a.obj.id(),
            );
        }
        out
    }

    /// Invariantes estruturais (usada por debug_assert e testes):
    /// ordenado por início e sem sobreposições.
    pub fn check_invariants(&self) -> bool {
        self.areas
            .windows(2)
            .all(|w| w[0].start < w[0].end && w[0].end <= w[1].start)
            && self.areas.iter().all(|a| a.start < a.end)
    }
}

impl Default for Vmmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Vmmap {
    fn drop(&mut self) {
        // destruição do mapa solta a referência de cada área
        for area in self.areas.drain(..) {
            mmobj::put(&area.obj);
        }
    }
}
