//! Resolução de caminhos.

use crate::fs::vfs::{vput, vref, Vnode};
use crate::sys::{Errno, KResult, NAME_LEN};
use alloc::string::String;
use alloc::sync::Arc;

/// Iterador sobre componentes de caminho (ignora barras repetidas)
pub struct PathComponents<'a> {
    remaining: &'a str,
}

impl<'a> PathComponents<'a> {
    pub fn new(path: &'a str) -> Self {
        Self {
            remaining: path.trim_start_matches('/'),
        }
    }
}

impl<'a> Iterator for PathComponents<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        match self.remaining.find('/') {
            Some(pos) => {
                let component = &self.remaining[..pos];
                self.remaining = self.remaining[pos + 1..].trim_start_matches('/');
                Some(component)
            }
            None => {
                let component = self.remaining;
                self.remaining = "";
                Some(component)
            }
        }
    }
}

/// Procura `name` dentro do diretório `dir` via operação do filesystem.
/// Devolve o vnode com a contagem incrementada.
pub fn lookup(dir: &Arc<Vnode>, name: &str) -> KResult<Arc<Vnode>> {
    if !dir.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    dir.fs().lookup(dir, name)
}

/// Resolve o caminho até o diretório pai do último componente.
///
/// Caminho absoluto parte da raiz; relativo parte de `base` (ou do cwd do
/// processo corrente). Devolve `(pai, nome_final)` com a contagem do pai
/// incrementada. Caminho vazio é EINVAL; componente maior que o limite é
/// ENAMETOOLONG. O caminho "/" resolve para `(raiz, ".")`.
pub fn dir_namev(pathname: &str, base: Option<&Arc<Vnode>>) -> KResult<(Arc<Vnode>, String)> {
    if pathname.is_empty() {
        return Err(Errno::EINVAL);
    }

    let cur = if pathname.starts_with('/') {
        crate::fs::vfs_root().ok_or(Errno::ENOENT)?
    } else {
        match base {
            Some(b) => b.clone(),
            None => {
                let proc = crate::proc::curproc().ok_or(Errno::ENOENT)?;
                let cwd = proc.cwd.lock().clone();
                cwd.ok_or(Errno::ENOENT)?
            }
        }
    };
    vref(&cur);
    let mut cur = cur;

    let mut components = PathComponents::new(pathname).peekable();

    let last: &str = loop {
        let comp = match components.next() {
            Some(c) => c,
            // só barras: o pai é o próprio diretório inicial
            None => break ".",
        };

        if comp.len() >= NAME_LEN {
            vput(cur);
            return Err(Errno::ENAMETOOLONG);
        }

        if components.peek().is_none() {
            break comp;
        }

        // componente intermediário: desce um nível
        match lookup(&cur, comp) {
            Ok(next) => {
                vput(cur);
                cur = next;
            }
            Err(e) => {
                vput(cur);
                return Err(e);
            }
        }
    };

    Ok((cur, String::from(last)))
}

/// Resolve o caminho inteiro. Se o componente final não existir e `creat`
/// estiver ligado, pede ao diretório pai para criá-lo; senão propaga o erro.
/// Devolve o vnode com a contagem incrementada.
pub fn open_namev(
    pathname: &str,
    creat: bool,
    base: Option<&Arc<Vnode>>,
) -> KResult<Arc<Vnode>> {
    let (dir, name) = dir_namev(pathname, base)?;

    if !dir.mode().is_dir() {
        vput(dir);
        return Err(Errno::ENOTDIR);
    }

    let res = match lookup(&dir, &name) {
        Ok(vn) => Ok(vn),
        Err(Errno::ENOENT) if creat => dir.fs().create(&dir, &name),
        Err(e) => Err(e),
    };

    vput(dir);
    res
}

/// Nome de `entry` dentro do diretório `dir` (suporte a getcwd).
pub fn lookup_name(dir: &Arc<Vnode>, entry: &Arc<Vnode>) -> KResult<String> {
    let mut off = 0;
    while let Some((d, consumed)) = dir.fs().readdir(dir, off)? {
        if d.ino == entry.vno() && d.name != "." && d.name != ".." {
            return Ok(d.name);
        }
        off += consumed;
    }
    Err(Errno::ENOENT)
}

/// Caminho absoluto de um diretório, subindo por ".." até a raiz.
/// Diretórios têm um único link, então a resposta é única.
pub fn lookup_dirpath(dir: &Arc<Vnode>) -> KResult<String> {
    let mut names: alloc::vec::Vec<String> = alloc::vec::Vec::new();

    vref(dir);
    let mut cur = dir.clone();
    loop {
        let parent = match lookup(&cur, "..") {
            Ok(p) => p,
            Err(e) => {
                vput(cur);
                return Err(e);
            }
        };
        // a raiz é o ponto fixo de ".."
        if parent.vno() == cur.vno() {
            vput(parent);
            vput(cur);
            break;
        }
        match lookup_name(&parent, &cur) {
            Ok(name) => names.push(name),
            Err(e) => {
                vput(parent);
                vput(cur);
                return Err(e);
            }
        }
        vput(cur);
        cur = parent;
    }

    if names.is_empty() {
        return Ok(String::from("/"));
    }
    let mut path = String::new();
    for name in names.iter().rev() {
        path.push('/');
        path.push_str(name);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_components() {
        let comps: alloc::vec::Vec<&str> = PathComponents::new("/usr//bin/ls").collect();
        assert_eq!(comps, ["usr", "bin", "ls"]);

        let comps: alloc::vec::Vec<&str> = PathComponents::new("a/b").collect();
        assert_eq!(comps, ["a", "b"]);

        assert_eq!(PathComponents::new("/").count(), 0);
        assert_eq!(PathComponents::new("").count(), 0);
    }
}
