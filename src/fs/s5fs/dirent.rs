//! Dirents: structs de tamanho fixo, empacotadas contiguamente no arquivo
//! do diretório. Remoção troca a vítima pela última entrada e encolhe o
//! arquivo em uma dirent, mantendo o array denso.

use super::{S5fs, S5_DIRENT_SIZE, S5_NAME_LEN};
use crate::fs::vfs::Vnode;
use crate::sys::{Errno, KResult};
use alloc::string::String;
use alloc::sync::Arc;

/// Codifica uma dirent (inode + nome com NUL-padding).
pub fn encode_dirent(ino: u32, name: &str) -> [u8; S5_DIRENT_SIZE] {
    debug_assert!(name.len() < S5_NAME_LEN);
    let mut buf = [0u8; S5_DIRENT_SIZE];
    buf[0..4].copy_from_slice(&ino.to_le_bytes());
    buf[4..4 + name.len()].copy_from_slice(name.as_bytes());
    buf
}

/// Decodifica uma dirent.
pub fn decode_dirent(buf: &[u8]) -> (u32, String) {
    debug_assert!(buf.len() >= S5_DIRENT_SIZE);
    let ino = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let name_bytes = &buf[4..4 + S5_NAME_LEN];
    let end = name_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(S5_NAME_LEN);
    let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
    (ino, name)
}

impl S5fs {
    /// Varredura linear do diretório pelo nome. ENOENT se não existir.
    pub(super) fn find_dirent(&self, dir: &Arc<Vnode>, name: &str) -> KResult<u32> {
        debug_assert!(dir.mode().is_dir());
        debug_assert_eq!(dir.len() % S5_DIRENT_SIZE, 0);

        if name.is_empty() || name.len() >= S5_NAME_LEN {
            return Err(Errno::ENAMETOOLONG);
        }

        let mut buf = [0u8; S5_DIRENT_SIZE];
        let mut off = 0;
        while off < dir.len() {
            let n = self.read_file(dir, off, &mut buf)?;
            debug_assert_eq!(n, S5_DIRENT_SIZE);
            let (ino, entry_name) = decode_dirent(&buf);
            if entry_name == name {
                return Ok(ino);
            }
            off += S5_DIRENT_SIZE;
        }
        Err(Errno::ENOENT)
    }

    /// Acrescenta a dirent `name -> target` no fim do diretório e
    /// incrementa o linkcount do alvo — exceto para ".", por convenção.
    pub(super) fn link_dirent(&self, dir: &Arc<Vnode>, name: &str, target: u32) -> KResult<()> {
        if name.is_empty() || name.len() >= S5_NAME_LEN {
            return Err(Errno::ENAMETOOLONG);
        }

        match self.find_dirent(dir, name) {
            Ok(_) => return Err(Errno::EEXIST),
            Err(Errno::ENOENT) => {}
            Err(e) => return Err(e),
        }

        let entry = encode_dirent(target, name);
        let n = self.write_file(dir, dir.len(), &entry)?;
        if n != S5_DIRENT_SIZE {
            return Err(Errno::ENOSPC);
        }

        if name != "." {
            let mut inode = self.read_inode(target)?;
            inode.linkcount += 1;
            self.write_inode(&inode)?;
        }
        Ok(())
    }

    /// Remove a dirent `name`: a última entrada é movida para o buraco, o
    /// diretório encolhe uma dirent e o linkcount do alvo cai.
    pub(super) fn remove_dirent(&self, dir: &Arc<Vnode>, name: &str) -> KResult<()> {
        debug_assert!(dir.mode().is_dir());

        // localizar a vítima
        let mut buf = [0u8; S5_DIRENT_SIZE];
        let mut victim_off = None;
        let mut victim_ino = 0u32;
        let mut off = 0;
        while off < dir.len() {
            let n = self.read_file(dir, off, &mut buf)?;
            debug_assert_eq!(n, S5_DIRENT_SIZE);
            let (ino, entry_name) = decode_dirent(&buf);
            if entry_name == name {
                victim_off = Some(off);
                victim_ino = ino;
                break;
            }
            off += S5_DIRENT_SIZE;
        }
        let victim_off = victim_off.ok_or(Errno::ENOENT)?;

        // mover a última dirent para o lugar da vítima
        let last_off = dir.len() - S5_DIRENT_SIZE;
        if victim_off != last_off {
            let mut last = [0u8; S5_DIRENT_SIZE];
            let n = self.read_file(dir, last_off, &mut last)?;
            debug_assert_eq!(n, S5_DIRENT_SIZE);
            self.write_file(dir, victim_off, &last)?;
        }

        // encolher o diretório em uma dirent (inode e vnode juntos)
        let mut dir_inode = self.read_inode(dir.vno())?;
        dir_inode.size -= S5_DIRENT_SIZE as u32;
        self.write_inode(&dir_inode)?;
        vn_shrink(dir, S5_DIRENT_SIZE);

        // o alvo perde um link. Linkcount zero aqui significa que também não
        // há vnode vivo (um vnode em uso segura um link): o inode morre já.
        let mut inode = self.read_inode(victim_ino)?;
        debug_assert!(inode.linkcount > 0);
        inode.linkcount -= 1;
        self.write_inode(&inode)?;
        if inode.linkcount == 0 {
            self.free_inode(victim_ino)?;
        }

        Ok(())
    }
}

fn vn_shrink(vn: &Arc<Vnode>, by: usize) {
    let len = vn.len();
    debug_assert!(len >= by);
    vn.set_len(len - by);
}
