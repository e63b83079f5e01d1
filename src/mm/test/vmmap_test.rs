//! Testes do vmmap: ordenação/disjunção, busca de espaço e os quatro casos
//! de remoção.

use crate::mm::mmobj::MemObj;
use crate::mm::vmmap::{Dir, MapFlags, Prot, Vmarea, Vmmap};
use crate::mm::{USER_PAGE_HIGH, USER_PAGE_LOW};

fn anon_area(start: usize, end: usize) -> Vmarea {
    Vmarea {
        start,
        end,
        off: 0,
        prot: Prot::READ | Prot::WRITE,
        flags: MapFlags::PRIVATE,
        obj: MemObj::new_anon(),
    }
}

#[test]
fn test_insert_keeps_sorted_disjoint() {
    let mut map = Vmmap::new();
    map.insert(anon_area(USER_PAGE_LOW + 10, USER_PAGE_LOW + 20));
    map.insert(anon_area(USER_PAGE_LOW, USER_PAGE_LOW + 5));
    map.insert(anon_area(USER_PAGE_LOW + 30, USER_PAGE_LOW + 40));

    assert!(map.check_invariants());
    let starts: alloc::vec::Vec<usize> = map.areas().iter().map(|a| a.start).collect();
    assert_eq!(
        starts,
        [USER_PAGE_LOW, USER_PAGE_LOW + 10, USER_PAGE_LOW + 30]
    );
}

#[test]
fn test_lookup() {
    let mut map = Vmmap::new();
    map.insert(anon_area(USER_PAGE_LOW + 4, USER_PAGE_LOW + 7));

    assert!(map.lookup(USER_PAGE_LOW + 4).is_some());
    assert!(map.lookup(USER_PAGE_LOW + 6).is_some());
    assert!(map.lookup(USER_PAGE_LOW + 7).is_none());
    assert!(map.lookup(USER_PAGE_LOW).is_none());
}

#[test]
fn test_find_range_lohi() {
    let mut map = Vmmap::new();
    // mapa vazio: começa no piso do espaço de usuário
    assert_eq!(map.find_range(4, Dir::LoHi), Some(USER_PAGE_LOW));

    map.insert(anon_area(USER_PAGE_LOW, USER_PAGE_LOW + 4));
    map.insert(anon_area(USER_PAGE_LOW + 6, USER_PAGE_LOW + 10));

    // gap de 2 páginas entre as áreas serve para 2, não para 3
    assert_eq!(map.find_range(2, Dir::LoHi), Some(USER_PAGE_LOW + 4));
    assert_eq!(map.find_range(3, Dir::LoHi), Some(USER_PAGE_LOW + 10));
}

#[test]
fn test_find_range_hilo() {
    let mut map = Vmmap::new();
    assert_eq!(map.find_range(4, Dir::HiLo), Some(USER_PAGE_HIGH - 4));

    map.insert(anon_area(USER_PAGE_HIGH - 4, USER_PAGE_HIGH));
    // o gap mais alto agora termina no início da área
    assert_eq!(map.find_range(2, Dir::HiLo), Some(USER_PAGE_HIGH - 6));
}

#[test]
fn test_find_range_exhausted() {
    let mut map = Vmmap::new();
    map.insert(anon_area(USER_PAGE_LOW, USER_PAGE_HIGH));
    assert_eq!(map.find_range(1, Dir::LoHi), None);
    assert_eq!(map.find_range(1, Dir::HiLo), None);
}

#[test]
fn test_remove_case_full_cover() {
    let mut map = Vmmap::new();
    let area = anon_area(USER_PAGE_LOW + 2, USER_PAGE_LOW + 6);
    let obj = area.obj.clone();
    let rc_before = obj.refcount();
    map.insert(area);

    map.remove(USER_PAGE_LOW, 10);
    assert!(map.is_empty());
    // a referência da área caiu
    assert_eq!(obj.refcount(), rc_before - 1);
}

#[test]
fn test_remove_case_split() {
    let mut map = Vmmap::new();
    let area = anon_area(USER_PAGE_LOW, USER_PAGE_LOW + 10);
    let obj = area.obj.clone();
    map.insert(area);

    // buraco no meio: [0,3) e [7,10) sobram
    map.remove(USER_PAGE_LOW + 3, 4);
    assert!(map.check_invariants());
    assert_eq!(map.areas().len(), 2);

    let left = &map.areas()[0];
    let right = &map.areas()[1];
    assert_eq!((left.start, left.end), (USER_PAGE_LOW, USER_PAGE_LOW + 3));
    assert_eq!(
        (right.start, right.end),
        (USER_PAGE_LOW + 7, USER_PAGE_LOW + 10)
    );
    // o pedaço da direita mantém o offset correspondente
    assert_eq!(right.off, 7);
    // as duas metades compartilham o objeto, com uma referência a mais
    assert_eq!(obj.refcount(), 2);
}

#[test]
fn test_remove_case_truncate_ends() {
    let mut map = Vmmap::new();
    map.insert(anon_area(USER_PAGE_LOW, USER_PAGE_LOW + 10));

    // caso 2: recorta o fim
    map.remove(USER_PAGE_LOW + 8, 4);
    assert_eq!(map.areas()[0].end, USER_PAGE_LOW + 8);

    // caso 3: recorta o início (offset avança)
    map.remove(USER_PAGE_LOW, 2);
    let a = &map.areas()[0];
    assert_eq!(a.start, USER_PAGE_LOW + 2);
    assert_eq!(a.off, 2);
    assert!(map.check_invariants());
}

#[test]
fn test_is_range_empty() {
    let mut map = Vmmap::new();
    map.insert(anon_area(USER_PAGE_LOW + 4, USER_PAGE_LOW + 8));

    assert!(map.is_range_empty(USER_PAGE_LOW, 4));
    assert!(map.is_range_empty(USER_PAGE_LOW + 8, 4));
    assert!(!map.is_range_empty(USER_PAGE_LOW + 7, 1));
    assert!(!map.is_range_empty(USER_PAGE_LOW, 5));
}

#[test]
fn test_map_private_wraps_shadow() {
    let mut map = Vmmap::new();
    let start = map
        .map(
            None,
            0,
            4,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE,
            0,
            Dir::LoHi,
        )
        .unwrap();

    let area = map.lookup(start).unwrap();
    assert!(area.obj.is_shadow());
}

#[test]
fn test_map_shared_anon_plain() {
    let mut map = Vmmap::new();
    let start = map
        .map(None, 0, 4, Prot::READ, MapFlags::SHARED, 0, Dir::LoHi)
        .unwrap();
    assert!(!map.lookup(start).unwrap().obj.is_shadow());
}

#[test]
fn test_map_fixed_replaces_overlap() {
    let mut map = Vmmap::new();
    let lo = USER_PAGE_LOW + 16;
    map.map(None, lo, 8, Prot::READ, MapFlags::SHARED, 0, Dir::LoHi)
        .unwrap();
    // segundo mapeamento sobre a mesma faixa remove o anterior
    map.map(
        None,
        lo + 4,
        8,
        Prot::READ | Prot::WRITE,
        MapFlags::SHARED,
        0,
        Dir::LoHi,
    )
    .unwrap();

    assert!(map.check_invariants());
    assert_eq!(map.lookup(lo).unwrap().end, lo + 4);
    assert!(map.lookup(lo + 4).unwrap().prot.contains(Prot::WRITE));
}

#[test]
fn test_clone_map_shares_objects() {
    let mut map = Vmmap::new();
    let start = map
        .map(None, 0, 2, Prot::READ, MapFlags::SHARED, 0, Dir::LoHi)
        .unwrap();
    let obj = map.lookup(start).unwrap().obj.clone();
    let rc = obj.refcount();

    let clone = map.clone_map();
    assert_eq!(clone.areas().len(), 1);
    assert!(alloc::sync::Arc::ptr_eq(
        &clone.lookup(start).unwrap().obj,
        &obj
    ));
    assert_eq!(obj.refcount(), rc + 1);

    drop(clone);
    assert_eq!(obj.refcount(), rc);
}
