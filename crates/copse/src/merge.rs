//! In-order traversal across several maps at once.

use crate::map::AvlMap;

/// Visit the entries of every map in one globally key-ordered pass.
///
/// Ties across maps are visited in the order the maps were given. The
/// callback returns `false` to stop early.
pub fn merge_visit<K: Ord, V, F>(maps: &[&AvlMap<K, V>], mut f: F)
where
    F: FnMut(&K, &V) -> bool,
{
    let mut cursors: Vec<Option<u32>> = maps.iter().map(|m| m.first()).collect();

    loop {
        let mut best: Option<usize> = None;
        for (i, cur) in cursors.iter().enumerate() {
            let Some(h) = cur else { continue };
            match best {
                None => best = Some(i),
                Some(b) => {
                    let bh = cursors[b].expect("best cursor is live");
                    if maps[i].key(*h) < maps[b].key(bh) {
                        best = Some(i);
                    }
                }
            }
        }

        let Some(i) = best else { return };
        let h = cursors[i].expect("chosen cursor is live");
        if !f(maps[i].key(h), maps[i].value(h)) {
            return;
        }
        cursors[i] = maps[i].next(h);
    }
}
