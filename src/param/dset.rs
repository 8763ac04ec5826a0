//! Disjoint-set structures.
//!
//! Two union-find flavors back the pipeline: a plain one over vertices
//! ([`DisjointTree`]) and one over faces that carries a quarter-turn
//! rotation on every link ([`DisjointOrientTree`]), composed by addition
//! mod 4 along the find path. A third, the edge parent forest used during
//! collapse, lives with the repair engine and reuses [`parent_of`] /
//! [`orient_of`].

/// Plain union-find with path compression and compact re-indexing.
#[derive(Debug, Clone, Default)]
pub struct DisjointTree {
    parent: Vec<usize>,
    indices: Vec<usize>,
    compact_num: usize,
}

impl DisjointTree {
    /// Create a forest of `n` singletons.
    pub fn new(n: usize) -> Self {
        DisjointTree {
            parent: (0..n).collect(),
            indices: Vec::new(),
            compact_num: 0,
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// True if the forest is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Root of `x`'s class, with path compression.
    pub fn parent(&mut self, x: usize) -> usize {
        if self.parent[x] == x {
            return x;
        }
        let root = self.parent(self.parent[x]);
        self.parent[x] = root;
        root
    }

    /// Union the classes of `a` and `b` (smaller root survives).
    pub fn merge(&mut self, a: usize, b: usize) {
        let ra = self.parent(a);
        let rb = self.parent(b);
        if ra == rb {
            return;
        }
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi] = lo;
    }

    /// Union `a`'s class into `b`'s: `b`'s root survives unconditionally.
    pub fn merge_from_to(&mut self, a: usize, b: usize) {
        let ra = self.parent(a);
        let rb = self.parent(b);
        if ra == rb {
            return;
        }
        self.parent[ra] = rb;
    }

    /// Assign dense ids `0..compact_num` to the class roots.
    pub fn build_compact_parent(&mut self) {
        let n = self.len();
        let mut indices = vec![usize::MAX; n];
        let mut next = 0;
        for i in 0..n {
            let r = self.parent(i);
            if indices[r] == usize::MAX {
                indices[r] = next;
                next += 1;
            }
        }
        self.indices = indices;
        self.compact_num = next;
    }

    /// Dense id of `x`'s class. Requires [`build_compact_parent`] first.
    ///
    /// [`build_compact_parent`]: DisjointTree::build_compact_parent
    pub fn index(&mut self, x: usize) -> usize {
        let r = self.parent(x);
        self.indices[r]
    }

    /// Number of classes after [`build_compact_parent`].
    ///
    /// [`build_compact_parent`]: DisjointTree::build_compact_parent
    #[inline]
    pub fn compact_num(&self) -> usize {
        self.compact_num
    }
}

/// Union-find over faces with a quarter-turn rotation per link.
///
/// `orient(f)` is the rotation carried from `f` up to its class root;
/// [`merge`](DisjointOrientTree::merge) records a relative rotation
/// between the two classes so that orientation relations are preserved
/// transitively.
#[derive(Debug, Clone, Default)]
pub struct DisjointOrientTree {
    /// `(parent, rotation to parent)` per element.
    parent: Vec<(usize, i32)>,
}

impl DisjointOrientTree {
    /// Create a forest of `n` singletons with zero rotation.
    pub fn new(n: usize) -> Self {
        DisjointOrientTree {
            parent: (0..n).map(|i| (i, 0)).collect(),
        }
    }

    /// Root of `x`'s class, compressing the path and folding rotations.
    pub fn parent(&mut self, x: usize) -> usize {
        parent_of(&mut self.parent, x)
    }

    /// Accumulated rotation from `x` to its class root.
    pub fn orient(&mut self, x: usize) -> i32 {
        orient_of(&mut self.parent, x)
    }

    /// Union the classes of `x` and `y` so that afterwards
    /// `orient(x) - orient(y) == orient_x - orient_y (mod 4)`.
    pub fn merge(&mut self, x: usize, y: usize, orient_x: i32, orient_y: i32) {
        let rx = self.parent(x);
        let ry = self.parent(y);
        if rx == ry {
            return;
        }
        let wx = self.orient(x);
        let wy = self.orient(y);
        let label = (orient_x - orient_y - wx + wy).rem_euclid(4);
        self.parent[rx] = (ry, label);
    }
}

/// Root of `x` in a `(parent, rotation)` forest, with path compression.
///
/// Rotations along the compressed path are folded into the direct link.
pub fn parent_of(forest: &mut [(usize, i32)], x: usize) -> usize {
    if forest[x].0 == x {
        return x;
    }
    let p = forest[x].0;
    let root = parent_of(forest, p);
    forest[x].1 = (forest[x].1 + forest[p].1) % 4;
    forest[x].0 = root;
    root
}

/// Accumulated rotation from `x` to its root in a `(parent, rotation)` forest.
pub fn orient_of(forest: &mut [(usize, i32)], x: usize) -> i32 {
    if forest[x].0 == x {
        return forest[x].1;
    }
    let p = forest[x].0;
    (forest[x].1 + orient_of(forest, p)) % 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_compact() {
        let mut tree = DisjointTree::new(6);
        tree.merge(0, 1);
        tree.merge(2, 3);
        tree.merge(1, 3);
        tree.build_compact_parent();
        assert_eq!(tree.compact_num(), 3);
        assert_eq!(tree.index(0), tree.index(2));
        assert_ne!(tree.index(0), tree.index(4));
        assert_ne!(tree.index(4), tree.index(5));
    }

    #[test]
    fn test_merge_from_to_keeps_target() {
        let mut tree = DisjointTree::new(4);
        tree.merge_from_to(3, 1);
        assert_eq!(tree.parent(3), 1);
        tree.merge_from_to(1, 0);
        assert_eq!(tree.parent(3), 0);
    }

    #[test]
    fn test_orient_relation_preserved() {
        let mut tree = DisjointOrientTree::new(4);
        // orient(0) - orient(1) == 1
        tree.merge(0, 1, 1, 0);
        let d01 = (tree.orient(0) - tree.orient(1)).rem_euclid(4);
        assert_eq!(d01, 1);
        // orient(1) - orient(2) == 3
        tree.merge(1, 2, 3, 0);
        let d01 = (tree.orient(0) - tree.orient(1)).rem_euclid(4);
        let d12 = (tree.orient(1) - tree.orient(2)).rem_euclid(4);
        assert_eq!(d01, 1);
        assert_eq!(d12, 3);
        // Transitively: orient(0) - orient(2) == 4 == 0
        assert_eq!((tree.orient(0) - tree.orient(2)).rem_euclid(4), 0);
    }

    #[test]
    fn test_orient_merge_idempotent() {
        let mut tree = DisjointOrientTree::new(3);
        tree.merge(0, 1, 2, 1);
        let before = (tree.orient(0), tree.orient(1));
        tree.merge(0, 1, 2, 1);
        assert_eq!(before, (tree.orient(0), tree.orient(1)));
    }

    #[test]
    fn test_parent_forest_rotation_fold() {
        // Chain 2 -> 1 -> 0 with rotations 1 and 3: total 0 mod 4.
        let mut forest = vec![(0usize, 0i32), (0, 3), (1, 1)];
        assert_eq!(parent_of(&mut forest, 2), 0);
        assert_eq!(orient_of(&mut forest, 2), 0);
        assert_eq!(orient_of(&mut forest, 1), 3);
    }
}
