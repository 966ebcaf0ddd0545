//! Point-region quadtree over a 2D embedding, used to approximate t-SNE
//! repulsive forces (Barnes–Hut).
//!
//! Nodes live in one arena; an internal node's four children are stored
//! consecutively. Every node keeps the point count and center of mass of
//! its cell. Identical points share a leaf.

#[derive(Debug, Clone)]
struct Node {
    center: [f64; 2],
    half: f64,
    com: [f64; 2],
    count: usize,
    /// Arena index of the first of four children.
    children: Option<usize>,
}

impl Node {
    fn empty(center: [f64; 2], half: f64) -> Self {
        Self {
            center,
            half,
            com: [0.0; 2],
            count: 0,
            children: None,
        }
    }

    fn quadrant(&self, p: [f64; 2]) -> usize {
        (p[0] >= self.center[0]) as usize + 2 * (p[1] >= self.center[1]) as usize
    }

    fn add_mass(&mut self, p: [f64; 2]) {
        let c = self.count as f64;
        self.com = [
            (self.com[0] * c + p[0]) / (c + 1.0),
            (self.com[1] * c + p[1]) / (c + 1.0),
        ];
        self.count += 1;
    }
}

#[derive(Debug, Clone)]
pub struct QuadTree {
    nodes: Vec<Node>,
    /// Cells narrower than this are not split further.
    min_half: f64,
}

impl QuadTree {
    pub fn build(points: &[[f64; 2]]) -> Self {
        let (mut min, mut max) = ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]);
        for p in points {
            for d in 0..2 {
                min[d] = min[d].min(p[d]);
                max[d] = max[d].max(p[d]);
            }
        }
        if points.is_empty() {
            (min, max) = ([0.0; 2], [0.0; 2]);
        }
        let center = [(min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0];
        let half = ((max[0] - min[0]).max(max[1] - min[1]) / 2.0).max(1e-9) * (1.0 + 1e-6);

        let mut tree = Self {
            nodes: Vec::with_capacity(points.len() * 2 + 1),
            min_half: half * f64::EPSILON,
        };
        tree.nodes.push(Node::empty(center, half));
        for &p in points {
            tree.insert(p);
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.nodes[0].count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, p: [f64; 2]) {
        let mut idx = 0;
        loop {
            if let Some(first) = self.nodes[idx].children {
                self.nodes[idx].add_mass(p);
                idx = first + self.nodes[idx].quadrant(p);
                continue;
            }

            let node = &mut self.nodes[idx];
            if node.count == 0 {
                node.com = p;
                node.count = 1;
                return;
            }
            if node.com == p {
                node.count += 1;
                return;
            }
            if node.half < self.min_half {
                node.add_mass(p);
                return;
            }

            let (resident, resident_count) = (node.com, node.count);
            let first = self.subdivide(idx);
            let child = first + self.nodes[idx].quadrant(resident);
            self.nodes[child].com = resident;
            self.nodes[child].count = resident_count;
            // The resident mass is already counted in this node.
            self.nodes[idx].add_mass(p);
            idx = first + self.nodes[idx].quadrant(p);
        }
    }

    fn subdivide(&mut self, idx: usize) -> usize {
        let first = self.nodes.len();
        let Node { center, half, .. } = self.nodes[idx];
        let q = half / 2.0;
        for quadrant in 0..4 {
            let dx = if quadrant & 1 == 1 { q } else { -q };
            let dy = if quadrant & 2 == 2 { q } else { -q };
            self.nodes
                .push(Node::empty([center[0] + dx, center[1] + dy], q));
        }
        self.nodes[idx].children = Some(first);
        first
    }

    /// Unnormalized repulsion on `point` from every other inserted point:
    /// returns `(sum w^2 (point - y_j), sum w)` with `w = 1 / (1 + |point - y_j|^2)`.
    ///
    /// A cell is summarized by its center of mass once
    /// `cell width / distance < angle`; `angle = 0` is exact. `point` must
    /// be one of the inserted points.
    pub fn repulsion(&self, point: [f64; 2], angle: f64) -> ([f64; 2], f64) {
        let mut force = [0.0; 2];
        let mut sum_q = 0.0;
        let mut stack = vec![0usize];
        let angle2 = angle * angle;

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.count == 0 {
                continue;
            }
            let dx = point[0] - node.com[0];
            let dy = point[1] - node.com[1];
            let d2 = dx * dx + dy * dy;
            let width = 2.0 * node.half;

            match node.children {
                Some(first) if width * width >= angle2 * d2 => {
                    stack.extend(first..first + 4);
                }
                _ => {
                    let mut count = node.count as f64;
                    if node.children.is_none() && d2 == 0.0 {
                        // Leaf holding `point` itself.
                        count -= 1.0;
                    }
                    let w = 1.0 / (1.0 + d2);
                    sum_q += count * w;
                    force[0] += count * w * w * dx;
                    force[1] += count * w * w * dy;
                }
            }
        }
        (force, sum_q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute(points: &[[f64; 2]], i: usize) -> ([f64; 2], f64) {
        let mut force = [0.0; 2];
        let mut sum_q = 0.0;
        for (j, p) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            let dx = points[i][0] - p[0];
            let dy = points[i][1] - p[1];
            let w = 1.0 / (1.0 + dx * dx + dy * dy);
            sum_q += w;
            force[0] += w * w * dx;
            force[1] += w * w * dy;
        }
        (force, sum_q)
    }

    fn scattered() -> Vec<[f64; 2]> {
        (0..60)
            .map(|i| {
                let t = i as f64 * 0.7;
                [t.sin() * (1.0 + i as f64 * 0.1), t.cos() * 3.0 + (i % 5) as f64]
            })
            .collect()
    }

    #[test]
    fn counts_every_point() {
        let pts = scattered();
        assert_eq!(QuadTree::build(&pts).len(), 60);
        assert!(QuadTree::build(&[]).is_empty());
    }

    #[test]
    fn zero_angle_is_exact() {
        let pts = scattered();
        let tree = QuadTree::build(&pts);
        for i in [0, 17, 59] {
            let (f, q) = tree.repulsion(pts[i], 0.0);
            let (bf, bq) = brute(&pts, i);
            assert!((q - bq).abs() < 1e-9, "{q} vs {bq}");
            assert!((f[0] - bf[0]).abs() < 1e-9);
            assert!((f[1] - bf[1]).abs() < 1e-9);
        }
    }

    #[test]
    fn approximation_is_close() {
        let pts = scattered();
        let tree = QuadTree::build(&pts);
        let (_, q) = tree.repulsion(pts[3], 0.5);
        let (_, bq) = brute(&pts, 3);
        assert!((q - bq).abs() / bq < 0.05);
    }

    #[test]
    fn duplicate_points_share_a_leaf() {
        let pts = vec![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [4.0, 5.0]];
        let tree = QuadTree::build(&pts);
        assert_eq!(tree.len(), 4);
        let (f, q) = tree.repulsion(pts[0], 0.0);
        let (bf, bq) = brute(&pts, 0);
        assert!((q - bq).abs() < 1e-12);
        assert!((f[0] - bf[0]).abs() < 1e-12);
    }

    #[test]
    fn all_points_identical() {
        let pts = vec![[2.0, -1.0]; 5];
        let tree = QuadTree::build(&pts);
        let (f, q) = tree.repulsion(pts[0], 0.5);
        assert_eq!(q, 4.0);
        assert_eq!(f, [0.0, 0.0]);
    }
}
