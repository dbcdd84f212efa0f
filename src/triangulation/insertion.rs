//! Point insertion (Bowyer-Watson) and point location.

use super::{Cell, CellId, Triangulation, Vertex, VertexId, VertexKind};
use crate::dual_geometry::other_two_indices;
use crate::error::InsertionError;
use crate::geometry::{self, InSphere, Orientation};
use crate::Real;
use fnv::{FnvHashMap, FnvHashSet};
use na::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

// Fixed so that repeated locations, and thus repeated insertions, are reproducible.
const WALK_SEED: u64 = 0x9e37_79b9;

fn position_key(p: &Point3<Real>) -> [u64; 3] {
    // `+ 0.0` folds -0.0 into 0.0.
    [p.x, p.y, p.z].map(|c| (c + 0.0).to_bits())
}

fn facet_key(vertices: &[VertexId; 4], i: usize) -> [VertexId; 3] {
    let mut key = [VertexId::INFINITE; 3];
    for (slot, k) in (0..4).filter(|k| *k != i).enumerate() {
        key[slot] = vertices[k];
    }
    key.sort_unstable();
    key
}

fn as_array(p: &Point3<Real>) -> [Real; 3] {
    [p.x, p.y, p.z]
}

impl Triangulation {
    /// Inserts a point and returns its vertex.
    ///
    /// Inserting a position that already exists returns the existing vertex unchanged.
    pub fn insert(
        &mut self,
        point: Point3<Real>,
        normal: Vector3<Real>,
        kind: VertexKind,
    ) -> Result<VertexId, InsertionError> {
        self.insert_with_hint(point, normal, kind, None)
            .map(|(v, _)| v)
    }

    /// Inserts input samples with their normals. Returns the number of new vertices.
    ///
    /// Duplicated positions and points that cannot be inserted are skipped. Points buffered
    /// while the triangulation was flat and dropped once it becomes 3D are not counted.
    pub fn insert_points(
        &mut self,
        points: impl IntoIterator<Item = (Point3<Real>, Vector3<Real>)>,
    ) -> usize {
        let before = self.number_of_vertices();

        for (point, normal) in points {
            if let Err(err) = self.insert_with_hint(point, normal, VertexKind::Input, None) {
                tracing::warn!("input point dropped: {err}");
            }
        }

        self.number_of_vertices().saturating_sub(before)
    }

    /// Inserts a point, starting the point location from `hint`.
    ///
    /// The returned flag is `false` if the position was already a vertex.
    pub(crate) fn insert_with_hint(
        &mut self,
        point: Point3<Real>,
        normal: Vector3<Real>,
        kind: VertexKind,
        hint: Option<CellId>,
    ) -> Result<(VertexId, bool), InsertionError> {
        if !point.coords.iter().all(|c| c.is_finite()) {
            return Err(InsertionError::NonFinitePoint {
                point: as_array(&point),
            });
        }

        let key = position_key(&point);
        if let Some(existing) = self.positions.get(&key) {
            return Ok((*existing, false));
        }

        self.vertices.push(Vertex::new(point, normal, kind));
        let v = VertexId(self.vertices.len() - 1);
        self.positions.insert(key, v);

        if self.dimension < 3 {
            self.grow_affine_frame(v);
            return Ok((v, true));
        }

        match self.insert_in_cells(v, hint) {
            Ok(()) => Ok((v, true)),
            Err(err) => {
                // Nothing was modified: forget the vertex.
                self.vertices.pop();
                self.positions.remove(&key);
                Err(err)
            }
        }
    }

    fn grow_affine_frame(&mut self, v: VertexId) {
        let p = self.vertices[v.0].point;
        let frame: Vec<_> = self
            .affine_frame
            .iter()
            .map(|w| self.vertices[w.0].point)
            .collect();

        let independent = match frame.len() {
            0 | 1 => true,
            2 => {
                let u = frame[1] - frame[0];
                let w = p - frame[0];
                u.cross(&w).norm() > geometry::ORIENTATION_EPSILON * u.norm() * w.norm()
            }
            _ => {
                geometry::orientation(&frame[0], &frame[1], &frame[2], &p)
                    != Orientation::Degenerate
            }
        };

        if !independent {
            return;
        }

        self.affine_frame.push(v);

        if self.affine_frame.len() < 4 {
            self.dimension = self.affine_frame.len() as i8 - 1;
        } else {
            self.build_initial_simplex();
            self.insert_pending_vertices();
        }
    }

    fn build_initial_simplex(&mut self) {
        let mut simplex = [
            self.affine_frame[0],
            self.affine_frame[1],
            self.affine_frame[2],
            self.affine_frame[3],
        ];
        let [a, b, c, d] = self.points_of(&simplex);

        if geometry::orientation(&a, &b, &c, &d) == Orientation::Negative {
            simplex.swap(2, 3);
        }

        let mut created = vec![self.allocate_cell(simplex)];

        for i in 0..4 {
            let mut vertices = simplex;
            vertices[i] = VertexId::INFINITE;
            vertices.swap((i + 1) % 4, (i + 2) % 4);
            created.push(self.allocate_cell(vertices));
        }

        let mut facets: FnvHashMap<[VertexId; 3], (CellId, usize)> = FnvHashMap::default();

        for c in &created {
            for i in 0..4 {
                let key = facet_key(&self.cells[c.0].vertices, i);
                if let Some((other, j)) = facets.remove(&key) {
                    self.cells[c.0].neighbors[i] = other;
                    self.cells[other.0].neighbors[j] = *c;
                } else {
                    facets.insert(key, (*c, i));
                }
            }
        }

        self.attach_vertices(&created);
        self.affine_frame.clear();
        self.dimension = 3;
        tracing::debug!("initial simplex built: {:?}", simplex);
    }

    fn insert_pending_vertices(&mut self) {
        let pending: Vec<_> = (1..self.vertices.len())
            .map(VertexId)
            .filter(|v| self.vertices[v.0].cell.is_none())
            .collect();

        for v in pending {
            if let Err(err) = self.insert_in_cells(v, None) {
                // The vertex stays in storage but is no longer part of the triangulation.
                let key = position_key(&self.vertices[v.0].point);
                self.positions.remove(&key);
                tracing::warn!("vertex {v:?} dropped: {err}");
            }
        }
    }

    fn allocate_cell(&mut self, vertices: [VertexId; 4]) -> CellId {
        let cell = Cell {
            vertices,
            neighbors: [CellId::INVALID; 4],
            removed: false,
        };

        if let Some(id) = self.free_cells.pop() {
            self.cells[id.0] = cell;
            id
        } else {
            self.cells.push(cell);
            CellId(self.cells.len() - 1)
        }
    }

    fn attach_vertices(&mut self, cells: &[CellId]) {
        for c in cells {
            for v in self.cells[c.0].vertices {
                self.vertices[v.0].cell = Some(*c);
            }
        }
    }

    /// Any live cell to start a walk from, preferably close to the last inserted vertex.
    fn default_walk_start(&self) -> Option<CellId> {
        self.vertices
            .iter()
            .rev()
            .filter_map(|v| v.cell)
            .find(|c| self.is_alive(*c))
            .or_else(|| self.all_cells().next())
    }

    /// Finds a cell containing `p`, walking from `hint` if it is a live cell.
    ///
    /// If `p` lies outside the convex hull, the returned cell is an infinite cell whose hull
    /// facet is visible from `p`. Returns `None` while the triangulation has no cells.
    pub fn locate(&self, p: &Point3<Real>, hint: Option<CellId>) -> Option<CellId> {
        if self.dimension < 3 {
            return None;
        }

        let mut current = hint
            .filter(|c| self.is_alive(*c))
            .or_else(|| self.default_walk_start())?;

        if let Some(k) = self.cells[current.0].index_of(VertexId::INFINITE) {
            current = self.cells[current.0].neighbors[k];
        }

        let mut previous = CellId::INVALID;
        let mut rng = StdRng::seed_from_u64(WALK_SEED);
        let max_steps = 4 * self.cells.len() + 16;

        'walk: for _ in 0..max_steps {
            if self.is_infinite_cell(current) {
                return Some(current);
            }

            let cell = &self.cells[current.0];
            let points = self.cell_points(current);
            let offset = rng.random_range(0..4usize);

            for k in 0..4 {
                let i = (offset + k) % 4;

                if cell.neighbors[i] == previous {
                    continue;
                }

                let mut sub = points;
                sub[i] = *p;

                if geometry::orientation(&sub[0], &sub[1], &sub[2], &sub[3])
                    == Orientation::Negative
                {
                    previous = current;
                    current = cell.neighbors[i];
                    continue 'walk;
                }
            }

            return Some(current);
        }

        tracing::debug!("point location walk cycled, falling back to a linear scan");
        self.locate_brute_force(p)
    }

    fn locate_brute_force(&self, p: &Point3<Real>) -> Option<CellId> {
        self.finite_cells()
            .find(|c| geometry::tetrahedron_contains(&self.cell_points(*c), p))
            .or_else(|| {
                self.all_cells()
                    .filter(|c| self.is_infinite_cell(*c))
                    .find(|c| self.in_conflict(*c, p))
            })
    }

    /// Does `p` break the empty-sphere property of `c`?
    ///
    /// For an infinite cell, the circumsphere degenerates into the open half-space beyond its
    /// hull facet, plus the circumdisk of the facet itself.
    pub(crate) fn in_conflict(&self, c: CellId, p: &Point3<Real>) -> bool {
        let cell = &self.cells[c.0];

        match cell.index_of(VertexId::INFINITE) {
            None => self.side_of_circumsphere(c, p) == InSphere::Inside,
            Some(k) => {
                let mut points = self.cell_points(c);
                points[k] = *p;

                match geometry::orientation(&points[0], &points[1], &points[2], &points[3]) {
                    Orientation::Positive => true,
                    Orientation::Negative => false,
                    Orientation::Degenerate => {
                        self.side_of_circumsphere(cell.neighbors[k], p) == InSphere::Inside
                    }
                }
            }
        }
    }

    /// Is the cell created by joining `v` to the facet `i` of the cavity cell `c` valid?
    fn is_visible_facet(&self, c: CellId, i: usize, p: &Point3<Real>) -> bool {
        let cell = &self.cells[c.0];
        let mut points = self.cell_points(c);
        points[i] = *p;

        match (0..4).find(|k| *k != i && cell.vertices[*k] == VertexId::INFINITE) {
            None => {
                geometry::orientation(&points[0], &points[1], &points[2], &points[3])
                    == Orientation::Positive
            }
            Some(k) => {
                // The new hull facet must not fold over the hull facet across the edge. Coplanar
                // hull facets are fine.
                let outside = &self.cells[cell.neighbors[i].0];
                let Some(j) = outside.index_of_neighbor(c) else {
                    return false;
                };
                points[k] = self.vertices[outside.vertices[j].0].point;
                geometry::orientation(&points[0], &points[1], &points[2], &points[3])
                    != Orientation::Positive
            }
        }
    }

    fn find_cavity(&self, start: CellId, p: &Point3<Real>) -> Result<Vec<CellId>, InsertionError> {
        let mut in_cavity = FnvHashSet::default();
        let mut cavity = vec![start];
        let mut queue = VecDeque::from([start]);
        in_cavity.insert(start);

        while let Some(c) = queue.pop_front() {
            for n in self.cells[c.0].neighbors {
                if !in_cavity.contains(&n) && self.in_conflict(n, p) {
                    in_cavity.insert(n);
                    cavity.push(n);
                    queue.push_back(n);
                }
            }
        }

        // Grow the cavity until it is star-shaped with respect to `p`.
        loop {
            let mut grown = vec![];

            for c in &cavity {
                for i in 0..4 {
                    let n = self.cells[c.0].neighbors[i];
                    if !in_cavity.contains(&n) && !self.is_visible_facet(*c, i, p) {
                        in_cavity.insert(n);
                        grown.push(n);
                    }
                }
            }

            if grown.is_empty() {
                break;
            }

            cavity.extend(grown);

            if cavity.len() == self.cells.len() - self.free_cells.len() {
                return Err(InsertionError::NonStarCavity {
                    point: as_array(p),
                });
            }
        }

        // Every vertex of the cavity must survive on its boundary.
        let mut inner = FnvHashSet::default();
        let mut boundary = FnvHashSet::default();

        for c in &cavity {
            let cell = &self.cells[c.0];
            for i in 0..4 {
                inner.insert(cell.vertices[i]);
                if !in_cavity.contains(&cell.neighbors[i]) {
                    boundary.extend((0..4).filter(|k| *k != i).map(|k| cell.vertices[k]));
                }
            }
        }

        if inner.len() != boundary.len() {
            return Err(InsertionError::NonStarCavity {
                point: as_array(p),
            });
        }

        Ok(cavity)
    }

    fn insert_in_cells(&mut self, v: VertexId, hint: Option<CellId>) -> Result<(), InsertionError> {
        let p = self.vertices[v.0].point;
        let start = self
            .locate(&p, hint)
            .ok_or(InsertionError::LocationFailed {
                point: as_array(&p),
            })?;
        let cavity = self.find_cavity(start, &p)?;
        let in_cavity: FnvHashSet<_> = cavity.iter().copied().collect();

        let mut boundary = vec![];
        for c in &cavity {
            let cell = &self.cells[c.0];
            for i in 0..4 {
                let n = cell.neighbors[i];
                if !in_cavity.contains(&n) {
                    let j = self.cells[n.0]
                        .index_of_neighbor(*c)
                        .ok_or(InsertionError::NonStarCavity {
                            point: as_array(&p),
                        })?;
                    boundary.push((*c, i, n, j));
                }
            }
        }

        // New cells are allocated before the cavity is released so no id is reused mid-update.
        let mut created = Vec::with_capacity(boundary.len());
        let mut internal: FnvHashMap<(VertexId, VertexId), (CellId, usize)> =
            FnvHashMap::default();

        for (c, i, n, j) in boundary {
            let mut vertices = self.cells[c.0].vertices;
            vertices[i] = v;
            let new = self.allocate_cell(vertices);
            self.cells[new.0].neighbors[i] = n;
            self.cells[n.0].neighbors[j] = new;

            for k in (0..4).filter(|k| *k != i) {
                let (a, b) = other_two_indices(i, k);
                let (a, b) = (vertices[a], vertices[b]);
                let key = (a.min(b), a.max(b));

                if let Some((other, l)) = internal.remove(&key) {
                    self.cells[new.0].neighbors[k] = other;
                    self.cells[other.0].neighbors[l] = new;
                } else {
                    internal.insert(key, (new, k));
                }
            }

            created.push(new);
        }

        for c in cavity {
            self.cells[c.0].removed = true;
            self.free_cells.push(c);
        }

        self.attach_vertices(&created);
        Ok(())
    }
}
