//! Incremental 3D Delaunay triangulation carrying the Poisson unknowns on its vertices.
//!
//! The unbounded exterior is closed with a single infinite vertex: every facet of the convex
//! hull is shared between a finite cell and an infinite cell incident to that vertex. Neighbor
//! `i` of a cell always lies across the facet opposite to its vertex `i`.

use crate::dual_geometry::other_two_indices;
use crate::error::TopologyError;
use crate::geometry::{self, InSphere, Orientation};
use crate::Real;
use fnv::{FnvHashMap, FnvHashSet};
use na::{Point3, Vector3};
use parry::bounding_volume::BoundingSphere;
use parry::shape::Tetrahedron;

mod insertion;

/// Handle of a triangulation vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub(crate) usize);

impl VertexId {
    /// The infinite vertex closing the triangulation.
    pub const INFINITE: Self = VertexId(0);
}

/// Handle of a triangulation cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub(crate) usize);

impl CellId {
    pub(crate) const INVALID: Self = CellId(usize::MAX);
}

/// Origin of a vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum VertexKind {
    /// A sample of the input point cloud.
    Input,
    /// A point inserted by the mesh refinement.
    Steiner,
}

/// A triangulation vertex and the Poisson data attached to it.
#[derive(Clone, Debug)]
pub struct Vertex {
    point: Point3<Real>,
    normal: Vector3<Real>,
    kind: VertexKind,
    f: Real,
    constraint: Option<Real>,
    index: Option<usize>,
    cell: Option<CellId>,
}

impl Vertex {
    fn new(point: Point3<Real>, normal: Vector3<Real>, kind: VertexKind) -> Self {
        Self {
            point,
            normal,
            kind,
            f: 0.0,
            constraint: None,
            index: None,
            cell: None,
        }
    }

    /// The vertex position.
    pub fn point(&self) -> &Point3<Real> {
        &self.point
    }

    /// The oriented normal. Zero for Steiner points.
    pub fn normal(&self) -> &Vector3<Real> {
        &self.normal
    }

    /// Is this an input sample or a Steiner point?
    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    /// The value of the implicit function at this vertex.
    pub fn f(&self) -> Real {
        self.f
    }

    /// Overwrites the value of the implicit function at this vertex.
    pub fn set_f(&mut self, f: Real) {
        self.f = f;
    }

    /// Is the value of this vertex fixed rather than solved for?
    pub fn is_constrained(&self) -> bool {
        self.constraint.is_some()
    }

    /// The value this vertex is pinned to, if any.
    pub fn constraint(&self) -> Option<Real> {
        self.constraint
    }

    /// Pins the value of this vertex.
    pub fn constrain(&mut self, value: Real) {
        self.constraint = Some(value);
        self.f = value;
    }

    /// Makes this vertex an unknown of the Poisson system again.
    pub fn release_constraint(&mut self) {
        self.constraint = None;
    }

    /// Row of this vertex in the linear system. Only unconstrained vertices have one.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// One cell incident to this vertex.
    pub fn incident_cell(&self) -> Option<CellId> {
        self.cell
    }
}

/// A tetrahedron of the triangulation.
#[derive(Clone, Debug)]
pub struct Cell {
    vertices: [VertexId; 4],
    neighbors: [CellId; 4],
    removed: bool,
}

impl Cell {
    /// The `i`-th vertex of this cell.
    pub fn vertex(&self, i: usize) -> VertexId {
        self.vertices[i]
    }

    /// The four vertices of this cell.
    pub fn vertices(&self) -> &[VertexId; 4] {
        &self.vertices
    }

    /// The cell across the facet opposite to the `i`-th vertex.
    pub fn neighbor(&self, i: usize) -> CellId {
        self.neighbors[i]
    }

    /// The four neighbors of this cell.
    pub fn neighbors(&self) -> &[CellId; 4] {
        &self.neighbors
    }

    /// The local index of `v` in this cell.
    pub fn index_of(&self, v: VertexId) -> Option<usize> {
        self.vertices.iter().position(|w| *w == v)
    }

    /// The local index of the facet shared with `neighbor`.
    pub fn index_of_neighbor(&self, neighbor: CellId) -> Option<usize> {
        self.neighbors.iter().position(|c| *c == neighbor)
    }

    /// Is `v` one of the vertices of this cell?
    pub fn has_vertex(&self, v: VertexId) -> bool {
        self.vertices.contains(&v)
    }
}

/// An edge, given as a cell and the local indices of its two endpoints in that cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    /// A cell incident to the edge.
    pub cell: CellId,
    /// Local index of the first endpoint.
    pub i: usize,
    /// Local index of the second endpoint.
    pub j: usize,
}

/// A 3D Delaunay triangulation of oriented points.
#[derive(Clone, Debug)]
pub struct Triangulation {
    vertices: Vec<Vertex>,
    cells: Vec<Cell>,
    free_cells: Vec<CellId>,
    dimension: i8,
    // Affinely independent vertices collected while the dimension is below 3.
    affine_frame: Vec<VertexId>,
    positions: FnvHashMap<[u64; 3], VertexId>,
}

impl Default for Triangulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Triangulation {
    /// An empty triangulation.
    pub fn new() -> Self {
        Self {
            vertices: vec![Vertex::new(
                Point3::origin(),
                Vector3::zeros(),
                VertexKind::Steiner,
            )],
            cells: vec![],
            free_cells: vec![],
            dimension: -1,
            affine_frame: vec![],
            positions: FnvHashMap::default(),
        }
    }

    /// Removes every vertex and cell.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Dimension of the affine hull of the vertices: `-1` when empty, `3` once cells exist.
    pub fn dimension(&self) -> i8 {
        self.dimension
    }

    /// The infinite vertex.
    pub fn infinite_vertex(&self) -> VertexId {
        VertexId::INFINITE
    }

    /// Number of finite vertices.
    pub fn number_of_vertices(&self) -> usize {
        self.finite_vertices().count()
    }

    /// Number of finite cells.
    pub fn number_of_cells(&self) -> usize {
        self.finite_cells().count()
    }

    /// The vertex with the given handle.
    pub fn vertex(&self, v: VertexId) -> &Vertex {
        &self.vertices[v.0]
    }

    /// Mutable access to the vertex with the given handle.
    pub fn vertex_mut(&mut self, v: VertexId) -> &mut Vertex {
        &mut self.vertices[v.0]
    }

    /// The cell with the given handle.
    pub fn cell(&self, c: CellId) -> &Cell {
        &self.cells[c.0]
    }

    /// Is `c` a live cell of this triangulation?
    pub fn is_alive(&self, c: CellId) -> bool {
        self.cells.get(c.0).map_or(false, |cell| !cell.removed)
    }

    /// Is `v` the infinite vertex?
    pub fn is_infinite_vertex(&self, v: VertexId) -> bool {
        v == VertexId::INFINITE
    }

    /// Is `c` incident to the infinite vertex?
    pub fn is_infinite_cell(&self, c: CellId) -> bool {
        self.cells[c.0].has_vertex(VertexId::INFINITE)
    }

    fn is_attached(&self, v: &Vertex) -> bool {
        self.dimension < 3 || v.cell.is_some()
    }

    /// All the finite vertices, in insertion order.
    pub fn finite_vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .skip(1)
            .filter(move |(_, v)| self.is_attached(v))
            .map(|(id, _)| VertexId(id))
    }

    /// Mutable iterator through all the finite vertices, in insertion order.
    pub fn finite_vertices_mut(&mut self) -> impl Iterator<Item = &mut Vertex> {
        let lower_dimensional = self.dimension < 3;
        self.vertices
            .iter_mut()
            .skip(1)
            .filter(move |v| lower_dimensional || v.cell.is_some())
    }

    /// All the live cells, finite and infinite.
    pub fn all_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.removed)
            .map(|(id, _)| CellId(id))
    }

    /// All the live finite cells.
    pub fn finite_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.all_cells().filter(move |c| !self.is_infinite_cell(*c))
    }

    /// Every finite edge, reported once.
    pub fn finite_edges(&self) -> Vec<Edge> {
        let mut seen = FnvHashSet::default();
        let mut edges = vec![];

        for c in self.finite_cells() {
            let cell = &self.cells[c.0];

            for i in 0..4 {
                for j in i + 1..4 {
                    let (a, b) = (cell.vertices[i], cell.vertices[j]);
                    if seen.insert((a.min(b), a.max(b))) {
                        edges.push(Edge { cell: c, i, j });
                    }
                }
            }
        }

        edges
    }

    /// The two endpoints of an edge.
    pub fn edge_vertices(&self, edge: &Edge) -> (VertexId, VertexId) {
        let cell = &self.cells[edge.cell.0];
        (cell.vertices[edge.i], cell.vertices[edge.j])
    }

    pub(crate) fn points_of(&self, vertices: &[VertexId; 4]) -> [Point3<Real>; 4] {
        vertices.map(|v| self.vertices[v.0].point)
    }

    /// The positions of the four vertices of a cell.
    ///
    /// Only meaningful for finite cells: the infinite vertex sits at the origin.
    pub fn cell_points(&self, c: CellId) -> [Point3<Real>; 4] {
        self.points_of(&self.cells[c.0].vertices)
    }

    /// The tetrahedron of a finite cell.
    pub fn tetrahedron(&self, c: CellId) -> Tetrahedron {
        geometry::tetrahedron(&self.cell_points(c))
    }

    /// Circumcenter and squared circumradius of a finite cell.
    pub fn circumsphere(&self, c: CellId) -> Option<(Point3<Real>, Real)> {
        let [a, b, c, d] = self.cell_points(c);
        let center = geometry::tetrahedron_circumcenter(&a, &b, &c, &d)?;
        Some((center, na::distance_squared(&center, &a)))
    }

    /// The Voronoi vertex dual to a finite cell, i.e., its circumcenter.
    pub fn dual(&self, c: CellId) -> Option<Point3<Real>> {
        if self.is_infinite_cell(c) {
            return None;
        }

        self.circumsphere(c).map(|(center, _)| center)
    }

    pub(crate) fn side_of_circumsphere(&self, c: CellId, p: &Point3<Real>) -> InSphere {
        match self.circumsphere(c) {
            Some((center, squared_radius)) => geometry::in_sphere(&center, squared_radius, p),
            None => InSphere::Boundary,
        }
    }

    /// All the cells incident to `v`, infinite ones included.
    pub fn incident_cells(&self, v: VertexId) -> Vec<CellId> {
        let start = match self.vertices[v.0].cell {
            Some(start) if self.dimension == 3 && self.is_alive(start) => start,
            _ => return vec![],
        };

        let mut visited = FnvHashSet::default();
        let mut result = vec![start];
        let mut stack = vec![start];
        visited.insert(start);

        while let Some(c) = stack.pop() {
            let cell = &self.cells[c.0];

            for (i, n) in cell.neighbors.iter().enumerate() {
                // Only the facets containing `v` lead to other cells of its star.
                if cell.vertices[i] != v && visited.insert(*n) {
                    result.push(*n);
                    stack.push(*n);
                }
            }
        }

        result
    }

    /// All the vertices sharing an edge with `v`, the infinite vertex included.
    ///
    /// In dimension 0, the only neighbor of the single vertex is the infinite vertex.
    pub fn incident_vertices(&self, v: VertexId) -> Vec<VertexId> {
        if self.dimension == 0 && !self.is_infinite_vertex(v) {
            return vec![VertexId::INFINITE];
        }

        let mut seen = FnvHashSet::default();
        let mut result = vec![];

        for c in self.incident_cells(v) {
            for w in self.cells[c.0].vertices {
                if w != v && seen.insert(w) {
                    result.push(w);
                }
            }
        }

        result
    }

    /// The edge joining `u` and `v`, if any.
    ///
    /// The search only depends on `u`, so querying the same ordered pair twice yields the
    /// same cell and local indices.
    pub fn is_edge(&self, u: VertexId, v: VertexId) -> Option<Edge> {
        self.incident_cells(u).into_iter().find_map(|c| {
            let cell = &self.cells[c.0];
            Some(Edge {
                cell: c,
                i: cell.index_of(u)?,
                j: cell.index_of(v)?,
            })
        })
    }

    /// The cells incident to an edge, in circular order around it.
    pub fn cells_around_edge(&self, edge: &Edge) -> Result<Vec<CellId>, TopologyError> {
        let (u, v) = self.edge_vertices(edge);
        let (k, _) = other_two_indices(edge.i, edge.j);
        let start = edge.cell;
        let mut current = start;
        // The vertex opposite to the facet crossed to reach the next cell.
        let mut pivot = self.cells[start.0].vertices[k];
        let mut result = vec![];

        loop {
            result.push(current);
            let cell = &self.cells[current.0];
            let slot = cell
                .index_of(pivot)
                .ok_or(TopologyError::BrokenAdjacency { cell: current })?;
            let next_pivot = cell
                .vertices
                .iter()
                .copied()
                .find(|w| *w != u && *w != v && *w != pivot)
                .ok_or(TopologyError::BrokenAdjacency { cell: current })?;

            current = cell.neighbors[slot];
            pivot = next_pivot;

            if current == start {
                return Ok(result);
            }

            if result.len() > self.cells.len() || !self.cells[current.0].has_vertex(u) {
                return Err(TopologyError::BrokenAdjacency { cell: current });
            }
        }
    }

    /// Some finite vertex lying on the convex hull.
    pub fn any_vertex_on_convex_hull(&self) -> Option<VertexId> {
        if self.dimension < 3 {
            return self.finite_vertices().next();
        }

        self.incident_vertices(VertexId::INFINITE)
            .into_iter()
            .find(|v| !self.is_infinite_vertex(*v))
    }

    /// Assigns dense row indices to the unconstrained vertices, in insertion order.
    ///
    /// Constrained vertices lose their index. Returns the number of indexed vertices.
    pub fn index_unconstrained_vertices(&mut self) -> usize {
        let mut count = 0;

        for v in self.finite_vertices_mut() {
            if v.is_constrained() {
                v.index = None;
            } else {
                v.index = Some(count);
                count += 1;
            }
        }

        count
    }

    /// The sphere centered at the centroid of the input samples that encloses all of them.
    pub fn input_points_bounding_sphere(&self) -> BoundingSphere {
        let points: Vec<_> = self
            .finite_vertices()
            .map(|v| &self.vertices[v.0])
            .filter(|v| v.kind == VertexKind::Input)
            .map(|v| v.point)
            .collect();

        if points.is_empty() {
            return BoundingSphere::new(Point3::origin(), 0.0);
        }

        let center = geometry::centroid(&points);
        let radius = points
            .iter()
            .map(|p| na::distance(&center, p))
            .fold(0.0, Real::max);
        BoundingSphere::new(center, radius)
    }

    /// Checks the combinatorial and geometric consistency of the triangulation.
    ///
    /// Neighbor relations must be symmetric and agree on the shared facet, finite cells must
    /// be positively oriented, infinite cells must face away from the hull, and every vertex
    /// must reference a cell containing it.
    pub fn is_valid(&self) -> bool {
        if self.dimension < 3 {
            return self.cells.iter().all(|c| c.removed);
        }

        for c in self.all_cells() {
            let cell = &self.cells[c.0];

            for (i, n) in cell.neighbors.iter().enumerate() {
                if !self.is_alive(*n) {
                    return false;
                }

                let neighbor = &self.cells[n.0];
                let Some(j) = neighbor.index_of_neighbor(c) else {
                    return false;
                };

                let mut facet: Vec<_> = (0..4).filter(|k| *k != i).map(|k| cell.vertices[k]).collect();
                let mut mirror: Vec<_> = (0..4)
                    .filter(|k| *k != j)
                    .map(|k| neighbor.vertices[k])
                    .collect();
                facet.sort();
                mirror.sort();

                if facet != mirror {
                    return false;
                }
            }

            let points = self.cell_points(c);
            let orientation = match cell.index_of(VertexId::INFINITE) {
                None => geometry::orientation(&points[0], &points[1], &points[2], &points[3]),
                Some(k) => {
                    // Replacing the infinite vertex by a point inside the hull must flip it.
                    let neighbor = &self.cells[cell.neighbors[k].0];
                    let Some(j) = neighbor.index_of_neighbor(c) else {
                        return false;
                    };
                    let mut points = points;
                    points[k] = self.vertices[neighbor.vertices[j].0].point;
                    match geometry::orientation(&points[0], &points[1], &points[2], &points[3]) {
                        Orientation::Negative => Orientation::Positive,
                        _ => Orientation::Negative,
                    }
                }
            };

            if orientation != Orientation::Positive {
                return false;
            }
        }

        self.vertices.iter().enumerate().all(|(id, v)| match v.cell {
            Some(c) => self.is_alive(c) && self.cells[c.0].has_vertex(VertexId(id)),
            None => id != 0,
        })
    }

    /// Checks the local Delaunay property: no vertex across a facet lies strictly inside the
    /// circumsphere of a finite cell.
    pub fn is_delaunay(&self) -> bool {
        self.finite_cells().all(|c| {
            let cell = &self.cells[c.0];
            cell.neighbors.iter().all(|n| {
                let neighbor = &self.cells[n.0];
                match neighbor.index_of_neighbor(c).map(|j| neighbor.vertices[j]) {
                    Some(w) if !self.is_infinite_vertex(w) => {
                        self.side_of_circumsphere(c, &self.vertices[w.0].point)
                            != InSphere::Inside
                    }
                    Some(_) => true,
                    None => false,
                }
            })
        })
    }
}
