use crate::error::FieldError;
use crate::geometry;
use crate::triangulation::{CellId, Triangulation};
use crate::Real;
use na::Point3;

/// Value returned by [`ImplicitField::value`] outside of the triangulated domain.
pub const FIELD_SENTINEL: Real = 1.0e38;

/// The last cell found by a field query, used as the starting point of the next one.
///
/// Each thread querying a field should own its hint.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LocateHint {
    cell: Option<CellId>,
}

impl LocateHint {
    /// The cached cell, if any.
    pub fn cell(&self) -> Option<CellId> {
        self.cell
    }
}

/// Result of a field query.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// The point lies in a finite cell and the field was interpolated there.
    Interpolated(Real),
    /// The point lies outside of the convex hull of the triangulation, or the triangulation
    /// has no cells.
    OutOfDomain,
}

impl FieldValue {
    /// The interpolated value, if any.
    pub fn value(self) -> Option<Real> {
        match self {
            FieldValue::Interpolated(val) => Some(val),
            FieldValue::OutOfDomain => None,
        }
    }
}

/// The solved implicit function: negative inside the sampled solid, positive outside.
///
/// This is a read-only view of the field values stored on the triangulation vertices.
#[derive(Copy, Clone, Debug)]
pub struct ImplicitField<'t> {
    tr: &'t Triangulation,
    sink: Point3<Real>,
}

impl<'t> ImplicitField<'t> {
    pub(crate) fn new(tr: &'t Triangulation, sink: Point3<Real>) -> Self {
        Self { tr, sink }
    }

    /// The triangulation carrying the field values.
    pub fn triangulation(&self) -> &'t Triangulation {
        self.tr
    }

    /// Interpolates the field at `p` from the values at the vertices of the cell containing it.
    ///
    /// `hint` is used as the starting point of the point location, and is updated to the cell
    /// found.
    pub fn evaluate(&self, p: &Point3<Real>, hint: &mut LocateHint) -> Result<FieldValue, FieldError> {
        let Some(cell) = self.tr.locate(p, hint.cell) else {
            return Ok(FieldValue::OutOfDomain);
        };

        hint.cell = Some(cell);

        if self.tr.is_infinite_cell(cell) {
            return Ok(FieldValue::OutOfDomain);
        }

        let coords = geometry::barycentric_coordinates(p, &self.tr.cell_points(cell))
            .map_err(|source| FieldError::DegenerateCell { cell, source })?;
        let value = self
            .tr
            .cell(cell)
            .vertices()
            .iter()
            .zip(coords.iter())
            .map(|(v, w)| self.tr.vertex(*v).f() * w)
            .sum();

        Ok(FieldValue::Interpolated(value))
    }

    /// The field value at `p`, or [`FIELD_SENTINEL`] if it cannot be interpolated there.
    pub fn value(&self, p: &Point3<Real>, hint: &mut LocateHint) -> Real {
        match self.evaluate(p, hint) {
            Ok(FieldValue::Interpolated(val)) => val,
            Ok(FieldValue::OutOfDomain) => FIELD_SENTINEL,
            Err(err) => {
                tracing::debug!("field evaluation failed: {err}");
                FIELD_SENTINEL
            }
        }
    }

    /// A vertex position where the field reaches its minimum. It lies inside the solid.
    pub fn interior_seed_point(&self) -> Point3<Real> {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::VertexKind;
    use approx::assert_relative_eq;
    use na::Vector3;

    fn linear_field() -> Triangulation {
        let mut tr = Triangulation::new();
        let points = [
            Point3::origin(),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
        ];
        for p in points {
            let v = tr.insert(p, Vector3::zeros(), VertexKind::Input).unwrap();
            tr.vertex_mut(v).set_f(p.x + 2.0 * p.y + 3.0 * p.z - 1.0);
        }
        tr
    }

    fn assert_sync<T: Sync>(_: &T) {}

    #[test]
    fn linear_functions_are_reproduced() {
        let tr = linear_field();
        let field = ImplicitField::new(&tr, Point3::origin());
        assert_sync(&field);
        let mut hint = LocateHint::default();

        for p in [
            Point3::new(0.1, 0.2, 0.3),
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(0.6, 0.3, 0.4),
        ] {
            let expected = p.x + 2.0 * p.y + 3.0 * p.z - 1.0;
            let value = field.evaluate(&p, &mut hint).unwrap().value().unwrap();
            assert_relative_eq!(value, expected, epsilon = 1.0e-12);
            assert!(hint.cell().is_some());
        }
    }

    #[test]
    fn vertices_return_their_value() {
        let tr = linear_field();
        let field = ImplicitField::new(&tr, Point3::origin());
        let mut hint = LocateHint::default();

        for v in tr.finite_vertices() {
            let vertex = tr.vertex(v);
            assert_relative_eq!(
                field.value(vertex.point(), &mut hint),
                vertex.f(),
                epsilon = 1.0e-12
            );
        }
    }

    #[test]
    fn outside_the_hull_is_out_of_domain() {
        let tr = linear_field();
        let field = ImplicitField::new(&tr, Point3::origin());
        let mut hint = LocateHint::default();
        let far = Point3::new(5.0, -3.0, 2.0);

        assert_eq!(field.evaluate(&far, &mut hint), Ok(FieldValue::OutOfDomain));
        assert_eq!(field.value(&far, &mut hint), FIELD_SENTINEL);

        // A stale hint does not change the answer.
        let inside = Point3::new(0.2, 0.2, 0.2);
        assert_relative_eq!(field.value(&inside, &mut hint), 0.2, epsilon = 1.0e-12);
    }

    #[test]
    fn empty_triangulation_is_out_of_domain() {
        let tr = Triangulation::new();
        let field = ImplicitField::new(&tr, Point3::origin());
        let mut hint = LocateHint::default();
        assert_eq!(
            field.evaluate(&Point3::origin(), &mut hint),
            Ok(FieldValue::OutOfDomain)
        );
        assert_eq!(field.value(&Point3::origin(), &mut hint), FIELD_SENTINEL);
        assert_eq!(field.interior_seed_point(), Point3::origin());
    }
}
