use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use tet_poisson::{
    ConjugateGradientSolver, LocateHint, PoissonParameters, PoissonReconstruction,
    ReconstructionError, Triangulation, VertexKind, FIELD_SENTINEL,
};

type Real = f64;

// Fibonacci samples of the unit sphere, with outward normals. A nonzero `jitter` moves them
// radially so that no five of them are cospherical.
fn fibonacci_sphere(n: usize, jitter: Real) -> (Vec<Point3<Real>>, Vec<Vector3<Real>>) {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    let mut points = Vec::with_capacity(n);
    let mut normals = Vec::with_capacity(n);

    for k in 0..n {
        let z = 1.0 - 2.0 * (k as Real + 0.5) / n as Real;
        let r = (1.0 - z * z).sqrt();
        let theta = golden_angle * k as Real;
        let dir = Vector3::new(r * theta.cos(), r * theta.sin(), z);
        let radius = 1.0 + jitter * (k as Real).sin();
        points.push(Point3::from(dir * radius));
        normals.push(dir);
    }

    (points, normals)
}

fn sphere_samples(n: usize) -> (Vec<Point3<Real>>, Vec<Vector3<Real>>) {
    fibonacci_sphere(n, 0.01)
}

fn parameters() -> PoissonParameters {
    PoissonParameters {
        cell_radius_ratio: 0.3,
        ..PoissonParameters::default()
    }
}

fn directions() -> Vec<Vector3<Real>> {
    vec![
        Vector3::x(),
        -Vector3::x(),
        Vector3::y(),
        -Vector3::y(),
        Vector3::z(),
        -Vector3::z(),
        Vector3::new(1.0, 1.0, 1.0).normalize(),
        Vector3::new(-1.0, 0.5, -0.3).normalize(),
    ]
}

#[test]
fn sphere_inside_is_negative_and_outside_is_positive() {
    let (points, normals) = sphere_samples(200);
    let mut tr = Triangulation::new();
    let mut recon =
        PoissonReconstruction::from_points_and_normals(&mut tr, &points, &normals, parameters());
    recon.compute_implicit_function().unwrap();
    assert!(recon.is_ready());

    let field = recon.implicit_field().unwrap();
    let mut hint = LocateHint::default();

    assert!(field.value(&Point3::origin(), &mut hint) < 0.0);

    for dir in directions() {
        let inside = Point3::from(dir * 0.4);
        let outside = Point3::from(dir * 1.4);
        assert!(field.value(&inside, &mut hint) < 0.0, "{inside} should be inside");
        assert!(field.value(&outside, &mut hint) > 0.0, "{outside} should be outside");
    }

    let far = Point3::new(10.0, -10.0, 10.0);
    assert_eq!(field.value(&far, &mut hint), FIELD_SENTINEL);
}

#[test]
fn unrefined_sphere_has_the_right_sign() {
    let (points, normals) = fibonacci_sphere(200, 0.0);
    let mut tr = Triangulation::new();
    let mut recon = PoissonReconstruction::from_points_and_normals(
        &mut tr,
        &points,
        &normals,
        PoissonParameters::without_refinement(),
    );
    recon.compute_implicit_function().unwrap();

    // The enclosing corners are the only Steiner points.
    let tr = recon.triangulation();
    let steiner = tr
        .finite_vertices()
        .filter(|v| tr.vertex(*v).kind() == VertexKind::Steiner)
        .count();
    assert_eq!(steiner, 8);

    let field = recon.implicit_field().unwrap();
    let mut hint = LocateHint::default();
    assert!(field.value(&Point3::origin(), &mut hint) < 0.0);

    for dir in directions() {
        let outside = Point3::from(dir * 1.25);
        assert!(field.value(&outside, &mut hint) > 0.0, "{outside} should be outside");
    }
}

#[test]
fn samples_lie_close_to_the_zero_level_set() {
    let (points, normals) = sphere_samples(200);
    let mut tr = Triangulation::new();
    let mut recon = PoissonReconstruction::from_points_and_normals(
        &mut tr,
        &points,
        &normals,
        PoissonParameters::default(),
    );
    recon.compute_implicit_function().unwrap();

    let field = recon.implicit_field().unwrap();
    let mut hint = LocateHint::default();
    let depth = field.value(&Point3::origin(), &mut hint).abs();
    assert!(depth > 0.0);

    let largest = points
        .iter()
        .map(|p| field.value(p, &mut hint).abs())
        .fold(0.0, Real::max);
    assert!(largest < 0.25 * depth, "{largest} vs {depth}");
}

#[test]
fn sphere_field_invariants() {
    let (points, normals) = sphere_samples(150);
    let mut tr = Triangulation::new();
    let mut recon =
        PoissonReconstruction::from_points_and_normals(&mut tr, &points, &normals, parameters());
    recon.compute_implicit_function().unwrap();

    // The samples sit on the zero level set up to the discretization error: their median is zero.
    assert_relative_eq!(recon.median_value_at_input_vertices(), 0.0, epsilon = 1.0e-9);

    let tr = recon.triangulation();
    assert!(tr.is_valid());
    assert!(tr.number_of_vertices() > points.len() + 8);
    assert!(tr
        .finite_vertices()
        .any(|v| tr.vertex(v).kind() == VertexKind::Steiner
            && tr.vertex(v).point().coords.norm() < 0.7));

    // Row indices are dense over the unconstrained vertices.
    let mut indices: Vec<_> = tr
        .finite_vertices()
        .filter_map(|v| tr.vertex(v).index())
        .collect();
    indices.sort_unstable();
    assert!(indices.iter().copied().eq(0..indices.len()));
    let pinned = tr
        .finite_vertices()
        .filter(|v| tr.vertex(*v).is_constrained())
        .count();
    assert_eq!(pinned, 1);
    assert_eq!(indices.len() + pinned, tr.number_of_vertices());

    let hull = tr.any_vertex_on_convex_hull().unwrap();
    assert!(tr.vertex(hull).f() >= 0.0);

    let field = recon.implicit_field().unwrap();
    let min = tr
        .finite_vertices()
        .map(|v| tr.vertex(v).f())
        .fold(Real::MAX, Real::min);
    assert!(min < 0.0);
    let mut hint = LocateHint::default();
    let seed = field.interior_seed_point();
    assert!(seed.coords.norm() < 1.2);
    assert_relative_eq!(field.value(&seed, &mut hint), min, epsilon = 1.0e-9);
}

#[test]
fn recomputing_gives_the_same_field() {
    let (points, normals) = sphere_samples(120);
    let mut tr = Triangulation::new();
    let mut recon =
        PoissonReconstruction::from_points_and_normals(&mut tr, &points, &normals, parameters());
    recon.compute_implicit_function().unwrap();

    let values = |tr: &Triangulation| -> Vec<Real> {
        tr.finite_vertices().map(|v| tr.vertex(v).f()).collect()
    };
    let first = values(recon.triangulation());
    let vertices = recon.triangulation().number_of_vertices();

    recon.compute_implicit_function().unwrap();
    assert_eq!(recon.triangulation().number_of_vertices(), vertices);
    assert_eq!(values(recon.triangulation()), first);
}

#[test]
fn conjugate_gradient_agrees_with_cholesky() {
    let (points, normals) = sphere_samples(120);

    let mut tr_direct = Triangulation::new();
    let mut direct = PoissonReconstruction::from_points_and_normals(
        &mut tr_direct,
        &points,
        &normals,
        parameters(),
    );
    direct.compute_implicit_function().unwrap();

    let mut tr_iterative = Triangulation::new();
    let mut iterative = PoissonReconstruction::from_points_and_normals(
        &mut tr_iterative,
        &points,
        &normals,
        parameters(),
    );
    iterative
        .compute_implicit_function_with_solver(&mut ConjugateGradientSolver::new(50_000, 1.0e-9))
        .unwrap();

    let direct_field = direct.implicit_field().unwrap();
    let iterative_field = iterative.implicit_field().unwrap();
    let scale = direct_field
        .value(&Point3::origin(), &mut LocateHint::default())
        .abs();

    for p in [
        Point3::origin(),
        Point3::new(0.3, -0.2, 0.1),
        Point3::new(1.3, 0.0, 0.0),
    ] {
        let a = direct_field.value(&p, &mut LocateHint::default());
        let b = iterative_field.value(&p, &mut LocateHint::default());
        assert_relative_eq!(a, b, epsilon = 1.0e-3 * scale);
    }
}

#[test]
fn flat_inputs_are_rejected() {
    let collinear: Vec<_> = (0..5).map(|i| Point3::new(i as Real, 0.0, 0.0)).collect();
    let normals = vec![Vector3::y(); 5];
    let mut tr = Triangulation::new();
    let mut recon = PoissonReconstruction::from_points_and_normals(
        &mut tr,
        &collinear,
        &normals,
        PoissonParameters::default(),
    );
    assert_eq!(
        recon.compute_implicit_function(),
        Err(ReconstructionError::DegenerateInput { dimension: 1 })
    );

    let mut tr = Triangulation::new();
    let mut recon = PoissonReconstruction::new(&mut tr, PoissonParameters::default());
    assert_eq!(
        recon.compute_implicit_function(),
        Err(ReconstructionError::DegenerateInput { dimension: -1 })
    );
}
