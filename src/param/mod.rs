//! Integer-constrained parameterization and quad extraction.
//!
//! This is the core of the remesher: given the optimized cross and
//! position fields, it lifts per-edge translation jumps onto an integer
//! lattice, resolves global compatibility, collapses zero-length edges,
//! repairs flipped cells, and reads off a pure-quad mesh.
//!
//! The pipeline is a sequence of free functions over one explicit
//! [`Parametrizer`] state record:
//!
//! 1. [`sing::compute_orientation_singularities`] /
//!    [`sing::compute_position_singularities`]
//! 2. [`edges::build_edge_info`]
//! 3. [`constraints::build_integer_constraints`]
//! 4. [`flow::compute_max_flow`]
//! 5. [`repair::fix_flip_advance`]
//! 6. [`extract::compute_positions`] + [`extract::extract_quad_mesh`]
//! 7. [`holes::fix_holes`]
//!
//! Phase ordering is mandatory; each function documents the state it
//! consumes and produces. [`Parametrizer::compute_index_map`] runs the
//! whole sequence.

pub mod constraints;
mod dedge;
mod dset;
pub mod edges;
pub mod extract;
pub mod flow;
pub mod holes;
pub mod repair;
pub mod sing;
pub mod snapshot;

pub use dedge::DEdge;
pub use dset::{orient_of, parent_of, DisjointOrientTree, DisjointTree};

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Matrix2x3, Point3, Vector2, Vector3};
use tracing::info;

use crate::error::{RemeshError, Result};
use crate::field::{
    estimate_scale, optimize_orientations, optimize_positions, FaceScale, FieldOptions, Hierarchy,
};
use crate::mesh::{
    adjacency_uniform, compute_direct_graph, face_normals, smooth_vertex_normals,
    split_long_edges, triangle_spaces, vertex_areas, DirectedGraph, MeshStatus, TriMesh,
};

/// Default seed for the randomized cut cancellation.
pub const DEFAULT_SEED: u64 = 17;

/// Options controlling the remeshing pipeline.
#[derive(Debug, Clone)]
pub struct ParamOptions {
    /// Target number of quads. `None` targets the source vertex count.
    pub target_faces: Option<usize>,
    /// Use the anisotropic scale field.
    pub with_scale: bool,
    /// Seed for the randomized cut cancellation.
    pub seed: u64,
    /// Relax the final quad vertex positions.
    pub optimize_positions: bool,
    /// Reject inputs whose nonmanifold vertex fraction exceeds this.
    pub nonmanifold_tolerance: f64,
    /// Gauss–Seidel sweeps per hierarchy level during field smoothing.
    pub field_sweeps: usize,
}

impl Default for ParamOptions {
    fn default() -> Self {
        ParamOptions {
            target_faces: None,
            with_scale: false,
            seed: DEFAULT_SEED,
            optimize_positions: false,
            nonmanifold_tolerance: 1e-3,
            field_sweeps: 6,
        }
    }
}

impl ParamOptions {
    /// Set the target quad count.
    pub fn with_target_faces(mut self, faces: usize) -> Self {
        self.target_faces = Some(faces);
        self
    }

    /// Enable the anisotropic scale field.
    pub fn with_scale(mut self) -> Self {
        self.with_scale = true;
        self
    }

    /// Set the cut-cancellation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// All pipeline state, input through output.
///
/// Built by [`Parametrizer::initialize`], filled in phase order by the
/// functions of the submodules. Everything is public so tests and the
/// snapshot serializer can reach it; after
/// [`fix_flip_advance`](repair::fix_flip_advance) the `edge_diff` array
/// is treated read-only.
#[derive(Debug, Clone, Default)]
pub struct Parametrizer {
    /// Options the pipeline was configured with.
    pub options: ParamOptionsState,
    /// Normalized, welded, subdivided input mesh.
    pub mesh: TriMesh,
    /// Directed-edge topology of `mesh`.
    pub graph: DirectedGraph,
    /// Per-face unit normals.
    pub face_normals: Vec<Vector3<f64>>,
    /// Per-vertex areas.
    pub vertex_areas: Vec<f64>,
    /// Per-face tangent-space matrices.
    pub triangle_spaces: Vec<Matrix2x3<f64>>,
    /// Surface statistics of the processed mesh.
    pub status: MeshStatus,
    /// Target lattice edge length.
    pub scale: f64,
    /// Target vertex count.
    pub num_vertices: usize,
    /// Target face count.
    pub num_faces: usize,
    /// Per-face frame/scale estimates (adaptive-scale path).
    pub face_scale: FaceScale,
    /// Multigrid hierarchy carrying the fields.
    pub hierarchy: Hierarchy,

    /// Orientation singularities: face to defect in `{1, 3}`.
    pub singularities: BTreeMap<usize, i32>,
    /// Position singularities: face to integer defect.
    pub pos_sing: BTreeMap<usize, Vector2<i32>>,
    /// Best corner rotations per face.
    pub pos_rank: Vec<[i32; 3]>,
    /// Per-corner integer jumps per face.
    pub pos_index: Vec<[i32; 6]>,

    /// Canonical undirected edges.
    pub edge_values: Vec<DEdge>,
    /// Integer lattice translation per edge.
    pub edge_diff: Vec<Vector2<i32>>,
    /// Edge ids per face corner.
    pub face_edge_ids: Vec<[usize; 3]>,
    /// Rotations from edge frames into face frames.
    pub face_edge_orients: Vec<[i32; 3]>,

    /// Constraint rows: flat variable indices, two rows per face.
    pub constraints_index: Vec<[usize; 3]>,
    /// Constraint rows: signs, two rows per face.
    pub constraints_sign: Vec<[i32; 3]>,
    /// Edges on which the parameterization is discontinuous.
    pub cuts: BTreeSet<DEdge>,
    /// Corner edges of orientation-singular faces.
    pub edge_around_singularities: BTreeSet<usize>,

    /// Quotient map from input vertices to quad vertices.
    pub disjoint_tree: DisjointTree,
    /// Quad vertex positions.
    pub o_compact: Vec<Point3<f64>>,
    /// Quad vertex normals.
    pub n_compact: Vec<Vector3<f64>>,
    /// Quad vertex orientations.
    pub q_compact: Vec<Vector3<f64>>,
    /// Samples accumulated per quad vertex.
    pub counter: Vec<u32>,
    /// Output quads.
    pub f_compact: Vec<[usize; 4]>,
    /// Quad vertices excluded from the output.
    pub bad_vertices: Vec<bool>,
    /// Quad vertices on the input mesh boundary.
    pub boundary_compact: Vec<bool>,
}

/// The subset of [`ParamOptions`] the pipeline state carries along.
///
/// Kept separate so the state stays `Default`-constructible for the
/// snapshot loader.
#[derive(Debug, Clone)]
pub struct ParamOptionsState {
    /// See [`ParamOptions::with_scale`].
    pub with_scale: bool,
    /// See [`ParamOptions::seed`].
    pub seed: u64,
    /// See [`ParamOptions::optimize_positions`].
    pub optimize_positions: bool,
    /// See [`ParamOptions::field_sweeps`].
    pub field_sweeps: usize,
}

impl Default for ParamOptionsState {
    fn default() -> Self {
        ParamOptionsState {
            with_scale: false,
            seed: DEFAULT_SEED,
            optimize_positions: false,
            field_sweeps: 6,
        }
    }
}

impl Parametrizer {
    /// Prepare a mesh for parameterization.
    ///
    /// Normalizes into the unit box, welds duplicate vertices, derives
    /// the target lattice scale from the requested face count, splits
    /// over-length edges, and builds topology, attributes, and the field
    /// hierarchy. Fails with [`RemeshError::InputMalformed`] when too
    /// many vertices are nonmanifold.
    pub fn initialize(mut mesh: TriMesh, options: &ParamOptions) -> Result<Self> {
        mesh.normalize_unit_box();
        mesh.merge_close(1e-6);
        if mesh.faces.is_empty() {
            return Err(RemeshError::EmptyMesh);
        }
        let status = mesh.status();

        let (num_faces, scale) = match options.target_faces {
            None => {
                let n = mesh.num_vertices();
                (n, (status.surface_area / n as f64).sqrt())
            }
            Some(faces) => {
                if faces == 0 {
                    return Err(RemeshError::invalid_param(
                        "target_faces",
                        faces,
                        "must be positive",
                    ));
                }
                let face_area = status.surface_area / faces as f64;
                (faces, face_area.sqrt() / 2.0)
            }
        };
        let num_vertices = num_faces;

        let target_len = (scale / 2.0).min(status.average_edge_length * 2.0);
        if target_len < status.max_edge_length {
            let splits = split_long_edges(&mut mesh, target_len);
            info!(splits, "subdivided long edges");
        }
        let status = mesh.status();

        let graph = compute_direct_graph(&mesh)?;
        let bad = graph.num_nonmanifold();
        let allowed = (mesh.num_vertices() as f64 * options.nonmanifold_tolerance).ceil() as usize;
        if bad > allowed {
            return Err(RemeshError::InputMalformed {
                details: format!("{bad} nonmanifold vertices (tolerance {allowed})"),
            });
        }

        let nf = face_normals(&mesh);
        let vn = smooth_vertex_normals(&mesh, &graph, &nf);
        let areas = vertex_areas(&mesh, &graph);
        let ts = triangle_spaces(&mesh, &nf);
        let adjacency = adjacency_uniform(&mesh, &graph);

        let hierarchy = Hierarchy::new(
            mesh.positions.clone(),
            vn,
            areas.clone(),
            adjacency,
            mesh.faces.clone(),
            graph.e2e.clone(),
            scale,
        );
        info!(
            vertices = mesh.num_vertices(),
            faces = mesh.num_faces(),
            levels = hierarchy.num_levels(),
            scale,
            "initialized"
        );

        Ok(Parametrizer {
            options: ParamOptionsState {
                with_scale: options.with_scale,
                seed: options.seed,
                optimize_positions: options.optimize_positions,
                field_sweeps: options.field_sweeps,
            },
            mesh,
            graph,
            face_normals: nf,
            vertex_areas: areas,
            triangle_spaces: ts,
            status,
            scale,
            num_vertices,
            num_faces,
            hierarchy,
            ..Parametrizer::default()
        })
    }

    /// Build pipeline state around precomputed fields.
    ///
    /// Skips normalization, welding, subdivision, and field smoothing:
    /// the given per-vertex normals, cross directions, and position
    /// samples are installed at level 0 as-is. This is the entry point
    /// for callers (and tests) that already own a field.
    pub fn with_fields(
        mesh: TriMesh,
        normals: Vec<Vector3<f64>>,
        q: Vec<Vector3<f64>>,
        o: Vec<Point3<f64>>,
        scale: f64,
        options: &ParamOptions,
    ) -> Result<Self> {
        let status = mesh.status();
        let graph = compute_direct_graph(&mesh)?;
        let nf = face_normals(&mesh);
        let areas = vertex_areas(&mesh, &graph);
        let ts = triangle_spaces(&mesh, &nf);
        let adjacency = adjacency_uniform(&mesh, &graph);
        let mut hierarchy = Hierarchy::new(
            mesh.positions.clone(),
            normals,
            areas.clone(),
            adjacency,
            mesh.faces.clone(),
            graph.e2e.clone(),
            scale,
        );
        hierarchy.levels[0].q = q;
        hierarchy.levels[0].o = o;
        let num_faces = options.target_faces.unwrap_or_else(|| mesh.num_vertices());
        Ok(Parametrizer {
            options: ParamOptionsState {
                with_scale: options.with_scale,
                seed: options.seed,
                optimize_positions: options.optimize_positions,
                field_sweeps: options.field_sweeps,
            },
            mesh,
            graph,
            face_normals: nf,
            vertex_areas: areas,
            triangle_spaces: ts,
            status,
            scale,
            num_vertices: num_faces,
            num_faces,
            hierarchy,
            ..Parametrizer::default()
        })
    }

    /// Optimize the cross field and position field over the hierarchy.
    pub fn optimize_fields(&mut self) {
        let field_options = FieldOptions {
            sweeps: self.options.field_sweeps,
            with_scale: self.options.with_scale,
        };
        optimize_orientations(&mut self.hierarchy, &field_options);
        if self.options.with_scale {
            self.face_scale = estimate_scale(
                &self.mesh,
                &self.face_normals,
                &self.triangle_spaces,
                &mut self.hierarchy,
            );
        }
        optimize_positions(&mut self.hierarchy, &field_options);
    }

    /// Run the full integer parameterization and quad extraction.
    pub fn compute_index_map(&mut self) -> Result<()> {
        sing::compute_orientation_singularities(self);
        sing::compute_position_singularities(self);
        info!(
            orientation = self.singularities.len(),
            position = self.pos_sing.len(),
            "singularities detected"
        );

        edges::build_edge_info(self)?;
        for diff in self.edge_diff.iter_mut() {
            diff.x = diff.x.clamp(-1, 1);
            diff.y = diff.y.clamp(-1, 1);
        }

        constraints::build_integer_constraints(self)?;
        flow::compute_max_flow(self)?;
        repair::fix_flip_advance(self)?;

        self.disjoint_tree = DisjointTree::new(self.mesh.num_vertices());
        for (i, diff) in self.edge_diff.iter().enumerate() {
            if *diff == Vector2::zeros() {
                let e = self.edge_values[i];
                self.disjoint_tree.merge(e.x, e.y);
            }
        }
        self.disjoint_tree.build_compact_parent();

        extract::compute_positions(self);
        extract::extract_quad_mesh(self);
        holes::fix_holes(self);
        if self.options.optimize_positions {
            extract::relax_quad_positions(self);
        }
        info!(
            quads = self.f_compact.len(),
            vertices = self.o_compact.len(),
            cuts = self.cuts.len(),
            "extraction complete"
        );
        Ok(())
    }
}

/// Read one component of a flat constraint variable.
///
/// Variable `2e` is the x component of edge `e`, variable `2e + 1` its
/// y component.
#[inline]
pub(crate) fn flat_diff(edge_diff: &[Vector2<i32>], var: usize) -> i32 {
    let d = edge_diff[var / 2];
    if var % 2 == 0 {
        d.x
    } else {
        d.y
    }
}

/// Write one component of a flat constraint variable.
#[inline]
pub(crate) fn flat_diff_mut(edge_diff: &mut [Vector2<i32>], var: usize) -> &mut i32 {
    let d = &mut edge_diff[var / 2];
    if var % 2 == 0 {
        &mut d.x
    } else {
        &mut d.y
    }
}
