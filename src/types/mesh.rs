//! Triangle mesh types: the raw reference mesh, its canonicalized form,
//! and the fitted form placed into the camera frame (spec §3).

use nalgebra::{Matrix3, Point3, Vector3};

use crate::error::{BowlVolumeError, Result};

/// A plain owned triangle mesh: vertex positions in millimetres and
/// zero-based triangle vertex indices. Mirrors the teacher's
/// `textured-tri-mesh` crate's `{ coords, indices }` shape, minus the
/// (here unused) uv channel.
#[derive(Debug, Clone)]
pub struct TriMesh {
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriMesh {
    pub fn new(vertices: Vec<Point3<f64>>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        if vertices.len() < 4 {
            return Err(BowlVolumeError::InvalidInput(
                "mesh must have at least 4 vertices".into(),
            ));
        }
        if triangles.len() < 4 {
            return Err(BowlVolumeError::InvalidInput(
                "mesh must have at least 4 triangles".into(),
            ));
        }
        let n = vertices.len() as u32;
        for tri in &triangles {
            if tri.iter().any(|&i| i >= n) {
                return Err(BowlVolumeError::InvalidInput(
                    "triangle references out-of-range vertex".into(),
                ));
            }
        }
        Ok(TriMesh {
            vertices,
            triangles,
        })
    }

    /// Build the `ncollide3d` acceleration structure over this mesh's
    /// current vertex positions. The mesh's own coordinates are used
    /// directly (no uv channel), matching
    /// `freemovr-calibration::as_ncollide_mesh`.
    pub(crate) fn to_ncollide(&self) -> ncollide3d::shape::TriMesh<f64> {
        let coords = self.vertices.clone();
        let indices = self
            .triangles
            .iter()
            .map(|t| Point3::new(t[0] as usize, t[1] as usize, t[2] as usize))
            .collect();
        ncollide3d::shape::TriMesh::new(coords, indices, None)
    }
}

/// The reference bowl mesh after canonicalization: opening facing +z, rim
/// plane at `rim_z_mm`, rim centroid projected to the xy-origin. No
/// scaling is applied here (spec §4.B) — the canonical mesh is a rigid
/// transform of the input only.
#[derive(Debug, Clone)]
pub struct CanonicalBowlMesh {
    pub mesh: TriMesh,
    pub rim_z_mm: f64,
    pub rim_diameter_model_mm: f64,
    /// Indices into `mesh.vertices` of the rim-candidate band measured by
    /// `mesh_prep::canonicalize` (top `rim_percentile`% by z). Carried
    /// through to `FittedBowlMesh` so the rim can be re-measured after an
    /// arbitrary rotation, where it is no longer the top-z band.
    pub rim_vertex_indices: Vec<usize>,
}

/// The canonical mesh after applying the solved scale `s` and rigid
/// transform `(rotation, translation)` that places it into the camera
/// frame. Vertex positions are pre-transformed (baked) so that RayCast
/// can query directly in the camera frame.
#[derive(Debug, Clone)]
pub struct FittedBowlMesh {
    pub mesh: TriMesh,
    pub scale: f64,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Indices into `mesh.vertices` of the rim band, inherited from the
    /// canonical mesh's rim measurement (spec §4.B) and carried through the
    /// fit's rotation unchanged in position.
    rim_vertex_indices: Vec<usize>,
}

impl FittedBowlMesh {
    /// Apply `scale * rotation * v + translation` to every vertex of
    /// `canonical`, producing a mesh in the camera frame.
    pub fn from_canonical(
        canonical: &CanonicalBowlMesh,
        scale: f64,
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
    ) -> Self {
        let vertices = canonical
            .mesh
            .vertices
            .iter()
            .map(|v| Point3::from(rotation * v.coords * scale + translation))
            .collect();
        let mesh = TriMesh {
            vertices,
            triangles: canonical.mesh.triangles.clone(),
        };
        FittedBowlMesh {
            mesh,
            scale,
            rotation,
            translation,
            rim_vertex_indices: canonical.rim_vertex_indices.clone(),
        }
    }

    /// The 4x4 row-major homogeneous transform from the canonical frame
    /// into the camera frame, for the debugging output described in
    /// spec §6.
    pub fn as_4x4(&self) -> nalgebra::Matrix4<f64> {
        let mut m = nalgebra::Matrix4::identity();
        let r_scaled = self.rotation * self.scale;
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_scaled);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// The diameter of the fitted mesh's rim, used by the scale-correctness
    /// property test (spec §8, invariant 7).
    ///
    /// The canonical mesh's rim band (the top `rim_percentile`% by z,
    /// measured once in `mesh_prep::canonicalize`) is tracked by vertex
    /// index rather than re-measured here: after ICP's rotation the rim is
    /// in general no longer the top-z band of the fitted mesh (the initial
    /// pose alone flips the canonical +z opening to face the camera's
    /// -z-ish direction, per `icp::fit_bowl`'s initial rotation), so
    /// re-applying a z-percentile filter to the fitted vertices would pick
    /// out the wrong band. Measuring the same indexed vertices in their
    /// fitted positions, via a 3-D PCA span instead of the canonical
    /// frame's xy-only ellipse fit, gives the correct diameter regardless
    /// of orientation.
    pub fn rim_diameter_mm(&self) -> f64 {
        let rim_points: Vec<Point3<f64>> = self
            .rim_vertex_indices
            .iter()
            .map(|&i| self.mesh.vertices[i])
            .collect();
        crate::mesh_prep::measure_rim_diameter_3d(&rim_points)
    }
}
