//! Pipeline configuration, mirroring the "Recognized configuration options"
//! table of the specification.

#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Lower depth cutoff, in millimetres, for point-cloud backprojection
    /// and volume integration.
    pub min_valid_depth_mm: f64,
    /// Upper depth cutoff, in millimetres.
    pub max_valid_depth_mm: f64,
    /// Upper bound on ICP iterations.
    pub icp_max_iterations: usize,
    /// Correspondence rejection distance, in millimetres.
    pub icp_distance_threshold_mm: f64,
    /// Mean-correspondence-distance delta, in millimetres, below which ICP
    /// is considered converged.
    pub icp_convergence_delta_mm: f64,
    /// Enable the point-to-plane ICP variant (scene normals estimated via
    /// k-nearest-neighbour PCA).
    pub icp_point_to_plane: bool,
    /// Number of scene neighbours used to estimate a point's normal for
    /// point-to-plane ICP.
    pub normal_estimation_k: usize,
    /// Vertex z-percentile used to define the rim in `mesh_prep`.
    pub rim_percentile: f64,
    /// Minimum accepted ray-mesh intersection distance, in millimetres;
    /// hits closer than this are treated as a self-intersection artifact
    /// and discarded as a miss.
    pub ray_epsilon: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            min_valid_depth_mm: 70.0,
            max_valid_depth_mm: 500.0,
            icp_max_iterations: 100,
            icp_distance_threshold_mm: 20.0,
            icp_convergence_delta_mm: 1e-3,
            icp_point_to_plane: true,
            normal_estimation_k: 20,
            rim_percentile: 95.0,
            ray_epsilon: 1e-6,
        }
    }
}
