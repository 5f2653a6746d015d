//! Randomized property tests: warp-table invariants over random factors and
//! dimensions, and access-pattern independence of graph evaluation against a
//! per-frame cold reference.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cepstra::delta::Delta;
use cepstra::warp::Vtln;
use cepstra::{
    FeatureGraph, Generated, ModuleConfig, ModuleId, PipelineError, SourceCtx, Transform,
    TransformSpec,
};

fn seed_count() -> u64 {
    std::env::var("CEPSTRA_PROPTEST_SEEDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(64)
}

fn configured_vtln(pwlin: bool, warp_factor: f32, dim: usize) -> Vtln {
    let mut vtln = Vtln::new();
    let mut config = ModuleConfig::new();
    if pwlin {
        config.set("pwlin_vtln", true);
    }
    vtln.configure(&config, &[dim]).unwrap();
    let mut params = ModuleConfig::new();
    params.set("warp_factor", warp_factor);
    vtln.set_parameters(&params).unwrap();
    vtln
}

fn check_warp_table_invariants(pwlin: bool, warp_factor: f32, dim: usize) {
    let vtln = configured_vtln(pwlin, warp_factor, dim);
    let table = vtln.warp_table();
    let top = (dim - 1) as f32;

    assert_eq!(table.len(), dim);
    assert_eq!(table[0], 0.0, "pwlin={} warp={}", pwlin, warp_factor);
    assert!(
        (table[dim - 1] - top).abs() < 1e-5,
        "top bin not pinned: pwlin={} warp={} dim={}",
        pwlin,
        warp_factor,
        dim
    );
    for (t, pair) in table.windows(2).enumerate() {
        assert!(
            pair[1] >= pair[0] - 1e-5,
            "table not monotone at {}: pwlin={} warp={} dim={} table={:?}",
            t,
            pwlin,
            warp_factor,
            dim,
            table
        );
    }
    for (t, &bin) in table.iter().enumerate() {
        assert!(
            (-1e-5..=top + 1e-5).contains(&bin),
            "bin {} out of range: pwlin={} warp={} dim={} value={}",
            t,
            pwlin,
            warp_factor,
            dim,
            bin
        );
    }
}

#[test]
fn randomized_warp_tables_stay_monotone_and_bounded() {
    for seed in 0..seed_count() {
        let mut rng = StdRng::seed_from_u64(seed);
        let warp_factor = rng.gen_range(0.7f32..1.3);
        let dim = rng.gen_range(8usize..130);
        check_warp_table_invariants(false, warp_factor, dim);
        check_warp_table_invariants(true, warp_factor, dim);
    }
}

/// Leaf producing a pseudo-random but frame-deterministic vector.
struct NoiseLeaf {
    dim: usize,
    seed: u64,
}

impl Transform for NoiseLeaf {
    fn type_name(&self) -> &'static str {
        "noise"
    }

    fn configure(
        &mut self,
        _config: &ModuleConfig,
        _source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        Ok(TransformSpec {
            dim: self.dim,
            own_left: 0,
            own_right: 0,
            copy_borders: true,
        })
    }

    fn generate(
        &mut self,
        frame: i64,
        _sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ (frame as u64).wrapping_mul(0x9E37));
        for o in out.iter_mut() {
            *o = rng.gen::<f32>() * 2.0 - 1.0;
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, _config: &mut ModuleConfig) {}
}

fn noise_delta_graph(seed: u64) -> (FeatureGraph, ModuleId) {
    let mut graph = FeatureGraph::new();
    let noise = graph
        .add_module("noise", Box::new(NoiseLeaf { dim: 4, seed }))
        .unwrap();
    let delta = graph.add_module("delta", Box::new(Delta::new())).unwrap();
    graph.connect(noise, delta).unwrap();
    graph.configure(noise, &ModuleConfig::new()).unwrap();
    graph.configure(delta, &ModuleConfig::new()).unwrap();
    (graph, delta)
}

#[test]
fn randomized_access_order_does_not_change_values() {
    for seed in 0..seed_count() {
        let mut rng = StdRng::seed_from_u64(seed);
        let (graph, delta) = noise_delta_graph(seed);

        for _ in 0..40 {
            let frame = rng.gen_range(0i64..100);
            let warm = graph.at(delta, frame).unwrap();

            // Every access must agree with a cold graph that computes the
            // same frame from scratch.
            let (cold, cold_delta) = noise_delta_graph(seed);
            let reference = cold.at(cold_delta, frame).unwrap();
            for (w, r) in warm.iter().zip(reference.iter()) {
                assert!(
                    (w - r).abs() < 1e-5,
                    "seed={} frame={}: warm {} vs cold {}",
                    seed,
                    frame,
                    w,
                    r
                );
            }
        }
    }
}
