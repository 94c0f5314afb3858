//! The HRTF service: loading, sphere-grid resampling, interpolation and
//! partitioning of head-related impulse responses
//!
//! Lifecycle: `begin_setup` -> `add_hrir` (bulk) -> `end_setup`, after
//! which the service is immutable and any number of render pipelines may
//! query it concurrently. `end_setup` runs the full build pipeline:
//! extrapolation of unmeasured regions, quasi-uniform grid resampling with
//! offline barycentric interpolation, IR windowing, ITD extraction and
//! uniform partitioning for frequency-domain convolution.

mod extrapolation;
mod grid;
mod interpolation;
mod windowing;

pub use extrapolation::ExtrapolationMethod;
pub use grid::{StepMap, DEFAULT_GRID_STEP};
pub use windowing::WindowingConfig;

use std::collections::HashMap;

use rustfft::num_complex::Complex;

use resona_core::{
    azimuth_to_0_360, elevation_to_plus_minus_90, record_error, CoreError, CoreResult, Ear,
    EarPair, GlobalConfig, Orientation, Vector3, DISTANCE_THRESHOLD_NEAR,
};
use resona_dsp::convolution::partition_impulse_response;

use interpolation::{
    barycentric_weights, orientations_by_distance, unwrap_azimuth, BarycentricWeights,
};

/// Relative level that counts as the impulse onset during ITD extraction
const ONSET_THRESHOLD: f32 = 0.05;

/// A measured left/right impulse-response pair with per-ear onset delays
/// in samples
#[derive(Debug, Clone, Default)]
pub struct HrirRecord {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub left_delay: usize,
    pub right_delay: usize,
}

impl HrirRecord {
    pub fn new(left: Vec<f32>, right: Vec<f32>) -> Self {
        Self {
            left,
            right,
            left_delay: 0,
            right_delay: 0,
        }
    }

    pub fn with_delays(
        left: Vec<f32>,
        right: Vec<f32>,
        left_delay: usize,
        right_delay: usize,
    ) -> Self {
        Self {
            left,
            right,
            left_delay,
            right_delay,
        }
    }
}

/// A record's impulse responses split into 2B-sample spectra, delays
/// carried separately
#[derive(Debug, Clone, Default)]
pub struct PartitionedHrir {
    pub left: Vec<Vec<Complex<f32>>>,
    pub right: Vec<Vec<Complex<f32>>>,
    pub left_delay: usize,
    pub right_delay: usize,
}

impl PartitionedHrir {
    pub fn ear_partitions(&self, ear: Ear) -> &Vec<Vec<Complex<f32>>> {
        match ear {
            Ear::Left => &self.left,
            Ear::Right => &self.right,
            Ear::Both => panic!("ear_partitions requires a single ear"),
        }
    }

    pub fn ear_delay(&self, ear: Ear) -> usize {
        match ear {
            Ear::Left => self.left_delay,
            Ear::Right => self.right_delay,
            Ear::Both => panic!("ear_delay requires a single ear"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Empty,
    Loading,
    Ready,
}

/// Sphere-grid container for a listener's HRTF
pub struct HrtfService {
    config: GlobalConfig,
    state: ServiceState,
    extrapolation: ExtrapolationMethod,
    grid_step: u32,
    ir_length: usize,
    aligned_ir_length: usize,
    partition_count: usize,
    raw_table: HashMap<Orientation, HrirRecord>,
    resampled_table: HashMap<Orientation, HrirRecord>,
    partitioned_table: HashMap<Orientation, PartitionedHrir>,
    step_map: StepMap,
    windowing: Option<WindowingConfig>,
    ear_positions: EarPair<Vector3>,
    ear_positions_set: bool,
    head_radius: f32,
    measurement_distance: f32,
    title: String,
    database_name: String,
}

impl HrtfService {
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            head_radius: config.head_radius,
            config,
            state: ServiceState::Empty,
            extrapolation: ExtrapolationMethod::default(),
            grid_step: DEFAULT_GRID_STEP,
            ir_length: 0,
            aligned_ir_length: 0,
            partition_count: 0,
            raw_table: HashMap::new(),
            resampled_table: HashMap::new(),
            partitioned_table: HashMap::new(),
            step_map: StepMap::default(),
            windowing: None,
            ear_positions: EarPair::default(),
            ear_positions_set: false,
            measurement_distance: DISTANCE_THRESHOLD_NEAR,
            title: String::new(),
            database_name: String::new(),
        }
    }

    // ------------------------------------------------------------------
    // Setup lifecycle
    // ------------------------------------------------------------------

    /// Start loading. Clears any previous contents.
    pub fn begin_setup(
        &mut self,
        ir_length: usize,
        extrapolation: ExtrapolationMethod,
    ) -> CoreResult<()> {
        if ir_length == 0 {
            let error = CoreError::OutOfRange("HRIR length must be positive".into());
            record_error(error.clone());
            return Err(error);
        }
        self.raw_table.clear();
        self.resampled_table.clear();
        self.partitioned_table.clear();
        self.step_map = StepMap::default();
        self.ir_length = ir_length;
        self.aligned_ir_length = 0;
        self.partition_count = 0;
        self.extrapolation = extrapolation;
        self.state = ServiceState::Loading;
        Ok(())
    }

    /// Add one measured HRIR. `distance` is the measurement distance in
    /// meters (the radius of the measurement sphere).
    pub fn add_hrir(
        &mut self,
        azimuth: f32,
        elevation: f32,
        distance: f32,
        record: HrirRecord,
    ) -> bool {
        if self.state != ServiceState::Loading {
            record_error(CoreError::NotAllowed(
                "add_hrir requires begin_setup first".into(),
            ));
            return false;
        }
        if record.left.len() != self.ir_length || record.right.len() != self.ir_length {
            record_error(CoreError::BadSize(format!(
                "HRIR at ({azimuth}, {elevation}) has length {}/{}, expected {}",
                record.left.len(),
                record.right.len(),
                self.ir_length
            )));
            return false;
        }
        if distance > 0.0 && self.raw_table.is_empty() {
            self.measurement_distance = distance;
        }
        self.raw_table
            .insert(Orientation::new(azimuth, elevation), record);
        true
    }

    /// Grid sampling step in degrees. Only meaningful before `end_setup`.
    pub fn set_grid_sampling_step(&mut self, step_degrees: u32) {
        self.grid_step = step_degrees;
    }

    pub fn set_windowing_parameters(&mut self, windowing: WindowingConfig) {
        self.windowing = Some(windowing);
    }

    pub fn windowing_parameters(&self) -> Option<WindowingConfig> {
        self.windowing
    }

    pub fn set_head_radius(&mut self, head_radius: f32) {
        self.head_radius = head_radius;
    }

    pub fn set_ear_position(&mut self, ear: Ear, position: Vector3) {
        match ear {
            Ear::Left => self.ear_positions.left = position,
            Ear::Right => self.ear_positions.right = position,
            Ear::Both => return,
        }
        self.ear_positions_set = true;
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_database_name(&mut self, database_name: impl Into<String>) {
        self.database_name = database_name.into();
    }

    /// Run the build pipeline and freeze the service. On failure the
    /// service is left in its empty state.
    pub fn end_setup(&mut self) -> CoreResult<()> {
        if self.state != ServiceState::Loading {
            let error = CoreError::NotAllowed("end_setup requires begin_setup first".into());
            record_error(error.clone());
            return Err(error);
        }
        if let Err(error) = self.build() {
            record_error(error.clone());
            self.raw_table.clear();
            self.resampled_table.clear();
            self.partitioned_table.clear();
            self.state = ServiceState::Empty;
            return Err(error);
        }
        self.state = ServiceState::Ready;
        Ok(())
    }

    fn build(&mut self) -> CoreResult<()> {
        if self.raw_table.is_empty() {
            return Err(CoreError::NotInitialized(
                "end_setup with no HRIRs loaded".into(),
            ));
        }
        if self.grid_step == 0 || self.grid_step > 90 {
            return Err(CoreError::OutOfRange(format!(
                "grid sampling step {} out of range",
                self.grid_step
            )));
        }

        // 1. Fill polar caps / azimuth wedges the measurement left open
        extrapolation::extrapolate(&mut self.raw_table, self.extrapolation, self.grid_step);

        // 2-3. Build the quasi-uniform grid and resample onto it
        let (orientations, step_map) = grid::build_grid(self.grid_step);
        self.step_map = step_map;
        self.resampled_table = orientations
            .iter()
            .map(|&orientation| {
                let record = match self.raw_table.get(&orientation) {
                    Some(record) => record.clone(),
                    None => offline_interpolate(
                        &self.raw_table,
                        orientation.azimuth(),
                        orientation.elevation(),
                    ),
                };
                (orientation, record)
            })
            .collect();

        // 4. Windowing
        if let Some(window) = self.windowing {
            let sample_rate = self.config.sample_rate as f32;
            for record in self.resampled_table.values_mut() {
                for ir in [&mut record.left, &mut record.right] {
                    let faded = windowing::fade_in_window(
                        ir,
                        window.fade_in_threshold,
                        window.fade_in_rise,
                        sample_rate,
                    );
                    *ir = windowing::fade_out_window(
                        &faded,
                        window.fade_out_threshold,
                        window.fade_out_rise,
                        sample_rate,
                    );
                }
            }
        }

        // 5. ITD extraction: record per-ear onset delays and store the
        // responses aligned
        for record in self.resampled_table.values_mut() {
            if record.left_delay == 0 && record.right_delay == 0 {
                record.left_delay = detect_onset(&record.left);
                record.right_delay = detect_onset(&record.right);
            }
            align_left(&mut record.left, record.left_delay);
            align_left(&mut record.right, record.right_delay);
        }

        self.aligned_ir_length = self
            .resampled_table
            .values()
            .next()
            .map(|record| record.left.len())
            .unwrap_or_default();

        // 6. Partition every aligned response
        let block_size = self.config.buffer_size;
        self.partition_count = self.aligned_ir_length.div_ceil(block_size);
        self.partitioned_table = self
            .resampled_table
            .iter()
            .map(|(&orientation, record)| {
                (
                    orientation,
                    PartitionedHrir {
                        left: partition_impulse_response(&record.left, block_size),
                        right: partition_impulse_response(&record.right, block_size),
                        left_delay: record.left_delay,
                        right_delay: record.right_delay,
                    },
                )
            })
            .collect();

        if !self.ear_positions_set {
            // Left is +Y under the build axis convention
            self.ear_positions = EarPair::new(
                Vector3::new(0.0, self.head_radius, 0.0),
                Vector3::new(0.0, -self.head_radius, 0.0),
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_ready(&self) -> bool {
        self.state == ServiceState::Ready
    }

    /// Partitioned HRIR spectra for one ear at a direction.
    ///
    /// An exact grid hit (or `interpolate = false`) returns the stored
    /// spectra; otherwise the three enclosing grid vertices are blended
    /// barycentrically, partition by partition, bin by bin. Degenerate
    /// triangles fall back to the nearest vertex.
    pub fn hrir_partitioned(
        &self,
        ear: Ear,
        azimuth: f32,
        elevation: f32,
        interpolate: bool,
    ) -> Option<Vec<Vec<Complex<f32>>>> {
        if !self.is_ready() {
            record_error(CoreError::NotInitialized(
                "HRIR query before end_setup".into(),
            ));
            return None;
        }

        if let Some(stored) = self.partitioned_table.get(&Orientation::new(azimuth, elevation)) {
            return Some(stored.ear_partitions(ear).clone());
        }
        if !interpolate {
            return self
                .nearest_partitioned(azimuth, elevation)
                .map(|stored| stored.ear_partitions(ear).clone());
        }
        self.interpolated_partitioned(ear, azimuth, elevation)
    }

    /// Per-ear onset delays at a direction: the nearest grid entry's
    /// delays.
    pub fn hrir_delays(&self, azimuth: f32, elevation: f32) -> (usize, usize) {
        if !self.is_ready() {
            record_error(CoreError::NotInitialized(
                "HRIR delay query before end_setup".into(),
            ));
            return (0, 0);
        }
        match self.nearest_partitioned(azimuth, elevation) {
            Some(stored) => (stored.left_delay, stored.right_delay),
            None => (0, 0),
        }
    }

    /// Aligned time-domain record at the nearest grid orientation
    pub fn resampled_record(&self, azimuth: f32, elevation: f32) -> CoreResult<&HrirRecord> {
        if !self.is_ready() {
            return Err(CoreError::NotInitialized(
                "resampled record query before end_setup".into(),
            ));
        }
        let nearest = grid::nearest_orientation(&self.step_map, azimuth, elevation);
        self.resampled_table.get(&nearest).ok_or_else(|| {
            CoreError::OutOfRange(format!(
                "no resampled entry near ({azimuth}, {elevation})"
            ))
        })
    }

    /// Ear position in the listener's local frame
    pub fn ear_local_position(&self, ear: Ear) -> Vector3 {
        *self.ear_positions.get(ear)
    }

    pub fn head_radius(&self) -> f32 {
        self.head_radius
    }

    /// Radius of the measurement sphere, in meters
    pub fn measurement_distance(&self) -> f32 {
        self.measurement_distance
    }

    pub fn ir_length(&self) -> usize {
        self.ir_length
    }

    /// IR length after windowing and alignment
    pub fn aligned_ir_length(&self) -> usize {
        self.aligned_ir_length
    }

    /// Number of partitions each stored filter is split into
    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Partition (audio block) size in samples
    pub fn partition_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn grid_step(&self) -> u32 {
        self.grid_step
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// All orientations of the resampled grid
    pub fn grid_orientations(&self) -> impl Iterator<Item = Orientation> + '_ {
        self.partitioned_table.keys().copied()
    }

    fn nearest_partitioned(&self, azimuth: f32, elevation: f32) -> Option<&PartitionedHrir> {
        let nearest = grid::nearest_orientation(&self.step_map, azimuth, elevation);
        let stored = self.partitioned_table.get(&nearest);
        if stored.is_none() {
            record_error(CoreError::OutOfRange(format!(
                "no grid entry near ({azimuth}, {elevation})"
            )));
        }
        stored
    }

    fn interpolated_partitioned(
        &self,
        ear: Ear,
        azimuth: f32,
        elevation: f32,
    ) -> Option<Vec<Vec<Complex<f32>>>> {
        let azimuth = azimuth_to_0_360(azimuth);
        let elevation_signed = elevation_to_plus_minus_90(azimuth_to_0_360(elevation));
        let (ring_down, ring_up) = self.step_map.rings_around(elevation);

        // The four surrounding grid vertices, kept in raw (unwrapped)
        // chart coordinates for the barycentric computation
        let mut vertices = Vec::with_capacity(4);
        for ring in [ring_down, ring_up] {
            let ring_signed = elevation_to_plus_minus_90(ring);
            if grid::is_pole(ring) {
                vertices.push((azimuth, ring_signed, Orientation::new(0.0, ring)));
                continue;
            }
            let step = self.step_map.azimuth_step(ring)?;
            let index = (azimuth / step).ceil();
            for raw in [(index - 1.0) * step, index * step] {
                vertices.push((
                    unwrap_azimuth(azimuth, azimuth_to_0_360(raw)),
                    ring_signed,
                    Orientation::new(azimuth_to_0_360(raw), ring),
                ));
            }
        }

        // Two candidate triangles out of the surrounding quad
        let triangles: &[[usize; 3]] = match vertices.len() {
            3 => &[[0, 1, 2]],
            4 => &[[0, 1, 2], [1, 2, 3]],
            _ => &[],
        };

        for triangle in triangles {
            let [a, b, c] = [
                &vertices[triangle[0]],
                &vertices[triangle[1]],
                &vertices[triangle[2]],
            ];
            let Some(weights) = barycentric_weights(
                azimuth,
                elevation_signed,
                (a.0, a.1),
                (b.0, b.1),
                (c.0, c.1),
            ) else {
                continue;
            };
            if !weights.is_inside() {
                continue;
            }
            let (Some(first), Some(second), Some(third)) = (
                self.partitioned_table.get(&a.2),
                self.partitioned_table.get(&b.2),
                self.partitioned_table.get(&c.2),
            ) else {
                continue;
            };
            return Some(blend_partitions(
                weights,
                first.ear_partitions(ear),
                second.ear_partitions(ear),
                third.ear_partitions(ear),
            ));
        }

        // No enclosing triangle: nearest-point fallback
        self.nearest_partitioned(azimuth, elevation)
            .map(|stored| stored.ear_partitions(ear).clone())
    }
}

/// First tap whose magnitude reaches the onset threshold relative to the
/// peak
fn detect_onset(ir: &[f32]) -> usize {
    let peak = ir.iter().fold(0.0f32, |peak, &s| peak.max(s.abs()));
    if peak <= 0.0 {
        return 0;
    }
    ir.iter()
        .position(|&s| s.abs() >= ONSET_THRESHOLD * peak)
        .unwrap_or(0)
}

/// Shift the response left by `delay` samples, keeping its length
fn align_left(ir: &mut [f32], delay: usize) {
    if delay == 0 || delay >= ir.len() {
        return;
    }
    ir.copy_within(delay.., 0);
    let len = ir.len();
    ir[len - delay..].fill(0.0);
}

/// Offline barycentric interpolation over the raw table: blend the three
/// nearest measurements when they enclose the query, else copy the
/// nearest.
fn offline_interpolate(
    raw_table: &HashMap<Orientation, HrirRecord>,
    azimuth: f32,
    elevation: f32,
) -> HrirRecord {
    let sorted = orientations_by_distance(raw_table.keys().copied(), azimuth, elevation);
    let elevation_signed = elevation_to_plus_minus_90(elevation);

    if sorted.len() >= 3 {
        let candidates = &sorted[..sorted.len().min(5)];
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                for k in (j + 1)..candidates.len() {
                    let chart = |orientation: &Orientation| {
                        (
                            unwrap_azimuth(azimuth, orientation.azimuth()),
                            elevation_to_plus_minus_90(orientation.elevation()),
                        )
                    };
                    let (a, b, c) = (&candidates[i].1, &candidates[j].1, &candidates[k].1);
                    let Some(weights) = barycentric_weights(
                        azimuth_to_0_360(azimuth),
                        elevation_signed,
                        chart(a),
                        chart(b),
                        chart(c),
                    ) else {
                        continue;
                    };
                    if !weights.is_inside() {
                        continue;
                    }
                    return blend_records(
                        weights,
                        &raw_table[a],
                        &raw_table[b],
                        &raw_table[c],
                    );
                }
            }
        }
    }

    // Fewer than three measurements or no enclosing triangle
    sorted
        .first()
        .and_then(|(_, nearest)| raw_table.get(nearest).cloned())
        .unwrap_or_default()
}

fn blend_records(
    weights: BarycentricWeights,
    a: &HrirRecord,
    b: &HrirRecord,
    c: &HrirRecord,
) -> HrirRecord {
    let blend = |x: &[f32], y: &[f32], z: &[f32]| -> Vec<f32> {
        x.iter()
            .zip(y.iter())
            .zip(z.iter())
            .map(|((&x, &y), &z)| weights.alpha * x + weights.beta * y + weights.gamma * z)
            .collect()
    };
    let blend_delay = |x: usize, y: usize, z: usize| -> usize {
        (weights.alpha * x as f32 + weights.beta * y as f32 + weights.gamma * z as f32).round()
            as usize
    };
    HrirRecord {
        left: blend(&a.left, &b.left, &c.left),
        right: blend(&a.right, &b.right, &c.right),
        left_delay: blend_delay(a.left_delay, b.left_delay, c.left_delay),
        right_delay: blend_delay(a.right_delay, b.right_delay, c.right_delay),
    }
}

fn blend_partitions(
    weights: BarycentricWeights,
    first: &[Vec<Complex<f32>>],
    second: &[Vec<Complex<f32>>],
    third: &[Vec<Complex<f32>>],
) -> Vec<Vec<Complex<f32>>> {
    first
        .iter()
        .zip(second.iter())
        .zip(third.iter())
        .map(|((a, b), c)| {
            a.iter()
                .zip(b.iter())
                .zip(c.iter())
                .map(|((&a, &b), &c)| {
                    a * weights.alpha + b * weights.beta + c * weights.gamma
                })
                .collect()
        })
        .collect()
}
