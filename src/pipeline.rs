use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use arrow_array::{Array, BooleanArray, UInt8Array};
use arrow_select::filter::filter_record_batch;
use h3o::Resolution;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{Config, DatasetConfig};
use crate::core::{
    CompactCellSet, JoinStats, SpatialJoinResolver, assignments_from_record_batches,
    assignments_to_record_batch, cell_sets_from_record_batches, cell_sets_to_record_batch,
    cell_sets_to_record_batch_no_geom, features_to_record_batch, hexagons_from_record_batches,
    hexagons_to_record_batch, index_records, rasterize_regions, read_parquet, read_parquet_table,
    write_geoparquet, write_parquet,
};
use crate::error::FareHexError;
use crate::features::{RegionColumns, SplitLabel, TripFeatures, derive_all};
use crate::source::{
    BoundarySource, CsvTripFile, GeoJsonBoundaryFile, RegionId, TripRecord, TripSource,
};

const HEXAGON_PREFIX: &str = "hexagon";
const FEATURES_PREFIX: &str = "features";
const TRAIN_DIR: &str = "train";
const TEST_DIR: &str = "test";

/// Runs the batch stages over the configured data directory.
///
/// Each stage works file by file in parallel and skips any output that
/// already exists, so an interrupted run can be restarted.
pub struct FeaturePipeline {
    config: Config,
    boundary_resolution: Resolution,
    point_resolution: Resolution,
}

impl FeaturePipeline {
    pub fn new(config: Config) -> Result<Self, FareHexError> {
        config.validate()?;
        let boundary_resolution = config.boundary_resolution()?;
        let point_resolution = config.point_resolution()?;
        Ok(Self {
            config,
            boundary_resolution,
            point_resolution,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rasterizes one boundary dataset into its cell-set Parquet file.
    pub fn rasterize_dataset(&self, name: &str, with_geometry: bool) -> Result<PathBuf, FareHexError> {
        let dataset = self.config.dataset(name)?;
        let output = self.config.cell_set_path(dataset);
        if output.exists() {
            info!("Skipping {}: {} already exists", name, output.display());
            return Ok(output);
        }

        let source = GeoJsonBoundaryFile::new(self.config.boundary_path(dataset), &dataset.region_field);
        let regions = source.read_regions()?;
        info!(
            "Rasterizing {} regions of {} at resolution {}",
            regions.len(),
            name,
            self.boundary_resolution
        );

        let sets = rasterize_regions(&regions, self.boundary_resolution)?;
        let batch = if with_geometry {
            cell_sets_to_record_batch(&sets)?
        } else {
            cell_sets_to_record_batch_no_geom(&sets)?
        };

        ensure_parent(&output)?;
        if with_geometry {
            write_geoparquet(&batch, &output)?;
        } else {
            write_parquet(&batch, &output)?;
        }
        info!("Saved {} ({} rows)", output.display(), batch.num_rows());
        Ok(output)
    }

    pub fn rasterize_all(&self, with_geometry: bool) -> Result<Vec<PathBuf>, FareHexError> {
        self.config
            .datasets
            .iter()
            .map(|dataset| self.rasterize_dataset(&dataset.name, with_geometry))
            .collect()
    }

    /// Reads a dataset's persisted cell sets.
    pub fn load_cell_sets(&self, name: &str) -> Result<BTreeMap<RegionId, CompactCellSet>, FareHexError> {
        let dataset = self.config.dataset(name)?;
        let path = self.config.cell_set_path(dataset);
        if !path.exists() {
            return Err(FareHexError::Config(format!(
                "No cell sets for '{}' at {}; run rasterize first",
                name,
                path.display()
            )));
        }
        cell_sets_from_record_batches(&read_parquet(&path)?)
    }

    /// Indexes both ends of every raw trip file into `hexagon_<stem>.parquet`.
    pub fn process_hexagons(&self) -> Result<Vec<PathBuf>, FareHexError> {
        let inputs = list_files(&self.config.raw_dir(), None, "csv")?;
        let refined = self.config.refined_dir();
        fs::create_dir_all(&refined)?;

        inputs
            .par_iter()
            .map(|input| -> Result<PathBuf, FareHexError> {
                let output = refined.join(format!("{}_{}.parquet", HEXAGON_PREFIX, file_stem(input)));
                if output.exists() {
                    info!("Skipping {}: already exists", output.display());
                    return Ok(output);
                }

                let records = self.read_trips(input)?;
                let trips = index_records(&records, self.point_resolution);
                let indexed = trips.iter().filter(|t| t.is_indexed()).count();
                write_parquet(&hexagons_to_record_batch(&trips)?, &output)?;
                info!(
                    "Saved {} ({} of {} trips indexed)",
                    output.display(),
                    indexed,
                    trips.len()
                );
                Ok(output)
            })
            .collect()
    }

    /// Resolves every hexagon file against one dataset's regions.
    ///
    /// Output files are named by replacing the `hexagon` prefix with the
    /// dataset name. The returned stats cover the files processed in this run.
    pub fn process_location(&self, name: &str) -> Result<(Vec<PathBuf>, JoinStats), FareHexError> {
        let dataset = self.config.dataset(name)?;
        let sets = self.load_cell_sets(name)?;
        let resolver = SpatialJoinResolver::build(&sets);
        info!(
            "{}: indexed {} cells across {} regions",
            name,
            resolver.len(),
            resolver.regions().len()
        );
        if resolver.overlapping_cells() > 0 {
            warn!(
                "{}: {} cells belong to more than one region",
                name,
                resolver.overlapping_cells()
            );
        }

        let refined = self.config.refined_dir();
        let inputs = list_files(&refined, Some(HEXAGON_PREFIX), "parquet")?;

        let results: Vec<(PathBuf, JoinStats)> = inputs
            .par_iter()
            .map(|input| self.locate_file(&resolver, dataset, input))
            .collect::<Result<_, FareHexError>>()?;

        let mut total = JoinStats::default();
        let mut outputs = Vec::with_capacity(results.len());
        for (output, stats) in results {
            total += stats;
            outputs.push(output);
        }
        Ok((outputs, total))
    }

    fn locate_file(
        &self,
        resolver: &SpatialJoinResolver,
        dataset: &DatasetConfig,
        input: &Path,
    ) -> Result<(PathBuf, JoinStats), FareHexError> {
        let stem = file_stem(input);
        let suffix = stem.strip_prefix(HEXAGON_PREFIX).unwrap_or(&stem);
        let output = input.with_file_name(format!("{}{}.parquet", dataset.name, suffix));
        if output.exists() {
            info!("Skipping {}: already exists", output.display());
            return Ok((output, JoinStats::default()));
        }

        let trips = hexagons_from_record_batches(&read_parquet(input)?)?;
        let (rows, stats) = resolver.assign(&trips);
        write_parquet(&assignments_to_record_batch(&rows)?, &output)?;
        info!(
            "Saved {} ({} matched, {} unmatched, {} unindexed, {} ambiguous)",
            output.display(),
            stats.matched,
            stats.unmatched,
            stats.unindexed,
            stats.ambiguous
        );
        Ok((output, stats))
    }

    /// Derives model features from every raw trip file into
    /// `features_<stem>.parquet`.
    ///
    /// Each configured dataset contributes pickup and dropoff region columns
    /// from its `<dataset>_<stem>.parquet` location file. A dataset without
    /// one gets null columns.
    pub fn generate_features(&self) -> Result<Vec<PathBuf>, FareHexError> {
        let inputs = list_files(&self.config.raw_dir(), None, "csv")?;
        let output_dir = self.config.features_dir();
        fs::create_dir_all(&output_dir)?;
        let params = self.config.feature_params();

        inputs
            .par_iter()
            .map(|input| -> Result<PathBuf, FareHexError> {
                let stem = file_stem(input);
                let output = output_dir.join(format!("{}_{}.parquet", FEATURES_PREFIX, stem));
                if output.exists() {
                    info!("Skipping {}: already exists", output.display());
                    return Ok(output);
                }

                let records = self.read_trips(input)?;
                let features = derive_all(&records, &params);
                let regions = self
                    .config
                    .datasets
                    .iter()
                    .map(|dataset| self.region_columns(&dataset.name, &stem, &features))
                    .collect::<Result<Vec<_>, FareHexError>>()?;

                let batch = features_to_record_batch(&features, params.week_fourier_order, &regions)?;
                write_parquet(&batch, &output)?;
                info!("Saved {} ({} rows)", output.display(), features.len());
                Ok(output)
            })
            .collect()
    }

    fn region_columns(
        &self,
        dataset: &str,
        stem: &str,
        features: &[TripFeatures],
    ) -> Result<RegionColumns, FareHexError> {
        let path = self.config.refined_dir().join(format!("{dataset}_{stem}.parquet"));
        if !path.exists() {
            warn!(
                "{}: no location file for {}, region columns are null",
                dataset,
                path.display()
            );
            return Ok(RegionColumns::empty(dataset, features.len()));
        }
        let rows = assignments_from_record_batches(&read_parquet(&path)?)?;
        Ok(RegionColumns::from_assignments(dataset, features, &rows))
    }

    /// Splits every feature file into `train/` and `test/` partitions by its
    /// `split` column. Outliers go to neither.
    pub fn split_features(&self) -> Result<Vec<PathBuf>, FareHexError> {
        let features_dir = self.config.features_dir();
        let inputs = list_files(&features_dir, Some(FEATURES_PREFIX), "parquet")?;
        let partitions = [
            (SplitLabel::Train, features_dir.join(TRAIN_DIR)),
            (SplitLabel::Test, features_dir.join(TEST_DIR)),
        ];
        for (_, dir) in &partitions {
            fs::create_dir_all(dir)?;
        }

        let written: Vec<Vec<PathBuf>> = inputs
            .par_iter()
            .map(|input| -> Result<Vec<PathBuf>, FareHexError> {
                let Some(name) = input.file_name() else {
                    return Ok(Vec::new());
                };
                let outputs: Vec<(SplitLabel, PathBuf)> = partitions
                    .iter()
                    .map(|(label, dir)| (*label, dir.join(name)))
                    .collect();
                if outputs.iter().all(|(_, path)| path.exists()) {
                    info!("Skipping {}: partitions already exist", input.display());
                    return Ok(outputs.into_iter().map(|(_, path)| path).collect());
                }

                let table = read_parquet_table(input)?;
                let splits = table
                    .column_by_name("split")
                    .and_then(|c| c.as_any().downcast_ref::<UInt8Array>())
                    .ok_or_else(|| {
                        FareHexError::Parquet(format!("{} has no UInt8 split column", input.display()))
                    })?;

                let mut paths = Vec::with_capacity(outputs.len());
                for (label, output) in outputs {
                    let mask: BooleanArray = splits
                        .iter()
                        .map(|value| Some(value == Some(label.as_u8())))
                        .collect();
                    let partition = filter_record_batch(&table, &mask)?;
                    write_parquet(&partition, &output)?;
                    info!("Saved {} ({} rows)", output.display(), partition.num_rows());
                    paths.push(output);
                }
                Ok(paths)
            })
            .collect::<Result<_, FareHexError>>()?;

        Ok(written.into_iter().flatten().collect())
    }

    fn read_trips(&self, path: &Path) -> Result<Vec<TripRecord>, FareHexError> {
        let has_headers = match self.config.trips.has_headers {
            Some(has_headers) => has_headers,
            None => detect_headers(path)?,
        };
        debug!("{}: reading with has_headers={}", path.display(), has_headers);

        let result = CsvTripFile::new(path)
            .with_headers(has_headers)
            .with_limit(self.config.trips.limit)
            .read_trips()?;
        Ok(result.records)
    }
}

/// A trip file has a header row when its first line names the coordinate
/// columns.
fn detect_headers(path: &Path) -> Result<bool, FareHexError> {
    let mut first_line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first_line)?;
    Ok(first_line.contains("pickup_latitude"))
}

/// Files in `dir` with the given extension and optional name prefix, sorted
/// by path. A missing directory yields no files.
fn list_files(dir: &Path, prefix: Option<&str>, extension: &str) -> Result<Vec<PathBuf>, FareHexError> {
    if !dir.exists() {
        warn!("{} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let matches_prefix = match prefix {
            Some(prefix) => path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&format!("{prefix}_"))),
            None => true,
        };
        if matches_prefix {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn ensure_parent(path: &Path) -> Result<(), FareHexError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
