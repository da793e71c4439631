//! End-to-end PSF bead analysis.
//!
//! Runs the full pipeline over a dataset: saturation pre-check, per-channel
//! bead detection, per-bead profiling, dataset-wide outlier classification,
//! per-channel bead averaging, then table, key-measurement and ROI
//! assembly. Per-bead degradations (failed fits, outliers) are reported
//! through the sink and flagged in the output; only structural problems
//! with the input abort the run.

use ndarray::Array3;

use crate::averaging;
use crate::config::AnalysisConfig;
use crate::dataset::{BeadDataset, ChannelIndex, ImageId, VoxelSize};
use crate::detection::{self, BeadCandidate};
use crate::diagnostics::{AnalysisEvent, EventSink};
use crate::error::{AnalysisError, SaturationError};
use crate::outliers;
use crate::processor::{self, ProcessedBead, ProfileAxis};
use crate::report::{
    AggregateStat, AverageBeadMeasurements, BeadCrop, BeadRecord, ChannelKeyMeasurements,
    FlagClass, ProfileRow, PsfBeadsOutput, Roi, RoiPoint,
};

/// One detected bead with everything known about it before record assembly.
struct BeadState {
    image_index: usize,
    image: ImageId,
    channel: ChannelIndex,
    candidate: BeadCandidate,
    /// Present only for structurally valid candidates.
    processed: Option<ProcessedBead>,
    intensity: processor::IntensityStats,
}

impl BeadState {
    fn structurally_valid(&self) -> bool {
        self.candidate.structurally_valid()
    }
}

/// Analyse every image and channel of the dataset.
///
/// Output rows are ordered by (image declaration order, channel index, bead
/// id). Only the first timepoint of each image is analysed.
pub fn analyse_psf_beads(
    dataset: &BeadDataset,
    config: &AnalysisConfig,
    sink: &mut dyn EventSink,
) -> Result<PsfBeadsOutput, AnalysisError> {
    config.validate()?;
    dataset.validate()?;
    check_saturation(dataset)?;

    let beads = detect_and_process(dataset, config, sink);

    let intensities: Vec<f64> = beads.iter().map(|b| b.intensity.max).collect();
    let eligible: Vec<bool> = beads.iter().map(|b| b.structurally_valid()).collect();
    let outliers = outliers::classify_intensity_outliers(
        &intensities,
        &eligible,
        config.robust_z_score_threshold,
    );
    for (bead, (&score, &flagged)) in beads
        .iter()
        .zip(outliers.scores.iter().zip(&outliers.outlier))
    {
        if flagged {
            sink.record(AnalysisEvent::OutlierFlagged {
                image: bead.image.clone(),
                channel: bead.channel,
                bead: bead.candidate.id,
                score,
            });
        }
    }

    let records = build_records(dataset, &beads, &outliers, config);
    emit_image_summaries(dataset, &records, sink);

    let average_beads = build_average_beads(dataset, config, &beads, &records, sink);

    let mut output = PsfBeadsOutput {
        bead_records: records,
        ..PsfBeadsOutput::default()
    };
    build_profiles(&beads, &mut output);
    build_key_measurements(dataset, &average_beads, &mut output);
    build_rois(dataset, &mut output);
    output.bead_crops = beads
        .into_iter()
        .map(|bead| BeadCrop {
            image: bead.image,
            channel: bead.channel,
            bead: bead.candidate.id,
            data: bead.candidate.crop,
        })
        .collect();

    Ok(output)
}

/// Run-fatal saturation pre-check over every image and channel.
fn check_saturation(dataset: &BeadDataset) -> Result<(), AnalysisError> {
    let mut channels = Vec::new();
    for image in &dataset.images {
        for channel in image.saturated_channels() {
            channels.push((image.id.clone(), channel));
        }
    }
    if channels.is_empty() {
        Ok(())
    } else {
        Err(SaturationError { channels }.into())
    }
}

fn detect_and_process(
    dataset: &BeadDataset,
    config: &AnalysisConfig,
    sink: &mut dyn EventSink,
) -> Vec<BeadState> {
    let mut beads = Vec::new();
    for (image_index, image) in dataset.images.iter().enumerate() {
        if image.timepoints() > 1 {
            sink.record(AnalysisEvent::MultipleTimepoints {
                image: image.id.clone(),
                timepoints: image.timepoints(),
            });
        }
        for (c, volume) in image.channel_volumes().into_iter().enumerate() {
            let channel = ChannelIndex(c);
            let candidates = detection::find_beads(
                &volume,
                config.smoothing_sigma,
                config.min_bead_distance,
                config.peak_relative_threshold,
            );
            sink.record(AnalysisEvent::ChannelDetected {
                image: image.id.clone(),
                channel,
                total: candidates.len(),
                structurally_valid: candidates
                    .iter()
                    .filter(|b| b.structurally_valid())
                    .count(),
                self_proximity: candidates.iter().filter(|b| b.self_proximity).count(),
                lateral_edge: candidates.iter().filter(|b| b.lateral_edge).count(),
            });

            for candidate in candidates {
                let processed = candidate
                    .structurally_valid()
                    .then(|| processor::process_bead(&candidate.crop, config.profile_model));
                if let Some(processed) = &processed {
                    for axis in ProfileAxis::ALL {
                        if let Err(err) = &processed.axis(axis).fit {
                            sink.record(AnalysisEvent::FitFailed {
                                image: image.id.clone(),
                                channel,
                                bead: candidate.id,
                                axis,
                                reason: err.to_string(),
                            });
                        }
                    }
                }
                let intensity = match &processed {
                    Some(p) => p.intensity,
                    None => processor::intensity_stats(&candidate.crop),
                };
                beads.push(BeadState {
                    image_index,
                    image: image.id.clone(),
                    channel,
                    candidate,
                    processed,
                    intensity,
                });
            }
        }
    }
    beads
}

/// A fit counts as bad when it failed outright or converged below the R²
/// threshold.
fn bad_fit(
    processed: &ProcessedBead,
    axis: ProfileAxis,
    r2_threshold: f64,
) -> bool {
    match &processed.axis(axis).fit {
        Ok(fit) => fit.r2 < r2_threshold,
        Err(_) => true,
    }
}

fn build_records(
    dataset: &BeadDataset,
    beads: &[BeadState],
    outliers: &outliers::OutlierClassification,
    config: &AnalysisConfig,
) -> Vec<BeadRecord> {
    beads
        .iter()
        .zip(outliers.scores.iter().zip(&outliers.outlier))
        .map(|(bead, (&score, &outlier))| {
            let voxel = dataset.images[bead.image_index].voxel_size_micron;
            let (axial_edge, bad_fit_z, bad_fit_y, bad_fit_x) = match &bead.processed {
                Some(p) => (
                    p.axial_edge,
                    bad_fit(p, ProfileAxis::Z, config.fit_r2_threshold),
                    bad_fit(p, ProfileAxis::Y, config.fit_r2_threshold),
                    bad_fit(p, ProfileAxis::X, config.fit_r2_threshold),
                ),
                None => (false, false, false, false),
            };
            let valid = bead.structurally_valid()
                && !axial_edge
                && !outlier
                && !bad_fit_z
                && !bad_fit_y
                && !bad_fit_x;
            let fit = |axis| bead.processed.as_ref().and_then(|p| p.fit_r2(axis));
            let fwhm_px = |axis| bead.processed.as_ref().and_then(|p| p.fwhm_pixel(axis));
            let fwhm_um = |axis| {
                bead.processed
                    .as_ref()
                    .and_then(|p| p.fwhm_micron(axis, voxel))
            };
            BeadRecord {
                image: bead.image.clone(),
                channel: bead.channel,
                bead: bead.candidate.id,
                center_z: bead.candidate.center[0],
                center_y: bead.candidate.center[1],
                center_x: bead.candidate.center[2],
                valid,
                lateral_edge: bead.candidate.lateral_edge,
                self_proximity: bead.candidate.self_proximity,
                axial_edge,
                intensity_outlier: outlier,
                bad_fit_z,
                bad_fit_y,
                bad_fit_x,
                intensity_max: bead.intensity.max,
                intensity_min: bead.intensity.min,
                intensity_std: bead.intensity.std,
                max_intensity_robust_z_score: score,
                fit_r2_z: fit(ProfileAxis::Z),
                fit_r2_y: fit(ProfileAxis::Y),
                fit_r2_x: fit(ProfileAxis::X),
                fwhm_pixel_z: fwhm_px(ProfileAxis::Z),
                fwhm_pixel_y: fwhm_px(ProfileAxis::Y),
                fwhm_pixel_x: fwhm_px(ProfileAxis::X),
                fwhm_micron_z: fwhm_um(ProfileAxis::Z),
                fwhm_micron_y: fwhm_um(ProfileAxis::Y),
                fwhm_micron_x: fwhm_um(ProfileAxis::X),
                fwhm_lateral_asymmetry_ratio: bead
                    .processed
                    .as_ref()
                    .and_then(|p| p.lateral_asymmetry_ratio()),
            }
        })
        .collect()
}

fn emit_image_summaries(dataset: &BeadDataset, records: &[BeadRecord], sink: &mut dyn EventSink) {
    for image in &dataset.images {
        let image_records = records.iter().filter(|r| r.image == image.id);
        let mut valid = 0;
        let mut lateral_edge = 0;
        let mut self_proximity = 0;
        let mut axial_edge = 0;
        let mut intensity_outlier = 0;
        let mut bad_fit = 0;
        for record in image_records {
            if record.valid {
                valid += 1;
            }
            if record.lateral_edge {
                lateral_edge += 1;
            }
            if record.self_proximity {
                self_proximity += 1;
            }
            if record.axial_edge {
                axial_edge += 1;
            }
            if record.intensity_outlier {
                intensity_outlier += 1;
            }
            if record.bad_fit_z || record.bad_fit_y || record.bad_fit_x {
                bad_fit += 1;
            }
        }
        sink.record(AnalysisEvent::ImageProcessed {
            image: image.id.clone(),
            valid,
            lateral_edge,
            self_proximity,
            axial_edge,
            intensity_outlier,
            bad_fit,
        });
    }
}

/// Build, fit and measure the per-channel average beads.
fn build_average_beads(
    dataset: &BeadDataset,
    config: &AnalysisConfig,
    beads: &[BeadState],
    records: &[BeadRecord],
    sink: &mut dyn EventSink,
) -> Vec<Option<AverageBeadMeasurements>> {
    let channel_count = dataset.channel_count();
    let voxel = match dataset.common_voxel_size() {
        Some(voxel) => voxel,
        None => {
            sink.record(AnalysisEvent::AveragingSkippedVoxelMismatch);
            return vec![None; channel_count];
        }
    };

    (0..channel_count)
        .map(|c| {
            let channel = ChannelIndex(c);
            let crops: Vec<&Array3<f64>> = beads
                .iter()
                .zip(records)
                .filter(|(bead, record)| bead.channel == channel && record.valid)
                .map(|(bead, _)| &bead.candidate.crop)
                .collect();
            let average = averaging::average_bead_volumes(&crops, channel, sink)?;
            Some(measure_average_bead(
                &average,
                channel,
                voxel,
                config,
                sink,
            ))
        })
        .collect()
}

fn measure_average_bead(
    average: &Array3<f64>,
    channel: ChannelIndex,
    voxel: Option<VoxelSize>,
    config: &AnalysisConfig,
    sink: &mut dyn EventSink,
) -> AverageBeadMeasurements {
    let processed = processor::process_bead(average, config.profile_model);
    for axis in ProfileAxis::ALL {
        if let Err(err) = &processed.axis(axis).fit {
            sink.record(AnalysisEvent::AverageBeadFitFailed {
                channel,
                axis,
                reason: err.to_string(),
            });
        }
    }
    AverageBeadMeasurements {
        fit_r2: ProfileAxis::ALL.map(|axis| processed.fit_r2(axis)),
        fwhm_pixel: ProfileAxis::ALL.map(|axis| processed.fwhm_pixel(axis)),
        fwhm_micron: ProfileAxis::ALL.map(|axis| processed.fwhm_micron(axis, voxel)),
        fwhm_lateral_asymmetry_ratio: processed.lateral_asymmetry_ratio(),
    }
}

fn build_profiles(beads: &[BeadState], output: &mut PsfBeadsOutput) {
    for bead in beads {
        let Some(processed) = &bead.processed else {
            continue;
        };
        for (axis, table) in [
            (ProfileAxis::Z, &mut output.bead_profiles_z),
            (ProfileAxis::Y, &mut output.bead_profiles_y),
            (ProfileAxis::X, &mut output.bead_profiles_x),
        ] {
            // Failed fits still contribute a row; only the fitted curve is
            // absent.
            let axis_profile = processed.axis(axis);
            table.push(ProfileRow {
                image: bead.image.clone(),
                channel: bead.channel,
                bead: bead.candidate.id,
                raw: axis_profile.profile.clone(),
                fitted: axis_profile
                    .fit
                    .as_ref()
                    .ok()
                    .map(|fit| fit.fitted.clone()),
            });
        }
    }
}

fn build_key_measurements(
    dataset: &BeadDataset,
    average_beads: &[Option<AverageBeadMeasurements>],
    output: &mut PsfBeadsOutput,
) {
    for c in 0..dataset.channel_count() {
        let channel = ChannelIndex(c);
        let rows: Vec<&BeadRecord> = output
            .bead_records
            .iter()
            .filter(|r| r.channel == channel)
            .collect();
        let count =
            |class: FlagClass| rows.iter().filter(|r| r.primary_class() == class).count();
        let valid: Vec<&BeadRecord> = rows.iter().filter(|r| r.valid).copied().collect();
        let agg = |get: fn(&BeadRecord) -> f64| {
            AggregateStat::from_values(&valid.iter().map(|&r| get(r)).collect::<Vec<f64>>())
        };
        let agg_opt = |get: fn(&BeadRecord) -> Option<f64>| {
            AggregateStat::from_options(&valid.iter().map(|&r| get(r)).collect::<Vec<_>>())
        };
        output.key_measurements.push(ChannelKeyMeasurements {
            channel,
            total_count: rows.len(),
            valid_count: count(FlagClass::Valid),
            lateral_edge_count: count(FlagClass::LateralEdge),
            self_proximity_count: count(FlagClass::SelfProximity),
            axial_edge_count: count(FlagClass::AxialEdge),
            intensity_outlier_count: count(FlagClass::IntensityOutlier),
            bad_fit_z_count: count(FlagClass::BadFitZ),
            bad_fit_y_count: count(FlagClass::BadFitY),
            bad_fit_x_count: count(FlagClass::BadFitX),
            intensity_max: agg(|r| r.intensity_max),
            intensity_min: agg(|r| r.intensity_min),
            intensity_std: agg(|r| r.intensity_std),
            fit_r2_z: agg_opt(|r| r.fit_r2_z),
            fit_r2_y: agg_opt(|r| r.fit_r2_y),
            fit_r2_x: agg_opt(|r| r.fit_r2_x),
            fwhm_pixel_z: agg_opt(|r| r.fwhm_pixel_z),
            fwhm_pixel_y: agg_opt(|r| r.fwhm_pixel_y),
            fwhm_pixel_x: agg_opt(|r| r.fwhm_pixel_x),
            fwhm_micron_z: agg_opt(|r| r.fwhm_micron_z),
            fwhm_micron_y: agg_opt(|r| r.fwhm_micron_y),
            fwhm_micron_x: agg_opt(|r| r.fwhm_micron_x),
            fwhm_lateral_asymmetry_ratio: agg_opt(|r| r.fwhm_lateral_asymmetry_ratio),
            average_bead: average_beads.get(c).cloned().flatten(),
        });
    }
}

/// One centre-point ROI per (image, flag class) pair with at least one
/// member.
fn build_rois(dataset: &BeadDataset, output: &mut PsfBeadsOutput) {
    for image in &dataset.images {
        for class in FlagClass::ALL {
            let points: Vec<RoiPoint> = output
                .bead_records
                .iter()
                .filter(|r| r.image == image.id && r.flag(class))
                .map(|r| RoiPoint {
                    name: format!("channel-{}_bead-{}", r.channel, r.bead),
                    z: r.center_z as f64,
                    y: r.center_y as f64 + 0.5,
                    x: r.center_x as f64 + 0.5,
                    channel: r.channel,
                    stroke_color: class.stroke_color(),
                    stroke_width: class.stroke_width(),
                })
                .collect();
            if points.is_empty() {
                continue;
            }
            output.rois.push((
                class,
                Roi {
                    name: format!("{}_bead_centers_{}", class, image.id),
                    description: format!("centers of {} beads", class),
                    image: image.id.clone(),
                    points,
                },
            ));
        }
    }
}
