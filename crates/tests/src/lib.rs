//! # Integration Tests
//!
//! Cross-crate tests of the acquisition core.
//!
//! Covers:
//! - Geometry and timing properties over swept inputs
//! - Reference cache bounds under churn
//! - End-to-end sessions against the simulated camera and microscope

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};

    const PROFILE: &str = r#"
[[cameras]]
id = 1
name = "sim"
family = "simulated"
sensor_width = 1024
sensor_height = 1024
binnings = [1, 2, 4]

[acquisition]
retry_limit = 1

[[control_sets]]
name = "view"
camera = 1
exposure_s = 0.1
"#;

    #[test]
    fn test_profile_round_trip() {
        let profile = ConfigLoader::load_from_str(PROFILE, ConfigFormat::Toml).unwrap();
        assert_eq!(profile.acquisition.retry_limit, 1);
        assert!(profile.control_set("view").is_some());

        let json = ConfigLoader::to_json(&profile).unwrap();
        let reparsed = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(reparsed, profile);
    }
}

#[cfg(test)]
mod geometry_properties {
    use backends::descriptor_for;
    use contracts::{
        AcquisitionError, BackendFamily, CameraDescriptor, Roi, SizeRestriction, SubareaSize,
    };
    use normalizer::{resolve_geometry, satisfies_restriction};

    fn descriptors() -> Vec<CameraDescriptor> {
        let mut out: Vec<CameraDescriptor> = [
            BackendFamily::Gatan,
            BackendFamily::Tietz,
            BackendFamily::Fei,
            BackendFamily::DirectElectron,
            BackendFamily::Plugin,
            BackendFamily::Amt,
            BackendFamily::Simulated,
        ]
        .into_iter()
        .map(|f| descriptor_for(f, 1, "cam"))
        .collect();

        let mut block = descriptor_for(BackendFamily::Simulated, 2, "block");
        block.restriction = SizeRestriction::Block { block: 8 };
        out.push(block);

        let mut subareas = descriptor_for(BackendFamily::Simulated, 3, "subareas");
        subareas.restriction = SizeRestriction::Subareas {
            sizes: vec![
                SubareaSize {
                    width: 256,
                    height: 256,
                },
                SubareaSize {
                    width: 512,
                    height: 512,
                },
                SubareaSize {
                    width: 1024,
                    height: 1024,
                },
            ],
        };
        out.push(subareas);
        out
    }

    fn requests(width: u32, height: u32) -> Vec<Option<Roi>> {
        let mut out = vec![None];
        let steps = [0, 1, 7, 33, width / 5, width / 2, width - 3];
        for &left in &steps {
            for &extent in &[1, 63, 100, 257, width / 3, width] {
                let top = (left / 2).min(height.saturating_sub(1));
                out.push(Some(Roi::new(
                    left,
                    top,
                    left.saturating_add(extent),
                    top.saturating_add(extent),
                )));
            }
        }
        out
    }

    #[test]
    fn test_resolved_roi_within_bounds_and_aligned() {
        for descriptor in descriptors() {
            let (w, h) = (descriptor.sensor_width, descriptor.sensor_height);
            for roi in requests(w, h) {
                for binning in [1, 2, 3, 4, 8] {
                    match resolve_geometry(roi, binning, &descriptor) {
                        Ok(geometry) => {
                            assert!(
                                geometry.roi.fits_within(w, h),
                                "{:?} {roi:?} b{binning} -> {geometry:?}",
                                descriptor.family
                            );
                            assert!(
                                satisfies_restriction(&geometry, &descriptor),
                                "{:?} {roi:?} b{binning} -> {geometry:?}",
                                descriptor.family
                            );
                        }
                        Err(e) => assert!(
                            matches!(e, AcquisitionError::Configuration { .. }),
                            "unexpected error kind {e}"
                        ),
                    }
                }
            }
        }
    }

    #[test]
    fn test_modulo_camera_requiring_binning_two() {
        let mut descriptor = descriptor_for(BackendFamily::Simulated, 1, "k");
        descriptor.binnings = vec![2, 4];
        descriptor.restriction = SizeRestriction::Modulo {
            size_x: 64,
            size_y: 64,
            offset_x: 32,
            offset_y: 32,
        };

        let geometry = resolve_geometry(None, 1, &descriptor).unwrap();
        assert_eq!(geometry.binning, 2);
        let (w, h) = geometry.image_size();
        assert_eq!(w % 64, 0);
        assert_eq!(h % 64, 0);
    }
}

#[cfg(test)]
mod timing_properties {
    use backends::{descriptor_for, stem_detector};
    use contracts::{BackendFamily, CaptureRequest, ShutterKind, ShutterMode};
    use normalizer::resolve_timing;

    #[test]
    fn test_delays_never_negative() {
        let mut cameras: Vec<_> = [
            BackendFamily::Gatan,
            BackendFamily::Fei,
            BackendFamily::DirectElectron,
            BackendFamily::Amt,
        ]
        .into_iter()
        .map(|f| descriptor_for(f, 1, "cam"))
        .collect();
        cameras.push(stem_detector(1, "stem", true));
        let mut unshuttered = descriptor_for(BackendFamily::Simulated, 1, "bare");
        unshuttered.capabilities.shutter = ShutterKind::None;
        unshuttered.timing.startup_delay_ms = 40.0;
        cameras.push(unshuttered);

        for descriptor in &cameras {
            for exposure in [0.0, 0.001, 0.05, 0.5, 3.0] {
                for drift in [0.0, 0.2, 1.5] {
                    for shutter in [
                        ShutterMode::BeamBlank,
                        ShutterMode::FilmShutter,
                        ShutterMode::DualShutter,
                    ] {
                        let mut request =
                            CaptureRequest::new("t", 1, exposure).with_shutter(shutter);
                        request.drift_settle_s = drift;
                        let Ok(plan) = resolve_timing(&request, descriptor) else {
                            continue;
                        };
                        assert!(
                            plan.min_delay_ms() >= 0.0,
                            "{:?} exp {exposure} drift {drift} {shutter:?}: {plan:?}",
                            descriptor.family
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod cache_properties {
    use contracts::{CacheConfig, ControlSetKind, ImageBuffer, ResolvedGeometry, Roi};
    use reference_cache::{CacheLookup, ReferenceCache, ReferenceQuery};

    fn geometry(size: u32) -> ResolvedGeometry {
        ResolvedGeometry {
            roi: Roi::full(size, size),
            binning: 1,
        }
    }

    #[test]
    fn test_resident_bytes_and_use_counts_bounded() {
        let bound = 64 * 64 * 2 * 5;
        let mut cache = ReferenceCache::new(CacheConfig {
            max_resident_bytes: bound,
            max_darks_per_group: 3,
            ..CacheConfig::default()
        });

        let groups = [ControlSetKind::View, ControlSetKind::Record];
        for i in 0..60u32 {
            let camera = i % 3;
            let exposure = 0.1 * f64::from(i % 7 + 1);
            let group = groups[(i % 2) as usize];
            let query = if i % 5 == 0 {
                ReferenceQuery::gain(camera, geometry(64))
            } else {
                ReferenceQuery::dark(camera, geometry(64), exposure).with_group(group)
            };

            if let CacheLookup::Exact {
                id,
                needs_refresh: true,
            } = cache.get_or_create(&query)
            {
                cache
                    .commit(id, ImageBuffer::filled_u16(64, 64, i as u16))
                    .unwrap();
            }

            let stats = cache.stats();
            assert!(
                stats.resident_bytes <= bound,
                "step {i}: {} > {bound}",
                stats.resident_bytes
            );
            for (_, entry) in cache.iter() {
                assert!(entry.use_count <= cache.use_counter());
            }
        }
        assert!(cache.stats().evictions > 0);
    }
}

#[cfg(test)]
mod session_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use backends::{
        descriptor_for, RecordingStatus, ScopeConfig, SimulatedCamera, SimulatedConfig,
        SimulatedScope,
    };
    use contracts::{
        AcquisitionConfig, AcquisitionError, BackendFamily, CameraDescriptor, CaptureRequest,
        Phase, ProcessingMode, ReferenceKind, SizeRestriction,
    };
    use sequencer::{AcquisitionHost, CaptureSequencer};

    const LIMIT: Duration = Duration::from_secs(10);

    struct Harness {
        host: AcquisitionHost,
        camera: Arc<SimulatedCamera>,
        status: Arc<RecordingStatus>,
    }

    fn harness_with(
        descriptor: CameraDescriptor,
        camera: SimulatedConfig,
        tweak: impl FnOnce(&mut AcquisitionConfig),
    ) -> Harness {
        let camera = Arc::new(SimulatedCamera::with_config(camera));
        let scope = Arc::new(SimulatedScope::with_config(ScopeConfig::default()));
        let status = Arc::new(RecordingStatus::new());

        let mut config = AcquisitionConfig::default();
        config.scheduler_tick_ms = 1;
        config.stop_grace_ms = 50;
        tweak(&mut config);

        let mut sequencer = CaptureSequencer::new(config, scope, status.clone());
        sequencer
            .register_camera(descriptor, camera.clone())
            .unwrap();
        Harness {
            host: AcquisitionHost::new(sequencer),
            camera,
            status,
        }
    }

    fn simulated() -> CameraDescriptor {
        let mut descriptor = descriptor_for(BackendFamily::Simulated, 1, "sim");
        descriptor.timing.insertion_delay_ms = 0;
        descriptor.timing.timeout_margin_ms = 0;
        descriptor
    }

    #[test]
    fn test_cleanup_twice_leaves_idle() {
        let mut h = harness_with(simulated(), SimulatedConfig::default(), |_| {});
        let request =
            CaptureRequest::new("record", 1, 0.05).with_processing(ProcessingMode::DarkSubtracted);
        h.host.capture(request).unwrap();
        assert!(!h.host.is_idle());

        h.host.cleanup();
        let first = h.host.phase();
        h.host.cleanup();

        assert_eq!(first, Phase::Idle);
        assert_eq!(h.host.phase(), Phase::Idle);
        assert!(h.host.pending_tasks().is_empty());
        assert!(!h.host.sequencer().workers_busy());
        assert_eq!(h.host.sequencer().cache().stats().placeholders, 0);
        assert_eq!(h.host.sequencer().counters().cleanups, 2);
        assert_eq!(h.camera.restore_count(), 1);
        assert!(h.status.failures().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_timeouts_stop_at_retry_limit() {
        let mut h = harness_with(
            simulated(),
            SimulatedConfig {
                hangs: 10,
                ..Default::default()
            },
            |config| {
                config.retry_limit = 2;
                config.timeouts.base_margin_ms = 30;
            },
        );
        h.host.capture(CaptureRequest::new("record", 1, 0.01)).unwrap();
        h.host.drive_until_idle(LIMIT).await.unwrap();

        let err = h.host.take_result().unwrap().unwrap_err();
        assert!(matches!(err, AcquisitionError::Fatal { .. }), "{err}");
        assert_eq!(h.host.sequencer().counters().retries, 2);
        assert_eq!(h.camera.acquisition_count(), 3);
        assert_eq!(h.status.failures().len(), 1);
        assert_eq!(h.host.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_transient_failure_replayed_once() {
        let mut h = harness_with(
            simulated(),
            SimulatedConfig {
                transient_failures: 1,
                ..Default::default()
            },
            |_| {},
        );
        h.host.capture(CaptureRequest::new("record", 1, 0.01)).unwrap();
        h.host.drive_until_idle(LIMIT).await.unwrap();

        let frame = h.host.take_result().unwrap().unwrap();
        assert_eq!(frame.retries, 1);
        assert!(h.status.failures().is_empty());
    }

    #[test]
    fn test_gain_reference_created_once_and_reused() {
        let mut descriptor = simulated();
        descriptor.binnings = vec![2, 4];
        descriptor.restriction = SizeRestriction::Modulo {
            size_x: 64,
            size_y: 64,
            offset_x: 32,
            offset_y: 32,
        };
        let mut h = harness_with(descriptor, SimulatedConfig::default(), |_| {});
        let request = CaptureRequest::new("record", 1, 0.5)
            .with_binning(1)
            .with_processing(ProcessingMode::GainNormalized);

        h.host.capture(request.clone()).unwrap();
        h.host.run_until_idle(LIMIT).unwrap();
        let frame = h.host.take_result().unwrap().unwrap();
        assert_eq!(frame.geometry.binning, 2);
        assert_eq!(frame.image.size().0 % 64, 0);
        assert_eq!(frame.image.size().1 % 64, 0);

        let gains = |host: &AcquisitionHost| {
            host.sequencer()
                .cache()
                .iter()
                .filter(|(_, e)| e.kind == ReferenceKind::Gain)
                .map(|(id, e)| (id, e.created, e.buffer.clone()))
                .collect::<Vec<_>>()
        };
        let first = gains(&h.host);
        assert_eq!(first.len(), 1);
        let references = h.camera.reference_count();

        h.host.capture(request).unwrap();
        h.host.run_until_idle(LIMIT).unwrap();
        assert!(h.host.take_result().unwrap().is_ok());

        let second = gains(&h.host);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, first[0].0);
        assert_eq!(second[0].1, first[0].1);
        let (Some(a), Some(b)) = (&first[0].2, &second[0].2) else {
            panic!("gain reference missing its buffer");
        };
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(h.camera.reference_count(), references);
    }

    #[test]
    fn test_resolved_dark_survives_gain_commit_under_pressure() {
        let descriptor = simulated();
        let dark_request = CaptureRequest::new("record", 1, 0.1)
            .with_binning(4)
            .with_processing(ProcessingMode::DarkSubtracted);
        let gain_request = dark_request
            .clone()
            .with_processing(ProcessingMode::GainNormalized);
        let (geometry, _) = normalizer::normalize(&dark_request, &descriptor).unwrap();
        let pixels = geometry.pixel_count();
        // u16 dark plus f32 gain sits one byte over the bound
        let bound = pixels * 2 + pixels * 4 - 1;
        let mut h = harness_with(descriptor, SimulatedConfig::default(), |config| {
            config.cache.max_resident_bytes = bound;
        });

        h.host.capture(dark_request).unwrap();
        h.host.run_until_idle(LIMIT).unwrap();
        assert!(h.host.take_result().unwrap().is_ok());

        h.host.capture(gain_request).unwrap();
        h.host.run_until_idle(LIMIT).unwrap();
        let frame = h.host.take_result().unwrap();
        assert!(frame.is_ok(), "{:?}", frame.err());
        assert_eq!(h.camera.reference_count(), 2);

        assert!(h.host.sequencer().cache().stats().resident_bytes <= bound);
    }

    #[test]
    fn test_bad_dark_twice_fails_without_caching() {
        let mut h = harness_with(
            simulated(),
            SimulatedConfig {
                bad_darks: 2,
                ..Default::default()
            },
            |config| config.dark_quality.bad_dark_retries = 1,
        );
        h.host
            .capture(
                CaptureRequest::new("record", 1, 0.1)
                    .with_processing(ProcessingMode::DarkSubtracted),
            )
            .unwrap();
        h.host.run_until_idle(LIMIT).unwrap();

        let err = h.host.take_result().unwrap().unwrap_err();
        assert!(
            matches!(err, AcquisitionError::HardwareCallFailure { .. }),
            "{err}"
        );
        let stats = h.host.sequencer().cache().stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.resident_bytes, 0);
        assert_eq!(h.camera.reference_count(), 2);
    }

    #[tokio::test]
    async fn test_continuous_counters_add_up() {
        let mut h = harness_with(
            simulated(),
            SimulatedConfig {
                time_scale: 0.05,
                ..Default::default()
            },
            |_| {},
        );
        h.host
            .capture(CaptureRequest::new("view", 1, 0.02).continuous())
            .unwrap();

        let mut delivered = Vec::new();
        for _ in 0..3 {
            h.host.request_next_frame();
            let frame = loop {
                h.host.tick();
                if let Some(frame) = h.host.take_continuous_frame() {
                    break frame;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            };
            delivered.push(frame);
        }
        h.host.stop_continuous();
        h.host.drive_until_idle(LIMIT).await.unwrap();

        assert!(delivered.windows(2).all(|w| w[0].started_at <= w[1].started_at));
        assert!(delivered
            .windows(2)
            .all(|w| w[0].image.content_hash() != w[1].image.content_hash()));

        let c = h.host.continuous();
        assert_eq!(c.delivered, 3);
        assert_eq!(c.frames, c.delivered + c.dropped);
        assert!(c.waited <= c.dropped);
    }
}
