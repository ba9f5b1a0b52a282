//! Descriptor presets for each backend family.
//!
//! Numbers are representative, not vendor data sheet values. Profiles
//! override them per camera.

use contracts::{
    BackendFamily, CameraDescriptor, CameraId, Capabilities, Rotation, SensorTransform,
    ShutterKind, SizeRestriction, SubareaSize, TimingConstants,
};

/// Descriptor preset for `family`
pub fn descriptor_for(family: BackendFamily, id: CameraId, name: &str) -> CameraDescriptor {
    let base = CameraDescriptor {
        id,
        name: name.to_string(),
        family,
        sensor_width: 4096,
        sensor_height: 4096,
        binnings: vec![1, 2, 4, 8],
        restriction: SizeRestriction::None,
        transform: SensorTransform::default(),
        timing: TimingConstants::default(),
        capabilities: Capabilities::default(),
    };

    match family {
        BackendFamily::Gatan => CameraDescriptor {
            timing: TimingConstants {
                startup_delay_ms: 60.0,
                built_in_settling_s: 0.0,
                min_drift_s: 0.05,
                dead_time_ms: 30.0,
                insertion_delay_ms: 2000,
                ..TimingConstants::default()
            },
            capabilities: Capabilities {
                can_save_frames: true,
                can_align_frames: true,
                retractable: true,
                supports_scripts: true,
                ..Capabilities::default()
            },
            ..base
        },
        BackendFamily::Tietz => CameraDescriptor {
            restriction: SizeRestriction::Block { block: 16 },
            timing: TimingConstants {
                startup_delay_ms: 120.0,
                built_in_settling_s: 0.1,
                dead_time_ms: 50.0,
                ..TimingConstants::default()
            },
            capabilities: Capabilities {
                retractable: true,
                processes_internally: true,
                ..Capabilities::default()
            },
            ..base
        },
        BackendFamily::Fei => CameraDescriptor {
            restriction: SizeRestriction::Subareas {
                sizes: vec![
                    SubareaSize {
                        width: 512,
                        height: 512,
                    },
                    SubareaSize {
                        width: 1024,
                        height: 1024,
                    },
                    SubareaSize {
                        width: 2048,
                        height: 2048,
                    },
                    SubareaSize {
                        width: 4096,
                        height: 4096,
                    },
                ],
            },
            timing: TimingConstants {
                startup_delay_ms: 40.0,
                extra_beam_time_s: 0.05,
                dead_time_ms: 20.0,
                ..TimingConstants::default()
            },
            capabilities: Capabilities {
                shutter: ShutterKind::BeamBlankOnly,
                reliable_shutter_feedback: false,
                can_save_frames: true,
                processes_internally: true,
                ..Capabilities::default()
            },
            ..base
        },
        BackendFamily::DirectElectron => CameraDescriptor {
            sensor_width: 5120,
            sensor_height: 3840,
            binnings: vec![1, 2, 4],
            restriction: SizeRestriction::Modulo {
                size_x: 64,
                size_y: 64,
                offset_x: 32,
                offset_y: 32,
            },
            transform: SensorTransform {
                rotation: Rotation::Cw90,
                flip_x: false,
            },
            timing: TimingConstants {
                startup_delay_ms: 20.0,
                dead_time_ms: 10.0,
                per_frame_readout_ms: 2.5,
                ..TimingConstants::default()
            },
            capabilities: Capabilities {
                shutter: ShutterKind::None,
                can_save_frames: true,
                can_align_frames: true,
                ..Capabilities::default()
            },
            ..base
        },
        BackendFamily::Plugin => CameraDescriptor {
            sensor_width: 2048,
            sensor_height: 2048,
            ..base
        },
        BackendFamily::Amt => CameraDescriptor {
            sensor_width: 2048,
            sensor_height: 2048,
            binnings: vec![1, 2, 4],
            timing: TimingConstants {
                startup_delay_ms: 80.0,
                dead_time_ms: 40.0,
                ..TimingConstants::default()
            },
            capabilities: Capabilities {
                shutter: ShutterKind::BeamBlankOnly,
                ..Capabilities::default()
            },
            ..base
        },
        BackendFamily::Simulated => CameraDescriptor {
            sensor_width: 1024,
            sensor_height: 1024,
            binnings: vec![1, 2, 4],
            ..base
        },
    }
}

/// STEM detector preset coupled to the viewing screen when `coupled`
pub fn stem_detector(id: CameraId, name: &str, coupled: bool) -> CameraDescriptor {
    let mut descriptor = descriptor_for(BackendFamily::Simulated, id, name);
    descriptor.capabilities.is_stem = true;
    descriptor.capabilities.screen_coupled_stem = coupled;
    descriptor.capabilities.shutter = ShutterKind::BeamBlankOnly;
    descriptor.timing.default_flyback_us = 500.0;
    descriptor.timing.default_scan_startup_us = 100.0;
    descriptor
}
