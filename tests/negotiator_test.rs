//! Backend negotiation through the runtime: probing, loading, switching.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{cpu, gpu, MockBackend, MockModel, Script};
use gg_stream::engine::{
    create_session, BackendKind, GpuLayers, LoadTelemetry, OffloadReport, MAX_OFFLOAD_LAYERS,
};
use gg_stream::RuntimeConfig;

fn loaded(offloaded: u32) -> LoadTelemetry {
    LoadTelemetry {
        offloaded_layers: Some(offloaded),
        total_layers: 33,
        kv_cache_bytes: Some(64 << 20),
    }
}

#[test]
fn test_cpu_only_machine_requests_no_layers() {
    let backend = MockBackend::new(Script::default());
    let runtime = RuntimeConfig::default();

    let preference = runtime.probe_and_configure(&backend);

    assert_eq!(preference.requested_layers, 0);
    assert!(preference.accelerator.is_none());
}

#[test]
fn test_auto_offload_requests_everything_on_gpu() {
    let backend =
        MockBackend::new(Script::default()).with_accelerators(vec![cpu(), gpu(BackendKind::Vulkan)]);
    let runtime = RuntimeConfig::default();

    runtime.load_model(&backend, Path::new("model.gguf")).unwrap();

    assert_eq!(backend.log().requested_layers, vec![MAX_OFFLOAD_LAYERS]);
}

#[test]
fn test_fixed_layers_passed_to_backend() {
    let backend =
        MockBackend::new(Script::default()).with_accelerators(vec![cpu(), gpu(BackendKind::Cuda)]);
    let runtime = RuntimeConfig::default();
    runtime.set_offload_preference(GpuLayers::Fixed(12));

    runtime.load_model(&backend, Path::new("model.gguf")).unwrap();

    assert_eq!(backend.log().requested_layers, vec![12]);
}

#[test]
fn test_preferred_backend_must_match_device() {
    let backend =
        MockBackend::new(Script::default()).with_accelerators(vec![cpu(), gpu(BackendKind::Vulkan)]);
    let runtime = RuntimeConfig::default().with_backend(Some(BackendKind::Metal), GpuLayers::Auto);

    let preference = runtime.probe_and_configure(&backend);

    assert_eq!(preference.requested_layers, 0);
    assert!(preference.accelerator.is_none());
}

#[test]
fn test_zero_offload_on_gpu_forces_cpu_context() {
    let backend = MockBackend::new(Script::default())
        .with_accelerators(vec![cpu(), gpu(BackendKind::Vulkan)])
        .with_telemetry(loaded(0));
    let runtime = Arc::new(RuntimeConfig::default());

    let model = runtime.load_model(&backend, Path::new("model.gguf")).unwrap();
    let _session = create_session(&backend, &model.model, &runtime, 0).unwrap();

    let report = runtime.offload_report().unwrap();
    assert!(report.forced_cpu);
    assert!(!backend.log().context_params[0].offload_kqv);
}

#[test]
fn test_partial_offload_keeps_kqv_on_gpu() {
    let backend = MockBackend::new(Script::default())
        .with_accelerators(vec![cpu(), gpu(BackendKind::Vulkan)])
        .with_telemetry(loaded(20));
    let runtime = Arc::new(RuntimeConfig::default());

    let model = runtime.load_model(&backend, Path::new("model.gguf")).unwrap();
    let _session = create_session(&backend, &model.model, &runtime, 0).unwrap();

    assert_eq!(
        runtime.offload_report(),
        Some(OffloadReport {
            offloaded_layers: Some(20),
            total_layers: 33,
            forced_cpu: false,
            kv_cache_bytes: Some(64 << 20),
        })
    );
    assert!(backend.log().context_params[0].offload_kqv);
}

#[test]
fn test_unobserved_offload_stays_on_gpu() {
    let backend = MockBackend::new(Script::default())
        .with_accelerators(vec![cpu(), gpu(BackendKind::Vulkan)])
        .with_telemetry(LoadTelemetry { offloaded_layers: None, ..loaded(0) });
    let runtime = Arc::new(RuntimeConfig::default());

    let model = runtime.load_model(&backend, Path::new("model.gguf")).unwrap();
    let _session = create_session(&backend, &model.model, &runtime, 0).unwrap();

    assert!(!runtime.offload_report().unwrap().forced_cpu);
    assert!(backend.log().context_params[0].offload_kqv);
    let line = runtime.diagnostics().to_string();
    assert!(line.contains("offload=?/33"), "{line}");
}

#[test]
fn test_failed_load_keeps_previous_report() {
    let backend = MockBackend::new(Script::default()).with_telemetry(loaded(0));
    let runtime = RuntimeConfig::default();
    runtime.load_model(&backend, Path::new("model.gguf")).unwrap();

    assert!(runtime.load_model(&backend, Path::new("")).is_err());
    assert_eq!(runtime.offload_report().map(|r| r.total_layers), Some(33));
}

#[test]
fn test_switch_backend_refused_with_live_session() {
    let backend =
        MockBackend::new(Script::default()).with_accelerators(vec![cpu(), gpu(BackendKind::Vulkan)]);
    let runtime = Arc::new(RuntimeConfig::default());
    let session = create_session(&backend, &MockModel, &runtime, 0).unwrap();

    assert!(!runtime.switch_backend(&backend, BackendKind::Vulkan));
    drop(session);
    assert!(runtime.switch_backend(&backend, BackendKind::Vulkan));
    assert_eq!(runtime.negotiator().preferred_backend(), Some(BackendKind::Vulkan));
}

#[test]
fn test_switch_to_missing_accelerator_refused() {
    let backend = MockBackend::new(Script::default());
    let runtime = RuntimeConfig::default();

    assert!(!runtime.switch_backend(&backend, BackendKind::Cuda));
    assert!(runtime.switch_backend(&backend, BackendKind::Cpu));
    assert_eq!(runtime.probe_and_configure(&backend).requested_layers, 0);
}

#[test]
fn test_diagnostics_line() {
    let backend = MockBackend::new(Script::default())
        .with_accelerators(vec![cpu(), gpu(BackendKind::Vulkan)])
        .with_telemetry(loaded(20));
    let runtime = RuntimeConfig::default();
    runtime.load_model(&backend, Path::new("model.gguf")).unwrap();

    let line = runtime.diagnostics().to_string();

    assert!(line.contains("backend=auto"), "{line}");
    assert!(line.contains("devices=2"), "{line}");
    assert!(line.contains("offload=20/33"), "{line}");
    assert!(line.contains("kv=64.0MiB"), "{line}");
    assert!(line.contains("forced_cpu=false"), "{line}");
}

#[test]
fn test_teardown_forgets_negotiation() {
    let backend = MockBackend::new(Script::default()).with_telemetry(loaded(0));
    let runtime = RuntimeConfig::default();
    runtime.load_model(&backend, Path::new("model.gguf")).unwrap();

    runtime.teardown().unwrap();

    assert!(runtime.offload_report().is_none());
    assert!(runtime.negotiator().accelerators().is_empty());
}
